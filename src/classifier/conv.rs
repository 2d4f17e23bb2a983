use super::sequential::Sequential;
use super::{Classifier, TrainableClassifier};
use crate::data::ImageShape;
use crate::layers::{Conv2DLayer, DenseLayer, MaxPool2DLayer};
use crate::loss::softmax_cross_entropy;
use crate::utils::{chw_to_hwc, hwc_to_chw, SimpleRng};

/// Conv 3×3 (same padding) → ReLU → 2×2 max pool → Dense.
///
/// Takes HWC images like every classifier and converts to CHW planes
/// internally; input gradients are converted back.
pub struct ConvClassifier {
    shape: ImageShape,
    num_classes: usize,
    net: Sequential,
}

impl ConvClassifier {
    pub fn new(shape: ImageShape, filters: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = SimpleRng::new(seed);
        let conv = Conv2DLayer::new(shape.channels, filters, 3, 1, 1, shape.height, shape.width, &mut rng);
        let pool = MaxPool2DLayer::new(filters, conv.output_height(), conv.output_width());
        let fc_in = filters * pool.output_height() * pool.output_width();
        let fc = DenseLayer::new(fc_in, num_classes, &mut rng);

        let net = Sequential::new(shape.len())
            .push_layer(conv)
            .push_relu()
            .push_layer(pool)
            .push_layer(fc);
        Self {
            shape,
            num_classes,
            net,
        }
    }

    fn cross_entropy(&self, images: &[f32], labels: &[usize], accumulate: bool) -> (f32, Vec<f32>) {
        let batch = labels.len();
        let planes = hwc_to_chw(images, self.shape, batch);
        let trace = self.net.forward_trace(&planes, batch);
        let mut delta = vec![0.0f32; batch * self.num_classes];
        let loss = softmax_cross_entropy(&trace[trace.len() - 1], labels, self.num_classes, &mut delta);
        let grad = self.net.backward(&trace, delta, batch, accumulate);
        (loss, grad)
    }
}

impl Classifier for ConvClassifier {
    fn input_shape(&self) -> ImageShape {
        self.shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, images: &[f32], batch_size: usize) -> Vec<f32> {
        let planes = hwc_to_chw(images, self.shape, batch_size);
        self.net
            .forward_trace(&planes, batch_size)
            .pop()
            .unwrap_or_default()
    }

    fn input_gradient(&self, images: &[f32], labels: &[usize]) -> (f32, Vec<f32>) {
        let (loss, grad) = self.cross_entropy(images, labels, false);
        (loss, chw_to_hwc(&grad, self.shape, labels.len()))
    }
}

impl TrainableClassifier for ConvClassifier {
    fn accumulate_gradients(&mut self, images: &[f32], labels: &[usize]) -> f32 {
        self.cross_entropy(images, labels, true).0
    }

    fn visit_parameters(&mut self, visitor: &mut dyn FnMut(&mut [f32], &mut [f32])) {
        self.net.visit_parameters(visitor);
    }

    fn parameter_count(&self) -> usize {
        self.net.parameter_count()
    }
}

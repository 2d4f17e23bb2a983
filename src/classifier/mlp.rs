use super::sequential::Sequential;
use super::{Classifier, TrainableClassifier};
use crate::data::ImageShape;
use crate::layers::DenseLayer;
use crate::loss::softmax_cross_entropy;
use crate::utils::SimpleRng;

/// Dense → ReLU → Dense on flattened images.
pub struct MlpClassifier {
    shape: ImageShape,
    num_classes: usize,
    net: Sequential,
}

impl MlpClassifier {
    pub fn new(shape: ImageShape, hidden: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = SimpleRng::new(seed);
        let net = Sequential::new(shape.len())
            .push_layer(DenseLayer::new(shape.len(), hidden, &mut rng))
            .push_relu()
            .push_layer(DenseLayer::new(hidden, num_classes, &mut rng));
        Self {
            shape,
            num_classes,
            net,
        }
    }
}

impl Classifier for MlpClassifier {
    fn input_shape(&self) -> ImageShape {
        self.shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, images: &[f32], batch_size: usize) -> Vec<f32> {
        self.net
            .forward_trace(images, batch_size)
            .pop()
            .unwrap_or_default()
    }

    fn input_gradient(&self, images: &[f32], labels: &[usize]) -> (f32, Vec<f32>) {
        let batch = labels.len();
        let trace = self.net.forward_trace(images, batch);
        let mut delta = vec![0.0f32; batch * self.num_classes];
        let loss = softmax_cross_entropy(&trace[trace.len() - 1], labels, self.num_classes, &mut delta);
        (loss, self.net.backward(&trace, delta, batch, false))
    }
}

impl TrainableClassifier for MlpClassifier {
    fn accumulate_gradients(&mut self, images: &[f32], labels: &[usize]) -> f32 {
        let batch = labels.len();
        let trace = self.net.forward_trace(images, batch);
        let mut delta = vec![0.0f32; batch * self.num_classes];
        let loss = softmax_cross_entropy(&trace[trace.len() - 1], labels, self.num_classes, &mut delta);
        self.net.backward(&trace, delta, batch, true);
        loss
    }

    fn visit_parameters(&mut self, visitor: &mut dyn FnMut(&mut [f32], &mut [f32])) {
        self.net.visit_parameters(visitor);
    }

    fn parameter_count(&self) -> usize {
        self.net.parameter_count()
    }
}

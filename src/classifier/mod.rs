//! Classifiers trained inside the robust error-minimizing noise loop
//!
//! [`Classifier`] only needs `&self`: inference and input gradients, used by
//! the perturbation tool while the model is frozen. [`TrainableClassifier`]
//! adds the `&mut self` half: gradient accumulation and optimizer steps.
//!
//! Images are passed as flat HWC batches in [0, 1].

mod conv;
mod mlp;
mod sequential;

pub use conv::ConvClassifier;
pub use mlp::MlpClassifier;

use crate::config::{ModelKind, RemConfig};
use crate::data::ImageShape;
use crate::optimizers::Optimizer;
use crate::utils::argmax_rows;

/// Read-only view of a classifier.
pub trait Classifier {
    fn input_shape(&self) -> ImageShape;

    fn num_classes(&self) -> usize;

    /// Logits for a batch of `batch_size` images (`batch_size × num_classes`).
    fn forward(&self, images: &[f32], batch_size: usize) -> Vec<f32>;

    /// Mean cross-entropy over the batch and its gradient with respect to
    /// the input images. Parameters and their gradients are not touched.
    fn input_gradient(&self, images: &[f32], labels: &[usize]) -> (f32, Vec<f32>);

    /// Predicted class of every image.
    fn predict(&self, images: &[f32], batch_size: usize) -> Vec<usize> {
        argmax_rows(&self.forward(images, batch_size), self.num_classes())
    }
}

/// A classifier whose parameters can be trained.
pub trait TrainableClassifier: Classifier {
    /// Forward and backward pass of the mean cross-entropy, adding the
    /// parameter gradients to the accumulators. Returns the loss.
    fn accumulate_gradients(&mut self, images: &[f32], labels: &[usize]) -> f32;

    /// Visit every parameter tensor with its gradient, in a fixed order.
    fn visit_parameters(&mut self, visitor: &mut dyn FnMut(&mut [f32], &mut [f32]));

    fn zero_grad(&mut self) {
        self.visit_parameters(&mut |_, grads| grads.fill(0.0));
    }

    /// Scale all gradients so that their global L2 norm is at most
    /// `max_norm`. Returns the norm before clipping.
    fn clip_grad_norm(&mut self, max_norm: f32) -> f32 {
        let mut sum_sq = 0.0f32;
        self.visit_parameters(&mut |_, grads| {
            sum_sq += grads.iter().map(|g| g * g).sum::<f32>();
        });
        let norm = sum_sq.sqrt();
        if norm > max_norm {
            let scale = max_norm / (norm + 1e-6);
            self.visit_parameters(&mut |_, grads| grads.iter_mut().for_each(|g| *g *= scale));
        }
        norm
    }

    /// Apply one optimizer update with the accumulated gradients, then clear them.
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        let mut slot = 0;
        self.visit_parameters(&mut |params, grads| {
            optimizer.update(slot, params, grads);
            slot += 1;
        });
        self.zero_grad();
    }

    fn parameter_count(&self) -> usize;
}

/// Build the classifier selected by `config`.
pub fn build_classifier(
    config: &RemConfig,
    shape: ImageShape,
    num_classes: usize,
) -> Box<dyn TrainableClassifier> {
    match config.model {
        ModelKind::Mlp => Box::new(MlpClassifier::new(shape, config.hidden, num_classes, config.seed)),
        ModelKind::Cnn => Box::new(ConvClassifier::new(shape, config.conv_filters, num_classes, config.seed)),
    }
}

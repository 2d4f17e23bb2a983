//! Optimizer abstractions for classifier parameter updates
//!
//! This module provides the Optimizer trait and the SGD implementation used
//! by the REM model-update step.
//!
//! # Overview
//!
//! A classifier visits its parameter tensors in a fixed order and hands each
//! one to the optimizer together with its accumulated gradient. The position
//! in that order (the *slot*) keys any per-tensor optimizer state such as
//! momentum buffers.
//!
//! # Example
//!
//! ```ignore
//! use rust_data_poisoning::optimizers::{Optimizer, SGD};
//!
//! let mut optimizer = SGD::new(0.1).with_momentum(0.9).with_weight_decay(5e-4);
//! optimizer.update(0, &mut weights, &gradients);
//! ```

pub mod sgd;

pub use sgd::SGD;

/// Core trait for parameter optimizers.
///
/// Optimizers work with f32 data, matching the layer buffers.
pub trait Optimizer {
    /// Update one parameter tensor in place.
    ///
    /// # Arguments
    ///
    /// * `slot` - Stable position of the tensor in the model's visiting order
    /// * `parameters` - Mutable slice of parameters to update (weights or biases)
    /// * `gradients` - Gradient of loss with respect to each parameter
    ///
    /// # Panics
    ///
    /// Implementations may panic if parameters and gradients have different lengths.
    fn update(&mut self, slot: usize, parameters: &mut [f32], gradients: &[f32]);

    /// Reset optimizer state (momentum buffers and the like).
    fn reset(&mut self);

    /// Get the learning rate for this optimizer.
    fn learning_rate(&self) -> f32;

    /// Set the learning rate for this optimizer.
    fn set_learning_rate(&mut self, lr: f32);
}

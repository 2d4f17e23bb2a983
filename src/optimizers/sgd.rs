//! Stochastic Gradient Descent (SGD) optimizer implementation
//!
//! This module provides SGD with optional heavy-ball momentum and L2 weight
//! decay, the optimizer the REM model-update step trains with.

use crate::optimizers::Optimizer;
use std::collections::HashMap;

/// Stochastic Gradient Descent optimizer.
///
/// The update rule per parameter tensor is:
///
/// ```text
/// g = ∇L/∂w + λ * w
/// v = μ * v + g
/// w = w - η * v
/// ```
///
/// where η is the learning rate, μ the momentum and λ the weight decay.
/// With μ = 0 and λ = 0 this reduces to vanilla SGD.
///
/// # Example
///
/// ```
/// use rust_data_poisoning::optimizers::{Optimizer, SGD};
///
/// let mut optimizer = SGD::new(0.1);
/// let mut params = vec![1.0, 2.0, 3.0];
/// let grads = vec![0.1, 0.2, 0.3];
///
/// optimizer.update(0, &mut params, &grads);
/// assert!((params[0] - 0.99).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct SGD {
    learning_rate: f32,
    momentum: f32,
    weight_decay: f32,
    /// Momentum buffers keyed by parameter slot
    velocity: HashMap<usize, Vec<f32>>,
}

impl SGD {
    /// Creates a new SGD optimizer with the specified learning rate.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_data_poisoning::optimizers::{Optimizer, SGD};
    ///
    /// let optimizer = SGD::new(0.01);
    /// assert_eq!(optimizer.learning_rate(), 0.01);
    /// ```
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            weight_decay: 0.0,
            velocity: HashMap::new(),
        }
    }

    /// Enable heavy-ball momentum.
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    /// Enable L2 weight decay.
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn weight_decay(&self) -> f32 {
        self.weight_decay
    }
}

impl Optimizer for SGD {
    /// Update parameters with the momentum / weight-decay rule.
    ///
    /// # Panics
    ///
    /// Panics if `parameters` and `gradients` have different lengths.
    fn update(&mut self, slot: usize, parameters: &mut [f32], gradients: &[f32]) {
        assert_eq!(
            parameters.len(),
            gradients.len(),
            "Parameters and gradients must have the same length"
        );

        if self.momentum == 0.0 {
            for (param, grad) in parameters.iter_mut().zip(gradients.iter()) {
                let g = grad + self.weight_decay * *param;
                *param -= self.learning_rate * g;
            }
            return;
        }

        let velocity = self
            .velocity
            .entry(slot)
            .or_insert_with(|| vec![0.0f32; parameters.len()]);

        for ((param, grad), v) in parameters.iter_mut().zip(gradients.iter()).zip(velocity.iter_mut()) {
            let g = grad + self.weight_decay * *param;
            *v = self.momentum * *v + g;
            *param -= self.learning_rate * *v;
        }
    }

    /// Drop all momentum buffers.
    fn reset(&mut self) {
        self.velocity.clear();
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }
}

//! Dense (fully connected) layer implementation
//!
//! This module provides a DenseLayer (also known as Linear or Fully Connected layer)
//! that performs the transformation: output = input × weights + biases

use crate::layers::Layer;
use crate::utils::SimpleRng;
use std::cell::RefCell;

/// Dense (fully connected) layer with weights and biases.
///
/// Performs the linear transformation: y = xW + b
/// where x is the input (batch_size × input_size),
/// W is the weight matrix (input_size × output_size),
/// and b is the bias vector (output_size).
///
/// # Example
///
/// ```ignore
/// use rust_data_poisoning::layers::{DenseLayer, Layer};
/// use rust_data_poisoning::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let layer = DenseLayer::new(3072, 10, &mut rng);
/// assert_eq!(layer.output_size(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct DenseLayer {
    input_size: usize,
    output_size: usize,
    weights: Vec<f32>, // [input_size * output_size], row-major
    biases: Vec<f32>,  // [output_size]
    // Gradient accumulators (interior mutability so backward can take &self)
    grad_weights: RefCell<Vec<f32>>,
    grad_biases: RefCell<Vec<f32>>,
}

impl DenseLayer {
    /// Create a new DenseLayer with Xavier initialization.
    ///
    /// Weights are sampled from U[-limit, limit] with
    /// limit = sqrt(6 / (input_size + output_size)); biases start at zero.
    pub fn new(input_size: usize, output_size: usize, rng: &mut SimpleRng) -> Self {
        // Xavier initialization: limit = sqrt(6 / (fan_in + fan_out))
        let mut weights = vec![0.0f32; input_size * output_size];
        let limit = (6.0f32 / (input_size + output_size) as f32).sqrt();

        for value in &mut weights {
            *value = rng.gen_range_f32(-limit, limit);
        }

        Self::from_parameters(input_size, output_size, weights, vec![0.0f32; output_size])
    }

    /// Build a layer from explicit parameters.
    ///
    /// # Panics
    ///
    /// Panics if the parameter lengths do not match the layer dimensions.
    pub fn from_parameters(
        input_size: usize,
        output_size: usize,
        weights: Vec<f32>,
        biases: Vec<f32>,
    ) -> Self {
        assert_eq!(weights.len(), input_size * output_size, "weight length mismatch");
        assert_eq!(biases.len(), output_size, "bias length mismatch");
        Self {
            input_size,
            output_size,
            grad_weights: RefCell::new(vec![0.0f32; weights.len()]),
            grad_biases: RefCell::new(vec![0.0f32; output_size]),
            weights,
            biases,
        }
    }

    /// Weight matrix (input_size × output_size, row-major).
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Bias vector.
    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    fn backward_impl(
        &self,
        input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
        accumulate: bool,
    ) {
        grad_input[..batch_size * self.input_size].fill(0.0);

        for b in 0..batch_size {
            let in_offset = b * self.input_size;
            let out_offset = b * self.output_size;

            for i in 0..self.input_size {
                let row = &self.weights[i * self.output_size..(i + 1) * self.output_size];
                let g_out = &grad_output[out_offset..out_offset + self.output_size];
                grad_input[in_offset + i] = row.iter().zip(g_out).map(|(w, g)| w * g).sum();
            }
        }

        if !accumulate {
            return;
        }

        let mut grad_w = self.grad_weights.borrow_mut();
        let mut grad_b = self.grad_biases.borrow_mut();
        for b in 0..batch_size {
            let in_offset = b * self.input_size;
            let out_offset = b * self.output_size;

            for j in 0..self.output_size {
                grad_b[j] += grad_output[out_offset + j];
            }
            for i in 0..self.input_size {
                let x = input[in_offset + i];
                if x == 0.0 {
                    continue;
                }
                let row = &mut grad_w[i * self.output_size..(i + 1) * self.output_size];
                for (gw, g) in row.iter_mut().zip(&grad_output[out_offset..out_offset + self.output_size]) {
                    *gw += x * g;
                }
            }
        }
    }
}

impl Layer for DenseLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        for b in 0..batch_size {
            let in_offset = b * self.input_size;
            let out_offset = b * self.output_size;
            let out_row = &mut output[out_offset..out_offset + self.output_size];
            out_row.copy_from_slice(&self.biases);

            for i in 0..self.input_size {
                let x = input[in_offset + i];
                if x == 0.0 {
                    continue;
                }
                let w_row = &self.weights[i * self.output_size..(i + 1) * self.output_size];
                for (o, w) in out_row.iter_mut().zip(w_row) {
                    *o += x * w;
                }
            }
        }
    }

    fn backward(
        &self,
        input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        self.backward_impl(input, grad_output, grad_input, batch_size, true);
    }

    fn backward_input(
        &self,
        input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        self.backward_impl(input, grad_output, grad_input, batch_size, false);
    }

    fn visit_parameters(&mut self, visitor: &mut dyn FnMut(&mut [f32], &mut [f32])) {
        visitor(&mut self.weights, self.grad_weights.get_mut());
        visitor(&mut self.biases, self.grad_biases.get_mut());
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn output_size(&self) -> usize {
        self.output_size
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_layer_creation() {
        let mut rng = SimpleRng::new(42);
        let layer = DenseLayer::new(10, 5, &mut rng);

        assert_eq!(layer.input_size(), 10);
        assert_eq!(layer.output_size(), 5);
        assert_eq!(layer.weights.len(), 50); // 10 × 5
        assert_eq!(layer.biases.len(), 5);
    }

    #[test]
    fn test_xavier_initialization() {
        let mut rng = SimpleRng::new(42);
        let layer = DenseLayer::new(100, 50, &mut rng);

        // Xavier limit = sqrt(6 / (100 + 50)) ≈ 0.2
        let limit = (6.0f32 / 150.0).sqrt();

        for &weight in &layer.weights {
            assert!(weight >= -limit && weight <= limit,
                   "Weight {} outside Xavier range [{}, {}]", weight, -limit, limit);
        }
        for &bias in &layer.biases {
            assert_eq!(bias, 0.0);
        }
    }

    #[test]
    fn test_forward_known_values() {
        // y = [1, 2] × [[1, 2], [3, 4]] + [0.5, -0.5] = [7.5, 9.5]
        let layer = DenseLayer::from_parameters(2, 2, vec![1.0, 2.0, 3.0, 4.0], vec![0.5, -0.5]);
        let mut output = vec![0.0; 2];
        layer.forward(&[1.0, 2.0], &mut output, 1);
        assert_eq!(output, vec![7.5, 9.5]);
    }

    #[test]
    fn test_backward_input_leaves_gradients_untouched() {
        let mut layer = DenseLayer::from_parameters(2, 2, vec![1.0, 2.0, 3.0, 4.0], vec![0.0, 0.0]);
        let mut grad_input = vec![0.0; 2];
        layer.backward_input(&[1.0, 1.0], &[1.0, 1.0], &mut grad_input, 1);

        // dL/dx_i = sum_j W_ij
        assert_eq!(grad_input, vec![3.0, 7.0]);

        let mut total = 0.0;
        layer.visit_parameters(&mut |_, grads| total += grads.iter().map(|g| g.abs()).sum::<f32>());
        assert_eq!(total, 0.0);
    }

    #[test]
    fn test_backward_accumulates_parameter_gradients() {
        let mut layer = DenseLayer::from_parameters(2, 1, vec![1.0, 1.0], vec![0.0]);
        let mut grad_input = vec![0.0; 2];
        layer.backward(&[2.0, 3.0], &[0.5], &mut grad_input, 1);

        let mut seen = Vec::new();
        layer.visit_parameters(&mut |_, grads| seen.push(grads.to_vec()));
        assert_eq!(seen[0], vec![1.0, 1.5]);
        assert_eq!(seen[1], vec![0.5]);

        layer.zero_grad();
        let mut total = 0.0;
        layer.visit_parameters(&mut |_, grads| total += grads.iter().sum::<f32>());
        assert_eq!(total, 0.0);
    }

    #[test]
    fn test_deterministic_initialization() {
        let mut rng1 = SimpleRng::new(42);
        let layer1 = DenseLayer::new(10, 5, &mut rng1);

        let mut rng2 = SimpleRng::new(42);
        let layer2 = DenseLayer::new(10, 5, &mut rng2);

        assert_eq!(layer1.weights, layer2.weights);
        assert_eq!(layer1.biases, layer2.biases);
    }
}

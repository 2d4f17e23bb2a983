//! Layer trait definition for the in-loop classifiers
//!
//! This module defines the core Layer trait that all layer types must implement.
//! Besides forward and backward propagation it separates the two backward modes
//! the minimax loop needs: training backward (parameter gradients accumulate)
//! and input-only backward (parameters and their gradients stay untouched).

/// Core trait for neural network layers.
///
/// All layer types (Dense, Conv2D, MaxPool2D) implement this trait to provide
/// a uniform interface for forward and backward propagation.
///
/// Layers work with flat f32 buffers laid out batch-major.
///
/// # Example
///
/// ```ignore
/// // Forward pass through a layer
/// let mut output = vec![0.0f32; batch_size * output_size];
/// layer.forward(&input, &mut output, batch_size);
///
/// // Gradient with respect to the input only (frozen parameters)
/// let mut grad_input = vec![0.0f32; batch_size * input_size];
/// layer.backward_input(&input, &grad_output, &mut grad_input, batch_size);
/// ```
pub trait Layer {
    /// Forward propagation through the layer.
    ///
    /// # Arguments
    ///
    /// * `input` - Input data flattened as a 1D array (batch_size × input_size)
    /// * `output` - Output buffer to store results (batch_size × output_size)
    /// * `batch_size` - Number of samples in the batch
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize);

    /// Training backward pass.
    ///
    /// Writes the gradient with respect to the layer input into `grad_input`
    /// and accumulates parameter gradients internally. `grad_output` is the
    /// gradient of the batch loss; no further batch averaging is applied.
    fn backward(
        &self,
        input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    );

    /// Input-only backward pass.
    ///
    /// Same `grad_input` as [`Layer::backward`] but leaves accumulated
    /// parameter gradients unchanged.
    fn backward_input(
        &self,
        input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    );

    /// Visit every parameter tensor together with its accumulated gradient.
    ///
    /// Parameterless layers visit nothing.
    fn visit_parameters(&mut self, visitor: &mut dyn FnMut(&mut [f32], &mut [f32]));

    /// Clear accumulated parameter gradients.
    fn zero_grad(&mut self) {
        self.visit_parameters(&mut |_, grads| grads.fill(0.0));
    }

    /// Get the input size of the layer (features per sample).
    fn input_size(&self) -> usize;

    /// Get the output size of the layer (features per sample).
    fn output_size(&self) -> usize;

    /// Get the number of trainable parameters in the layer.
    fn parameter_count(&self) -> usize;
}

//! 2D Convolutional layer implementation
//!
//! This module provides a Conv2DLayer that performs 2D convolution operations
//! on channel-major (CHW) planes.

use crate::layers::Layer;
use crate::utils::SimpleRng;
use std::cell::RefCell;

/// 2D Convolutional layer with learnable filters.
///
/// Performs 2D convolution: slides filters over input to produce feature maps.
/// Supports zero-padding and configurable stride.
///
/// # Fields
///
/// * `in_channels` - Number of input channels (e.g., 3 for RGB)
/// * `out_channels` - Number of output feature maps (number of filters)
/// * `kernel_size` - Size of the convolutional kernel (assumed square: kernel_size × kernel_size)
/// * `padding` - Zero-padding applied to input (symmetric on all sides)
/// * `stride` - Stride for the convolution operation
/// * `input_height` - Height of input feature map
/// * `input_width` - Width of input feature map
/// * `weights` - Convolutional filters (out_channels × in_channels × kernel_size × kernel_size)
/// * `biases` - Bias for each output channel (out_channels)
///
/// # Example
///
/// ```ignore
/// use rust_data_poisoning::layers::Conv2DLayer;
/// use rust_data_poisoning::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// // 3 input channels (RGB), 8 output channels, 3x3 kernel, padding=1
/// let layer = Conv2DLayer::new(3, 8, 3, 1, 1, 32, 32, &mut rng);
/// assert_eq!(layer.out_channels(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct Conv2DLayer {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    padding: isize,
    stride: usize,
    input_height: usize,
    input_width: usize,
    weights: Vec<f32>, // [out_channels * in_channels * kernel_size * kernel_size]
    biases: Vec<f32>,  // [out_channels]
    // Gradient accumulators (mutable interior via RefCell for trait compatibility)
    grad_weights: RefCell<Vec<f32>>,
    grad_biases: RefCell<Vec<f32>>,
}

impl Conv2DLayer {
    /// Create a new Conv2DLayer with Xavier initialization.
    ///
    /// For convolutions: fan_in = in_channels × kernel_size², fan_out = out_channels × kernel_size²,
    /// weights are sampled from U[-limit, limit] with limit = sqrt(6 / (fan_in + fan_out)).
    /// Biases are initialized to zero.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: isize,
        stride: usize,
        input_height: usize,
        input_width: usize,
        rng: &mut SimpleRng,
    ) -> Self {
        let fan_in = (in_channels * kernel_size * kernel_size) as f32;
        let fan_out = (out_channels * kernel_size * kernel_size) as f32;
        let limit = (6.0f32 / (fan_in + fan_out)).sqrt();

        let weight_count = out_channels * in_channels * kernel_size * kernel_size;
        let mut weights = vec![0.0f32; weight_count];

        for value in &mut weights {
            *value = rng.gen_range_f32(-limit, limit);
        }

        Self {
            in_channels,
            out_channels,
            kernel_size,
            padding,
            stride,
            input_height,
            input_width,
            weights,
            biases: vec![0.0f32; out_channels],
            grad_weights: RefCell::new(vec![0.0f32; weight_count]),
            grad_biases: RefCell::new(vec![0.0f32; out_channels]),
        }
    }

    /// Get the number of input channels.
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Get the number of output channels (filters).
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Get the output height after convolution.
    ///
    /// Calculated as: (input_height + 2*padding - kernel_size) / stride + 1
    pub fn output_height(&self) -> usize {
        ((self.input_height as isize + 2 * self.padding - self.kernel_size as isize)
            / self.stride as isize
            + 1) as usize
    }

    /// Get the output width after convolution.
    ///
    /// Calculated as: (input_width + 2*padding - kernel_size) / stride + 1
    pub fn output_width(&self) -> usize {
        ((self.input_width as isize + 2 * self.padding - self.kernel_size as isize)
            / self.stride as isize
            + 1) as usize
    }

    /// Input pixel read by output (oy, ox) through kernel tap (ky, kx), if inside the image.
    #[inline]
    fn source_pixel(&self, oy: usize, ox: usize, ky: usize, kx: usize) -> Option<usize> {
        let iy = oy as isize * self.stride as isize + ky as isize - self.padding;
        let ix = ox as isize * self.stride as isize + kx as isize - self.padding;
        if iy >= 0 && iy < self.input_height as isize && ix >= 0 && ix < self.input_width as isize {
            Some(iy as usize * self.input_width + ix as usize)
        } else {
            None
        }
    }

    fn backward_impl(
        &self,
        input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
        accumulate: bool,
    ) {
        let out_h = self.output_height();
        let out_w = self.output_width();
        let out_spatial = out_h * out_w;
        let in_spatial = self.input_height * self.input_width;
        let k2 = self.kernel_size * self.kernel_size;

        let mut grad_w = self.grad_weights.borrow_mut();
        let mut grad_b = self.grad_biases.borrow_mut();

        grad_input[..batch_size * self.in_channels * in_spatial].fill(0.0);

        for b in 0..batch_size {
            let in_base = b * (self.in_channels * in_spatial);
            let g_base_b = b * (self.out_channels * out_spatial);

            for oc in 0..self.out_channels {
                let g_base = g_base_b + oc * out_spatial;

                if accumulate {
                    grad_b[oc] += grad_output[g_base..g_base + out_spatial].iter().sum::<f32>();
                }

                for ic in 0..self.in_channels {
                    let w_base = (oc * self.in_channels + ic) * k2;
                    let in_base_c = in_base + ic * in_spatial;

                    for oy in 0..out_h {
                        for ox in 0..out_w {
                            let g = grad_output[g_base + oy * out_w + ox];
                            if g == 0.0 {
                                continue;
                            }

                            for ky in 0..self.kernel_size {
                                for kx in 0..self.kernel_size {
                                    if let Some(pixel) = self.source_pixel(oy, ox, ky, kx) {
                                        let in_idx = in_base_c + pixel;
                                        let w_idx = w_base + ky * self.kernel_size + kx;
                                        if accumulate {
                                            grad_w[w_idx] += g * input[in_idx];
                                        }
                                        grad_input[in_idx] += g * self.weights[w_idx];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Layer for Conv2DLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        let out_h = self.output_height();
        let out_w = self.output_width();
        let out_spatial = out_h * out_w;
        let in_spatial = self.input_height * self.input_width;
        let k2 = self.kernel_size * self.kernel_size;

        for b in 0..batch_size {
            let in_base = b * (self.in_channels * in_spatial);
            let out_base_b = b * (self.out_channels * out_spatial);

            for oc in 0..self.out_channels {
                let bias = self.biases[oc];
                let out_base = out_base_b + oc * out_spatial;

                for oy in 0..out_h {
                    for ox in 0..out_w {
                        let mut sum = bias;

                        for ic in 0..self.in_channels {
                            let w_base = (oc * self.in_channels + ic) * k2;
                            let in_base_c = in_base + ic * in_spatial;

                            for ky in 0..self.kernel_size {
                                for kx in 0..self.kernel_size {
                                    if let Some(pixel) = self.source_pixel(oy, ox, ky, kx) {
                                        sum += input[in_base_c + pixel]
                                            * self.weights[w_base + ky * self.kernel_size + kx];
                                    }
                                }
                            }
                        }

                        output[out_base + oy * out_w + ox] = sum;
                    }
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
        self.in_channels * self.input_height * self.input_width
    }

    fn output_size(&self) -> usize {
        self.out_channels * self.output_height() * self.output_width()
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}

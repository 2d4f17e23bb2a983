//! 2x2 max pooling over CHW feature maps.

use crate::layers::Layer;

const POOL: usize = 2;

/// Max pooling with a 2×2 window and stride 2.
///
/// Odd trailing rows/columns are dropped. The argmax is recomputed during the
/// backward pass, so the layer keeps no state between calls.
#[derive(Debug, Clone)]
pub struct MaxPool2DLayer {
    channels: usize,
    input_height: usize,
    input_width: usize,
}

impl MaxPool2DLayer {
    pub fn new(channels: usize, input_height: usize, input_width: usize) -> Self {
        Self {
            channels,
            input_height,
            input_width,
        }
    }

    pub fn output_height(&self) -> usize {
        self.input_height / POOL
    }

    pub fn output_width(&self) -> usize {
        self.input_width / POOL
    }

    // Flat input offset (within one channel plane) of the window maximum.
    fn argmax(&self, plane: &[f32], py: usize, px: usize) -> usize {
        let mut best = f32::NEG_INFINITY;
        let mut best_idx = (py * POOL) * self.input_width + px * POOL;
        for dy in 0..POOL {
            for dx in 0..POOL {
                let idx = (py * POOL + dy) * self.input_width + px * POOL + dx;
                if plane[idx] > best {
                    best = plane[idx];
                    best_idx = idx;
                }
            }
        }
        best_idx
    }
}

impl Layer for MaxPool2DLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        let in_spatial = self.input_height * self.input_width;
        let (out_h, out_w) = (self.output_height(), self.output_width());
        let out_spatial = out_h * out_w;

        for b in 0..batch_size {
            for c in 0..self.channels {
                let in_base = (b * self.channels + c) * in_spatial;
                let out_base = (b * self.channels + c) * out_spatial;
                let plane = &input[in_base..in_base + in_spatial];

                for py in 0..out_h {
                    for px in 0..out_w {
                        output[out_base + py * out_w + px] = plane[self.argmax(plane, py, px)];
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
        self.backward_input(input, grad_output, grad_input, batch_size);
    }

    fn backward_input(
        &self,
        input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        let in_spatial = self.input_height * self.input_width;
        let (out_h, out_w) = (self.output_height(), self.output_width());
        let out_spatial = out_h * out_w;

        grad_input[..batch_size * self.channels * in_spatial].fill(0.0);

        for b in 0..batch_size {
            for c in 0..self.channels {
                let in_base = (b * self.channels + c) * in_spatial;
                let out_base = (b * self.channels + c) * out_spatial;
                let plane = &input[in_base..in_base + in_spatial];

                for py in 0..out_h {
                    for px in 0..out_w {
                        let src = self.argmax(plane, py, px);
                        grad_input[in_base + src] += grad_output[out_base + py * out_w + px];
                    }
                }
            }
        }
    }

    fn visit_parameters(&mut self, _visitor: &mut dyn FnMut(&mut [f32], &mut [f32])) {}

    fn input_size(&self) -> usize {
        self.channels * self.input_height * self.input_width
    }

    fn output_size(&self) -> usize {
        self.channels * self.output_height() * self.output_width()
    }

    fn parameter_count(&self) -> usize {
        0
    }
}

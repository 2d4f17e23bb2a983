//! A plain stack of layers and ReLUs shared by the concrete classifiers.

use crate::layers::Layer;
use crate::utils::{relu_backward_inplace, relu_inplace};

pub(crate) enum Stage {
    Layer(Box<dyn Layer>),
    Relu,
}

pub(crate) struct Sequential {
    stages: Vec<Stage>,
    input_size: usize,
}

impl Sequential {
    pub fn new(input_size: usize) -> Self {
        Self {
            stages: Vec::new(),
            input_size,
        }
    }

    pub fn push_layer(mut self, layer: impl Layer + 'static) -> Self {
        self.stages.push(Stage::Layer(Box::new(layer)));
        self
    }

    pub fn push_relu(mut self) -> Self {
        self.stages.push(Stage::Relu);
        self
    }

    pub fn parameter_count(&self) -> usize {
        self.stages
            .iter()
            .map(|stage| match stage {
                Stage::Layer(layer) => layer.parameter_count(),
                Stage::Relu => 0,
            })
            .sum()
    }

    /// Forward pass keeping every intermediate activation.
    ///
    /// `trace[0]` is the input and `trace.last()` the logits.
    pub fn forward_trace(&self, input: &[f32], batch_size: usize) -> Vec<Vec<f32>> {
        let mut trace = Vec::with_capacity(self.stages.len() + 1);
        trace.push(input[..batch_size * self.input_size].to_vec());

        for stage in &self.stages {
            let prev = trace.last().map(Vec::as_slice).unwrap_or_default();
            let next = match stage {
                Stage::Layer(layer) => {
                    let mut out = vec![0.0f32; batch_size * layer.output_size()];
                    layer.forward(prev, &mut out, batch_size);
                    out
                }
                Stage::Relu => {
                    let mut out = prev.to_vec();
                    relu_inplace(&mut out);
                    out
                }
            };
            trace.push(next);
        }
        trace
    }

    /// Backward pass from the logit gradient to the input gradient.
    ///
    /// With `accumulate` set, layers add to their parameter gradients;
    /// otherwise parameters and their gradients are left untouched.
    pub fn backward(&self, trace: &[Vec<f32>], grad_logits: Vec<f32>, batch_size: usize, accumulate: bool) -> Vec<f32> {
        let mut grad = grad_logits;
        for (i, stage) in self.stages.iter().enumerate().rev() {
            match stage {
                Stage::Layer(layer) => {
                    let mut grad_input = vec![0.0f32; batch_size * layer.input_size()];
                    if accumulate {
                        layer.backward(&trace[i], &grad, &mut grad_input, batch_size);
                    } else {
                        layer.backward_input(&trace[i], &grad, &mut grad_input, batch_size);
                    }
                    grad = grad_input;
                }
                Stage::Relu => relu_backward_inplace(&trace[i + 1], &mut grad),
            }
        }
        grad
    }

    pub fn visit_parameters(&mut self, visitor: &mut dyn FnMut(&mut [f32], &mut [f32])) {
        for stage in &mut self.stages {
            if let Stage::Layer(layer) = stage {
                layer.visit_parameters(visitor);
            }
        }
    }
}

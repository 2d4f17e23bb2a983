// Numerical gradient checks for the classifier layers.
// The scalar checked is L = Σ c ∘ layer(x) for a fixed random c, so the
// output gradient handed to backward is c itself.

use rust_data_poisoning::layers::{Conv2DLayer, DenseLayer, Layer, MaxPool2DLayer};
use rust_data_poisoning::utils::SimpleRng;

const H: f32 = 1e-2;
const TOL: f32 = 2e-2;

fn random_vec(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = SimpleRng::new(seed);
    (0..len).map(|_| rng.gen_range_f32(-1.0, 1.0)).collect()
}

fn weighted_output(layer: &dyn Layer, input: &[f32], c: &[f32], batch: usize) -> f32 {
    let mut out = vec![0.0f32; batch * layer.output_size()];
    layer.forward(input, &mut out, batch);
    out.iter().zip(c).map(|(o, w)| o * w).sum()
}

// Add `delta` to element `element` of parameter tensor `slot`.
fn nudge(layer: &mut dyn Layer, slot: usize, element: usize, delta: f32) {
    let mut current = 0;
    layer.visit_parameters(&mut |params, _| {
        if current == slot {
            params[element] += delta;
        }
        current += 1;
    });
}

fn check_input_gradient(layer: &dyn Layer, batch: usize, seed: u64) {
    let input = random_vec(batch * layer.input_size(), seed);
    let c = random_vec(batch * layer.output_size(), seed + 1);
    let mut grad = vec![0.0f32; input.len()];
    layer.backward_input(&input, &c, &mut grad, batch);

    for i in 0..input.len() {
        let mut plus = input.clone();
        plus[i] += H;
        let mut minus = input.clone();
        minus[i] -= H;
        let numeric = (weighted_output(layer, &plus, &c, batch) - weighted_output(layer, &minus, &c, batch)) / (2.0 * H);
        assert!((grad[i] - numeric).abs() < TOL, "input {}: {} vs {}", i, grad[i], numeric);
    }
}

fn check_parameter_gradients(layer: &mut dyn Layer, batch: usize, seed: u64) {
    let input = random_vec(batch * layer.input_size(), seed);
    let c = random_vec(batch * layer.output_size(), seed + 1);
    let mut grad_input = vec![0.0f32; input.len()];
    layer.zero_grad();
    layer.backward(&input, &c, &mut grad_input, batch);

    let mut analytic: Vec<Vec<f32>> = Vec::new();
    layer.visit_parameters(&mut |_, grads| analytic.push(grads.to_vec()));

    for (slot, grads) in analytic.iter().enumerate() {
        for (element, &g) in grads.iter().enumerate() {
            nudge(layer, slot, element, H);
            let plus = weighted_output(layer, &input, &c, batch);
            nudge(layer, slot, element, -2.0 * H);
            let minus = weighted_output(layer, &input, &c, batch);
            nudge(layer, slot, element, H);

            let numeric = (plus - minus) / (2.0 * H);
            assert!((g - numeric).abs() < TOL, "slot {} element {}: {} vs {}", slot, element, g, numeric);
        }
    }
}

// ============================================================================
// Dense Layer
// ============================================================================

mod dense_tests {
    use super::*;

    #[test]
    fn test_dense_input_gradient() {
        let layer = DenseLayer::new(5, 3, &mut SimpleRng::new(1));
        check_input_gradient(&layer, 2, 10);
    }

    #[test]
    fn test_dense_parameter_gradients() {
        let mut layer = DenseLayer::new(4, 3, &mut SimpleRng::new(2));
        check_parameter_gradients(&mut layer, 3, 20);
    }

    #[test]
    fn test_backward_input_leaves_gradients_untouched() {
        let mut layer = DenseLayer::new(3, 2, &mut SimpleRng::new(3));
        let mut grad_input = vec![0.0f32; 3];
        layer.backward_input(&[0.5, -0.2, 0.1], &[1.0, -1.0], &mut grad_input, 1);

        let mut all_zero = true;
        layer.visit_parameters(&mut |_, grads| all_zero &= grads.iter().all(|&g| g == 0.0));
        assert!(all_zero);
    }
}

// ============================================================================
// Conv2D and MaxPool2D Layers
// ============================================================================

mod conv_pool_tests {
    use super::*;

    #[test]
    fn test_conv_input_gradient() {
        let layer = Conv2DLayer::new(2, 3, 3, 1, 1, 4, 4, &mut SimpleRng::new(4));
        check_input_gradient(&layer, 2, 30);
    }

    #[test]
    fn test_conv_parameter_gradients() {
        let mut layer = Conv2DLayer::new(1, 2, 3, 1, 1, 3, 3, &mut SimpleRng::new(5));
        check_parameter_gradients(&mut layer, 2, 40);
    }

    #[test]
    fn test_pool_routes_gradient_to_maximum() {
        let layer = MaxPool2DLayer::new(1, 2, 2);
        let input = [0.1f32, 0.7, -0.3, 0.2];
        let mut out = [0.0f32; 1];
        layer.forward(&input, &mut out, 1);
        assert_eq!(out[0], 0.7);

        let mut grad = [0.0f32; 4];
        layer.backward_input(&input, &[2.0], &mut grad, 1);
        assert_eq!(grad, [0.0, 2.0, 0.0, 0.0]);
        assert_eq!(layer.parameter_count(), 0);
    }
}

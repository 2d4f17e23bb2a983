//! Activation functions for the in-loop classifiers
//!
//! This module provides the activation helpers the classifiers apply between layers:
//! - ReLU forward and its gradient mask
//! - Softmax applied row-wise to logits
//! - Row-wise argmax for accuracy evaluation

/// ReLU activation function applied in-place.
///
/// Sets all negative values to 0.0, keeps positive values unchanged.
pub fn relu_inplace(data: &mut [f32]) {
    for value in data.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
        }
    }
}

/// ReLU backward: zero the gradient wherever the activation was not positive.
///
/// `activations` holds the post-ReLU values of the forward pass.
pub fn relu_backward_inplace(activations: &[f32], grad: &mut [f32]) {
    for (g, &a) in grad.iter_mut().zip(activations.iter()) {
        if a <= 0.0 {
            *g = 0.0;
        }
    }
}

/// Softmax activation function applied row-wise.
///
/// Converts logits to probabilities for each row. Uses the max-subtraction
/// trick for numerical stability to avoid overflow with large values.
///
/// # Arguments
/// * `outputs` - Flat array containing row-major matrix data
/// * `rows` - Number of rows in the matrix
/// * `cols` - Number of columns in the matrix
pub fn softmax_rows(outputs: &mut [f32], rows: usize, cols: usize) {
    if cols == 0 {
        return;
    }
    assert_eq!(outputs.len(), rows * cols, "outputs length mismatch in softmax_rows");

    for row in outputs.chunks_exact_mut(cols).take(rows) {
        let max_value = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut sum = 0.0f32;
        for value in row.iter_mut() {
            *value = (*value - max_value).exp();
            sum += *value;
        }

        let inv_sum = 1.0f32 / sum;
        for value in row.iter_mut() {
            *value *= inv_sum;
        }
    }
}

/// Index of the largest entry of every row (first one wins on ties).
pub fn argmax_rows(values: &[f32], cols: usize) -> Vec<usize> {
    if cols == 0 {
        return Vec::new();
    }
    values
        .chunks_exact(cols)
        .map(|row| {
            let mut best = 0;
            for j in 1..cols {
                if row[j] > row[best] {
                    best = j;
                }
            }
            best
        })
        .collect()
}

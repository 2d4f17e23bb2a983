//! Loss criteria for both pipelines.
//!
//! The kernel attack evaluates losses on double-precision prediction matrices
//! (`ndarray`), the in-loop classifiers on flat f32 logit buffers.

use crate::error::{PoisonError, Result};
use crate::utils::softmax_rows;
use ndarray::{Array2, ArrayView2, Axis, Zip};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Loss between a prediction matrix and one-hot targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Loss {
    #[serde(rename = "cross-entropy", alias = "cross_entropy")]
    CrossEntropy,
    #[serde(rename = "mse")]
    Mse,
}

impl Loss {
    /// Loss value and gradient with respect to `predictions`.
    ///
    /// The sum over the given rows is divided by `total_rows` rather than by
    /// the number of rows passed in, so that evaluating a test set in
    /// sub-batches and adding the pieces reproduces the full-batch mean.
    ///
    /// - cross-entropy: `-(1/N) Σ_i Σ_k y_ik log softmax(f_i)_k`
    /// - mse: `(1 / (2 N K)) Σ_ik (f_ik - y_ik)²`
    pub fn value_and_grad(
        &self,
        predictions: ArrayView2<'_, f64>,
        targets: ArrayView2<'_, f64>,
        total_rows: usize,
    ) -> (f64, Array2<f64>) {
        debug_assert_eq!(predictions.dim(), targets.dim());
        let n = total_rows.max(1) as f64;
        let k = predictions.ncols().max(1) as f64;

        match self {
            Loss::CrossEntropy => {
                let mut grad = Array2::<f64>::zeros(predictions.dim());
                let mut total = 0.0;
                for ((f, y), mut g) in predictions
                    .axis_iter(Axis(0))
                    .zip(targets.axis_iter(Axis(0)))
                    .zip(grad.axis_iter_mut(Axis(0)))
                {
                    let max = f.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let log_norm = max + f.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
                    let mass: f64 = y.sum();
                    for ((gj, &fj), &yj) in g.iter_mut().zip(f.iter()).zip(y.iter()) {
                        let log_p = fj - log_norm;
                        total -= yj * log_p;
                        *gj = (log_p.exp() * mass - yj) / n;
                    }
                }
                (total / n, grad)
            }
            Loss::Mse => {
                let diff = &predictions - &targets;
                let value = diff.iter().map(|d| d * d).sum::<f64>() / (2.0 * n * k);
                (value, diff / (n * k))
            }
        }
    }

    /// Loss value only.
    pub fn value(&self, predictions: ArrayView2<'_, f64>, targets: ArrayView2<'_, f64>) -> f64 {
        self.value_and_grad(predictions, targets, predictions.nrows()).0
    }
}

impl FromStr for Loss {
    type Err = PoisonError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cross-entropy" | "cross_entropy" | "ce" => Ok(Loss::CrossEntropy),
            "mse" => Ok(Loss::Mse),
            other => Err(PoisonError::Config(format!(
                "unknown loss '{}'; expected 'cross-entropy' or 'mse'",
                other
            ))),
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loss::CrossEntropy => write!(f, "cross-entropy"),
            Loss::Mse => write!(f, "mse"),
        }
    }
}

/// Fraction of rows whose argmax prediction matches the argmax target.
pub fn accuracy(predictions: ArrayView2<'_, f64>, targets: ArrayView2<'_, f64>) -> f64 {
    if predictions.nrows() == 0 {
        return 0.0;
    }
    let mut correct = 0usize;
    Zip::from(predictions.rows()).and(targets.rows()).for_each(|f, y| {
        if argmax(f.iter()) == argmax(y.iter()) {
            correct += 1;
        }
    });
    correct as f64 / predictions.nrows() as f64
}

fn argmax<'a>(values: impl Iterator<Item = &'a f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &v) in values.enumerate() {
        if v > best_value {
            best_value = v;
            best = i;
        }
    }
    best
}

/// Softmax cross-entropy for the classifiers.
///
/// Returns the mean loss over the batch and writes `(softmax - onehot) / batch`
/// into `delta`, i.e. the gradient of the mean loss with respect to the logits.
pub fn softmax_cross_entropy(
    logits: &[f32],
    labels: &[usize],
    num_classes: usize,
    delta: &mut [f32],
) -> f32 {
    let rows = labels.len();
    let epsilon = 1e-9f32;
    let scale = 1.0 / rows.max(1) as f32;

    delta[..rows * num_classes].copy_from_slice(&logits[..rows * num_classes]);
    softmax_rows(&mut delta[..rows * num_classes], rows, num_classes);

    let mut total_loss = 0.0f32;
    for (row_idx, &label) in labels.iter().enumerate() {
        let row = &mut delta[row_idx * num_classes..(row_idx + 1) * num_classes];
        total_loss -= row[label].max(epsilon).ln();
        row[label] -= 1.0;
        for value in row.iter_mut() {
            *value *= scale;
        }
    }

    total_loss * scale
}

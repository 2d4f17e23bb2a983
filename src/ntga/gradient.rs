//! Gradient of the held-out loss of kernel regression with respect to the
//! training inputs.
//!
//! Reverse mode through [`KernelRegression`]:
//!
//! ```text
//! f   = K_s A,  A = g(Θ) y,  Θ = K + r·I,  r = diag_reg · tr(K)/n
//! ∂L/∂K_s = G Aᵀ                         (G = ∂L/∂f)
//! ∂L/∂g(Θ) = M = K_sᵀ G yᵀ
//! ∂L/∂Θ = V (F ∘ Vᵀ M V) Vᵀ              (F = divided differences of g)
//! ∂L/∂K = ∂L/∂Θ + (diag_reg/n) · tr(∂L/∂Θ) · I
//! ```
//!
//! The two kernel cotangents are then pulled back through the kernel's VJPs.

use super::predictor::{check_rows, KernelRegression};
use crate::error::{PoisonError, Result};
use crate::kernel::KernelKind;
use crate::loss::Loss;
use crate::perturbation::ensure_finite;
use ndarray::{s, Array2, ArrayView2};
use tracing::trace;

/// What the attacker optimizes.
#[derive(Debug, Clone, Copy)]
pub struct Objective {
    pub loss: Loss,
    /// Time of the simulated training; `None` = infinite time.
    pub t: Option<f64>,
    /// Targeted attacks descend the loss instead of ascending it.
    pub targeted: bool,
    /// Test rows per sub-batch when accumulating the gradient.
    pub batch_size: usize,
}

/// Loss value and gradient with respect to `x_train`.
///
/// The test set is processed in sub-batches of `objective.batch_size` rows;
/// the per-batch contributions are normalized by the full test size, so the
/// result does not depend on the batch size. For targeted objectives both
/// the value and the gradient are negated.
pub fn loss_and_gradient(
    predictor: &KernelRegression<'_>,
    x_train: ArrayView2<'_, f64>,
    y_train: ArrayView2<'_, f64>,
    x_test: ArrayView2<'_, f64>,
    y_test: ArrayView2<'_, f64>,
    objective: &Objective,
) -> Result<(f64, Array2<f64>)> {
    check_rows(x_train, y_train)?;
    if x_test.nrows() != y_test.nrows() || x_test.ncols() != x_train.ncols() {
        return Err(PoisonError::Shape(format!(
            "test set {:?}/{:?} does not match training inputs {:?}",
            x_test.dim(),
            y_test.dim(),
            x_train.dim()
        )));
    }

    let kernel = predictor.kernel();
    let n = x_train.nrows();
    let total = x_test.nrows();
    let batch = objective.batch_size.max(1);

    let spectrum = predictor.spectrum(x_train, y_train, objective.t)?;
    let alpha = spectrum.apply_g(y_train);

    let mut value = 0.0;
    let mut grad = Array2::<f64>::zeros(x_train.dim());
    // Σ_batches K_sᵀ G, an n × k accumulator for ∂L/∂g(Θ).
    let mut back = Array2::<f64>::zeros(y_train.dim());

    let mut start = 0;
    while start < total {
        let end = (start + batch).min(total);
        let xs = x_test.slice(s![start..end, ..]);
        let ys = y_test.slice(s![start..end, ..]);

        let k_test = kernel.evaluate(xs, x_train, KernelKind::Ntk);
        ensure_finite(k_test.iter(), "test kernel")?;
        let f = k_test.dot(&alpha);
        let (part, g_f) = objective.loss.value_and_grad(f.view(), ys, total);
        value += part;

        let g_k_test = g_f.dot(&alpha.t());
        grad += &kernel.vjp_rhs(xs, x_train, g_k_test.view(), KernelKind::Ntk);
        back += &k_test.t().dot(&g_f);

        trace!(start, end, part, "test sub-batch");
        start = end;
    }

    // ∂L/∂g(Θ) and the Daleckii–Krein pullback onto Θ.
    let m = back.dot(&y_train.t());
    let v = spectrum.vectors();
    let inner = v.t().dot(&m).dot(v) * &spectrum.divided_differences();
    let mut g_theta = v.dot(&inner).dot(&v.t());

    // Θ = K + diag_reg · tr(K)/n · I
    let trace_coef = predictor.diag_reg() / n as f64 * g_theta.diag().sum();
    g_theta.diag_mut().mapv_inplace(|d| d + trace_coef);

    grad += &kernel.vjp_gram(x_train, g_theta.view(), KernelKind::Ntk);
    ensure_finite(grad.iter(), "input gradient")?;

    if objective.targeted {
        value = -value;
        grad.mapv_inplace(|g| -g);
    }
    Ok((value, grad))
}

/// Held-out loss only, without the backward pass.
pub fn adversarial_loss(
    predictor: &KernelRegression<'_>,
    x_train: ArrayView2<'_, f64>,
    y_train: ArrayView2<'_, f64>,
    x_test: ArrayView2<'_, f64>,
    y_test: ArrayView2<'_, f64>,
    objective: &Objective,
) -> Result<f64> {
    let prediction = predictor.predict(x_train, y_train, x_test, objective.t)?;
    let value = objective.loss.value(prediction.test.view(), y_test);
    Ok(if objective.targeted { -value } else { value })
}

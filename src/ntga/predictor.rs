//! Closed-form predictions of a network trained by gradient descent on MSE,
//! in the infinite-width limit.
//!
//! With training kernel `Θ = V Λ Vᵀ` and `c = lr · t / |y|`, the outputs at
//! time `t` starting from zero are
//!
//! ```text
//! f_train(t) = V (1 − e^{−cΛ}) Vᵀ y
//! f_test(t)  = K_st V g(Λ) Vᵀ y,      g(λ) = (1 − e^{−cλ}) / λ
//! ```
//!
//! and `g(λ) = 1/λ` for infinite time.

use crate::error::{PoisonError, Result};
use crate::kernel::{Kernel, KernelKind};
use crate::perturbation::ensure_finite;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView2};

/// Learning rate of the simulated gradient descent.
pub const LEARNING_RATE: f64 = 1.0;

/// Eigendecomposition of a regularized training kernel together with the
/// spectral function `g` of the prediction at a given time.
#[derive(Debug, Clone)]
pub struct Spectrum {
    values: Array1<f64>,
    vectors: Array2<f64>,
    /// `lr · t / |y|`; `None` for infinite time.
    rate: Option<f64>,
}

impl Spectrum {
    /// Decompose `theta` (symmetric, positive definite).
    pub fn decompose(theta: &Array2<f64>, rate: Option<f64>) -> Result<Self> {
        let n = theta.nrows();
        if theta.ncols() != n {
            return Err(PoisonError::Shape(format!(
                "training kernel must be square, got {:?}",
                theta.dim()
            )));
        }
        ensure_finite(theta.iter(), "training kernel")?;

        let m = DMatrix::from_fn(n, n, |i, j| theta[[i, j]]);
        let eig = SymmetricEigen::try_new(m, f64::EPSILON, 0)
            .ok_or_else(|| PoisonError::Numerical("eigendecomposition did not converge".to_string()))?;

        if let Some(bad) = eig.eigenvalues.iter().find(|&&l| l <= 0.0 || !l.is_finite()) {
            return Err(PoisonError::Numerical(format!(
                "training kernel is not positive definite (eigenvalue {:e})",
                bad
            )));
        }

        Ok(Self {
            values: Array1::from_iter(eig.eigenvalues.iter().copied()),
            vectors: Array2::from_shape_fn((n, n), |(i, j)| eig.eigenvectors[(i, j)]),
            rate,
        })
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn vectors(&self) -> &Array2<f64> {
        &self.vectors
    }

    /// `g(λ)`.
    pub fn g(&self, lambda: f64) -> f64 {
        match self.rate {
            Some(c) => -(-c * lambda).exp_m1() / lambda,
            None => 1.0 / lambda,
        }
    }

    /// `g'(λ)`.
    pub fn g_prime(&self, lambda: f64) -> f64 {
        match self.rate {
            Some(c) => {
                let decay = (-c * lambda).exp();
                (c * lambda * decay + (-c * lambda).exp_m1()) / (lambda * lambda)
            }
            None => -1.0 / (lambda * lambda),
        }
    }

    /// `V diag(h(λ)) Vᵀ · rhs`.
    fn apply(&self, rhs: ArrayView2<'_, f64>, h: impl Fn(f64) -> f64) -> Array2<f64> {
        let mut projected = self.vectors.t().dot(&rhs);
        for (mut row, &lambda) in projected.rows_mut().into_iter().zip(self.values.iter()) {
            row *= h(lambda);
        }
        self.vectors.dot(&projected)
    }

    /// `g(Θ) · rhs`.
    pub fn apply_g(&self, rhs: ArrayView2<'_, f64>) -> Array2<f64> {
        self.apply(rhs, |l| self.g(l))
    }

    /// `Θ g(Θ) · rhs`, the training-set prediction operator.
    pub fn apply_train(&self, rhs: ArrayView2<'_, f64>) -> Array2<f64> {
        self.apply(rhs, |l| l * self.g(l))
    }

    /// Divided differences of `g` over the spectrum (Daleckii–Krein matrix).
    pub fn divided_differences(&self) -> Array2<f64> {
        let n = self.values.len();
        Array2::from_shape_fn((n, n), |(i, j)| {
            let (a, b) = (self.values[i], self.values[j]);
            if (a - b).abs() <= 1e-9 * a.abs().max(b.abs()) {
                self.g_prime(0.5 * (a + b))
            } else {
                (self.g(a) - self.g(b)) / (a - b)
            }
        })
    }
}

/// `K + diag_reg · mean(diag K) · I`.
pub fn regularize(kernel: &Array2<f64>, diag_reg: f64) -> Array2<f64> {
    let n = kernel.nrows().max(1) as f64;
    let shift = diag_reg * kernel.diag().sum() / n;
    let mut theta = kernel.clone();
    theta.diag_mut().mapv_inplace(|v| v + shift);
    theta
}

/// Time constant `c = lr · t / |y|` for a finite time.
pub fn rate(t: Option<f64>, y_train: ArrayView2<'_, f64>) -> Option<f64> {
    t.map(|t| LEARNING_RATE * t / y_train.len().max(1) as f64)
}

/// Outputs of kernel regression on a training block.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub train: Array2<f64>,
    pub test: Array2<f64>,
}

/// Kernel-regression predictor for one surrogate kernel.
pub struct KernelRegression<'k> {
    kernel: &'k dyn Kernel,
    diag_reg: f64,
}

impl<'k> KernelRegression<'k> {
    pub fn new(kernel: &'k dyn Kernel, diag_reg: f64) -> Self {
        Self { kernel, diag_reg }
    }

    pub fn kernel(&self) -> &'k dyn Kernel {
        self.kernel
    }

    pub fn diag_reg(&self) -> f64 {
        self.diag_reg
    }

    /// Decompose the regularized NTK of `x_train`.
    pub fn spectrum(
        &self,
        x_train: ArrayView2<'_, f64>,
        y_train: ArrayView2<'_, f64>,
        t: Option<f64>,
    ) -> Result<Spectrum> {
        let k_train = self.kernel.evaluate(x_train, x_train, KernelKind::Ntk);
        Spectrum::decompose(&regularize(&k_train, self.diag_reg), rate(t, y_train))
    }

    /// Predict train and test outputs at time `t` (`None` = infinite time).
    pub fn predict(
        &self,
        x_train: ArrayView2<'_, f64>,
        y_train: ArrayView2<'_, f64>,
        x_test: ArrayView2<'_, f64>,
        t: Option<f64>,
    ) -> Result<Prediction> {
        check_rows(x_train, y_train)?;
        let spectrum = self.spectrum(x_train, y_train, t)?;

        let k_test = self.kernel.evaluate(x_test, x_train, KernelKind::Ntk);
        ensure_finite(k_test.iter(), "test kernel")?;

        let alpha = spectrum.apply_g(y_train);
        Ok(Prediction {
            train: spectrum.apply_train(y_train),
            test: k_test.dot(&alpha),
        })
    }
}

pub(crate) fn check_rows(x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<()> {
    if x.nrows() != y.nrows() {
        return Err(PoisonError::Shape(format!(
            "{} inputs but {} targets",
            x.nrows(),
            y.nrows()
        )));
    }
    if x.nrows() == 0 {
        return Err(PoisonError::Shape("empty training block".to_string()));
    }
    Ok(())
}

//! Surrogate kernels for the generalization attack
//!
//! A surrogate kernel is the infinite-width limit of a dense or
//! convolutional network. Besides evaluating the kernel, every implementation provides the
//! two vector-Jacobian products the attack needs to backpropagate a loss on
//! the kernel into the training inputs.

mod conv;
mod linear;
mod ntk;
mod relu;

pub use conv::ConvNtk;
pub use linear::LinearKernel;
pub use ntk::ReluNtk;

use crate::data::ImageShape;
use crate::error::{PoisonError, Result};
use ndarray::{Array2, ArrayView2};
use std::fmt;
use std::str::FromStr;

/// Which of the two infinite-width kernels to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    /// Neural tangent kernel (training dynamics).
    Ntk,
    /// Neural network Gaussian process kernel (prior covariance).
    Nngp,
}

impl KernelKind {
    /// Output cotangent `(nngp, ntk)` that selects this kernel.
    pub(crate) fn seed(self, c: f64) -> (f64, f64) {
        match self {
            KernelKind::Nngp => (c, 0.0),
            KernelKind::Ntk => (0.0, c),
        }
    }
}

/// Kernel function of a surrogate network.
///
/// Rows of `x` and `y` are flattened inputs of the same dimension.
pub trait Kernel {
    /// `K[i, j] = k(x_i, y_j)`.
    fn evaluate(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>, kind: KernelKind)
        -> Array2<f64>;

    /// Gradient of `Σ_ij C[i, j] · k(x_i, y_j)` with respect to `y`.
    fn vjp_rhs(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        cotangent: ArrayView2<'_, f64>,
        kind: KernelKind,
    ) -> Array2<f64>;

    /// Gradient of `Σ_ij C[i, j] · k(x_i, x_j)` with respect to `x`.
    fn vjp_gram(
        &self,
        x: ArrayView2<'_, f64>,
        cotangent: ArrayView2<'_, f64>,
        kind: KernelKind,
    ) -> Array2<f64>;
}

/// Surrogate architectures available to the attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurrogateKind {
    /// A single dense layer.
    Linear,
    /// Dense → (ReLU → Dense) × depth.
    Fnn,
    /// Two strided convolution blocks, flatten, three dense layers.
    Cnn,
}

impl SurrogateKind {
    /// Build the kernel for this architecture on images of `shape`.
    ///
    /// `depth` only applies to the fnn surrogate; the cnn one is fixed.
    pub fn build(&self, shape: ImageShape, depth: usize, w_var: f64, b_var: f64) -> Box<dyn Kernel> {
        match self {
            SurrogateKind::Linear => Box::new(LinearKernel::new(w_var, b_var)),
            SurrogateKind::Fnn => Box::new(ReluNtk::new(depth, w_var, b_var)),
            SurrogateKind::Cnn => Box::new(ConvNtk::new(shape, w_var, b_var)),
        }
    }
}

impl FromStr for SurrogateKind {
    type Err = PoisonError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(SurrogateKind::Linear),
            "fnn" => Ok(SurrogateKind::Fnn),
            "cnn" => Ok(SurrogateKind::Cnn),
            other => Err(PoisonError::Config(format!(
                "unknown surrogate '{}'; expected 'cnn', 'fnn' or 'linear'",
                other
            ))),
        }
    }
}

impl fmt::Display for SurrogateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurrogateKind::Linear => write!(f, "linear"),
            SurrogateKind::Fnn => write!(f, "fnn"),
            SurrogateKind::Cnn => write!(f, "cnn"),
        }
    }
}

/// Squared norm of every row.
pub(crate) fn row_sq_norms(x: ArrayView2<'_, f64>) -> Vec<f64> {
    x.rows().into_iter().map(|r| r.dot(&r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surrogate_parsing() {
        assert_eq!("fnn".parse::<SurrogateKind>().unwrap(), SurrogateKind::Fnn);
        assert_eq!("linear".parse::<SurrogateKind>().unwrap(), SurrogateKind::Linear);
        assert_eq!("cnn".parse::<SurrogateKind>().unwrap(), SurrogateKind::Cnn);
        assert!(matches!("resnet".parse::<SurrogateKind>(), Err(PoisonError::Config(_))));
    }
}

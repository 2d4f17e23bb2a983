use super::{Kernel, KernelKind};
use ndarray::{Array2, ArrayView2};

/// Kernel of a single dense layer in NTK parameterization.
///
/// `k(x, y) = w_var · ⟨x, y⟩ / d + b_var`. NTK and NNGP coincide.
#[derive(Debug, Clone, Copy)]
pub struct LinearKernel {
    w_var: f64,
    b_var: f64,
}

impl LinearKernel {
    pub fn new(w_var: f64, b_var: f64) -> Self {
        Self { w_var, b_var }
    }

    fn scale(&self, dim: usize) -> f64 {
        self.w_var / dim.max(1) as f64
    }
}

impl Kernel for LinearKernel {
    fn evaluate(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>, _kind: KernelKind) -> Array2<f64> {
        let mut k = x.dot(&y.t());
        let scale = self.scale(x.ncols());
        k.mapv_inplace(|v| scale * v + self.b_var);
        k
    }

    fn vjp_rhs(
        &self,
        x: ArrayView2<'_, f64>,
        _y: ArrayView2<'_, f64>,
        cotangent: ArrayView2<'_, f64>,
        _kind: KernelKind,
    ) -> Array2<f64> {
        cotangent.t().dot(&x) * self.scale(x.ncols())
    }

    fn vjp_gram(&self, x: ArrayView2<'_, f64>, cotangent: ArrayView2<'_, f64>, _kind: KernelKind) -> Array2<f64> {
        let sym = &cotangent + &cotangent.t();
        sym.dot(&x) * self.scale(x.ncols())
    }
}

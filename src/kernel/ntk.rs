use super::relu::ReluStep;
use super::{row_sq_norms, Kernel, KernelKind};
use ndarray::{Array2, ArrayView2};

/// Infinite-width kernels of `Dense → (ReLU → Dense) × depth` in NTK
/// parameterization.
///
/// Per pair of inputs the recursion tracks the cross covariance `Σ`, the
/// tangent kernel `Θ` and the two variances `Sx`, `Sy`:
///
/// ```text
/// Σ₀ = w·⟨x,y⟩/d + b      Sx₀ = w·|x|²/d + b      Θ₀ = Σ₀
/// Σ' = w·E1 + b           Θ' = Σ' + w·E0·Θ        Sx' = w·Sx/2 + b
/// ```
///
/// with the ReLU moments `E1`, `E0` of the arc-cosine kernel.
#[derive(Debug, Clone, Copy)]
pub struct ReluNtk {
    depth: usize,
    w_var: f64,
    b_var: f64,
}

impl ReluNtk {
    pub fn new(depth: usize, w_var: f64, b_var: f64) -> Self {
        Self {
            depth,
            w_var,
            b_var,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Run the recursion for one pair, returning `(nngp, ntk)`.
    ///
    /// When `tape` is given it receives one entry per ReLU layer.
    fn forward_pair(&self, dot: f64, qx: f64, qy: f64, dim: f64, mut tape: Option<&mut Vec<ReluStep>>) -> (f64, f64) {
        let (w, b) = (self.w_var, self.b_var);
        let mut sigma = w * dot / dim + b;
        let mut theta_k = sigma;
        let mut sx = w * qx / dim + b;
        let mut sy = w * qy / dim + b;

        if let Some(t) = tape.as_deref_mut() {
            t.clear();
        }

        for _ in 0..self.depth {
            let step = ReluStep::new(sigma, theta_k, sx, sy);
            if let Some(t) = tape.as_deref_mut() {
                t.push(step);
            }

            sigma = w * step.e1 + b;
            theta_k = sigma + w * step.e0 * theta_k;
            sx = w * sx / 2.0 + b;
            sy = w * sy / 2.0 + b;
        }
        (sigma, theta_k)
    }

    /// Reverse pass for one off-diagonal pair.
    ///
    /// Returns the cotangents of `(⟨x,y⟩, |x|², |y|²)` for the output seed
    /// `(g_nngp, g_ntk)`.
    #[allow(clippy::too_many_arguments)]
    fn backward_pair(
        &self,
        dot: f64,
        qx: f64,
        qy: f64,
        dim: f64,
        g_nngp: f64,
        g_ntk: f64,
        tape: &mut Vec<ReluStep>,
    ) -> (f64, f64, f64) {
        self.forward_pair(dot, qx, qy, dim, Some(&mut *tape));
        let w = self.w_var;

        let mut g_sigma = g_nngp;
        let mut g_theta = g_ntk;
        let mut g_sx = 0.0;
        let mut g_sy = 0.0;

        for step in tape.iter().rev() {
            let g_e1 = w * (g_sigma + g_theta);
            let g_e0 = w * step.theta * g_theta;
            let (gs, gx, gy) = step.backward(g_e1, g_e0);

            g_theta *= w * step.e0;
            g_sigma = gs;
            g_sx = w / 2.0 * g_sx + gx;
            g_sy = w / 2.0 * g_sy + gy;
        }

        let scale = w / dim;
        (scale * (g_sigma + g_theta), scale * g_sx, scale * g_sy)
    }

    /// Derivative of `k(x, x)` with respect to `|x|²`.
    ///
    /// On the diagonal `ρ = 1` and the recursion reduces to an affine map of
    /// `|x|²`, so the derivative is a product of constants.
    fn diagonal_derivative(&self, dim: f64, kind: KernelKind) -> f64 {
        let w = self.w_var;
        let mut d_sigma = w / dim;
        let mut d_theta = w / dim;
        for _ in 0..self.depth {
            d_sigma *= w / 2.0;
            d_theta = d_sigma + w / 2.0 * d_theta;
        }
        match kind {
            KernelKind::Nngp => d_sigma,
            KernelKind::Ntk => d_theta,
        }
    }
}

impl Kernel for ReluNtk {
    fn evaluate(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>, kind: KernelKind) -> Array2<f64> {
        let dim = x.ncols().max(1) as f64;
        let qx = row_sq_norms(x);
        let qy = row_sq_norms(y);
        let mut k = x.dot(&y.t());

        for ((i, j), value) in k.indexed_iter_mut() {
            let (nngp, ntk) = self.forward_pair(*value, qx[i], qy[j], dim, None);
            *value = match kind {
                KernelKind::Nngp => nngp,
                KernelKind::Ntk => ntk,
            };
        }
        k
    }

    fn vjp_rhs(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        cotangent: ArrayView2<'_, f64>,
        kind: KernelKind,
    ) -> Array2<f64> {
        let dim = x.ncols().max(1) as f64;
        let qx = row_sq_norms(x);
        let qy = row_sq_norms(y);
        let dots = x.dot(&y.t());

        let mut g_dot = Array2::<f64>::zeros(dots.dim());
        let mut g_qy = vec![0.0; y.nrows()];
        let mut tape = Vec::with_capacity(self.depth);

        for ((i, j), &c) in cotangent.indexed_iter() {
            if c == 0.0 {
                continue;
            }
            let (g_nngp, g_ntk) = kind.seed(c);
            let (gd, _, gq) = self.backward_pair(dots[[i, j]], qx[i], qy[j], dim, g_nngp, g_ntk, &mut tape);
            g_dot[[i, j]] = gd;
            g_qy[j] += gq;
        }

        // ∂⟨x,y⟩/∂y = x, ∂|y|²/∂y = 2y
        let mut grad = g_dot.t().dot(&x);
        for (j, mut row) in grad.rows_mut().into_iter().enumerate() {
            row.scaled_add(2.0 * g_qy[j], &y.row(j));
        }
        grad
    }

    fn vjp_gram(&self, x: ArrayView2<'_, f64>, cotangent: ArrayView2<'_, f64>, kind: KernelKind) -> Array2<f64> {
        let n = x.nrows();
        let dim = x.ncols().max(1) as f64;
        let q = row_sq_norms(x);
        let dots = x.dot(&x.t());
        let diag = self.diagonal_derivative(dim, kind);

        let mut g_dot = Array2::<f64>::zeros((n, n));
        let mut row_coef = vec![0.0; n];
        let mut tape = Vec::with_capacity(self.depth);

        for ((i, j), &c) in cotangent.indexed_iter() {
            if c == 0.0 {
                continue;
            }
            if i == j {
                row_coef[i] += c * diag;
                continue;
            }
            let (g_nngp, g_ntk) = kind.seed(c);
            let (gd, gqx, gqy) = self.backward_pair(dots[[i, j]], q[i], q[j], dim, g_nngp, g_ntk, &mut tape);
            g_dot[[i, j]] = gd;
            row_coef[i] += gqx;
            row_coef[j] += gqy;
        }

        let sym = &g_dot + &g_dot.t();
        let mut grad = sym.dot(&x);
        for (i, mut row) in grad.rows_mut().into_iter().enumerate() {
            row.scaled_add(2.0 * row_coef[i], &x.row(i));
        }
        grad
    }
}

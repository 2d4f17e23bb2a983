use super::relu::ReluStep;
use super::{Kernel, KernelKind};
use crate::data::ImageShape;
use ndarray::{Array2, ArrayView1, ArrayView2};

/// Convolution blocks before the flatten.
const CONV_BLOCKS: usize = 2;
/// Dense layers after the flatten, the last one producing the logits.
const DENSE_LAYERS: usize = 3;
const STRIDE: usize = 2;
const FILTER: usize = 3;
const FILTER_AREA: f64 = (FILTER * FILTER) as f64;

/// Infinite-width kernels of the convolutional surrogate
///
/// ```text
/// (Conv 3×3 stride 2 SAME → ReLU) × 2 → Flatten → Dense × 3
/// ```
///
/// in NTK parameterization. Rows of the inputs are images flattened in
/// `height × width × channels` order.
///
/// The dense weights after the flatten are independent per spatial position,
/// so the flattened kernel only sees the covariance of each position with
/// itself. A convolution maps that spatial diagonal onto the spatial
/// diagonal of its output, which lets the recursion carry one value per
/// position and pair instead of a full position × position covariance:
///
/// ```text
/// Σ₀(p) = w/(9C)·Σ_{q∈win(p)} ⟨x_q, y_q⟩ + b               Θ₀ = Σ₀
/// Σ'(p) = w/9·Σ_{q∈win(p)} E1(q) + b                       Θ'(p) = w/9·Σ_q E0(q)·Θ(q) + Σ'(p)
/// flatten + dense:  Σ = w·mean_p E1(p) + b                 Θ = w·mean_p E0(p)·Θ(p) + Σ
/// dense:            Σ' = w·Σ + b                           Θ' = w·Θ + Σ'
/// ```
#[derive(Debug, Clone)]
pub struct ConvNtk {
    shape: ImageShape,
    layers: Vec<ConvWindows>,
    w_var: f64,
    b_var: f64,
}

/// Input positions read by every output position of one convolution.
/// Windows are clipped at the border, which is zero padding.
#[derive(Debug, Clone)]
struct ConvWindows {
    windows: Vec<Vec<usize>>,
    inputs: usize,
}

impl ConvWindows {
    /// `SAME` padding: `ceil(n / stride)` outputs per axis, the odd padding
    /// cell going after the input.
    fn same(height: usize, width: usize) -> (Self, usize, usize) {
        let (out_h, top) = Self::axis(height);
        let (out_w, left) = Self::axis(width);

        let mut windows = Vec::with_capacity(out_h * out_w);
        for r in 0..out_h {
            for c in 0..out_w {
                let mut window = Vec::with_capacity(FILTER * FILTER);
                for dr in 0..FILTER {
                    for dc in 0..FILTER {
                        let (ir, ic) = ((r * STRIDE + dr) as isize - top, (c * STRIDE + dc) as isize - left);
                        if ir >= 0 && ic >= 0 && (ir as usize) < height && (ic as usize) < width {
                            window.push(ir as usize * width + ic as usize);
                        }
                    }
                }
                windows.push(window);
            }
        }

        let layer = Self {
            windows,
            inputs: height * width,
        };
        (layer, out_h, out_w)
    }

    fn axis(n: usize) -> (usize, isize) {
        let out = n.div_ceil(STRIDE);
        let pad = ((out.max(1) - 1) * STRIDE + FILTER).saturating_sub(n);
        (out, (pad / 2) as isize)
    }

    fn outputs(&self) -> usize {
        self.windows.len()
    }

    fn apply(&self, input: &[f64], scale: f64, bias: f64) -> Vec<f64> {
        self.windows
            .iter()
            .map(|w| scale * w.iter().map(|&q| input[q]).sum::<f64>() + bias)
            .collect()
    }

    fn adjoint(&self, g_out: &[f64], scale: f64) -> Vec<f64> {
        let mut g_in = vec![0.0; self.inputs];
        for (window, &g) in self.windows.iter().zip(g_out) {
            for &q in window {
                g_in[q] += scale * g;
            }
        }
        g_in
    }
}

/// Cotangents arriving at the post-ReLU quantities of one convolution block.
struct PostReluGrads {
    e1: Vec<f64>,
    e0_theta: Vec<f64>,
    sx: Vec<f64>,
    sy: Vec<f64>,
}

/// Cotangents of the pre-activation maps of one convolution block. `sigma`
/// already includes the path through `Θ = … + Σ`.
struct PreActivationGrads {
    sigma: Vec<f64>,
    theta: Vec<f64>,
    sx: Vec<f64>,
    sy: Vec<f64>,
}

impl ConvNtk {
    pub fn new(shape: ImageShape, w_var: f64, b_var: f64) -> Self {
        let (mut h, mut w) = (shape.height, shape.width);
        let mut layers = Vec::with_capacity(CONV_BLOCKS);
        for _ in 0..CONV_BLOCKS {
            let (layer, out_h, out_w) = ConvWindows::same(h, w);
            layers.push(layer);
            h = out_h;
            w = out_w;
        }
        Self {
            shape,
            layers,
            w_var,
            b_var,
        }
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    fn first_scale(&self) -> f64 {
        self.w_var / (FILTER_AREA * self.shape.channels.max(1) as f64)
    }

    /// `⟨x_q, y_q⟩` over channels for every pixel `q`.
    fn pixel_dots(&self, x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> Vec<f64> {
        let c = self.shape.channels;
        (0..self.shape.height * self.shape.width)
            .map(|q| (0..c).map(|ch| x[q * c + ch] * y[q * c + ch]).sum())
            .collect()
    }

    fn pixel_norms(&self, x: ArrayView2<'_, f64>) -> Vec<Vec<f64>> {
        x.rows().into_iter().map(|r| self.pixel_dots(r, r)).collect()
    }

    /// Run the recursion for one pair, returning `(nngp, ntk)`.
    ///
    /// When `tape` is given it receives the ReLU steps of every block.
    fn forward_pair(&self, dots: &[f64], qx: &[f64], qy: &[f64], mut tape: Option<&mut Vec<Vec<ReluStep>>>) -> (f64, f64) {
        let (w, b) = (self.w_var, self.b_var);
        let scale = w / FILTER_AREA;
        let first = self.first_scale();

        let mut sigma = self.layers[0].apply(dots, first, b);
        let mut sx = self.layers[0].apply(qx, first, b);
        let mut sy = self.layers[0].apply(qy, first, b);
        let mut theta = sigma.clone();

        if let Some(t) = tape.as_deref_mut() {
            t.clear();
        }

        let (mut nngp, mut ntk) = (0.0, 0.0);
        for l in 0..self.layers.len() {
            let steps: Vec<ReluStep> = (0..sigma.len())
                .map(|p| ReluStep::new(sigma[p], theta[p], sx[p], sy[p]))
                .collect();
            let e1: Vec<f64> = steps.iter().map(|s| s.e1).collect();
            let e0_theta: Vec<f64> = steps.iter().map(|s| s.e0 * s.theta).collect();

            match self.layers.get(l + 1) {
                Some(next) => {
                    sigma = next.apply(&e1, scale, b);
                    theta = next
                        .apply(&e0_theta, scale, 0.0)
                        .iter()
                        .zip(&sigma)
                        .map(|(carried, s)| carried + s)
                        .collect();
                    sx = next.apply(&sx, scale / 2.0, b);
                    sy = next.apply(&sy, scale / 2.0, b);
                }
                None => {
                    let count = e1.len().max(1) as f64;
                    nngp = w * e1.iter().sum::<f64>() / count + b;
                    ntk = w * e0_theta.iter().sum::<f64>() / count + nngp;
                }
            }

            if let Some(t) = tape.as_deref_mut() {
                t.push(steps);
            }
        }

        for _ in 1..DENSE_LAYERS {
            nngp = w * nngp + b;
            ntk = w * ntk + nngp;
        }
        (nngp, ntk)
    }

    /// Reverse pass for one off-diagonal pair.
    ///
    /// Returns per-pixel cotangents of `(⟨x_q,y_q⟩, |x_q|², |y_q|²)`.
    fn backward_pair(
        &self,
        dots: &[f64],
        qx: &[f64],
        qy: &[f64],
        (g_nngp, g_ntk): (f64, f64),
        tape: &mut Vec<Vec<ReluStep>>,
    ) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        self.forward_pair(dots, qx, qy, Some(&mut *tape));
        let w = self.w_var;
        let scale = w / FILTER_AREA;

        let (g_sigma, g_theta) = self.dense_tail_backward(g_nngp, g_ntk);
        let positions = self.layers[self.layers.len() - 1].outputs();
        let count = positions.max(1) as f64;
        let mut post = PostReluGrads {
            e1: vec![w * (g_sigma + g_theta) / count; positions],
            e0_theta: vec![w * g_theta / count; positions],
            sx: vec![0.0; positions],
            sy: vec![0.0; positions],
        };

        for l in (1..self.layers.len()).rev() {
            let pre = Self::relu_backward(&tape[l], &post);
            let layer = &self.layers[l];
            post = PostReluGrads {
                e1: layer.adjoint(&pre.sigma, scale),
                e0_theta: layer.adjoint(&pre.theta, scale),
                sx: layer.adjoint(&pre.sx, scale / 2.0),
                sy: layer.adjoint(&pre.sy, scale / 2.0),
            };
        }

        let pre = Self::relu_backward(&tape[0], &post);
        let first = self.first_scale();
        (
            self.layers[0].adjoint(&pre.sigma, first),
            self.layers[0].adjoint(&pre.sx, first),
            self.layers[0].adjoint(&pre.sy, first),
        )
    }

    /// Cotangents of `(Σ, Θ)` entering the first dense layer.
    fn dense_tail_backward(&self, mut g_sigma: f64, mut g_theta: f64) -> (f64, f64) {
        for _ in 1..DENSE_LAYERS {
            g_sigma = self.w_var * (g_sigma + g_theta);
            g_theta *= self.w_var;
        }
        (g_sigma, g_theta)
    }

    fn relu_backward(steps: &[ReluStep], post: &PostReluGrads) -> PreActivationGrads {
        let n = steps.len();
        let mut pre = PreActivationGrads {
            sigma: vec![0.0; n],
            theta: vec![0.0; n],
            sx: vec![0.0; n],
            sy: vec![0.0; n],
        };
        for (p, step) in steps.iter().enumerate() {
            let (gs, gx, gy) = step.backward(post.e1[p], post.e0_theta[p] * step.theta);
            pre.theta[p] = post.e0_theta[p] * step.e0;
            pre.sigma[p] = gs + pre.theta[p];
            pre.sx[p] = post.sx[p] + gx;
            pre.sy[p] = post.sy[p] + gy;
        }
        pre
    }

    /// Derivative of `k(x, x)` with respect to every `|x_q|²`.
    ///
    /// On the diagonal `ρ = 1` at every position, `E1 = S/2` and `E0 = 1/2`,
    /// so the recursion is affine in the pixel norms and the derivative does
    /// not depend on `x`.
    fn diagonal_sensitivity(&self, kind: KernelKind) -> Vec<f64> {
        let (seed_sigma, seed_theta) = kind.seed(1.0);
        let (g_sigma, g_theta) = self.dense_tail_backward(seed_sigma, seed_theta);
        let w = self.w_var;
        let scale = w / FILTER_AREA;

        let positions = self.layers[self.layers.len() - 1].outputs();
        let count = positions.max(1) as f64;
        let mut g_s = vec![w * (g_sigma + g_theta) / (2.0 * count); positions];
        let mut g_t = vec![w * g_theta / (2.0 * count); positions];

        for layer in self.layers[1..].iter().rev() {
            let total: Vec<f64> = g_s.iter().zip(&g_t).map(|(s, t)| s + t).collect();
            g_s = layer.adjoint(&total, scale / 2.0);
            g_t = layer.adjoint(&g_t, scale / 2.0);
        }

        let total: Vec<f64> = g_s.iter().zip(&g_t).map(|(s, t)| s + t).collect();
        self.layers[0].adjoint(&total, self.first_scale())
    }
}

impl Kernel for ConvNtk {
    fn evaluate(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>, kind: KernelKind) -> Array2<f64> {
        debug_assert_eq!(x.ncols(), self.shape.len());
        let qx = self.pixel_norms(x);
        let qy = self.pixel_norms(y);

        Array2::from_shape_fn((x.nrows(), y.nrows()), |(i, j)| {
            let dots = self.pixel_dots(x.row(i), y.row(j));
            let (nngp, ntk) = self.forward_pair(&dots, &qx[i], &qy[j], None);
            match kind {
                KernelKind::Nngp => nngp,
                KernelKind::Ntk => ntk,
            }
        })
    }

    fn vjp_rhs(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        cotangent: ArrayView2<'_, f64>,
        kind: KernelKind,
    ) -> Array2<f64> {
        let c = self.shape.channels;
        let qx = self.pixel_norms(x);
        let qy = self.pixel_norms(y);
        let mut grad = Array2::<f64>::zeros(y.dim());
        let mut tape = Vec::with_capacity(CONV_BLOCKS);

        for ((i, j), &ct) in cotangent.indexed_iter() {
            if ct == 0.0 {
                continue;
            }
            let dots = self.pixel_dots(x.row(i), y.row(j));
            let (g_dot, _, g_qy) = self.backward_pair(&dots, &qx[i], &qy[j], kind.seed(ct), &mut tape);

            // ∂⟨x_q,y_q⟩/∂y_q = x_q, ∂|y_q|²/∂y_q = 2·y_q
            for (q, (&gd, &gq)) in g_dot.iter().zip(&g_qy).enumerate() {
                for k in q * c..(q + 1) * c {
                    grad[[j, k]] += gd * x[[i, k]] + 2.0 * gq * y[[j, k]];
                }
            }
        }
        grad
    }

    fn vjp_gram(&self, x: ArrayView2<'_, f64>, cotangent: ArrayView2<'_, f64>, kind: KernelKind) -> Array2<f64> {
        let c = self.shape.channels;
        let q_norms = self.pixel_norms(x);
        let diag = self.diagonal_sensitivity(kind);
        let mut grad = Array2::<f64>::zeros(x.dim());
        let mut tape = Vec::with_capacity(CONV_BLOCKS);

        for ((i, j), &ct) in cotangent.indexed_iter() {
            if ct == 0.0 {
                continue;
            }
            if i == j {
                for (q, &d) in diag.iter().enumerate() {
                    for k in q * c..(q + 1) * c {
                        grad[[i, k]] += 2.0 * ct * d * x[[i, k]];
                    }
                }
                continue;
            }

            let dots = self.pixel_dots(x.row(i), x.row(j));
            let (g_dot, g_qi, g_qj) = self.backward_pair(&dots, &q_norms[i], &q_norms[j], kind.seed(ct), &mut tape);
            for q in 0..g_dot.len() {
                for k in q * c..(q + 1) * c {
                    let (xi, xj) = (x[[i, k]], x[[j, k]]);
                    grad[[i, k]] += g_dot[q] * xj + 2.0 * g_qi[q] * xi;
                    grad[[j, k]] += g_dot[q] * xi + 2.0 * g_qj[q] * xj;
                }
            }
        }
        grad
    }
}

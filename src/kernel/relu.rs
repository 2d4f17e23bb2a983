use std::f64::consts::PI;

pub(super) const TINY: f64 = 1e-12;

/// One ReLU of the arc-cosine recursion for a single pair of inputs.
///
/// Holds the pre-activation statistics (cross covariance `Σ`, tangent kernel
/// `Θ`, variances `Sx`, `Sy`) and the two moments they produce:
///
/// ```text
/// ρ = Σ/√(Sx·Sy),  θ = acos ρ
/// E1 = √(Sx·Sy)·(sin θ + (π − θ)·cos θ)/(2π)     E[relu(u)·relu(v)]
/// E0 = (π − θ)/(2π)                              E[relu'(u)·relu'(v)]
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct ReluStep {
    pub sigma: f64,
    pub theta: f64,
    pub sx: f64,
    pub sy: f64,
    r: f64,
    rho: f64,
    angle: f64,
    s: f64,
    pub e1: f64,
    pub e0: f64,
    clamped: bool,
}

impl ReluStep {
    pub fn new(sigma: f64, theta: f64, sx: f64, sy: f64) -> Self {
        let r = (sx * sy).max(0.0).sqrt();
        let raw = if r > TINY { sigma / r } else { 0.0 };
        let rho = raw.clamp(-1.0, 1.0);
        let angle = rho.acos();
        let s = (1.0 - rho * rho).max(0.0).sqrt();
        Self {
            sigma,
            theta,
            sx,
            sy,
            r,
            rho,
            angle,
            s,
            e1: r * (s + (PI - angle) * rho) / (2.0 * PI),
            e0: (PI - angle) / (2.0 * PI),
            clamped: raw != rho,
        }
    }

    /// Cotangents of `(Σ, Sx, Sy)` given the cotangents of `(E1, E0)`.
    ///
    /// Where `ρ` was clamped to ±1 the moments are flat in `Σ`.
    pub fn backward(&self, g_e1: f64, g_e0: f64) -> (f64, f64, f64) {
        if self.r <= TINY {
            return (0.0, 0.0, 0.0);
        }
        let j1 = (self.s + (PI - self.angle) * self.rho) / (2.0 * PI);
        let mut g_r = g_e1 * j1;
        let mut g_sigma = 0.0;

        if !self.clamped {
            let mut g_rho = g_e1 * self.r * (PI - self.angle) / (2.0 * PI);
            if self.s > TINY {
                g_rho += g_e0 / (2.0 * PI * self.s);
            }
            g_sigma = g_rho / self.r;
            g_r -= g_rho * self.sigma / (self.r * self.r);
        }

        (g_sigma, g_r * self.sy / (2.0 * self.r), g_r * self.sx / (2.0 * self.r))
    }
}

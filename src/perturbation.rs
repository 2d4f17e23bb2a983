//! L-infinity projection, clipping and signed steps shared by both attacks.
//!
//! Every attack step in the crate has the same tail: move along the sign of a
//! gradient, pull the perturbation back into the ε-ball around the clean
//! input, then clip to the valid pixel range. The helpers below implement
//! that tail once for the f64 kernel attack and once for the f32 classifiers.

use crate::error::{PoisonError, Result};
use ndarray::{Array2, ArrayView2, Zip};

/// Sign with `sign(0) = 0`, matching the behavior the attacks rely on for
/// pixels with an exactly zero gradient.
#[inline]
pub fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[inline]
pub fn sign_f32(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// `x_adv += step * sign(grad)` element-wise.
pub fn signed_step(x_adv: &mut Array2<f64>, grad: &ArrayView2<'_, f64>, step: f64) {
    Zip::from(x_adv).and(grad).for_each(|x, &g| *x += step * sign(g));
}

/// Project `x_adv` into the L∞ ball of radius `eps` around `origin`, then clip
/// to `[clip_min, clip_max]`.
pub fn project_linf(
    x_adv: &mut Array2<f64>,
    origin: &ArrayView2<'_, f64>,
    eps: f64,
    clip_min: f64,
    clip_max: f64,
) {
    Zip::from(x_adv).and(origin).for_each(|x, &o| {
        let eta = (*x - o).clamp(-eps, eps);
        *x = (o + eta).clamp(clip_min, clip_max);
    });
}

/// f32 version of the step-project-clip tail used by the minimax attacks.
///
/// `perturbed` is updated in place and the resulting delta
/// (`perturbed - clean`) is written into `delta`.
pub fn step_project_clip(
    perturbed: &mut [f32],
    delta: &mut [f32],
    clean: &[f32],
    grad: &[f32],
    step: f32,
    eps: f32,
) {
    for (((p, d), &c), &g) in perturbed
        .iter_mut()
        .zip(delta.iter_mut())
        .zip(clean)
        .zip(grad)
    {
        let moved = *p + step * sign_f32(g);
        let eta = (moved - c).clamp(-eps, eps);
        *p = (c + eta).clamp(0.0, 1.0);
        *d = *p - c;
    }
}

/// `clip(clean + noise, 0, 1)` element-wise.
pub fn apply_noise(clean: &[f32], noise: &[f32]) -> Vec<f32> {
    clean
        .iter()
        .zip(noise)
        .map(|(&c, &n)| (c + n).clamp(0.0, 1.0))
        .collect()
}

/// Largest absolute element-wise difference.
pub fn linf_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

/// Fail with a numerical error if any value is NaN or infinite.
pub fn ensure_finite<'a>(values: impl IntoIterator<Item = &'a f64>, what: &str) -> Result<()> {
    if values.into_iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(PoisonError::Numerical(format!("non-finite values in {}", what)))
    }
}

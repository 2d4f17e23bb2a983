//! Sign-gradient noise refinement against a frozen classifier.

use crate::classifier::Classifier;
use crate::perturbation::step_project_clip;
use tracing::debug;

/// Direction of the sign step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Descend the loss: error-minimizing noise.
    Minimize,
    /// Ascend the loss: error-maximizing (robustness) noise.
    Maximize,
}

/// L∞-bounded perturbation refinement.
///
/// Both attacks start from `clip(images + initial_noise, 0, 1)` and take
/// `num_steps` sign steps of size `step_size`, keeping the perturbed batch
/// within `epsilon` of the clean one and inside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerturbationTool {
    pub epsilon: f32,
    pub num_steps: usize,
    pub step_size: f32,
}

impl PerturbationTool {
    pub fn new(epsilon: f32, num_steps: usize, step_size: f32) -> Self {
        Self {
            epsilon,
            num_steps,
            step_size,
        }
    }

    /// Error-minimizing refinement. Returns `(perturbed, delta)`.
    pub fn min_min_attack<M: Classifier + ?Sized>(
        &self,
        images: &[f32],
        labels: &[usize],
        model: &M,
        initial_noise: &[f32],
    ) -> (Vec<f32>, Vec<f32>) {
        self.refine(images, labels, model, initial_noise, Direction::Minimize)
    }

    /// Error-maximizing refinement. Returns `(perturbed, delta)`.
    pub fn min_max_attack<M: Classifier + ?Sized>(
        &self,
        images: &[f32],
        labels: &[usize],
        model: &M,
        initial_noise: &[f32],
    ) -> (Vec<f32>, Vec<f32>) {
        self.refine(images, labels, model, initial_noise, Direction::Maximize)
    }

    fn refine<M: Classifier + ?Sized>(
        &self,
        images: &[f32],
        labels: &[usize],
        model: &M,
        initial_noise: &[f32],
        direction: Direction,
    ) -> (Vec<f32>, Vec<f32>) {
        debug_assert_eq!(images.len(), initial_noise.len());

        let mut perturbed: Vec<f32> = images
            .iter()
            .zip(initial_noise)
            .map(|(&x, &n)| (x + n).clamp(0.0, 1.0))
            .collect();
        let mut delta = initial_noise.to_vec();

        for step in 0..self.num_steps {
            let (loss, mut grad) = model.input_gradient(&perturbed, labels);
            if direction == Direction::Minimize {
                grad.iter_mut().for_each(|g| *g = -*g);
            }
            step_project_clip(
                &mut perturbed,
                &mut delta,
                images,
                &grad,
                self.step_size,
                self.epsilon,
            );
            debug!(?direction, step, loss, "perturbation step");
        }
        (perturbed, delta)
    }
}

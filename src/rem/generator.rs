//! Joint training and noise refinement.
//!
//! Each round trains the classifier for a few mini-batches on the currently
//! poisoned data, refines the robust and error-minimizing noise of every
//! sample against the frozen model, then measures accuracy on the poisoned
//! set. The loop stops once that accuracy passes the threshold, meaning the
//! noise has made the data trivially learnable.

use super::cursor::CyclicCursor;
use super::noise::NoiseStore;
use super::tool::PerturbationTool;
use crate::classifier::{Classifier, TrainableClassifier};
use crate::config::RemConfig;
use crate::data::{DataLoader, Dataset, Sample};
use crate::error::{PoisonError, Result};
use crate::optimizers::Optimizer;
use crate::perturbation::apply_noise;
use tracing::{debug, info, warn};

/// Loop hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RemSettings {
    /// Error-minimizing refinement.
    pub min_min: PerturbationTool,
    /// Error-maximizing refinement of the robust noise.
    pub min_max: PerturbationTool,
    pub train_steps: usize,
    pub grad_clip: f32,
    pub accuracy_threshold: f64,
    pub max_rounds: Option<usize>,
}

impl RemSettings {
    pub fn from_config(config: &RemConfig) -> Self {
        let step = config.step_size();
        Self {
            min_min: PerturbationTool::new(config.eps, config.num_steps, step),
            min_max: PerturbationTool::new(config.robust_eps(), config.num_steps, step),
            train_steps: config.train_steps,
            grad_clip: config.grad_clip,
            accuracy_threshold: config.accuracy_threshold,
            max_rounds: config.max_rounds,
        }
    }
}

/// Summary of one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundReport {
    /// 1-based round number.
    pub round: usize,
    /// Mean cross-entropy over the round's training steps.
    pub train_loss: f32,
    /// Accuracy on the poisoned training set after the noise update.
    pub accuracy: f64,
}

/// Result of [`RemGenerator::generate`].
#[derive(Debug, Clone)]
pub struct RemOutcome {
    pub error_minimizing: NoiseStore,
    pub robust: NoiseStore,
    pub history: Vec<RoundReport>,
    /// `false` when the loop stopped at `max_rounds`.
    pub converged: bool,
}

impl RemOutcome {
    pub fn rounds(&self) -> usize {
        self.history.len()
    }

    pub fn final_accuracy(&self) -> Option<f64> {
        self.history.last().map(|r| r.accuracy)
    }

    /// `dataset` with the error-minimizing noise applied to every sample.
    pub fn poisoned_dataset(&self, dataset: &Dataset) -> Result<Dataset> {
        poison_with(dataset, &self.error_minimizing)
    }
}

/// `clip(x + noise[index])` for every sample; labels and indices are kept.
pub fn poison_with(dataset: &Dataset, noise: &NoiseStore) -> Result<Dataset> {
    let samples = dataset
        .samples()
        .iter()
        .map(|s| {
            Ok(Sample {
                image: apply_noise(&s.image, noise.get(s.index)?),
                label: s.label,
                index: s.index,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Dataset::new(dataset.name(), dataset.shape(), dataset.num_classes(), samples)
}

/// Drives the min-min / min-max noise loop.
#[derive(Debug, Clone)]
pub struct RemGenerator {
    settings: RemSettings,
}

impl RemGenerator {
    pub fn new(settings: RemSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RemSettings {
        &self.settings
    }

    /// Run rounds until the poisoned-set accuracy exceeds the threshold.
    ///
    /// `on_round` is called after every round; an error from it aborts the
    /// loop.
    pub fn generate<M, F>(
        &self,
        model: &mut M,
        optimizer: &mut dyn Optimizer,
        loader: &DataLoader<'_>,
        mut on_round: F,
    ) -> Result<RemOutcome>
    where
        M: TrainableClassifier + ?Sized,
        F: FnMut(&RoundReport) -> Result<()>,
    {
        let dataset = loader.dataset();
        if dataset.is_empty() {
            return Err(PoisonError::Config("cannot generate noise for an empty dataset".into()));
        }
        if model.input_shape() != dataset.shape() {
            return Err(PoisonError::Shape(format!(
                "model expects {:?} images, dataset has {:?}",
                model.input_shape(),
                dataset.shape()
            )));
        }

        let image_len = dataset.shape().len();
        let mut error_minimizing = NoiseStore::zeros("error-minimizing", dataset.indices(), image_len);
        let mut robust = NoiseStore::zeros("robust", dataset.indices(), image_len);
        let mut cursor = CyclicCursor::new(loader);
        let mut history: Vec<RoundReport> = Vec::new();

        loop {
            let round = history.len() + 1;
            let train_loss = self.train(model, optimizer, &mut cursor, &error_minimizing)?;
            self.refine(&*model, loader, &mut error_minimizing, &mut robust)?;
            let accuracy = evaluate(&*model, loader, &error_minimizing)?;

            info!(round, train_loss, accuracy, "REM round");
            if let Some(prev) = history.last() {
                if accuracy < prev.accuracy {
                    warn!(round, previous = prev.accuracy, accuracy, "accuracy on poisoned data dropped");
                }
            }

            let report = RoundReport {
                round,
                train_loss,
                accuracy,
            };
            on_round(&report)?;
            history.push(report);

            if accuracy > self.settings.accuracy_threshold {
                info!(rounds = round, accuracy, "noise converged");
                return Ok(RemOutcome {
                    error_minimizing,
                    robust,
                    history,
                    converged: true,
                });
            }
            if self.settings.max_rounds.is_some_and(|max| round >= max) {
                warn!(rounds = round, accuracy, "stopping at max_rounds before convergence");
                return Ok(RemOutcome {
                    error_minimizing,
                    robust,
                    history,
                    converged: false,
                });
            }
        }
    }

    /// M-step: `train_steps` optimizer updates on noisy mini-batches.
    fn train<M: TrainableClassifier + ?Sized>(
        &self,
        model: &mut M,
        optimizer: &mut dyn Optimizer,
        cursor: &mut CyclicCursor<'_, '_>,
        noise: &NoiseStore,
    ) -> Result<f32> {
        let mut total = 0.0f32;
        let mut steps = 0usize;
        for batch in cursor.by_ref().take(self.settings.train_steps) {
            let images = apply_noise(&batch.images, &noise.gather(&batch.indices)?);
            model.zero_grad();
            let loss = model.accumulate_gradients(&images, &batch.labels);
            let norm = model.clip_grad_norm(self.settings.grad_clip);
            model.step(optimizer);
            debug!(step = steps, loss, grad_norm = norm, "train step");
            total += loss;
            steps += 1;
        }
        Ok(if steps == 0 { 0.0 } else { total / steps as f32 })
    }

    /// Robust noise first, then error-minimizing noise seeded from it.
    fn refine<M: Classifier + ?Sized>(
        &self,
        model: &M,
        loader: &DataLoader<'_>,
        error_minimizing: &mut NoiseStore,
        robust: &mut NoiseStore,
    ) -> Result<()> {
        for batch in loader.batches() {
            let seed = robust.gather(&batch.indices)?;
            let (_, delta) = self
                .settings
                .min_max
                .min_max_attack(&batch.images, &batch.labels, model, &seed);
            robust.scatter(&batch.indices, &delta)?;
            error_minimizing.scatter(&batch.indices, &delta)?;

            let seed = error_minimizing.gather(&batch.indices)?;
            let (_, delta) = self
                .settings
                .min_min
                .min_min_attack(&batch.images, &batch.labels, model, &seed);
            error_minimizing.scatter(&batch.indices, &delta)?;
        }
        Ok(())
    }
}

/// Accuracy of `model` on `clip(x + noise[index])` over one pass of `loader`.
pub fn evaluate<M: Classifier + ?Sized>(model: &M, loader: &DataLoader<'_>, noise: &NoiseStore) -> Result<f64> {
    let mut correct = 0usize;
    let mut total = 0usize;
    for batch in loader.batches() {
        let images = apply_noise(&batch.images, &noise.gather(&batch.indices)?);
        let predictions = model.predict(&images, batch.len());
        correct += predictions
            .iter()
            .zip(&batch.labels)
            .filter(|(p, l)| p == l)
            .count();
        total += batch.len();
    }
    Ok(if total == 0 { 0.0 } else { correct as f64 / total as f64 })
}

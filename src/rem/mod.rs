//! Robust error-minimizing noise
//!
//! A classifier is trained in the loop while two per-sample noise stores are
//! refined: `robust` noise maximizes the loss inside `eps · robust_ratio`,
//! and `error_minimizing` noise, seeded from it, minimizes the loss inside
//! `eps`. The error-minimizing store is the exported poison.

pub mod cursor;
pub mod generator;
pub mod noise;
pub mod tool;

pub use cursor::CyclicCursor;
pub use generator::{evaluate, poison_with, RemGenerator, RemOutcome, RemSettings, RoundReport};
pub use noise::NoiseStore;
pub use tool::PerturbationTool;

use crate::classifier::{build_classifier, TrainableClassifier};
use crate::config::RemConfig;
use crate::data::{DataLoader, Dataset};
use crate::error::Result;
use crate::optimizers::SGD;
use tracing::info;

/// Build the classifier and optimizer described by `config` and run the
/// noise loop over `dataset` in storage order.
pub fn run_rem<F>(config: &RemConfig, dataset: &Dataset, on_round: F) -> Result<RemOutcome>
where
    F: FnMut(&RoundReport) -> Result<()>,
{
    config.validate()?;
    let mut model = build_classifier(config, dataset.shape(), dataset.num_classes());
    let mut optimizer = SGD::new(config.learning_rate)
        .with_momentum(config.momentum)
        .with_weight_decay(config.weight_decay);
    let loader = DataLoader::new(dataset, config.batch_size);
    let settings = RemSettings::from_config(config);

    info!(
        dataset = %config.dataset,
        samples = dataset.len(),
        model = ?config.model,
        parameters = model.parameter_count(),
        eps = config.eps,
        robust_eps = settings.min_max.epsilon,
        step_size = settings.min_min.step_size,
        "generating REM poisons"
    );

    RemGenerator::new(settings).generate(model.as_mut(), &mut optimizer, &loader, on_round)
}

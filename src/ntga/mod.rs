//! Neural tangent generalization attack
//!
//! Training rows are perturbed block by block so that kernel regression with
//! the surrogate NTK, fit on the perturbed block, generalizes badly to the
//! held-out set.

pub mod gradient;
pub mod pgd;
pub mod predictor;

pub use gradient::{adversarial_loss, loss_and_gradient, Objective};
pub use pgd::{BlockReport, Ntga, PgdParams};
pub use predictor::{KernelRegression, Prediction, Spectrum};

use crate::config::NtgaConfig;
use crate::data::Dataset;
use crate::error::Result;
use tracing::info;

/// Run the attack described by `config` on `train`, using `test` as the
/// held-out set.
pub fn run_ntga(config: &NtgaConfig, train: &Dataset, test: &Dataset) -> Result<(Dataset, Vec<BlockReport>)> {
    config.validate()?;
    let surrogate = config.surrogate_kind()?;
    let kernel = surrogate.build(train.shape(), config.depth, config.w_var, config.b_var);

    let objective = Objective {
        loss: config.loss,
        t: config.t,
        targeted: config.targeted,
        batch_size: config.batch_size,
    };
    let params = PgdParams {
        eps: config.eps,
        eps_iter: config.eps_iter(),
        nb_iter: config.nb_iter,
        clip_min: config.clip_min,
        clip_max: config.clip_max,
        rand_init: config.rand_init,
    };

    info!(
        dataset = %config.dataset,
        %surrogate,
        train = train.len(),
        test = test.len(),
        block_size = config.block_size,
        eps = config.eps,
        eps_iter = params.eps_iter,
        "generating NTGA poisons"
    );

    let attack = Ntga::new(
        KernelRegression::new(kernel.as_ref(), config.diag_reg),
        objective,
        params,
        config.block_size,
    );
    attack.poison_dataset(train, test, config.seed)
}

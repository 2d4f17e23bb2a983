//! Block-wise projected gradient ascent on the training inputs.

use super::gradient::{loss_and_gradient, Objective};
use super::predictor::KernelRegression;
use crate::data::{Dataset, Sample};
use crate::error::{PoisonError, Result};
use crate::loss::accuracy;
use crate::perturbation::{project_linf, signed_step};
use crate::utils::SimpleRng;
use ndarray::{s, Array2, ArrayView2};
use tracing::{debug, info};

/// Step schedule and box constraints of the attack.
#[derive(Debug, Clone, Copy)]
pub struct PgdParams {
    pub eps: f64,
    pub eps_iter: f64,
    pub nb_iter: usize,
    pub clip_min: f64,
    pub clip_max: f64,
    /// Start from a uniform point of the ε-ball instead of the clean input.
    pub rand_init: bool,
}

impl PgdParams {
    /// `eps_iter = eps / nb_iter · 1.1`, clipping to [0, 1].
    pub fn new(eps: f64, nb_iter: usize) -> Self {
        Self {
            eps,
            eps_iter: eps / nb_iter.max(1) as f64 * 1.1,
            nb_iter,
            clip_min: 0.0,
            clip_max: 1.0,
            rand_init: false,
        }
    }
}

/// Clean and poisoned test accuracy of one block (infinite-time prediction).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockReport {
    pub block: usize,
    pub rows: usize,
    pub clean_accuracy: f64,
    pub poisoned_accuracy: f64,
}

/// The generalization attack: a kernel predictor, an objective and a step
/// schedule.
pub struct Ntga<'k> {
    predictor: KernelRegression<'k>,
    objective: Objective,
    params: PgdParams,
    block_size: usize,
    evaluate_blocks: bool,
}

impl<'k> Ntga<'k> {
    pub fn new(predictor: KernelRegression<'k>, objective: Objective, params: PgdParams, block_size: usize) -> Self {
        Self {
            predictor,
            objective,
            params,
            block_size: block_size.max(1),
            evaluate_blocks: true,
        }
    }

    /// Skip the per-block clean/poisoned accuracy evaluation.
    pub fn without_block_evaluation(mut self) -> Self {
        self.evaluate_blocks = false;
        self
    }

    pub fn params(&self) -> &PgdParams {
        &self.params
    }

    /// PGD on a single block of training rows.
    pub fn attack_block(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        x_test: ArrayView2<'_, f64>,
        y_test: ArrayView2<'_, f64>,
        rng: &mut SimpleRng,
    ) -> Result<Array2<f64>> {
        let p = &self.params;
        let mut x_adv = x.to_owned();
        if p.rand_init {
            x_adv.mapv_inplace(|v| v + rng.gen_range_f64(-p.eps, p.eps));
            project_linf(&mut x_adv, &x, p.eps, p.clip_min, p.clip_max);
        }

        for step in 0..p.nb_iter {
            let (loss, grad) = loss_and_gradient(&self.predictor, x_adv.view(), y, x_test, y_test, &self.objective)?;
            signed_step(&mut x_adv, &grad.view(), p.eps_iter);
            project_linf(&mut x_adv, &x, p.eps, p.clip_min, p.clip_max);
            debug!(step, loss, "pgd step");
        }
        Ok(x_adv)
    }

    /// Attack every block of `x_train` in order and concatenate the results.
    ///
    /// The trailing partial block, if any, is attacked as its own block.
    pub fn generate(
        &self,
        x_train: ArrayView2<'_, f64>,
        y_train: ArrayView2<'_, f64>,
        x_test: ArrayView2<'_, f64>,
        y_test: ArrayView2<'_, f64>,
        seed: u64,
    ) -> Result<(Array2<f64>, Vec<BlockReport>)> {
        if x_train.nrows() != y_train.nrows() {
            return Err(PoisonError::Shape(format!(
                "{} training inputs but {} labels",
                x_train.nrows(),
                y_train.nrows()
            )));
        }

        let n = x_train.nrows();
        let blocks = n.div_ceil(self.block_size);
        let mut rng = SimpleRng::new(seed);
        let mut poisoned = Array2::<f64>::zeros(x_train.dim());
        let mut reports = Vec::with_capacity(blocks);

        for block in 0..blocks {
            let start = block * self.block_size;
            let end = (start + self.block_size).min(n);
            let xb = x_train.slice(s![start..end, ..]);
            let yb = y_train.slice(s![start..end, ..]);

            let adv = self.attack_block(xb, yb, x_test, y_test, &mut rng)?;

            if self.evaluate_blocks {
                let report = self.evaluate_block(block, xb, adv.view(), yb, x_test, y_test)?;
                info!(
                    block = block + 1,
                    of = blocks,
                    clean_acc = report.clean_accuracy,
                    poisoned_acc = report.poisoned_accuracy,
                    "block done"
                );
                reports.push(report);
            } else {
                info!(block = block + 1, of = blocks, "block done");
            }

            poisoned.slice_mut(s![start..end, ..]).assign(&adv);
        }
        Ok((poisoned, reports))
    }

    fn evaluate_block(
        &self,
        block: usize,
        clean: ArrayView2<'_, f64>,
        poisoned: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        x_test: ArrayView2<'_, f64>,
        y_test: ArrayView2<'_, f64>,
    ) -> Result<BlockReport> {
        let clean_pred = self.predictor.predict(clean, y, x_test, None)?;
        let poisoned_pred = self.predictor.predict(poisoned, y, x_test, None)?;
        Ok(BlockReport {
            block,
            rows: clean.nrows(),
            clean_accuracy: accuracy(clean_pred.test.view(), y_test),
            poisoned_accuracy: accuracy(poisoned_pred.test.view(), y_test),
        })
    }

    /// Poison a whole dataset, keeping labels and sample indices.
    pub fn poison_dataset(&self, train: &Dataset, test: &Dataset, seed: u64) -> Result<(Dataset, Vec<BlockReport>)> {
        if train.shape() != test.shape() || train.num_classes() != test.num_classes() {
            return Err(PoisonError::Shape(format!(
                "train {:?}/{} and test {:?}/{} disagree",
                train.shape(),
                train.num_classes(),
                test.shape(),
                test.num_classes()
            )));
        }
        let (x_train, y_train) = train.to_matrices();
        let (x_test, y_test) = test.to_matrices();
        let (adv, reports) = self.generate(x_train.view(), y_train.view(), x_test.view(), y_test.view(), seed)?;

        let samples = train
            .samples()
            .iter()
            .zip(adv.rows())
            .map(|(sample, row)| Sample {
                image: row.iter().map(|&v| v as f32).collect(),
                label: sample.label,
                index: sample.index,
            })
            .collect();
        let poisoned = Dataset::new(train.name(), train.shape(), train.num_classes(), samples)?;
        Ok((poisoned, reports))
    }
}

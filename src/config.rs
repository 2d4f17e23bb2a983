//! Configuration structures for both poisoning pipelines
//!
//! Configurations are read from JSON files. Every field has a default, so an
//! empty object `{}` is a valid configuration reproducing the reference
//! hyperparameters. Command-line flags in the binaries override file values
//! before [`NtgaConfig::validate`] / [`RemConfig::validate`] run again.
//!
//! # Example
//!
//! ```json
//! {
//!   "dataset": "c10",
//!   "surrogate": "cnn",
//!   "t": 64,
//!   "eps": 0.03137,
//!   "nb_iter": 10,
//!   "block_size": 512
//! }
//! ```

use crate::data::DatasetKind;
use crate::error::{PoisonError, Result};
use crate::kernel::SurrogateKind;
use crate::loss::Loss;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default L∞ budget, 8/255.
pub const DEFAULT_EPS: f64 = 8.0 / 255.0;

/// Hyperparameters of the kernel-based attack.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NtgaConfig {
    pub dataset: DatasetKind,
    /// Surrogate network: "cnn", "fnn" or "linear". Parsed by [`NtgaConfig::surrogate_kind`].
    pub surrogate: String,
    /// Training time of the surrogate; `null` means infinite time.
    pub t: Option<f64>,
    pub eps: f64,
    pub nb_iter: usize,
    pub block_size: usize,
    /// Test rows per gradient sub-batch.
    pub batch_size: usize,
    pub loss: Loss,
    pub targeted: bool,
    /// Relative ridge added to the training kernel diagonal.
    pub diag_reg: f64,
    pub clip_min: f64,
    pub clip_max: f64,
    pub rand_init: bool,
    /// Hidden layers of the fnn surrogate.
    pub depth: usize,
    pub w_var: f64,
    pub b_var: f64,
    pub seed: u64,
    pub data_root: PathBuf,
    pub save_path: PathBuf,
}

impl Default for NtgaConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetKind::Cifar10,
            surrogate: "cnn".to_string(),
            t: Some(64.0),
            eps: DEFAULT_EPS,
            nb_iter: 10,
            block_size: 512,
            batch_size: 30,
            loss: Loss::CrossEntropy,
            targeted: false,
            diag_reg: 1e-4,
            clip_min: 0.0,
            clip_max: 1.0,
            rand_init: false,
            depth: 1,
            w_var: 1.76,
            b_var: 0.18,
            seed: 0,
            data_root: PathBuf::from("../dataset/cifar-10"),
            save_path: PathBuf::from("../dataset/ntga_poisons"),
        }
    }
}

impl NtgaConfig {
    pub fn validate(&self) -> Result<()> {
        self.surrogate_kind()?;
        positive("eps", self.eps)?;
        nonzero("nb_iter", self.nb_iter)?;
        nonzero("block_size", self.block_size)?;
        nonzero("batch_size", self.batch_size)?;
        nonzero("depth", self.depth)?;
        if let Some(t) = self.t {
            positive("t", t)?;
        }
        if self.diag_reg < 0.0 || !self.diag_reg.is_finite() {
            return Err(invalid(format!("diag_reg must be non-negative, got {}", self.diag_reg)));
        }
        if self.clip_min >= self.clip_max {
            return Err(invalid(format!(
                "clip_min ({}) must be below clip_max ({})",
                self.clip_min, self.clip_max
            )));
        }
        positive("w_var", self.w_var)?;
        if self.b_var < 0.0 || !self.b_var.is_finite() {
            return Err(invalid(format!("b_var must be non-negative, got {}", self.b_var)));
        }
        Ok(())
    }

    pub fn surrogate_kind(&self) -> Result<SurrogateKind> {
        self.surrogate.parse()
    }

    /// Step size of one PGD iteration.
    pub fn eps_iter(&self) -> f64 {
        self.eps / self.nb_iter as f64 * 1.1
    }
}

/// Classifier trained inside the REM loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Mlp,
    Cnn,
}

impl FromStr for ModelKind {
    type Err = PoisonError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mlp" => Ok(ModelKind::Mlp),
            "cnn" => Ok(ModelKind::Cnn),
            other => Err(invalid(format!("unknown model '{}'; expected 'mlp' or 'cnn'", other))),
        }
    }
}

/// Hyperparameters of the robust error-minimizing noise loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemConfig {
    pub dataset: DatasetKind,
    /// Budget of the error-minimizing noise.
    pub eps: f32,
    /// Robust (min-max) budget as a fraction of `eps`.
    pub robust_ratio: f32,
    pub num_steps: usize,
    /// Step size of both attacks; defaults to `eps / 2` when absent.
    pub step_size: Option<f32>,
    pub batch_size: usize,
    pub train_steps: usize,
    pub grad_clip: f32,
    pub accuracy_threshold: f64,
    /// Upper bound on joint rounds; `null` runs until convergence.
    pub max_rounds: Option<usize>,
    pub learning_rate: f32,
    pub momentum: f32,
    pub weight_decay: f32,
    pub model: ModelKind,
    /// Hidden units of the mlp model.
    pub hidden: usize,
    /// Filters of the cnn model's convolution.
    pub conv_filters: usize,
    pub seed: u64,
    pub data_root: PathBuf,
    pub save_path: PathBuf,
}

impl Default for RemConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetKind::Cifar10,
            eps: DEFAULT_EPS as f32,
            robust_ratio: 0.5,
            num_steps: 3,
            step_size: None,
            batch_size: 128,
            train_steps: 10,
            grad_clip: 5.0,
            accuracy_threshold: 0.99,
            max_rounds: None,
            learning_rate: 0.1,
            momentum: 0.9,
            weight_decay: 5e-4,
            model: ModelKind::Cnn,
            hidden: 256,
            conv_filters: 16,
            seed: 0,
            data_root: PathBuf::from("../dataset/cifar-10"),
            save_path: PathBuf::from("../dataset/rem_poisons"),
        }
    }
}

impl RemConfig {
    pub fn validate(&self) -> Result<()> {
        positive("eps", self.eps as f64)?;
        if !(self.robust_ratio > 0.0 && self.robust_ratio <= 1.0) {
            return Err(invalid(format!(
                "robust_ratio must be in (0, 1], got {}",
                self.robust_ratio
            )));
        }
        if let Some(step) = self.step_size {
            positive("step_size", step as f64)?;
        }
        nonzero("batch_size", self.batch_size)?;
        nonzero("train_steps", self.train_steps)?;
        nonzero("hidden", self.hidden)?;
        nonzero("conv_filters", self.conv_filters)?;
        positive("grad_clip", self.grad_clip as f64)?;
        positive("learning_rate", self.learning_rate as f64)?;
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(invalid(format!("momentum must be in [0, 1), got {}", self.momentum)));
        }
        if self.weight_decay < 0.0 || !self.weight_decay.is_finite() {
            return Err(invalid(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if !(self.accuracy_threshold > 0.0 && self.accuracy_threshold <= 1.0) {
            return Err(invalid(format!(
                "accuracy_threshold must be in (0, 1], got {}",
                self.accuracy_threshold
            )));
        }
        if self.max_rounds == Some(0) {
            return Err(invalid("max_rounds must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn step_size(&self) -> f32 {
        self.step_size.unwrap_or(self.eps / 2.0)
    }

    pub fn robust_eps(&self) -> f32 {
        self.eps * self.robust_ratio
    }
}

fn invalid(message: String) -> PoisonError {
    PoisonError::Config(message)
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{} must be positive, got {}", name, value)))
    }
}

fn nonzero(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        Err(invalid(format!("{} must be at least 1", name)))
    } else {
        Ok(())
    }
}

/// Loads an NTGA configuration from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use rust_data_poisoning::config::load_ntga_config;
///
/// let cfg = load_ntga_config("config/ntga_c10.json").unwrap();
/// assert_eq!(cfg.nb_iter, 10);
/// ```
pub fn load_ntga_config(path: impl AsRef<Path>) -> Result<NtgaConfig> {
    let contents = fs::read_to_string(path)?;
    let config: NtgaConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

/// Loads a REM configuration from a JSON file.
pub fn load_rem_config(path: impl AsRef<Path>) -> Result<RemConfig> {
    let contents = fs::read_to_string(path)?;
    let config: RemConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

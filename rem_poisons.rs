use clap::Parser;
use eyre::{Result, WrapErr};
use rust_data_poisoning::config::{load_rem_config, ModelKind, RemConfig};
use rust_data_poisoning::data::{load_dataset, Dataset, DatasetKind, PoisonExporter, Split};
use rust_data_poisoning::rem::run_rem;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

// Robust error-minimizing noise: train a classifier in the loop, refine
// per-sample noise until the poisoned set is trivially learnable, then write
// the poisoned images as PNGs.
#[derive(Parser, Debug)]
#[command(name = "rem_poisons", about = "Generate robust error-minimizing poisons")]
struct Args {
    /// JSON config; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    dataset: Option<DatasetKind>,

    #[arg(long)]
    eps: Option<f32>,

    #[arg(long)]
    num_steps: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// mlp or cnn.
    #[arg(long)]
    model: Option<ModelKind>,

    /// Stop after this many rounds even without convergence.
    #[arg(long)]
    max_rounds: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    data_root: Option<PathBuf>,

    #[arg(long)]
    save_path: Option<PathBuf>,

    /// Run on N synthetic images instead of reading the dataset.
    #[arg(long, value_name = "N")]
    synthetic: Option<usize>,
}

impl Args {
    fn apply(&self, config: &mut RemConfig) {
        if let Some(dataset) = self.dataset {
            config.dataset = dataset;
        }
        if let Some(eps) = self.eps {
            config.eps = eps;
        }
        if let Some(num_steps) = self.num_steps {
            config.num_steps = num_steps;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if self.max_rounds.is_some() {
            config.max_rounds = self.max_rounds;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(root) = &self.data_root {
            config.data_root = root.clone();
        }
        if let Some(path) = &self.save_path {
            config.save_path = path.clone();
        }
    }
}

fn load_train(config: &RemConfig, synthetic: Option<usize>) -> Result<Dataset> {
    let kind = config.dataset;
    match synthetic {
        Some(n) => Ok(Dataset::synthetic(kind.image_shape(), kind.num_classes(), n, 0.1, config.seed)),
        None => load_dataset(kind, &config.data_root, Split::Train, config.seed)
            .wrap_err_with(|| format!("loading {} training split from {}", kind, config.data_root.display())),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => load_rem_config(path).wrap_err_with(|| format!("reading {}", path.display()))?,
        None => RemConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let train = load_train(&config, args.synthetic)?;
    info!(samples = train.len(), classes = train.num_classes(), "dataset loaded");

    // Per-round accuracy log, one "round,train_loss,accuracy,secs" line each.
    let run_dir = config.save_path.join(config.dataset.name());
    fs::create_dir_all(&run_dir).wrap_err_with(|| format!("creating {}", run_dir.display()))?;
    let log_path = run_dir.join("accuracy_log.txt");
    let log_file = File::create(&log_path).wrap_err_with(|| format!("creating {}", log_path.display()))?;
    let mut log = BufWriter::new(log_file);

    let start = Instant::now();
    let outcome = run_rem(&config, &train, |report| {
        writeln!(
            log,
            "{},{},{},{:.3}",
            report.round,
            report.train_loss,
            report.accuracy,
            start.elapsed().as_secs_f32()
        )?;
        log.flush()?;
        Ok(())
    })?;

    info!(
        rounds = outcome.rounds(),
        converged = outcome.converged,
        max_noise = outcome.error_minimizing.max_abs(),
        secs = start.elapsed().as_secs_f64(),
        "REM finished"
    );

    let poisoned = outcome.poisoned_dataset(&train)?;
    let exporter = PoisonExporter::new(&config.save_path, config.dataset.name());
    let written = exporter.export(&poisoned)?;
    info!(written, dir = %exporter.dir().display(), "poisoned dataset exported");
    Ok(())
}

use clap::Parser;
use eyre::{Result, WrapErr};
use rust_data_poisoning::config::{load_ntga_config, NtgaConfig};
use rust_data_poisoning::data::{load_dataset, Dataset, DatasetKind, PoisonExporter, Split};
use rust_data_poisoning::loss::Loss;
use rust_data_poisoning::ntga::run_ntga;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

// Neural tangent generalization attack: poison a training set block by block
// and write the poisoned images as PNGs.
#[derive(Parser, Debug)]
#[command(name = "ntga_poisons", about = "Generate NTGA poisons")]
struct Args {
    /// JSON config; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    dataset: Option<DatasetKind>,

    /// Surrogate kernel: cnn, fnn or linear.
    #[arg(long)]
    surrogate: Option<String>,

    /// Training time of the surrogate.
    #[arg(long, conflicts_with = "infinite_time")]
    t: Option<f64>,

    /// Use the fully trained (t = ∞) surrogate.
    #[arg(long)]
    infinite_time: bool,

    #[arg(long)]
    eps: Option<f64>,

    #[arg(long)]
    nb_iter: Option<usize>,

    #[arg(long)]
    block_size: Option<usize>,

    /// Test rows per kernel evaluation.
    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    loss: Option<Loss>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    data_root: Option<PathBuf>,

    #[arg(long)]
    save_path: Option<PathBuf>,

    /// Run on N synthetic training images instead of reading the dataset.
    #[arg(long, value_name = "N")]
    synthetic: Option<usize>,
}

impl Args {
    fn apply(&self, config: &mut NtgaConfig) {
        if let Some(dataset) = self.dataset {
            config.dataset = dataset;
        }
        if let Some(surrogate) = &self.surrogate {
            config.surrogate = surrogate.clone();
        }
        if self.infinite_time {
            config.t = None;
        } else if let Some(t) = self.t {
            config.t = Some(t);
        }
        if let Some(eps) = self.eps {
            config.eps = eps;
        }
        if let Some(nb_iter) = self.nb_iter {
            config.nb_iter = nb_iter;
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(loss) = self.loss {
            config.loss = loss;
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

fn load_splits(config: &NtgaConfig, synthetic: Option<usize>) -> Result<(Dataset, Dataset)> {
    let kind = config.dataset;
    if let Some(n) = synthetic {
        let train = Dataset::synthetic(kind.image_shape(), kind.num_classes(), n, 0.1, config.seed);
        let test = Dataset::synthetic(kind.image_shape(), kind.num_classes(), (n / 4).max(1), 0.1, config.seed + 1);
        return Ok((train, test));
    }
    let train = load_dataset(kind, &config.data_root, Split::Train, config.seed)
        .wrap_err_with(|| format!("loading {} training split from {}", kind, config.data_root.display()))?;
    let test = load_dataset(kind, &config.data_root, Split::Test, config.seed)
        .wrap_err_with(|| format!("loading {} test split from {}", kind, config.data_root.display()))?;
    Ok((train, test))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => load_ntga_config(path).wrap_err_with(|| format!("reading {}", path.display()))?,
        None => NtgaConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let (train, test) = load_splits(&config, args.synthetic)?;
    info!(train = train.len(), test = test.len(), "datasets loaded");

    let start = Instant::now();
    let (poisoned, reports) = run_ntga(&config, &train, &test)?;
    let mean_poisoned = reports.iter().map(|r| r.poisoned_accuracy).sum::<f64>() / reports.len().max(1) as f64;
    info!(
        blocks = reports.len(),
        mean_poisoned_accuracy = mean_poisoned,
        secs = start.elapsed().as_secs_f64(),
        "NTGA finished"
    );

    let exporter = PoisonExporter::new(&config.save_path, config.dataset.name());
    let written = exporter.export(&poisoned)?;
    info!(written, dir = %exporter.dir().display(), "poisoned dataset exported");
    Ok(())
}

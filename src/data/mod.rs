//! Datasets, loaders, on-disk readers and the poison exporter.

pub mod cifar;
pub mod dataset;
pub mod export;
pub mod folder;
pub mod loader;

pub use cifar::Split;
pub use dataset::{Dataset, DatasetKind, ImageShape, Sample};
pub use export::PoisonExporter;
pub use folder::FolderOptions;
pub use loader::{Batch, DataLoader};

use crate::error::Result;
use std::path::Path;

/// Fraction of each ImageNet class kept in the ImageNet-100 subset.
pub const IMAGENET_SUBSET_FRACTION: f64 = 0.2;

/// Load one split of a supported dataset from `root`.
///
/// Layouts:
/// - `c10`, `c100`: the CIFAR binary files directly under `root`.
/// - `svhn`: `root/{train,test}/<class>/<n>.png`.
/// - `imagenet100`: `root/{train,val}/<class>/<file>.JPEG`; the training
///   split keeps a seeded 20% of each class.
pub fn load_dataset(kind: DatasetKind, root: &Path, split: Split, seed: u64) -> Result<Dataset> {
    match kind {
        DatasetKind::Cifar10 | DatasetKind::Cifar100 => cifar::read_cifar(root, kind, split),
        DatasetKind::Svhn => {
            let sub = if split == Split::Train { "train" } else { "test" };
            let options = FolderOptions {
                shape: kind.image_shape(),
                subset_fraction: 1.0,
                seed,
            };
            folder::read_image_folder(&root.join(sub), kind.name(), &options)
        }
        DatasetKind::ImageNet100 => {
            let (sub, fraction) = match split {
                Split::Train => ("train", IMAGENET_SUBSET_FRACTION),
                Split::Test => ("val", 1.0),
            };
            let options = FolderOptions {
                shape: kind.image_shape(),
                subset_fraction: fraction,
                seed,
            };
            folder::read_image_folder(&root.join(sub), kind.name(), &options)
        }
    }
}

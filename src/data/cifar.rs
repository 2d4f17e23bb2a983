//! Readers for the CIFAR-10 / CIFAR-100 binary distributions.
//!
//! Record layout (both versions): label byte(s) followed by 3072 pixel bytes
//! stored as three 32×32 planes (red, green, blue). CIFAR-10 has one label
//! byte; CIFAR-100 has a coarse and a fine label byte and we keep the fine one.

use crate::data::{Dataset, DatasetKind, ImageShape, Sample};
use crate::error::{PoisonError, Result};
use std::fs;
use std::path::Path;
use tracing::info;

const SIDE: usize = 32;
const CHANNELS: usize = 3;
const PIXELS: usize = SIDE * SIDE * CHANNELS;

/// Which split of the dataset to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// Decode raw CIFAR records into samples.
///
/// `label_bytes` is 1 for CIFAR-10 and 2 for CIFAR-100 (the last label byte
/// is used). Sample indices continue from `first_index`.
pub fn decode_records(data: &[u8], label_bytes: usize, first_index: usize) -> Result<Vec<Sample>> {
    let record = label_bytes + PIXELS;
    if data.len() % record != 0 {
        return Err(PoisonError::Shape(format!(
            "CIFAR file is truncated: {} bytes is not a multiple of the {}-byte record",
            data.len(),
            record
        )));
    }

    let plane = SIDE * SIDE;
    let samples = data
        .chunks_exact(record)
        .enumerate()
        .map(|(i, chunk)| {
            let label = chunk[label_bytes - 1] as usize;
            let pixels = &chunk[label_bytes..];
            // CHW planes on disk, HWC in memory.
            let mut image = vec![0.0f32; PIXELS];
            for p in 0..plane {
                for c in 0..CHANNELS {
                    image[p * CHANNELS + c] = pixels[c * plane + p] as f32 / 255.0;
                }
            }
            Sample {
                image,
                label,
                index: first_index + i,
            }
        })
        .collect();
    Ok(samples)
}

fn split_files(kind: DatasetKind, split: Split) -> Result<Vec<&'static str>> {
    match (kind, split) {
        (DatasetKind::Cifar10, Split::Train) => Ok(vec![
            "data_batch_1.bin",
            "data_batch_2.bin",
            "data_batch_3.bin",
            "data_batch_4.bin",
            "data_batch_5.bin",
        ]),
        (DatasetKind::Cifar10, Split::Test) => Ok(vec!["test_batch.bin"]),
        (DatasetKind::Cifar100, Split::Train) => Ok(vec!["train.bin"]),
        (DatasetKind::Cifar100, Split::Test) => Ok(vec!["test.bin"]),
        (other, _) => Err(PoisonError::Config(format!(
            "{} is not a CIFAR dataset",
            other
        ))),
    }
}

/// Read a CIFAR split from the directory holding the `.bin` files.
pub fn read_cifar(root: &Path, kind: DatasetKind, split: Split) -> Result<Dataset> {
    let label_bytes = if kind == DatasetKind::Cifar100 { 2 } else { 1 };
    let mut samples = Vec::new();

    for file in split_files(kind, split)? {
        let path = root.join(file);
        let data = fs::read(&path).map_err(|e| {
            PoisonError::Io(std::io::Error::new(
                e.kind(),
                format!("could not read {}: {}", path.display(), e),
            ))
        })?;
        let mut decoded = decode_records(&data, label_bytes, samples.len())?;
        samples.append(&mut decoded);
    }

    info!(dataset = %kind, ?split, samples = samples.len(), "loaded CIFAR split");
    Dataset::new(
        kind.name(),
        ImageShape::new(SIDE, SIDE, CHANNELS),
        kind.num_classes(),
        samples,
    )
}

//! Class-per-directory image folders (`<root>/<class>/<file>.png|jpg`).
//!
//! Used for SVHN (pre-extracted to PNG) and the ImageNet-100 subset. Class
//! directories are sorted by name and mapped to labels 0..k; files inside a
//! class are sorted too, so indices are stable across runs.

use crate::data::{Dataset, ImageShape, Sample};
use crate::error::{PoisonError, Result};
use crate::utils::SimpleRng;
use image::imageops::FilterType;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Options for reading an image folder.
#[derive(Debug, Clone)]
pub struct FolderOptions {
    /// Every image is resized to this shape (channels must be 3).
    pub shape: ImageShape,
    /// Fraction of each class to keep, in (0, 1].
    pub subset_fraction: f64,
    /// Seed for the per-class subset draw.
    pub seed: u64,
}

fn sorted_entries(dir: &Path, want_dirs: bool) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() == want_dirs {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

fn is_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("png" | "jpg" | "jpeg")
    )
}

/// Decode one file into an HWC f32 buffer of the requested shape.
pub fn load_image(path: &Path, shape: ImageShape) -> Result<Vec<f32>> {
    if shape.channels != 3 {
        return Err(PoisonError::Shape(format!(
            "image folders decode RGB, got {} channels",
            shape.channels
        )));
    }
    let rgb = image::open(path)?.to_rgb8();
    let rgb = if rgb.width() as usize != shape.width || rgb.height() as usize != shape.height {
        image::imageops::resize(
            &rgb,
            shape.width as u32,
            shape.height as u32,
            FilterType::Triangle,
        )
    } else {
        rgb
    };
    Ok(rgb.into_raw().into_iter().map(|v| v as f32 / 255.0).collect())
}

/// Read an image folder into a dataset named `name`.
///
/// With `subset_fraction < 1` each class keeps `max(1, ⌊fraction · count⌋)`
/// files drawn with a seeded RNG; the kept files are returned in name order.
pub fn read_image_folder(root: &Path, name: &str, options: &FolderOptions) -> Result<Dataset> {
    if !(options.subset_fraction > 0.0 && options.subset_fraction <= 1.0) {
        return Err(PoisonError::Config(format!(
            "subset fraction must be in (0, 1], got {}",
            options.subset_fraction
        )));
    }

    let classes = sorted_entries(root, true)?;
    if classes.is_empty() {
        return Err(PoisonError::Config(format!(
            "no class directories under {}",
            root.display()
        )));
    }

    let mut rng = SimpleRng::new(options.seed);
    let mut samples = Vec::new();
    for (label, class_dir) in classes.iter().enumerate() {
        let files: Vec<PathBuf> = sorted_entries(class_dir, false)?
            .into_iter()
            .filter(|p| is_image(p))
            .collect();

        let files = if options.subset_fraction < 1.0 {
            let keep = (((files.len() as f64) * options.subset_fraction) as usize).max(1);
            let mut kept = rng.sample(&files, keep);
            kept.sort();
            kept
        } else {
            files
        };

        debug!(class = %class_dir.display(), label, files = files.len(), "reading class");
        for path in files {
            let image = load_image(&path, options.shape)?;
            let index = samples.len();
            samples.push(Sample {
                image,
                label,
                index,
            });
        }
    }

    info!(dataset = name, classes = classes.len(), samples = samples.len(), "loaded image folder");
    Dataset::new(name, options.shape, classes.len(), samples)
}

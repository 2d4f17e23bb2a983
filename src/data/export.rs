//! Writes poisoned images as `<root>/<dataset>/data/<index>.png`.

use crate::data::{Dataset, ImageShape};
use crate::error::{PoisonError, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// `round(x · 255)` clamped to the u8 range.
#[inline]
pub fn to_u8(value: f32) -> u8 {
    (value * 255.0 + 0.5).clamp(0.0, 255.0) as u8
}

/// PNG exporter for one dataset.
#[derive(Debug, Clone)]
pub struct PoisonExporter {
    dir: PathBuf,
}

impl PoisonExporter {
    pub fn new(root: impl AsRef<Path>, dataset_name: &str) -> Self {
        Self {
            dir: root.as_ref().join(dataset_name).join("data"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.png", index))
    }

    /// Write one HWC image.
    pub fn write_image(&self, index: usize, image: &[f32], shape: ImageShape) -> Result<()> {
        if shape.channels != 3 || image.len() != shape.len() {
            return Err(PoisonError::Shape(format!(
                "cannot export {} values as a {}x{}x{} RGB image",
                image.len(),
                shape.height,
                shape.width,
                shape.channels
            )));
        }
        let bytes: Vec<u8> = image.iter().map(|&v| to_u8(v)).collect();
        let img = RgbImage::from_raw(shape.width as u32, shape.height as u32, bytes)
            .ok_or_else(|| PoisonError::Shape(format!("image {} has an invalid buffer", index)))?;
        img.save(self.path_for(index))?;
        Ok(())
    }

    /// Export every sample of `poisoned`, one file per sample index.
    ///
    /// Returns the number of files written. Existing files are overwritten.
    pub fn export(&self, poisoned: &Dataset) -> Result<usize> {
        fs::create_dir_all(&self.dir)?;
        for sample in poisoned.samples() {
            self.write_image(sample.index, &sample.image, poisoned.shape())?;
        }
        info!(dir = %self.dir.display(), files = poisoned.len(), "exported poisoned images");
        Ok(poisoned.len())
    }

    /// Read back an exported image as HWC values in [0, 1].
    pub fn load(&self, index: usize) -> Result<Vec<f32>> {
        let img = image::open(self.path_for(index))?.to_rgb8();
        Ok(img.into_raw().into_iter().map(|v| v as f32 / 255.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_u8_rounds_and_clamps() {
        assert_eq!(to_u8(0.0), 0);
        assert_eq!(to_u8(1.0), 255);
        assert_eq!(to_u8(1.5), 255);
        assert_eq!(to_u8(-0.2), 0);
        assert_eq!(to_u8(0.5), 128);
        assert_eq!(to_u8(0.499 / 255.0), 0);
    }

    #[test]
    fn test_path_layout() {
        let exporter = PoisonExporter::new("/tmp/out", "c10");
        assert_eq!(exporter.path_for(17), PathBuf::from("/tmp/out/c10/data/17.png"));
    }

    #[test]
    fn test_write_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = PoisonExporter::new(dir.path(), "c10");
        let err = exporter
            .write_image(0, &[0.0; 5], ImageShape::new(2, 2, 3))
            .unwrap_err();
        assert!(matches!(err, PoisonError::Shape(_)));
    }
}

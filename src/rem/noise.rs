//! Per-sample noise keyed by dataset index.

use crate::error::{PoisonError, Result};
use std::collections::BTreeMap;

/// One noise tensor per sample, addressed by the sample's dataset index
/// rather than by its position in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseStore {
    name: &'static str,
    image_len: usize,
    noise: BTreeMap<usize, Vec<f32>>,
}

impl NoiseStore {
    /// Zero noise for every index in `indices`.
    pub fn zeros(name: &'static str, indices: impl IntoIterator<Item = usize>, image_len: usize) -> Self {
        let noise = indices
            .into_iter()
            .map(|index| (index, vec![0.0; image_len]))
            .collect();
        Self {
            name,
            image_len,
            noise,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.noise.len()
    }

    pub fn is_empty(&self) -> bool {
        self.noise.is_empty()
    }

    pub fn image_len(&self) -> usize {
        self.image_len
    }

    pub fn get(&self, index: usize) -> Result<&[f32]> {
        self.noise
            .get(&index)
            .map(Vec::as_slice)
            .ok_or_else(|| self.unknown(index))
    }

    /// Noise of `indices`, concatenated in the given order.
    pub fn gather(&self, indices: &[usize]) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(indices.len() * self.image_len);
        for &index in indices {
            out.extend_from_slice(self.get(index)?);
        }
        Ok(out)
    }

    /// Overwrite the noise of `indices` with consecutive chunks of `deltas`.
    pub fn scatter(&mut self, indices: &[usize], deltas: &[f32]) -> Result<()> {
        if deltas.len() != indices.len() * self.image_len {
            return Err(PoisonError::Shape(format!(
                "{} noise: {} values for {} samples of {}",
                self.name,
                deltas.len(),
                indices.len(),
                self.image_len
            )));
        }
        for (&index, chunk) in indices.iter().zip(deltas.chunks_exact(self.image_len)) {
            let name = self.name;
            let slot = self.noise.get_mut(&index).ok_or_else(|| unknown(name, index))?;
            slot.copy_from_slice(chunk);
        }
        Ok(())
    }

    /// Largest absolute noise value over all samples.
    pub fn max_abs(&self) -> f32 {
        self.noise
            .values()
            .flat_map(|n| n.iter())
            .fold(0.0f32, |m, v| m.max(v.abs()))
    }

    /// `(index, noise)` pairs in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f32])> {
        self.noise.iter().map(|(&i, n)| (i, n.as_slice()))
    }

    fn unknown(&self, index: usize) -> PoisonError {
        unknown(self.name, index)
    }
}

fn unknown(name: &str, index: usize) -> PoisonError {
    PoisonError::Shape(format!("{} noise has no sample with index {}", name, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_and_gather() {
        let store = NoiseStore::zeros("em", [3, 7], 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.gather(&[7, 3]).unwrap(), vec![0.0; 4]);
    }

    #[test]
    fn test_scatter_is_keyed_by_index() {
        let mut store = NoiseStore::zeros("em", [3, 7], 2);
        store.scatter(&[7, 3], &[1.0, 2.0, 3.0, 4.0]).unwrap();

        assert_eq!(store.get(3).unwrap(), &[3.0, 4.0]);
        assert_eq!(store.get(7).unwrap(), &[1.0, 2.0]);
        assert_eq!(store.max_abs(), 4.0);
    }

    #[test]
    fn test_unknown_index_and_bad_length() {
        let mut store = NoiseStore::zeros("robust", [0], 2);
        assert!(matches!(store.gather(&[1]), Err(PoisonError::Shape(_))));
        assert!(matches!(store.scatter(&[0], &[1.0]), Err(PoisonError::Shape(_))));
        assert!(matches!(store.scatter(&[5], &[1.0, 1.0]), Err(PoisonError::Shape(_))));
    }
}

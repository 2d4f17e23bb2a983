//! Batched, index-preserving iteration over a dataset.

use crate::data::{Dataset, ImageShape};
use crate::utils::SimpleRng;

/// A mini-batch of samples.
///
/// `images` holds `len()` images back to back (HWC each). `indices[i]` is the
/// sample index of image `i`, so noise state can be gathered and scattered
/// without relying on batch positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Vec<f32>,
    pub labels: Vec<usize>,
    pub indices: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Fixed-order batch iterator over a dataset.
///
/// The traversal order is decided once at construction: storage order by
/// default, or a seeded permutation with [`DataLoader::shuffled`]. Repeated
/// passes always visit the batches in the same order.
#[derive(Debug, Clone)]
pub struct DataLoader<'a> {
    dataset: &'a Dataset,
    batch_size: usize,
    order: Vec<usize>,
}

impl<'a> DataLoader<'a> {
    /// Sequential loader. A `batch_size` of zero is treated as one.
    pub fn new(dataset: &'a Dataset, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            order: (0..dataset.len()).collect(),
        }
    }

    /// Loader that visits the samples in a seeded random order.
    pub fn shuffled(dataset: &'a Dataset, batch_size: usize, seed: u64) -> Self {
        let mut loader = Self::new(dataset, batch_size);
        SimpleRng::new(seed).shuffle(&mut loader.order);
        loader
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    pub fn shape(&self) -> ImageShape {
        self.dataset.shape()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per pass; the last one may be short.
    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    /// Materialize batch number `batch`.
    ///
    /// # Panics
    ///
    /// Panics if `batch >= num_batches()`.
    pub fn batch(&self, batch: usize) -> Batch {
        let start = batch * self.batch_size;
        let end = (start + self.batch_size).min(self.order.len());
        assert!(start < end, "batch {} out of range", batch);

        let per_image = self.dataset.shape().len();
        let mut out = Batch {
            images: Vec::with_capacity((end - start) * per_image),
            labels: Vec::with_capacity(end - start),
            indices: Vec::with_capacity(end - start),
        };
        for &position in &self.order[start..end] {
            let sample = &self.dataset.samples()[position];
            out.images.extend_from_slice(&sample.image);
            out.labels.push(sample.label);
            out.indices.push(sample.index);
        }
        out
    }

    /// One full pass over the dataset.
    pub fn batches(&self) -> impl Iterator<Item = Batch> + '_ {
        (0..self.num_batches()).map(move |b| self.batch(b))
    }
}

//! Samples, datasets and the supported dataset kinds.

use crate::error::{PoisonError, Result};
use crate::utils::SimpleRng;
use ndarray::Array2;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Height × width × channels of every image in a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Number of values in one image.
    pub fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One training example.
///
/// `image` is stored height × width × channels with values in [0, 1].
/// `index` identifies the example for the whole poisoning run and keys all
/// per-sample noise state.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: Vec<f32>,
    pub label: usize,
    pub index: usize,
}

/// The four datasets the pipelines know how to poison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DatasetKind {
    #[serde(rename = "c10")]
    Cifar10,
    #[serde(rename = "c100")]
    Cifar100,
    #[serde(rename = "svhn")]
    Svhn,
    #[serde(rename = "imagenet100")]
    ImageNet100,
}

impl DatasetKind {
    /// Short name used on the command line and in export paths.
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::Cifar10 => "c10",
            DatasetKind::Cifar100 => "c100",
            DatasetKind::Svhn => "svhn",
            DatasetKind::ImageNet100 => "imagenet100",
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            DatasetKind::Cifar10 | DatasetKind::Svhn => 10,
            DatasetKind::Cifar100 | DatasetKind::ImageNet100 => 100,
        }
    }

    pub fn image_shape(&self) -> ImageShape {
        match self {
            DatasetKind::ImageNet100 => ImageShape::new(224, 224, 3),
            _ => ImageShape::new(32, 32, 3),
        }
    }

    /// Number of training examples in the full split (before any subsetting).
    pub fn train_size(&self) -> usize {
        match self {
            DatasetKind::Cifar10 | DatasetKind::Cifar100 => 50_000,
            DatasetKind::Svhn => 73_257,
            DatasetKind::ImageNet100 => 20_000,
        }
    }
}

impl FromStr for DatasetKind {
    type Err = PoisonError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "c10" => Ok(DatasetKind::Cifar10),
            "c100" => Ok(DatasetKind::Cifar100),
            "svhn" => Ok(DatasetKind::Svhn),
            "imagenet100" => Ok(DatasetKind::ImageNet100),
            other => Err(PoisonError::Config(format!(
                "unsupported dataset '{}'; expected one of c10, c100, svhn, imagenet100",
                other
            ))),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable, fully loaded set of samples.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    shape: ImageShape,
    num_classes: usize,
    samples: Vec<Sample>,
}

impl Dataset {
    /// Build a dataset, checking image sizes, labels and index uniqueness.
    pub fn new(
        name: impl Into<String>,
        shape: ImageShape,
        num_classes: usize,
        samples: Vec<Sample>,
    ) -> Result<Self> {
        let mut seen = std::collections::HashSet::with_capacity(samples.len());
        for sample in &samples {
            if sample.image.len() != shape.len() {
                return Err(PoisonError::Shape(format!(
                    "sample {} has {} values, expected {}",
                    sample.index,
                    sample.image.len(),
                    shape.len()
                )));
            }
            if sample.label >= num_classes {
                return Err(PoisonError::Shape(format!(
                    "sample {} has label {} but the dataset has {} classes",
                    sample.index, sample.label, num_classes
                )));
            }
            if !seen.insert(sample.index) {
                return Err(PoisonError::Shape(format!(
                    "duplicate sample index {}",
                    sample.index
                )));
            }
        }

        Ok(Self {
            name: name.into(),
            shape,
            num_classes,
            samples,
        })
    }

    /// Class-structured random images for smoke runs and tests.
    ///
    /// Each class gets a random prototype image; every sample is its class
    /// prototype plus uniform jitter of ±`jitter`, clipped to [0, 1]. Labels
    /// cycle through the classes and indices run from 0.
    pub fn synthetic(
        shape: ImageShape,
        num_classes: usize,
        num_samples: usize,
        jitter: f32,
        seed: u64,
    ) -> Self {
        let mut rng = SimpleRng::new(seed);
        let prototypes: Vec<Vec<f32>> = (0..num_classes)
            .map(|_| (0..shape.len()).map(|_| rng.next_f32()).collect())
            .collect();

        let samples = (0..num_samples)
            .map(|index| {
                let label = index % num_classes.max(1);
                let image = prototypes[label]
                    .iter()
                    .map(|&p| (p + rng.gen_range_f32(-jitter, jitter)).clamp(0.0, 1.0))
                    .collect();
                Sample {
                    image,
                    label,
                    index,
                }
            })
            .collect();

        Self {
            name: "synthetic".to_string(),
            shape,
            num_classes,
            samples,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample indices in storage order.
    pub fn indices(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.index).collect()
    }

    /// Images as an `n × (H·W·C)` f64 matrix and labels as one-hot rows.
    ///
    /// This is the representation the kernel attack works on.
    pub fn to_matrices(&self) -> (Array2<f64>, Array2<f64>) {
        let n = self.samples.len();
        let d = self.shape.len();
        let mut x = Array2::<f64>::zeros((n, d));
        let mut y = Array2::<f64>::zeros((n, self.num_classes));

        for (row, sample) in self.samples.iter().enumerate() {
            for (dst, &src) in x.row_mut(row).iter_mut().zip(&sample.image) {
                *dst = src as f64;
            }
            y[[row, sample.label]] = 1.0;
        }
        (x, y)
    }
}

//! Rust Data Poisoning Library
//!
//! This library generates availability-poisoned training sets for image
//! classifiers with two independent pipelines:
//!
//! - **NTGA**: neural tangent generalization attacks. A closed-form
//!   infinite-width kernel stands in for the trained network and the training
//!   images are pushed, block by block, along the sign of the gradient of the
//!   held-out loss.
//! - **REM**: robust error-minimizing noise. A concrete classifier is trained
//!   in the loop while two per-sample noise stores are refined with
//!   min-max (robustness) and min-min (error-minimizing) sign-gradient steps.
//!
//! # Modules
//!
//! - `kernel`: surrogate kernels and their vector-Jacobian products
//! - `ntga`: kernel-regression predictor, adversarial loss gradient, block PGD
//! - `rem`: perturbation tool, noise stores, cyclic cursor, joint noise loop
//! - `layers`: Layer trait and implementations (Dense, Conv2D, MaxPool2D)
//! - `classifier`: classifiers built from layers for the REM pipeline
//! - `optimizers`: Optimizer trait and SGD with momentum and weight decay
//! - `data`: samples, datasets, loaders, CIFAR/image-folder readers, exporter
//! - `perturbation`: shared L-infinity projection and clipping helpers
//! - `loss`: cross-entropy and MSE criteria
//! - `config`: JSON configuration for both pipelines
//! - `utils`: RNG, activations, layout helpers

#[cfg(feature = "blas")]
extern crate blas_src;

pub mod classifier;
pub mod config;
pub mod data;
pub mod error;
pub mod kernel;
pub mod layers;
pub mod loss;
pub mod ntga;
pub mod optimizers;
pub mod perturbation;
pub mod rem;
pub mod utils;

pub use error::{PoisonError, Result};

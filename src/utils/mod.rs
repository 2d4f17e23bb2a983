//! Shared utilities for the poisoning pipelines
//!
//! This module provides common utilities like random number generation,
//! activation functions, and image layout conversion.

pub mod activations;
pub mod layout;
pub mod rng;

pub use activations::{argmax_rows, relu_backward_inplace, relu_inplace, softmax_rows};
pub use layout::{chw_to_hwc, hwc_to_chw};
pub use rng::SimpleRng;

//! Layer abstractions for the in-loop classifiers
//!
//! This module provides the Layer trait and implementations for the layer types
//! the REM classifiers are assembled from.

mod r#trait;
pub mod conv2d;
pub mod dense;
pub mod pool;

// Re-export the Layer trait for convenience
pub use conv2d::Conv2DLayer;
pub use dense::DenseLayer;
pub use pool::MaxPool2DLayer;
pub use r#trait::Layer;

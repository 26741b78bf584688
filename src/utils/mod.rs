//! Shared helpers used across the pipeline

pub mod preprocessing;

pub use preprocessing::ImagePreprocessor;

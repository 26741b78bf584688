#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Background compositing service
//!
//! Replaces the background of a portrait: a salient-object segmentation
//! network (U²-Net, 320×320 input) separates the subject, which is then
//! scaled and placed bottom-centre onto a team backdrop.
//!
//! ## Pipeline
//!
//! 1. [`utils::ImagePreprocessor`] stretches the photo to the model input and
//!    normalizes it with the ImageNet statistics.
//! 2. [`SegmentationService`] runs the model (loaded once, shared by all
//!    requests) through an [`InferenceBackend`].
//! 3. [`SaliencyMap`] min-max normalizes the output and resizes it back to the
//!    photo's size.
//! 4. [`ForegroundExtractor`] thresholds the map into an alpha channel and
//!    finds the subject's bounding box.
//! 5. [`Compositor`] crops, scales and blends the subject onto the background.
//!
//! [`CompositeProcessor`] runs the whole chain; [`server`] exposes it over HTTP.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bg_composite::{CompositeProcessor, InferenceConfig, ScaleFactor, SegmentationService};
//! use std::sync::Arc;
//!
//! # fn example() -> bg_composite::Result<()> {
//! let segmentation = Arc::new(SegmentationService::new(InferenceConfig::default()));
//! let processor = CompositeProcessor::new(segmentation, 0.2);
//!
//! let portrait = image::open("portrait.jpg")?;
//! let backdrop = image::open("bg/blue/stadium.png")?;
//! let result = processor.process(&portrait, &backdrop, ScaleFactor::new(0.75))?;
//! result.image.save("composite.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA/CoreML providers
//! - `tract` (default): pure Rust backend
//! - `cli` (default): the `bg-composite` binary, subscriber setup, download progress
//! - `tracing-json`, `tracing-files`: extra log outputs for the binary
//! - `webp-support`: accept WebP uploads

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod download;
pub mod error;
pub mod foreground;
pub mod inference;
pub mod mask;
pub mod models;
pub mod processor;
pub mod segmentation;
pub mod server;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod utils;

pub use backends::{BackendFactory, DefaultBackendFactory};
pub use compositor::{Compositor, Placement, ScaleFactor};
pub use config::{
    BackendType, ExecutionProvider, InferenceConfig, ServerConfig, ServerConfigBuilder,
    DEFAULT_MASK_THRESHOLD, DEFAULT_RESIZE_PERCENTAGE,
};
pub use download::{FetchOutcome, FetchRequest, ModelDownloader};
pub use error::{CompositeError, Result};
pub use foreground::{BoundingBox, Foreground, ForegroundExtractor};
pub use inference::InferenceBackend;
pub use mask::SaliencyMap;
pub use models::{ModelInfo, ModelManager, PreprocessingConfig};
pub use processor::{CompositeProcessor, CompositeResult, ProcessingTimings};
pub use segmentation::SegmentationService;
pub use server::{create_router, serve, AppState};
pub use services::{BackgroundEntry, BackgroundStore, ImageIOService, ResultWriter};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat, TracingOutput};

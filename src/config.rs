//! Configuration types for the compositing service

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default share of the background height the subject occupies
pub const DEFAULT_RESIZE_PERCENTAGE: f32 = 0.75;

/// Default saliency cutoff for foreground membership
pub const DEFAULT_MASK_THRESHOLD: f32 = 0.2;

/// Default upload limit for `POST /api/process` (20 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = crate::error::CompositeError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(crate::error::CompositeError::invalid_config(format!(
                "Unknown execution provider '{other}'. Expected one of: auto, cpu, cuda, coreml"
            ))),
        }
    }
}

/// Inference engine used to run the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "onnx") {
            Self::Onnx
        } else {
            Self::Tract
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = crate::error::CompositeError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(crate::error::CompositeError::invalid_config(format!(
                "Unknown backend '{other}'. Expected one of: onnx, tract"
            ))),
        }
    }
}

/// Settings for the inference backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Path to the segmentation model (`.onnx`)
    pub model_path: PathBuf,
    /// Backend used to execute the model
    pub backend_type: BackendType,
    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("saved_models/u2net.onnx"),
            backend_type: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

/// Configuration for the HTTP service, built once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// TCP port to bind
    pub port: u16,
    /// Root of the `<team>/<file>` background tree
    pub backgrounds_dir: PathBuf,
    /// Directory receiving `generated_image_*.png` files
    pub output_dir: PathBuf,
    /// Segmentation backend settings
    pub inference: InferenceConfig,
    /// Resize percentage used when the form omits one
    pub default_resize_percentage: f32,
    /// Saliency cutoff for foreground membership
    pub mask_threshold: f32,
    /// Maximum accepted request body size in bytes
    pub max_upload_bytes: usize,
    /// Load the model before accepting connections
    pub eager_model_load: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            backgrounds_dir: PathBuf::from("bg"),
            output_dir: PathBuf::from("generated"),
            inference: InferenceConfig::default(),
            default_resize_percentage: DEFAULT_RESIZE_PERCENTAGE,
            mask_threshold: DEFAULT_MASK_THRESHOLD,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            eager_model_load: true,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bg_composite::ServerConfig;
    ///
    /// let config = ServerConfig::builder()
    ///     .port(8080)
    ///     .backgrounds_dir("assets/bg")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.port, 8080);
    /// ```
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Socket address string for the listener
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - Default resize percentage: 0.1-1.0 (inclusive)
    /// - Mask threshold: 0.0-1.0 (exclusive of 1.0, nothing could pass it)
    /// - Upload limit: non-zero
    ///
    /// # Errors
    /// - Any value outside the ranges above
    pub fn validate(&self) -> crate::Result<()> {
        if !(crate::compositor::ScaleFactor::MIN..=crate::compositor::ScaleFactor::MAX)
            .contains(&self.default_resize_percentage)
        {
            return Err(crate::error::CompositeError::config_value_error(
                "default resize percentage",
                self.default_resize_percentage,
                "0.1-1.0",
                Some(DEFAULT_RESIZE_PERCENTAGE),
            ));
        }

        if !(0.0..1.0).contains(&self.mask_threshold) {
            return Err(crate::error::CompositeError::config_value_error(
                "mask threshold",
                self.mask_threshold,
                "0.0-<1.0",
                Some(DEFAULT_MASK_THRESHOLD),
            ));
        }

        if self.max_upload_bytes == 0 {
            return Err(crate::error::CompositeError::invalid_config(
                "max upload size must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Builder for `ServerConfig`
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn backgrounds_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.backgrounds_dir = dir.into();
        self
    }

    #[must_use]
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.inference.model_path = path.into();
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.inference.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.inference.execution_provider = provider;
        self
    }

    /// Set both intra and inter threads (inter gets half, minimum 1; 0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.inference.intra_threads = threads;
        self.config.inference.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    #[must_use]
    pub fn default_resize_percentage(mut self, percentage: f32) -> Self {
        self.config.default_resize_percentage = percentage;
        self
    }

    #[must_use]
    pub fn mask_threshold(mut self, threshold: f32) -> Self {
        self.config.mask_threshold = threshold;
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn eager_model_load(mut self, eager: bool) -> Self {
        self.config.eager_model_load = eager;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Validation failures, see [`ServerConfig::validate`]
    pub fn build(self) -> crate::Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//! Process-wide owner of the segmentation model
//!
//! The backend is created and initialized at most once. Concurrent first
//! callers block on the same initialization; a failed load leaves the cell
//! empty so a later request can try again.

use crate::{
    backends::{BackendFactory, DefaultBackendFactory},
    config::InferenceConfig,
    error::{CompositeError, Result},
    inference::InferenceBackend,
    models::PreprocessingConfig,
};
use ndarray::Array4;
use once_cell::sync::OnceCell;
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Lazily loaded segmentation model shared by all requests
pub struct SegmentationService {
    config: InferenceConfig,
    factory: Box<dyn BackendFactory>,
    backend: OnceCell<Mutex<Box<dyn InferenceBackend>>>,
}

impl std::fmt::Debug for SegmentationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationService")
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl SegmentationService {
    /// Service backed by the engines compiled into this build
    #[must_use]
    pub fn new(config: InferenceConfig) -> Self {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    #[must_use]
    pub fn with_factory(config: InferenceConfig, factory: Box<dyn BackendFactory>) -> Self {
        Self {
            config,
            factory,
            backend: OnceCell::new(),
        }
    }

    /// Whether the model has been loaded successfully
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.backend.get().is_some()
    }

    #[must_use]
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Load the model now instead of on the first request
    ///
    /// # Errors
    /// - Model file missing or unloadable
    #[instrument(skip(self), fields(backend = %self.config.backend_type, model = %self.config.model_path.display()))]
    pub fn warm_up(&self) -> Result<()> {
        self.backend().map(|_| ())
    }

    /// Preprocessing constants of the loaded model
    ///
    /// # Errors
    /// - Model load failures
    pub fn preprocessing_config(&self) -> Result<PreprocessingConfig> {
        let backend = self.lock_backend()?;
        backend.get_preprocessing_config()
    }

    /// Run the model on a preprocessed input tensor
    ///
    /// Calls are serialized; the backends keep mutable session state.
    ///
    /// # Errors
    /// - Model load failures
    /// - Inference failures
    pub fn predict(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let mut backend = self.lock_backend()?;
        debug!(shape = ?input.shape(), "Running segmentation");
        backend.infer(input)
    }

    fn lock_backend(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn InferenceBackend>>> {
        self.backend()?
            .lock()
            .map_err(|_| CompositeError::internal("Segmentation backend lock poisoned"))
    }

    fn backend(&self) -> Result<&Mutex<Box<dyn InferenceBackend>>> {
        self.backend.get_or_try_init(|| {
            info!("Loading segmentation model");
            let mut backend = self.factory.create_backend(&self.config)?;
            match backend.initialize(&self.config) {
                Ok(load_time) => {
                    if let Some(load_time) = load_time {
                        info!(load_ms = load_time.as_millis(), "Segmentation model ready");
                    }
                    Ok(Mutex::new(backend))
                },
                Err(e) => {
                    warn!(error = %e, "Segmentation model failed to load");
                    Err(e)
                },
            }
        })
    }
}

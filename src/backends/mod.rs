//! Inference engines for the segmentation model
//!
//! - ONNX Runtime backend (GPU acceleration via CUDA/CoreML)
//! - Tract backend (pure Rust, no external dependencies)
//!
//! Backends are created through a [`BackendFactory`] so the segmentation
//! service can be exercised with a mock in tests.

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

use crate::{
    config::{BackendType, InferenceConfig},
    error::Result,
    inference::InferenceBackend,
};

/// Fallback shapes when no model file is attached
#[cfg(any(feature = "onnx", feature = "tract"))]
const DEFAULT_INPUT_SHAPE: (usize, usize, usize, usize) = (1, 3, 320, 320);
#[cfg(any(feature = "onnx", feature = "tract"))]
const DEFAULT_OUTPUT_SHAPE: (usize, usize, usize, usize) = (1, 1, 320, 320);

/// Rebuild the engine's flat output as a `1x1xHxW` saliency tensor
///
/// U²-Net emits one channel per side output head; only the first batch item
/// of the first channel is meaningful.
#[cfg(any(feature = "onnx", feature = "tract"))]
fn saliency_tensor(shape: &[usize], data: Vec<f32>) -> Result<ndarray::Array4<f32>> {
    use crate::error::CompositeError;

    let &[batch, channels, height, width] = shape else {
        return Err(CompositeError::inference(format!(
            "model produced a {}D tensor, expected NCHW",
            shape.len()
        )));
    };
    if batch == 0 || channels == 0 {
        return Err(CompositeError::inference(format!(
            "model produced an empty tensor {shape:?}"
        )));
    }

    let full = ndarray::Array4::from_shape_vec((batch, channels, height, width), data)
        .map_err(|e| CompositeError::inference(format!("output does not match {shape:?}: {e}")))?;
    if batch == 1 && channels == 1 {
        return Ok(full);
    }
    Ok(full
        .slice(ndarray::s![0..1, 0..1, .., ..])
        .to_owned())
}

/// Trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend for the configured model
    ///
    /// # Errors
    /// - Model file missing or not an `.onnx` file
    /// - Requested backend not compiled into this build
    fn create_backend(&self, config: &InferenceConfig) -> Result<Box<dyn InferenceBackend>>;
}

/// Factory for the backends compiled into this build
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl DefaultBackendFactory {
    /// Backends enabled through cargo features
    #[must_use]
    pub fn available_backends() -> Vec<BackendType> {
        let mut backends = Vec::new();
        if cfg!(feature = "onnx") {
            backends.push(BackendType::Onnx);
        }
        if cfg!(feature = "tract") {
            backends.push(BackendType::Tract);
        }
        backends
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, config: &InferenceConfig) -> Result<Box<dyn InferenceBackend>> {
        match config.backend_type {
            BackendType::Onnx => {
                #[cfg(feature = "onnx")]
                {
                    let model_manager = crate::models::ModelManager::with_model_file(&config.model_path)?;
                    Ok(Box::new(OnnxBackend::with_model_manager(model_manager)))
                }
                #[cfg(not(feature = "onnx"))]
                {
                    Err(crate::error::CompositeError::model(
                        "ONNX backend not compiled in. Rebuild with the 'onnx' feature.",
                    ))
                }
            },
            BackendType::Tract => {
                #[cfg(feature = "tract")]
                {
                    let model_manager = crate::models::ModelManager::with_model_file(&config.model_path)?;
                    Ok(Box::new(TractBackend::with_model_manager(model_manager)))
                }
                #[cfg(not(feature = "tract"))]
                {
                    Err(crate::error::CompositeError::model(
                        "Tract backend not compiled in. Rebuild with the 'tract' feature.",
                    ))
                }
            },
        }
    }
}

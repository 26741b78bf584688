//! Segmentation model metadata and loading

use crate::error::{CompositeError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Side length of the square model input
pub const MODEL_INPUT_SIZE: u32 = 320;

/// ImageNet channel means applied during preprocessing
pub const NORMALIZATION_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations applied during preprocessing
pub const NORMALIZATION_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessing constants the model was trained with
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Model input size as `[width, height]`
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [MODEL_INPUT_SIZE, MODEL_INPUT_SIZE],
            normalization_mean: NORMALIZATION_MEAN,
            normalization_std: NORMALIZATION_STD,
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

/// Handle to a segmentation model stored on the local filesystem
#[derive(Debug, Clone)]
pub struct ModelManager {
    model_path: PathBuf,
    preprocessing: PreprocessingConfig,
}

impl ModelManager {
    /// Create a manager for the model file at `model_path`
    ///
    /// # Errors
    /// - Model path does not exist or is not a file
    /// - Model file does not have an `.onnx` extension
    pub fn with_model_file<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();

        if !model_path.exists() {
            return Err(CompositeError::model(format!(
                "Model file does not exist: {}. Run `bg-composite fetch-model` to download it.",
                model_path.display()
            )));
        }

        if !model_path.is_file() {
            return Err(CompositeError::model(format!(
                "Model path is not a file: {}",
                model_path.display()
            )));
        }

        let is_onnx = model_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        if !is_onnx {
            return Err(CompositeError::model(format!(
                "Expected an .onnx model file, got: {}",
                model_path.display()
            )));
        }

        Ok(Self {
            model_path,
            preprocessing: PreprocessingConfig::default(),
        })
    }

    /// Read the model bytes
    ///
    /// # Errors
    /// - File I/O errors when reading model data
    /// - Empty model file
    pub fn load_model(&self) -> Result<Vec<u8>> {
        let data = fs::read(&self.model_path)
            .map_err(|e| CompositeError::file_io_error("read model", &self.model_path, &e))?;
        if data.is_empty() {
            return Err(CompositeError::model(format!(
                "Model file is empty: {}",
                self.model_path.display()
            )));
        }
        Ok(data)
    }

    /// Describe the model
    ///
    /// # Errors
    /// - Model file metadata cannot be read
    pub fn get_info(&self) -> Result<ModelInfo> {
        let metadata = fs::metadata(&self.model_path)
            .map_err(|e| CompositeError::file_io_error("inspect model", &self.model_path, &e))?;
        let name = self
            .model_path
            .file_stem()
            .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().to_string());
        let side = self.preprocessing.target_size[0] as usize;

        Ok(ModelInfo {
            name,
            size_bytes: usize::try_from(metadata.len()).unwrap_or(usize::MAX),
            input_shape: (1, 3, side, side),
            output_shape: (1, 1, side, side),
        })
    }

    #[must_use]
    pub fn get_preprocessing_config(&self) -> PreprocessingConfig {
        self.preprocessing.clone()
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_model_file() {
        let err = ModelManager::with_model_file("/nonexistent/u2net.onnx").unwrap_err();
        assert!(matches!(err, CompositeError::Model(_)));
        assert!(err.to_string().contains("fetch-model"));
    }

    #[test]
    fn test_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u2net.pth");
        fs::write(&path, b"weights").unwrap();

        let err = ModelManager::with_model_file(&path).unwrap_err();
        assert!(err.to_string().contains(".onnx"));
    }

    #[test]
    fn test_model_info_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u2net.onnx");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&[7u8; 64]).unwrap();

        let manager = ModelManager::with_model_file(&path).unwrap();
        let info = manager.get_info().unwrap();
        assert_eq!(info.name, "u2net");
        assert_eq!(info.size_bytes, 64);
        assert_eq!(info.input_shape, (1, 3, 320, 320));
        assert_eq!(info.output_shape, (1, 1, 320, 320));
        assert_eq!(manager.load_model().unwrap().len(), 64);
        assert_eq!(manager.get_preprocessing_config().target_size, [320, 320]);
    }

    #[test]
    fn test_empty_model_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.onnx");
        fs::write(&path, b"").unwrap();

        let manager = ModelManager::with_model_file(&path).unwrap();
        assert!(manager.load_model().is_err());
    }
}

//! Mock backends for exercising the pipeline without a model file

use crate::{
    backends::BackendFactory,
    config::InferenceConfig,
    error::{CompositeError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, PreprocessingConfig},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Saliency pattern produced by [`MockBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutput {
    /// Soft disc centred in the frame, radius a third of the side
    Disc,
    /// Every cell holds the same value
    Constant(f32),
    /// Rectangle `(top, left, bottom, right)` of 1.0 on 0.0, in model cells, inclusive
    Rect(usize, usize, usize, usize),
}

/// Mock segmentation backend
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    model_info: ModelInfo,
    output: MockOutput,
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            model_info: ModelInfo {
                name: "mock-u2net".to_string(),
                size_bytes: 1024 * 1024,
                input_shape: (1, 3, 320, 320),
                output_shape: (1, 1, 320, 320),
            },
            output: MockOutput::Disc,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    /// Backend whose `initialize` always fails with a model error
    #[must_use]
    pub fn new_failing_init() -> Self {
        let mut backend = Self::new();
        backend.should_fail_init = true;
        backend
    }

    /// Backend whose `infer` always fails
    #[must_use]
    pub fn new_failing_inference() -> Self {
        let mut backend = Self::new();
        backend.should_fail_inference = true;
        backend
    }

    #[must_use]
    pub fn with_output(mut self, output: MockOutput) -> Self {
        self.output = output;
        self
    }

    /// Shared handle on the call log, survives boxing the backend
    #[must_use]
    pub fn call_history(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    fn generate_mock_output(&self) -> Array4<f32> {
        let (batch, channels, height, width) = self.model_info.output_shape;

        match self.output {
            MockOutput::Constant(value) => Array4::from_elem((batch, channels, height, width), value),
            MockOutput::Rect(top, left, bottom, right) => {
                Array4::from_shape_fn((batch, channels, height, width), |(_, _, y, x)| {
                    if (top..=bottom).contains(&y) && (left..=right).contains(&x) {
                        1.0
                    } else {
                        0.0
                    }
                })
            },
            MockOutput::Disc => {
                let center_x = width as f32 / 2.0;
                let center_y = height as f32 / 2.0;
                let radius = width.min(height) as f32 / 3.0;

                Array4::from_shape_fn((batch, channels, height, width), |(_, _, y, x)| {
                    let dx = x as f32 - center_x;
                    let dy = y as f32 - center_y;
                    let distance = (dx * dx + dy * dy).sqrt();
                    ((radius - distance) / radius).clamp(0.0, 1.0)
                })
            },
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &InferenceConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(CompositeError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(5)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(CompositeError::inference("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(CompositeError::inference("Mock backend inference failed"));
        }

        let (batch, channels, height, width) = self.model_info.input_shape;
        if input.shape() != [batch, channels, height, width] {
            return Err(CompositeError::inference(format!(
                "Unexpected input shape {:?}",
                input.shape()
            )));
        }

        Ok(self.generate_mock_output())
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.input_shape
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.output_shape
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig::default())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(self.model_info.clone())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Factory handing out clones of a prepared [`MockBackend`]
#[derive(Debug, Clone)]
pub struct MockBackendFactory {
    template: MockBackend,
    created: Arc<Mutex<usize>>,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new(template: MockBackend) -> Self {
        Self {
            template,
            created: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of backends created so far
    pub fn created(&self) -> usize {
        *self.created.lock().unwrap()
    }
}

impl Default for MockBackendFactory {
    fn default() -> Self {
        Self::new(MockBackend::new())
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(&self, _config: &InferenceConfig) -> Result<Box<dyn InferenceBackend>> {
        if let Ok(mut created) = self.created.lock() {
            *created += 1;
        }
        Ok(Box::new(self.template.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_disc_output_in_unit_range() {
        let mut backend = MockBackend::new();
        backend.initialize(&InferenceConfig::default()).unwrap();

        let output = backend.infer(&Array4::zeros((1, 3, 320, 320))).unwrap();
        assert_eq!(output.shape(), &[1, 1, 320, 320]);
        assert!(output.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(output[[0, 0, 160, 160]] > 0.9);
        assert_eq!(output[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_mock_rejects_wrong_input_shape() {
        let mut backend = MockBackend::new();
        backend.initialize(&InferenceConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 64, 64))).is_err());
    }

    #[test]
    fn test_mock_failure_modes() {
        let mut failing = MockBackend::new_failing_init();
        let err = failing.initialize(&InferenceConfig::default()).unwrap_err();
        assert!(matches!(err, CompositeError::Model(_)));
        assert!(!failing.is_initialized());

        let mut failing = MockBackend::new_failing_inference();
        failing.initialize(&InferenceConfig::default()).unwrap();
        assert!(failing.infer(&Array4::zeros((1, 3, 320, 320))).is_err());
        assert_eq!(failing.get_call_history(), vec!["initialize", "infer"]);
    }

    #[test]
    fn test_mock_factory_counts_creations() {
        let factory = MockBackendFactory::new(MockBackend::new().with_output(MockOutput::Constant(0.5)));
        let mut backend = factory.create_backend(&InferenceConfig::default()).unwrap();
        backend.initialize(&InferenceConfig::default()).unwrap();

        let output = backend.infer(&Array4::zeros((1, 3, 320, 320))).unwrap();
        assert!(output.iter().all(|v| (*v - 0.5).abs() < f32::EPSILON));
        assert_eq!(factory.created(), 1);
    }
}

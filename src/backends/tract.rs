//! Pure Rust engine built on tract
//!
//! CPU only. Slower than ONNX Runtime but needs no native library, which
//! makes it the fallback for builds without the `onnx` feature.

use super::{saliency_tensor, DEFAULT_INPUT_SHAPE, DEFAULT_OUTPUT_SHAPE};
use crate::config::InferenceConfig;
use crate::error::{CompositeError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::Array4;
use tract_onnx::prelude::*;

type TractPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Saliency model compiled into an optimized tract plan
#[derive(Debug, Default)]
pub struct TractBackend {
    manager: Option<ModelManager>,
    plan: Option<TractPlan>,
}

impl TractBackend {
    /// Backend with no model attached; every operation but shape queries fails
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_model_manager(manager: ModelManager) -> Self {
        Self {
            manager: Some(manager),
            plan: None,
        }
    }

    fn manager(&self) -> Result<&ModelManager> {
        self.manager
            .as_ref()
            .ok_or_else(|| CompositeError::model("tract backend has no model file attached"))
    }
}

/// Parse the ONNX bytes and fix the input fact so every shape resolves at
/// optimization time
fn compile(bytes: &[u8], (n, c, h, w): (usize, usize, usize, usize)) -> TractResult<TractPlan> {
    onnx()
        .model_for_read(&mut &bytes[..])?
        .with_input_fact(0, f32::fact([n, c, h, w]).into())?
        .into_optimized()?
        .into_runnable()
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, _config: &InferenceConfig) -> Result<Option<Duration>> {
        if self.plan.is_some() {
            return Ok(None);
        }

        let started = Instant::now();
        let manager = self.manager()?;
        let info = manager.get_info()?;
        let bytes = manager.load_model()?;

        let plan = compile(&bytes, info.input_shape).map_err(|e| {
            CompositeError::model(format!(
                "tract could not compile {}: {e}",
                manager.model_path().display()
            ))
        })?;
        self.plan = Some(plan);

        let elapsed = started.elapsed();
        log::info!(
            "tract plan for '{}' ready in {}ms ({} bytes)",
            info.name,
            elapsed.as_millis(),
            info.size_bytes
        );
        Ok(Some(elapsed))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| CompositeError::inference("tract backend used before initialize"))?;

        let started = Instant::now();
        let outputs = plan
            .run(tvec![Tensor::from(input.clone()).into()])
            .map_err(|e| CompositeError::inference(format!("tract run failed: {e}")))?;

        let head = outputs
            .into_iter()
            .next()
            .ok_or_else(|| CompositeError::inference("tract plan returned no outputs"))?
            .into_arc_tensor();
        let view = head
            .to_array_view::<f32>()
            .map_err(|e| CompositeError::inference(format!("tract output is not f32: {e}")))?;

        let saliency = saliency_tensor(view.shape(), view.iter().copied().collect())?;
        log::debug!(
            "tract inference {:?} -> {:?} in {}ms",
            input.dim(),
            saliency.dim(),
            started.elapsed().as_millis()
        );
        Ok(saliency)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.manager()
            .and_then(ModelManager::get_info)
            .map_or(DEFAULT_INPUT_SHAPE, |info| info.input_shape)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.manager()
            .and_then(ModelManager::get_info)
            .map_or(DEFAULT_OUTPUT_SHAPE, |info| info.output_shape)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.manager().map(ModelManager::get_preprocessing_config)
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.manager()?.get_info()
    }

    fn is_initialized(&self) -> bool {
        self.plan.is_some()
    }
}

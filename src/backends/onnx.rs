//! ONNX Runtime engine
//!
//! Registers CUDA or `CoreML` when requested and present; ONNX Runtime
//! always keeps its CPU provider as the last resort.

use super::{saliency_tensor, DEFAULT_INPUT_SHAPE, DEFAULT_OUTPUT_SHAPE};
use crate::config::{ExecutionProvider, InferenceConfig};
use crate::error::{CompositeError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as _,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

fn ort_error<E: std::fmt::Display>(stage: &'static str) -> impl FnOnce(E) -> CompositeError {
    move |e| CompositeError::inference(format!("ONNX Runtime could not {stage}: {e}"))
}

/// Intra-op and inter-op thread counts; zero in the config means "pick for me"
fn thread_counts(config: &InferenceConfig) -> (usize, usize) {
    let cores = std::thread::available_parallelism().map_or(4, std::num::NonZero::get);
    let intra = if config.intra_threads == 0 {
        cores
    } else {
        config.intra_threads
    };
    let inter = if config.inter_threads == 0 {
        (cores / 4).max(1)
    } else {
        config.inter_threads
    };
    (intra, inter)
}

/// Accelerators to register ahead of the implicit CPU provider
fn accelerators(requested: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
    let cuda = CUDAExecutionProvider::default();
    let coreml = CoreMLExecutionProvider::default().with_subgraphs(true);
    let want_cuda = matches!(requested, ExecutionProvider::Auto | ExecutionProvider::Cuda);
    let want_coreml = matches!(requested, ExecutionProvider::Auto | ExecutionProvider::CoreMl);

    let mut registered = Vec::new();
    if want_cuda {
        if cuda.is_available().unwrap_or(false) {
            registered.push(cuda.build());
        } else if requested == ExecutionProvider::Cuda {
            log::warn!("CUDA requested but unavailable, running on CPU");
        }
    }
    if want_coreml {
        if coreml.is_available().unwrap_or(false) {
            registered.push(coreml.build());
        } else if requested == ExecutionProvider::CoreMl {
            log::warn!("CoreML requested but unavailable, running on CPU");
        }
    }
    if registered.is_empty() && requested == ExecutionProvider::Auto {
        log::info!("no accelerator found, running on CPU");
    }
    registered
}

/// Saliency model hosted in an ONNX Runtime session
#[derive(Debug, Default)]
pub struct OnnxBackend {
    manager: Option<ModelManager>,
    session: Option<Session>,
}

impl OnnxBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_model_manager(manager: ModelManager) -> Self {
        Self {
            manager: Some(manager),
            session: None,
        }
    }

    fn manager(&self) -> Result<&ModelManager> {
        self.manager
            .as_ref()
            .ok_or_else(|| CompositeError::model("ONNX backend has no model file attached"))
    }

    fn open_session(bytes: &[u8], config: &InferenceConfig) -> Result<Session> {
        let (intra, inter) = thread_counts(config);
        let providers = accelerators(config.execution_provider);
        log::debug!(
            "session: provider={} accelerators={} intra={intra} inter={inter}",
            config.execution_provider,
            providers.len()
        );

        let mut builder = Session::builder()
            .map_err(ort_error("create a session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error("set the optimization level"))?;
        if !providers.is_empty() {
            builder = builder
                .with_execution_providers(providers)
                .map_err(ort_error("register execution providers"))?;
        }

        builder
            .with_parallel_execution(true)
            .map_err(ort_error("enable parallel execution"))?
            .with_intra_threads(intra)
            .map_err(ort_error("set intra-op threads"))?
            .with_inter_threads(inter)
            .map_err(ort_error("set inter-op threads"))?
            .commit_from_memory(bytes)
            .map_err(|e| CompositeError::model(format!("model rejected by ONNX Runtime: {e}")))
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &InferenceConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }

        let started = Instant::now();
        let manager = self.manager()?;
        let info = manager.get_info()?;
        let bytes = manager.load_model()?;
        let session = Self::open_session(&bytes, config)?;
        self.session = Some(session);

        let elapsed = started.elapsed();
        log::info!(
            "ONNX session for '{}' ready in {}ms ({} bytes)",
            info.name,
            elapsed.as_millis(),
            info.size_bytes
        );
        Ok(Some(elapsed))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CompositeError::inference("ONNX backend used before initialize"))?;

        let started = Instant::now();
        let tensor = Value::from_array(input.clone()).map_err(ort_error("wrap the input"))?;
        // Bound by position: exported input names differ between conversions
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(ort_error("run the model"))?;

        // The fused saliency map is the first of the side outputs
        let name = outputs
            .keys()
            .next()
            .ok_or_else(|| CompositeError::inference("model returned no outputs"))?;
        let view = outputs
            .get(name)
            .ok_or_else(|| CompositeError::inference(format!("output '{name}' vanished")))?
            .try_extract_array::<f32>()
            .map_err(ort_error("read the output as f32"))?;

        let saliency = saliency_tensor(view.shape(), view.iter().copied().collect())?;
        log::debug!(
            "onnx inference {:?} -> {:?} in {}ms",
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
        self.session.is_some()
    }
}

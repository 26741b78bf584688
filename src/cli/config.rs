//! Conversion from command-line arguments to library configuration

use super::main_impl::ServeArgs;
use crate::config::{BackendType, ExecutionProvider, InferenceConfig, ServerConfig};
use anyhow::{bail, Context, Result};
use std::path::Path;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Parse `backend:provider` (or a bare backend name)
    pub(crate) fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let (backend, provider) = match provider_str.split_once(':') {
            Some((backend, provider)) => (backend, Some(provider)),
            None => (provider_str, None),
        };

        let backend_type: BackendType = backend.parse()?;
        let execution_provider = match (backend_type, provider) {
            (BackendType::Onnx, None) => ExecutionProvider::Auto,
            (BackendType::Onnx, Some(provider)) => provider.parse()?,
            (BackendType::Tract, None | Some("cpu")) => ExecutionProvider::Cpu,
            (BackendType::Tract, Some(other)) => {
                bail!("Unknown Tract provider: {other}. Tract only supports 'cpu'")
            },
        };

        Ok((backend_type, execution_provider))
    }

    pub(crate) fn inference_config(
        model_path: &Path,
        provider_str: &str,
        threads: usize,
    ) -> Result<InferenceConfig> {
        let (backend_type, execution_provider) = Self::parse_provider_string(provider_str)
            .with_context(|| format!("Invalid --execution-provider '{provider_str}'"))?;
        Ok(InferenceConfig {
            model_path: model_path.to_path_buf(),
            backend_type,
            execution_provider,
            intra_threads: threads,
            inter_threads: if threads > 0 { (threads / 2).max(1) } else { 0 },
        })
    }

    pub(crate) fn server_config(args: &ServeArgs) -> Result<ServerConfig> {
        let (backend_type, execution_provider) = Self::parse_provider_string(&args.execution_provider)
            .with_context(|| format!("Invalid --execution-provider '{}'", args.execution_provider))?;

        ServerConfig::builder()
            .host(args.host.clone())
            .port(args.port)
            .backgrounds_dir(&args.backgrounds_dir)
            .output_dir(&args.output_dir)
            .model_path(&args.model_path)
            .backend_type(backend_type)
            .execution_provider(execution_provider)
            .num_threads(args.threads)
            .default_resize_percentage(args.default_resize)
            .mask_threshold(args.mask_threshold)
            .max_upload_bytes(args.max_upload_bytes)
            .eager_model_load(!args.lazy_model)
            .build()
            .context("Invalid server configuration")
    }
}

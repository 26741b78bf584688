//! Background compositing service entry point
//!
//! `bg-composite` with no subcommand starts the HTTP service;
//! `bg-composite fetch-model` provisions the segmentation model.

use super::config::CliConfigBuilder;
use crate::{
    backends::DefaultBackendFactory,
    download::{self, FetchOutcome, FetchRequest, ModelDownloader, DEFAULT_MODEL_URLS},
    segmentation::SegmentationService,
    server,
    tracing_config::{events, spans, TracingConfig, TracingFormat},
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Instrument};

#[cfg(feature = "onnx")]
pub(crate) const DEFAULT_EXECUTION_PROVIDER: &str = "onnx:auto";
#[cfg(not(feature = "onnx"))]
pub(crate) const DEFAULT_EXECUTION_PROVIDER: &str = "tract:cpu";

/// Portrait background replacement service
#[derive(Debug, Parser)]
#[command(name = "bg-composite", author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format: console, compact or json
    #[arg(long, default_value = "console", global = true)]
    pub log_format: String,

    /// Filter directives; overrides --verbose
    #[arg(long, env = "RUST_LOG", global = true, value_name = "DIRECTIVES")]
    pub log_filter: Option<String>,

    /// Also write logs to a daily-rolled file
    #[cfg(feature = "tracing-files")]
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service (default)
    Serve(ServeArgs),
    /// Download the segmentation model if it is missing and check it loads
    FetchModel(FetchModelArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Interface to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Root of the <team>/<background> tree
    #[arg(long = "bg-folder", env = "BG_FOLDER", default_value = "bg", value_name = "DIR")]
    pub backgrounds_dir: PathBuf,

    /// Directory receiving generated images
    #[arg(long = "output-folder", env = "OUTPUT_FOLDER", default_value = "generated", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Segmentation model file
    #[arg(short, long, env = "MODEL_PATH", default_value = "saved_models/u2net.onnx")]
    pub model_path: PathBuf,

    /// Backend and provider as backend:provider (onnx:auto, onnx:cuda, onnx:coreml, onnx:cpu, tract:cpu)
    #[arg(short, long, default_value = DEFAULT_EXECUTION_PROVIDER)]
    pub execution_provider: String,

    /// Inference threads (0 = let the backend decide)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Share of the background height used when a request gives none (0.1-1.0)
    #[arg(long, default_value_t = crate::config::DEFAULT_RESIZE_PERCENTAGE)]
    pub default_resize: f32,

    /// Saliency cutoff for foreground pixels
    #[arg(long, default_value_t = crate::config::DEFAULT_MASK_THRESHOLD)]
    pub mask_threshold: f32,

    /// Largest accepted request body in bytes
    #[arg(long, default_value_t = crate::config::DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Defer model loading to the first request
    #[arg(long)]
    pub lazy_model: bool,
}

#[derive(Debug, Clone, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct FetchModelArgs {
    /// Where the model is stored
    #[arg(short, long, env = "MODEL_PATH", default_value = "saved_models/u2net.onnx")]
    pub model_path: PathBuf,

    /// Download URL; repeat to give fallbacks tried in order
    #[arg(long = "url", value_name = "URL")]
    pub urls: Vec<String>,

    /// Expected SHA-256 of the model file (hex)
    #[arg(long)]
    pub sha256: Option<String>,

    /// Download even if the file already exists
    #[arg(short, long)]
    pub force: bool,

    /// Backend used to check the model loads
    #[arg(short, long, default_value = DEFAULT_EXECUTION_PROVIDER)]
    pub execution_provider: String,

    /// Skip the load check
    #[arg(long)]
    pub skip_verify: bool,

    /// Hide the download progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Serve settings alone, resolved from defaults and the environment
#[derive(Debug, Parser)]
#[command(name = "bg-composite")]
struct DefaultServe {
    #[command(flatten)]
    args: ServeArgs,
}

impl FetchModelArgs {
    fn request(&self) -> FetchRequest {
        let urls = if self.urls.is_empty() {
            DEFAULT_MODEL_URLS.iter().map(|u| (*u).to_string()).collect()
        } else {
            self.urls.clone()
        };
        FetchRequest {
            destination: self.model_path.clone(),
            urls,
            sha256: self.sha256.clone(),
            force: self.force,
        }
    }
}

fn init_tracing(cli: &Cli) -> Result<crate::tracing_config::TracingGuard> {
    let format: TracingFormat = cli
        .log_format
        .parse()
        .with_context(|| format!("Invalid --log-format '{}'", cli.log_format))?;
    let mut config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format);
    if let Some(filter) = &cli.log_filter {
        config = config.with_env_filter(filter.clone());
    }
    #[cfg(feature = "tracing-files")]
    if let Some(path) = &cli.log_file {
        config = config.with_output(crate::tracing_config::TracingOutput::Both(path.clone()));
    }
    config.init()
}

/// Parse arguments and run the selected command
///
/// # Errors
/// - Invalid arguments or configuration
/// - Server start-up or I/O failure
/// - Model download or verification failure
pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli)?;

    let command = match cli.command {
        Some(command) => command,
        None => Command::Serve(DefaultServe::parse_from(["bg-composite"]).args),
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let result = match command {
        Command::Serve(args) => {
            run_serve(args)
                .instrument(spans::session(&session_id, "serve"))
                .await
        },
        Command::FetchModel(args) => {
            run_fetch_model(args)
                .instrument(spans::session(&session_id, "fetch-model"))
                .await
        },
    };

    if let Err(e) = &result {
        events::error_with_context(e, "bg-composite");
    }
    result
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = CliConfigBuilder::server_config(&args)?;
    info!(
        backend = %config.inference.backend_type,
        provider = %config.inference.execution_provider,
        model = %config.inference.model_path.display(),
        "Starting background compositing service"
    );

    let segmentation = Arc::new(SegmentationService::new(config.inference.clone()));
    server::serve(config, segmentation)
        .await
        .context("Server terminated with an error")
}

async fn run_fetch_model(args: FetchModelArgs) -> Result<()> {
    let request = args.request();
    let inference = CliConfigBuilder::inference_config(&args.model_path, &args.execution_provider, 0)?;

    let span = spans::fetch_model(&request.destination, request.urls.len());
    let outcome = async {
        let downloader = ModelDownloader::new()?;
        downloader.fetch(&request, !args.no_progress).await
    }
    .instrument(span)
    .await
    .context("Failed to fetch the segmentation model")?;

    match &outcome {
        FetchOutcome::AlreadyPresent(path) => {
            info!(path = %path.display(), "Model already present; use --force to download again");
        },
        FetchOutcome::Downloaded { path, url, bytes } => {
            info!(path = %path.display(), url = %url, bytes = *bytes, "Model downloaded");
        },
    }

    if args.skip_verify {
        return Ok(());
    }

    let start = instant::Instant::now();
    tokio::task::spawn_blocking(move || download::verify_model_loads(&inference, &DefaultBackendFactory))
        .await
        .context("Model verification task failed")?
        .context("Downloaded model could not be loaded and was removed")?;
    events::model_ready(outcome.path(), Some(start.elapsed().as_millis() as u64));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["bg-composite", "-v"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_serve_arguments() {
        let cli = Cli::try_parse_from([
            "bg-composite",
            "serve",
            "--port",
            "8080",
            "--bg-folder",
            "assets/bg",
            "--default-resize",
            "0.5",
            "--lazy-model",
        ])
        .unwrap();

        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, 8080);
        assert_eq!(args.backgrounds_dir, PathBuf::from("assets/bg"));
        assert!((args.default_resize - 0.5).abs() < f32::EPSILON);
        assert!(args.lazy_model);
    }

    #[test]
    fn test_fetch_model_arguments() {
        let cli = Cli::try_parse_from([
            "bg-composite",
            "fetch-model",
            "--url",
            "https://a.example/u2net.onnx",
            "--url",
            "https://b.example/u2net.onnx",
            "--force",
        ])
        .unwrap();

        let Some(Command::FetchModel(args)) = cli.command else {
            panic!("expected fetch-model");
        };
        let request = args.request();
        assert_eq!(request.urls.len(), 2);
        assert!(request.urls[0].starts_with("https://a."));
        assert!(request.force);
    }

    #[test]
    fn test_fetch_model_defaults_to_known_mirrors() {
        let cli = Cli::try_parse_from(["bg-composite", "fetch-model", "--model-path", "m.onnx"]).unwrap();
        let Some(Command::FetchModel(args)) = cli.command else {
            panic!("expected fetch-model");
        };
        let request = args.request();
        assert_eq!(request.destination, PathBuf::from("m.onnx"));
        assert_eq!(request.urls.len(), DEFAULT_MODEL_URLS.len());
        assert!(!request.force);
    }
}

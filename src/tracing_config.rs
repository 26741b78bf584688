//! Subscriber setup for the binary
//!
//! The library only emits `tracing` events (and `log` records from the
//! backends, picked up through the `log` compatibility of
//! `tracing-subscriber`). Installing a subscriber is left to the executable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Line format of emitted events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Coloured single-line output for terminals
    Console,
    /// Plain single-line output for CI and log collectors without ANSI support
    Compact,
    /// One JSON object per event
    #[cfg(feature = "tracing-json")]
    Json,
}

impl std::str::FromStr for TracingFormat {
    type Err = crate::error::CompositeError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "console" | "pretty" => Ok(Self::Console),
            "compact" | "plain" => Ok(Self::Compact),
            #[cfg(feature = "tracing-json")]
            "json" => Ok(Self::Json),
            other => Err(crate::error::CompositeError::invalid_config(format!(
                "Unknown log format '{other}'"
            ))),
        }
    }
}

/// Where events go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    Console,
    /// Daily-rolled file; the path's stem names the file prefix
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    /// Console plus daily-rolled file
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps the non-blocking file writer flushing; hold it for the life of the process
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// `-v` count: 0 info, 1 debug, 2+ trace
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Full filter directive; wins over `verbosity`
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directive derived from the verbosity level
    ///
    /// HTTP plumbing and the inference engines stay at `warn` until `-vv`.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info,hyper=warn,reqwest=warn,ort=warn,tract_onnx=warn",
            1 => "debug,hyper=warn,reqwest=warn,ort=warn,tract_onnx=warn",
            _ => "trace",
        }
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        let directive = self
            .env_filter
            .as_deref()
            .unwrap_or_else(|| self.verbosity_to_filter());
        Ok(EnvFilter::try_new(directive)?)
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let registry = Registry::default().with(self.filter()?);

        match (&self.format, &self.output) {
            (TracingFormat::Console, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().with_ansi(true).with_target(false).compact())
                    .try_init()?;
            },
            (TracingFormat::Compact, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().with_ansi(false).with_target(true).compact())
                    .try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            (TracingFormat::Json, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().json().with_current_span(true).with_span_list(true))
                    .try_init()?;
            },
            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::File(path)) => {
                let (writer, guard) = file_writer(path);
                let layer = fmt::layer().with_ansi(false).with_writer(writer);
                match format {
                    #[cfg(feature = "tracing-json")]
                    TracingFormat::Json => registry.with(layer.json()).try_init()?,
                    _ => registry.with(layer.compact()).try_init()?,
                }
                return Ok(TracingGuard { _file: Some(guard) });
            },
            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::Both(path)) => {
                let (writer, guard) = file_writer(path);
                let file_layer = fmt::layer().with_ansi(false).with_writer(writer).compact();
                let console_layer =
                    fmt::layer().with_ansi(*format == TracingFormat::Console).compact();
                registry.with(console_layer).with(file_layer).try_init()?;
                return Ok(TracingGuard { _file: Some(guard) });
            },
        }

        Ok(TracingGuard::default())
    }
}

#[cfg(feature = "tracing-files")]
fn file_writer(
    path: &std::path::Path,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => std::path::Path::new("."),
    };
    let prefix = path
        .file_stem()
        .unwrap_or_else(|| std::ffi::OsStr::new("bg-composite"));
    tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, prefix))
}

/// Span constructors shared by the command-line entry points
pub mod spans {
    use tracing::{Level, Span};

    pub fn session(session_id: &str, command: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "session",
            session_id = %session_id,
            command = %command
        )
    }

    pub fn fetch_model(destination: &std::path::Path, mirrors: usize) -> Span {
        tracing::span!(
            Level::INFO,
            "fetch_model",
            destination = %destination.display(),
            mirrors = mirrors
        )
    }
}

/// Event helpers for messages the entry points emit in more than one place
pub mod events {
    use tracing::{error, info};

    pub fn error_with_context(error: &dyn std::fmt::Display, context: &str) {
        error!(error = %format!("{error:#}"), context = %context, "Operation failed");
    }

    pub fn model_ready(path: &std::path::Path, load_ms: Option<u64>) {
        match load_ms {
            Some(ms) => info!(model = %path.display(), load_ms = ms, "Model ready"),
            None => info!(model = %path.display(), "Model ready"),
        }
    }
}

//! Segmentation model acquisition
//!
//! Downloads the model file from a list of mirrors (first success wins),
//! optionally checks its SHA-256, and confirms an inference backend can load
//! it before it is trusted. Writes go through a temp file in the destination
//! directory, so a partial download never sits at the model path.

use crate::backends::BackendFactory;
use crate::config::InferenceConfig;
use crate::error::{CompositeError, Result};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Public mirror of the U²-Net ONNX export
pub const DEFAULT_MODEL_URLS: &[&str] =
    &["https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx"];

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }

    fn create(show_progress: bool) -> Self {
        #[cfg(feature = "cli")]
        if show_progress {
            let pb = ProgressBar::new(0);
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .map(|style| style.progress_chars("#>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            return Self::Indicatif(pb);
        }
        #[cfg(not(feature = "cli"))]
        let _ = show_progress;
        Self::NoOp
    }
}

/// What to fetch and where to put it
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub destination: PathBuf,
    /// Mirrors tried in order
    pub urls: Vec<String>,
    /// Expected lowercase hex SHA-256 of the file
    pub sha256: Option<String>,
    /// Download even if the destination already exists
    pub force: bool,
}

impl FetchRequest {
    pub fn new<P: Into<PathBuf>>(destination: P) -> Self {
        Self {
            destination: destination.into(),
            urls: DEFAULT_MODEL_URLS.iter().map(|u| (*u).to_string()).collect(),
            sha256: None,
            force: false,
        }
    }
}

/// Result of [`ModelDownloader::fetch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Destination already existed, nothing downloaded
    AlreadyPresent(PathBuf),
    Downloaded { path: PathBuf, url: String, bytes: u64 },
}

impl FetchOutcome {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::AlreadyPresent(path) | Self::Downloaded { path, .. } => path,
        }
    }
}

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
}

impl ModelDownloader {
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| CompositeError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client })
    }

    /// Make sure the model file exists at `request.destination`
    ///
    /// # Errors
    /// - No URLs configured
    /// - Every mirror failed to download or failed the checksum
    /// - Destination directory not writable
    pub async fn fetch(&self, request: &FetchRequest, show_progress: bool) -> Result<FetchOutcome> {
        if request.destination.exists() && !request.force {
            log::info!("Model already exists at {}", request.destination.display());
            return Ok(FetchOutcome::AlreadyPresent(request.destination.clone()));
        }
        if request.urls.is_empty() {
            return Err(CompositeError::invalid_config("No model URLs configured"));
        }

        let parent = match request.destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|e| CompositeError::file_io_error("create model directory", &parent, &e))?;

        let progress = ProgressIndicator::create(show_progress);
        let mut failures = Vec::new();

        for url in &request.urls {
            if let Err(e) = validate_model_url(url) {
                log::warn!("Skipping {url}: {e}");
                failures.push(format!("{url}: {e}"));
                continue;
            }

            progress.set_message(format!("Downloading {url}"));
            match self.download_to_temp(url, &parent, &progress).await {
                Ok((temp, bytes)) => {
                    if !verify_file_integrity(temp.path(), request.sha256.as_deref())? {
                        failures.push(format!("{url}: checksum mismatch"));
                        continue;
                    }

                    temp.persist(&request.destination).map_err(|e| {
                        CompositeError::file_io_error(
                            "move model into place",
                            &request.destination,
                            &e.error,
                        )
                    })?;
                    progress.finish_with_message(format!("Saved {}", request.destination.display()));
                    log::info!(
                        "Downloaded {bytes} bytes from {url} to {}",
                        request.destination.display()
                    );
                    return Ok(FetchOutcome::Downloaded {
                        path: request.destination.clone(),
                        url: url.clone(),
                        bytes,
                    });
                },
                Err(e) => {
                    log::warn!("Download from {url} failed: {e}");
                    failures.push(format!("{url}: {e}"));
                },
            }
        }

        progress.finish_with_message("Download failed".to_string());
        Err(CompositeError::network_error(
            "Failed to download the model from every configured URL",
            std::io::Error::new(std::io::ErrorKind::Other, failures.join("; ")),
        ))
    }

    /// Stream one URL into a temp file next to the destination
    async fn download_to_temp(
        &self,
        url: &str,
        dir: &Path,
        progress: &ProgressIndicator,
    ) -> Result<(tempfile::NamedTempFile, u64)> {
        let response =
            self.client.get(url).send().await.map_err(|e| {
                CompositeError::network_error(format!("Failed to download {url}"), e)
            })?;

        if !response.status().is_success() {
            return Err(CompositeError::network_error(
                format!("HTTP error {} for {url}", response.status()),
                std::io::Error::new(std::io::ErrorKind::Other, "HTTP error"),
            ));
        }

        let total_size = response.content_length();
        if let Some(total) = total_size {
            progress.set_length(total);
        }

        let temp = tempfile::Builder::new()
            .prefix(".model-")
            .suffix(".part")
            .tempfile_in(dir)
            .map_err(|e| CompositeError::file_io_error("create temp file", dir, &e))?;
        let std_file = temp
            .reopen()
            .map_err(|e| CompositeError::file_io_error("open temp file", temp.path(), &e))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];
        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| CompositeError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| CompositeError::file_io_error("write to file", temp.path(), &e))?;
            downloaded += bytes_read as u64;

            if total_size.is_some() {
                progress.set_position(downloaded);
            } else {
                progress.set_message(format!("Downloaded {:.1} MB", downloaded as f64 / 1_048_576.0));
            }
        }

        file.flush()
            .await
            .map_err(|e| CompositeError::file_io_error("flush file", temp.path(), &e))?;
        if downloaded == 0 {
            return Err(CompositeError::network_error(
                format!("Empty response from {url}"),
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no bytes received"),
            ));
        }

        Ok((temp, downloaded))
    }
}

/// Only plain http(s) URLs are fetched
///
/// # Errors
/// - Empty URL or a scheme other than http/https
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(CompositeError::invalid_config("Model URL cannot be empty"));
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(CompositeError::invalid_config(format!(
            "Unsupported URL scheme: {url}. Expected http:// or https://"
        )));
    }
    Ok(())
}

/// Compare a file's SHA-256 with `expected_hash`; `None` always passes
///
/// # Errors
/// - File cannot be read
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = fs::read(file_path).map_err(|e| {
        CompositeError::file_io_error("read file for verification", file_path, &e)
    })?;
    let actual_hash = format!("{:x}", Sha256::digest(&contents));

    if actual_hash.eq_ignore_ascii_case(expected.trim()) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual_hash
        );
        Ok(false)
    }
}

/// Load the model once; delete it if no backend can
///
/// # Errors
/// - Backend creation or initialization failure (the file is removed)
pub fn verify_model_loads(config: &InferenceConfig, factory: &dyn BackendFactory) -> Result<()> {
    let outcome = factory
        .create_backend(config)
        .and_then(|mut backend| backend.initialize(config).map(|_| ()));

    if let Err(e) = outcome {
        log::error!("Model at {} failed to load: {e}", config.model_path.display());
        if config.model_path.exists() {
            fs::remove_file(&config.model_path).map_err(|io| {
                CompositeError::file_io_error("remove corrupt model", &config.model_path, &io)
            })?;
            log::warn!("Removed corrupt model file {}", config.model_path.display());
        }
        return Err(e);
    }

    log::info!("Model verified: {}", config.model_path.display());
    Ok(())
}

//! Timestamped persistence of generated composites

use crate::error::{CompositeError, Result};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Upper bound on `_<n>` suffixes tried for one timestamp
const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Writes `generated_image_<YYYYMMDD_HHMMSS>.png` files into one directory
#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_dir: PathBuf,
}

impl ResultWriter {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Base file name for a timestamp
    #[must_use]
    pub fn file_stem(timestamp: &DateTime<Local>) -> String {
        format!("generated_image_{}", timestamp.format("%Y%m%d_%H%M%S"))
    }

    /// Write PNG bytes under the current local time
    ///
    /// # Errors
    /// - Output directory cannot be created
    /// - File cannot be written
    pub fn write_png(&self, png: &[u8]) -> Result<PathBuf> {
        self.write_png_at(png, &Local::now())
    }

    /// Write PNG bytes under `timestamp`
    ///
    /// Never overwrites: a second file within the same second gets a
    /// `_<n>` suffix.
    ///
    /// # Errors
    /// - Output directory cannot be created
    /// - File cannot be written
    pub fn write_png_at(&self, png: &[u8], timestamp: &DateTime<Local>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            CompositeError::file_io_error("create output directory", &self.output_dir, &e)
        })?;

        let stem = Self::file_stem(timestamp);
        for attempt in 0..MAX_COLLISION_SUFFIX {
            let file_name = if attempt == 0 {
                format!("{stem}.png")
            } else {
                format!("{stem}_{attempt}.png")
            };
            let path = self.output_dir.join(file_name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(CompositeError::file_io_error("create result file", &path, &e)),
            };

            file.write_all(png)
                .map_err(|e| CompositeError::file_io_error("write result file", &path, &e))?;
            log::debug!("Saved composite to {}", path.display());
            return Ok(path);
        }

        Err(CompositeError::internal(format!(
            "No free file name for {stem} in {}",
            self.output_dir.display()
        )))
    }
}

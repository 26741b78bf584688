//! Image decoding, PNG encoding and data-URL helpers

use crate::error::{CompositeError, Result};
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;

/// Extensions served as backgrounds and accepted by the catalogue
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Service for handling image encoding and decoding
pub struct ImageIOService;

impl ImageIOService {
    /// Decode an uploaded image
    ///
    /// # Errors
    /// - Empty upload
    /// - Bytes are not a decodable raster image
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(CompositeError::invalid_input("Uploaded image is empty"));
        }

        image::load_from_memory(bytes).map_err(|e| {
            CompositeError::invalid_input(format!("Failed to decode uploaded image: {e}"))
        })
    }

    /// Load an image from a file path
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not a decodable raster image
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();
        let data = std::fs::read(path_ref)
            .map_err(|e| CompositeError::file_io_error("read image file", path_ref, &e))?;

        image::load_from_memory(&data).map_err(|e| {
            CompositeError::processing_stage_error(
                "image loading",
                &e.to_string(),
                Some(&format!("path: {}, size: {} bytes", path_ref.display(), data.len())),
            )
        })
    }

    /// Encode an RGB raster as PNG
    ///
    /// Encoder failures are the service's fault, so they surface as
    /// [`CompositeError::Processing`] rather than an image (client) error.
    ///
    /// # Errors
    /// - Encoder failure
    pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).map_err(|e| {
            CompositeError::processing_stage_error(
                "png encoding",
                &e.to_string(),
                Some(&format!("{}x{}", image.width(), image.height())),
            )
        })?;
        Ok(buffer.into_inner())
    }

    /// `data:<mime>;base64,<payload>`
    #[must_use]
    pub fn data_url(mime: &str, bytes: &[u8]) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        format!("data:{mime};base64,{encoded}")
    }

    /// MIME type for a supported background file, by extension
    #[must_use]
    pub fn mime_type<P: AsRef<Path>>(path: P) -> Option<&'static str> {
        let extension = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            _ => None,
        }
    }

    /// Check if a file path has a supported image extension
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|supported| ext.eq_ignore_ascii_case(supported))
            })
    }
}

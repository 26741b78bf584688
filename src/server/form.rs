//! `POST /api/process` form parsing

use crate::{
    compositor::ScaleFactor,
    error::{CompositeError, Result},
};
use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;

/// Validated fields of a process request
#[derive(Debug, Clone)]
pub struct ProcessForm {
    pub image: Vec<u8>,
    pub background: String,
    pub team: String,
    pub scale: ScaleFactor,
}

fn multipart_error(e: &MultipartError) -> CompositeError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        CompositeError::PayloadTooLarge(format!("Upload too large: {}", e.body_text()))
    } else {
        CompositeError::invalid_input(format!("Malformed multipart body: {}", e.body_text()))
    }
}

/// Text field with surrounding whitespace removed; blank counts as missing
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ProcessForm {
    /// Drain the multipart body and check required fields
    ///
    /// Unknown fields are ignored. A repeated field keeps its last value.
    ///
    /// # Errors
    /// - Malformed body or upload over the size limit
    /// - `image`, `background` or `team` missing
    /// - `resize_percentage` present but not a finite number
    pub async fn from_multipart(mut multipart: Multipart, default_scale: ScaleFactor) -> Result<Self> {
        let mut image = None;
        let mut background = None;
        let mut team = None;
        let mut resize_percentage = None;

        while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(&e))? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "image" => {
                    let bytes = field.bytes().await.map_err(|e| multipart_error(&e))?;
                    image = Some(bytes.to_vec());
                },
                "background" => background = Some(field.text().await.map_err(|e| multipart_error(&e))?),
                "team" => team = Some(field.text().await.map_err(|e| multipart_error(&e))?),
                "resize_percentage" => {
                    resize_percentage = Some(field.text().await.map_err(|e| multipart_error(&e))?);
                },
                other => tracing::debug!(field = other, "Ignoring unknown form field"),
            }
        }

        let image = image
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| CompositeError::invalid_input("Missing image"))?;
        let background =
            non_blank(background).ok_or_else(|| CompositeError::invalid_input("Missing background"))?;
        let team = non_blank(team).ok_or_else(|| CompositeError::invalid_input("Missing team"))?;
        let scale = match non_blank(resize_percentage) {
            Some(text) => ScaleFactor::parse(&text)?,
            None => default_scale,
        };

        Ok(Self {
            image,
            background,
            team,
            scale,
        })
    }
}

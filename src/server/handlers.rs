//! Route handlers

use super::{form::ProcessForm, AppState};
use crate::{
    error::{CompositeError, Result},
    services::{BackgroundEntry, ImageIOService},
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub model_loaded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    /// `data:image/png;base64,...`
    pub result: String,
    pub saved_path: String,
}

#[derive(Debug, Deserialize)]
pub struct BackgroundsQuery {
    pub team: Option<String>,
}

/// Run blocking work off the async executor
async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| CompositeError::internal(format!("Worker task failed: {e}")))?
}

/// `GET /`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Background compositing service is running".to_string(),
        model_loaded: state.processor.segmentation().is_ready(),
    })
}

/// `POST /api/process`
#[instrument(skip_all)]
pub async fn process(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessResponse>> {
    let multipart = multipart.map_err(|e| {
        CompositeError::invalid_input(format!("Expected a multipart form: {}", e.body_text()))
    })?;
    let form = ProcessForm::from_multipart(multipart, state.default_scale).await?;
    info!(
        team = %form.team,
        background = %form.background,
        scale = form.scale.get(),
        upload_bytes = form.image.len(),
        "Processing request"
    );

    let response = blocking(move || state.run(form)).await?;
    Ok(Json(response))
}

/// `GET /api/teams`
pub async fn teams(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    let teams = blocking(move || state.backgrounds.list_teams()).await?;
    Ok(Json(teams))
}

/// `GET /api/backgrounds?team=<team>`
pub async fn backgrounds(
    State(state): State<AppState>,
    Query(query): Query<BackgroundsQuery>,
) -> Result<Json<Vec<BackgroundEntry>>> {
    let team = query
        .team
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CompositeError::invalid_input("Missing team"))?;

    let entries = blocking(move || state.backgrounds.list_backgrounds(&team)).await?;
    Ok(Json(entries))
}

impl AppState {
    /// Full pipeline for one validated request; blocking
    fn run(&self, form: ProcessForm) -> Result<ProcessResponse> {
        let source = ImageIOService::load_from_bytes(&form.image)?;
        let background = self.backgrounds.load(&form.team, &form.background)?;

        let result = self.processor.process(&source, &background, form.scale)?;

        let png = ImageIOService::encode_png(&result.image)?;
        let saved_path = self.writer.write_png(&png)?;
        info!(
            saved_path = %saved_path.display(),
            bytes = png.len(),
            subject = result.has_subject(),
            "Composite saved"
        );

        Ok(ProcessResponse {
            result: ImageIOService::data_url("image/png", &png),
            saved_path: saved_path.display().to_string(),
        })
    }
}

//! HTTP surface
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /` | liveness and model state |
//! | `POST /api/process` | composite an uploaded portrait onto a team background |
//! | `GET /api/teams` | team directories |
//! | `GET /api/backgrounds?team=` | backgrounds of one team with previews |
//!
//! Every route answers cross-origin requests; the browser frontend is served
//! from a different origin than the API.

mod form;
pub mod handlers;

pub use form::ProcessForm;

use crate::{
    compositor::ScaleFactor,
    config::ServerConfig,
    error::{CompositeError, Result},
    processor::CompositeProcessor,
    segmentation::SegmentationService,
    services::{BackgroundStore, ResultWriter},
};
use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, info_span, warn, Instrument};

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub(crate) processor: CompositeProcessor,
    pub(crate) backgrounds: BackgroundStore,
    pub(crate) writer: ResultWriter,
    pub(crate) default_scale: ScaleFactor,
}

impl AppState {
    #[must_use]
    pub fn new(config: &ServerConfig, segmentation: Arc<SegmentationService>) -> Self {
        Self {
            processor: CompositeProcessor::new(segmentation, config.mask_threshold),
            backgrounds: BackgroundStore::new(&config.backgrounds_dir),
            writer: ResultWriter::new(&config.output_dir),
            default_scale: ScaleFactor::new(config.default_resize_percentage),
        }
    }

    #[must_use]
    pub fn segmentation(&self) -> &Arc<SegmentationService> {
        self.processor.segmentation()
    }
}

/// Wrap each request in a span carrying a fresh request id
async fn request_span(request: Request, next: Next) -> Response {
    let span = info_span!(
        "request",
        request_id = %uuid::Uuid::new_v4(),
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let start = instant::Instant::now();
        let response = next.run(request).await;
        info!(
            status = response.status().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request finished"
        );
        response
    }
    .instrument(span)
    .await
}

/// Build the application router
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::health))
        .route("/api/process", post(handlers::process))
        .route("/api/teams", get(handlers::teams))
        .route("/api/backgrounds", get(handlers::backgrounds))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_span))
        .with_state(state)
}

/// Bind and serve until the process is stopped
///
/// With `eager_model_load` the model is loaded before the listener opens;
/// a load failure is logged and the service still starts, answering
/// `/api/process` with 503 until a later load succeeds.
///
/// # Errors
/// - Invalid configuration
/// - Listener bind failure
/// - Server I/O failure
pub async fn serve(config: ServerConfig, segmentation: Arc<SegmentationService>) -> Result<()> {
    config.validate()?;

    if config.eager_model_load {
        let service = Arc::clone(&segmentation);
        let warm_up = tokio::task::spawn_blocking(move || service.warm_up())
            .await
            .map_err(|e| CompositeError::internal(format!("Model warm-up task failed: {e}")))?;
        if let Err(e) = warm_up {
            warn!(error = %e, "Model not loaded at startup; /api/process will report it");
        }
    }

    if !config.backgrounds_dir.is_dir() {
        warn!(
            path = %config.backgrounds_dir.display(),
            "Backgrounds directory does not exist"
        );
    }

    let bind_address = config.bind_address();
    let router = create_router(AppState::new(&config, segmentation), config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| {
            error!("Failed to bind {}: {}", bind_address, e);
            CompositeError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind {bind_address}: {e}"),
            ))
        })?;

    info!(
        address = %bind_address,
        backgrounds = %config.backgrounds_dir.display(),
        output = %config.output_dir.display(),
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(CompositeError::Io)
}

#[cfg(test)]
mod tests;

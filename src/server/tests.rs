use super::*;
use crate::{
    backends::test_utils::{MockBackend, MockBackendFactory},
    config::InferenceConfig,
};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use base64::Engine as _;
use image::{Rgb, RgbImage};
use serde_json::Value;
use std::path::Path;
use tower::ServiceExt;

const BOUNDARY: &str = "----composite-test-boundary";

struct Harness {
    _assets: tempfile::TempDir,
    output: tempfile::TempDir,
    factory: MockBackendFactory,
    router: Router,
}

fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    crate::services::ImageIOService::encode_png(&image).unwrap()
}

fn harness_with(backend: MockBackend, max_upload_bytes: usize) -> Harness {
    let assets = tempfile::tempdir().unwrap();
    let team = assets.path().join("blue");
    std::fs::create_dir_all(&team).unwrap();
    std::fs::write(team.join("stadium.png"), png_bytes(200, 300, [0, 0, 180])).unwrap();
    std::fs::write(assets.path().join("secret.png"), png_bytes(2, 2, [1, 1, 1])).unwrap();
    let output = tempfile::tempdir().unwrap();

    let config = ServerConfig::builder()
        .backgrounds_dir(assets.path())
        .output_dir(output.path())
        .max_upload_bytes(max_upload_bytes)
        .build()
        .unwrap();

    let factory = MockBackendFactory::new(backend);
    let segmentation = Arc::new(SegmentationService::with_factory(
        InferenceConfig::default(),
        Box::new(factory.clone()),
    ));
    let router = create_router(AppState::new(&config, segmentation), config.max_upload_bytes);

    Harness {
        _assets: assets,
        output,
        factory,
        router,
    }
}

fn harness() -> Harness {
    harness_with(MockBackend::new(), crate::config::DEFAULT_MAX_UPLOAD_BYTES)
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            },
            Part::File(name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"upload.png\"\r\n\
                         Content-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            },
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn process_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/process")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn output_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_health_reports_model_state() {
    let h = harness();

    let (status, body) = send(&h.router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["message"].is_string());
    assert_eq!(body["model_loaded"], false);
}

#[tokio::test]
async fn test_process_success() {
    let h = harness();
    let upload = png_bytes(120, 160, [240, 30, 30]);

    let (status, body) = send(
        &h.router,
        process_request(&[
            Part::File("image", &upload),
            Part::Text("background", "stadium.png"),
            Part::Text("team", "blue"),
            Part::Text("resize_percentage", "0.5"),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    let result = body["result"].as_str().unwrap();
    let payload = result.strip_prefix("data:image/png;base64,").unwrap();
    let png = base64::engine::general_purpose::STANDARD.decode(payload).unwrap();
    let composite = image::load_from_memory(&png).unwrap();
    assert_eq!((composite.width(), composite.height()), (200, 300));

    let saved_path = Path::new(body["saved_path"].as_str().unwrap());
    assert!(saved_path.starts_with(h.output.path()));
    assert_eq!(std::fs::read(saved_path).unwrap(), png);

    let files = output_files(h.output.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("generated_image_"));
    assert!(files[0].ends_with(".png"));

    let (_, health) = send(&h.router, get("/")).await;
    assert_eq!(health["model_loaded"], true);
}

#[tokio::test]
async fn test_missing_team_rejected_before_pipeline() {
    let h = harness();
    let upload = png_bytes(10, 10, [1, 2, 3]);

    let (status, body) = send(
        &h.router,
        process_request(&[
            Part::File("image", &upload),
            Part::Text("background", "stadium.png"),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing team");
    assert_eq!(h.factory.created(), 0);
    assert!(output_files(h.output.path()).is_empty());
}

#[tokio::test]
async fn test_missing_fields_rejected() {
    let h = harness();
    let upload = png_bytes(10, 10, [1, 2, 3]);

    let (status, body) = send(
        &h.router,
        process_request(&[Part::Text("background", "stadium.png"), Part::Text("team", "blue")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing image");

    let (status, body) = send(
        &h.router,
        process_request(&[Part::File("image", &upload), Part::Text("team", "blue")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing background");
}

#[tokio::test]
async fn test_non_multipart_body_rejected_as_json() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/api/process")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_bad_inputs() {
    let h = harness();
    let upload = png_bytes(10, 10, [1, 2, 3]);

    let cases: [(&[Part<'_>], StatusCode); 4] = [
        (
            &[
                Part::File("image", b"definitely not an image"),
                Part::Text("background", "stadium.png"),
                Part::Text("team", "blue"),
            ],
            StatusCode::BAD_REQUEST,
        ),
        (
            &[
                Part::File("image", &upload),
                Part::Text("background", "missing.png"),
                Part::Text("team", "blue"),
            ],
            StatusCode::NOT_FOUND,
        ),
        (
            &[
                Part::File("image", &upload),
                Part::Text("background", "../secret.png"),
                Part::Text("team", "blue"),
            ],
            StatusCode::BAD_REQUEST,
        ),
        (
            &[
                Part::File("image", &upload),
                Part::Text("background", "stadium.png"),
                Part::Text("team", "blue"),
                Part::Text("resize_percentage", "lots"),
            ],
            StatusCode::BAD_REQUEST,
        ),
    ];

    for (parts, expected) in cases {
        let (status, body) = send(&h.router, process_request(parts)).await;
        assert_eq!(status, expected, "{body}");
        assert!(body["error"].is_string());
    }
    assert!(output_files(h.output.path()).is_empty());
}

#[tokio::test]
async fn test_model_failure_is_503_and_health_survives() {
    let h = harness_with(
        MockBackend::new_failing_init(),
        crate::config::DEFAULT_MAX_UPLOAD_BYTES,
    );
    let upload = png_bytes(10, 10, [1, 2, 3]);

    let (status, body) = send(
        &h.router,
        process_request(&[
            Part::File("image", &upload),
            Part::Text("background", "stadium.png"),
            Part::Text("team", "blue"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("Model"));

    let (status, health) = send(&h.router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["model_loaded"], false);
}

#[tokio::test]
async fn test_inference_failure_is_500_and_service_recovers() {
    let h = harness_with(
        MockBackend::new_failing_inference(),
        crate::config::DEFAULT_MAX_UPLOAD_BYTES,
    );
    let upload = png_bytes(10, 10, [1, 2, 3]);
    let parts = [
        Part::File("image", &upload),
        Part::Text("background", "stadium.png"),
        Part::Text("team", "blue"),
    ];

    for _ in 0..2 {
        let (status, body) = send(&h.router, process_request(&parts)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string(), "{body}");
    }
    assert!(output_files(h.output.path()).is_empty());
    assert_eq!(h.factory.created(), 1);

    let (status, health) = send(&h.router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");

    let (status, _) = send(&h.router, get("/api/teams")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_cross_origin_requests_allowed() {
    let h = harness();

    let request = Request::builder()
        .uri("/api/teams")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );

    let preflight = Request::builder()
        .method("OPTIONS")
        .uri("/api/process")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(preflight).await.unwrap();
    assert!(response.status().is_success());
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    assert!(output_files(h.output.path()).is_empty());
}

#[tokio::test]
async fn test_upload_limit() {
    let h = harness_with(MockBackend::new(), 1024);
    let upload = vec![0u8; 4096];

    let (status, _) = send(
        &h.router,
        process_request(&[
            Part::File("image", &upload),
            Part::Text("background", "stadium.png"),
            Part::Text("team", "blue"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_catalogue_routes() {
    let h = harness();

    let (status, teams) = send(&h.router, get("/api/teams")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(teams, serde_json::json!(["blue"]));

    let (status, backgrounds) = send(&h.router, get("/api/backgrounds?team=blue")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(backgrounds[0]["name"], "stadium.png");
    assert!(backgrounds[0]["preview"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));

    let (status, body) = send(&h.router, get("/api/backgrounds")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing team");

    let (status, _) = send(&h.router, get("/api/backgrounds?team=..")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&h.router, get("/api/backgrounds?team=green")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

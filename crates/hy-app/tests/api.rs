use std::io::Cursor;
use std::sync::Arc;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use hy_app::backend::{router, state::AppState};
use hy_core::mock::{Call, CallGate, ScriptedModelService};
use hy_core::{OrchestratorConfig, OrchestratorContext};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "hy-test-boundary";

struct TestApp {
    app: Router,
    ctx: Arc<OrchestratorContext>,
    service: Arc<ScriptedModelService>,
    _dir: tempfile::TempDir,
}

fn test_app(service: ScriptedModelService) -> TestApp {
    let dir = tempfile::tempdir().expect("test");
    let service = Arc::new(service);
    let config = OrchestratorConfig {
        output_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let ctx = Arc::new(OrchestratorContext::new(service.clone(), config));
    service.observe(ctx.state().clone());

    let app = router(Arc::new(AppState::new(ctx.clone())), 8 * 1024 * 1024);
    TestApp { app, ctx, service, _dir: dir }
}

fn gated_app() -> (TestApp, CallGate) {
    let (service, gate) = ScriptedModelService::new().with_shape_gate();
    (test_app(service), gate)
}

fn png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([90, 120, 200]));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png).expect("test");
    out
}

enum Part<'a> {
    File(&'a str, Vec<u8>),
    Text(&'a str, &'a str),
}

fn multipart(uri: &str, parts: Vec<Part<'_>>) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File(name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&bytes);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}").as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .expect("test")
}

fn generate_request(params: &[(&'static str, &'static str)]) -> Request<Body> {
    let mut parts = vec![Part::File("image", png())];
    parts.extend(params.iter().map(|&(k, v)| Part::Text(k, v)));
    multipart("/generate_no_preview", parts)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("test")
}

fn post(uri: &str) -> Request<Body> {
    Request::builder().method("POST").uri(uri).body(Body::empty()).expect("test")
}

async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.expect("test")
}

async fn json(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.expect("test");
    serde_json::from_slice(&bytes).expect("test")
}

#[tokio::test]
async fn test_generate_then_download() {
    let (t, gate) = gated_app();

    let first = tokio::spawn(t.app.clone().oneshot(generate_request(&[
        ("seed", "1234"),
        ("guidance_scale", "5.0"),
        ("inference_steps", "20"),
        ("octree_resolution", "256"),
        ("num_chunks", "80"),
        ("mesh_simplify_ratio", "0.1"),
        ("apply_texture", "false"),
        ("output_format", "glb"),
    ])));
    gate.entered().await;

    let status = json(send(&t.app, get("/status")).await).await;
    assert_eq!(status["status"], "PROCESSING");
    assert_eq!(status["busy"], true);

    let busy = send(&t.app, generate_request(&[])).await;
    assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(busy).await["error"]["kind"], "busy");

    gate.open();
    let resp = first.await.expect("test").expect("test");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["status"], "COMPLETE");
    assert_eq!(body["model_url"], "/download/model");

    let status = json(send(&t.app, get("/status")).await).await;
    assert_eq!(status["status"], "COMPLETE");
    assert_eq!(status["progress"], 100);
    assert_eq!(status["busy"], false);

    let download = send(&t.app, get("/download/model")).await;
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.headers()[header::CONTENT_TYPE], "model/gltf-binary");
    let bytes = axum::body::to_bytes(download.into_body(), usize::MAX).await.expect("test");
    assert!(!bytes.is_empty());

    assert_eq!(t.service.progress_seen(), vec![10u8, 50, 70, 70]);
}

#[tokio::test]
async fn test_interrupt_cancels_run() {
    let (t, gate) = gated_app();

    let first = tokio::spawn(t.app.clone().oneshot(generate_request(&[])));
    gate.entered().await;

    let interrupt = json(send(&t.app, post("/interrupt")).await).await;
    assert_eq!(interrupt["interrupted"], true);
    gate.open();

    let resp = first.await.expect("test").expect("test");
    assert_eq!(resp.status().as_u16(), 499);
    assert_eq!(json(resp).await["error"]["kind"], "cancelled");

    let status = json(send(&t.app, get("/status")).await).await;
    assert_eq!(status["status"], "FAILED");
    assert_eq!(status["progress"], 0);
    assert_eq!(status["message"], "Cancelled by user");
    assert_eq!(status["busy"], false);

    let download = send(&t.app, get("/download/model")).await;
    assert_eq!(download.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_parameters_are_rejected_before_admission() {
    let t = test_app(ScriptedModelService::new());

    let resp = send(&t.app, generate_request(&[("octree_resolution", "2000")])).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json(resp).await["error"]["kind"], "validation");

    let status = json(send(&t.app, get("/status")).await).await;
    assert_eq!(status["busy"], false);
    assert_eq!(status["message"], "Ready");
    assert!(t.service.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_image_is_rejected() {
    let t = test_app(ScriptedModelService::new());

    let req = multipart("/generate_no_preview", vec![Part::File("image", b"definitely not a png".to_vec())]);
    let resp = send(&t.app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(!t.ctx.is_busy());
    assert!(t.service.calls().is_empty());
}

#[tokio::test]
async fn test_missing_image_is_rejected() {
    let t = test_app(ScriptedModelService::new());

    let req = multipart("/generate_no_preview", vec![Part::Text("seed", "7")]);
    let resp = send(&t.app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_accepted_without_waiting() {
    let t = test_app(ScriptedModelService::new());

    let mut req = generate_request(&[("output_format", "obj")]);
    *req.uri_mut() = "/generate_no_preview?wait=false".parse().expect("test");
    let resp = send(&t.app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body = json(resp).await;
    assert_eq!(body["status"], "PROCESSING");
    assert!(body["run_id"].is_string());

    let mut rx = t.ctx.state().subscribe();
    let done = rx.wait_for(|s| s.status.is_terminal()).await.expect("test").clone();
    assert_eq!(done.progress, 100);

    let download = send(&t.app, get("/download/model")).await;
    assert_eq!(download.status(), StatusCode::OK);
    let disposition = download.headers()[header::CONTENT_DISPOSITION].to_str().expect("test").to_string();
    assert!(disposition.contains("model.obj"));
}

#[tokio::test]
async fn test_multi_view_generation() {
    let t = test_app(ScriptedModelService::new());

    let req = multipart(
        "/generate_multi_no_preview",
        vec![
            Part::File("front", png()),
            Part::File("back", png()),
            Part::File("left", png()),
            Part::Text("apply_texture", "true"),
        ],
    );
    let resp = send(&t.app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(t.service.calls().contains(&Call::GenerateShape { views: 3 }));
    assert!(t.service.calls().iter().any(|c| matches!(c, Call::ApplyTexture { .. })));
}

#[tokio::test]
async fn test_multi_view_requires_front() {
    let t = test_app(ScriptedModelService::new());

    let req = multipart("/generate_multi_no_preview", vec![Part::File("back", png())]);
    let resp = send(&t.app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(t.service.calls().is_empty());
}

#[tokio::test]
async fn test_ping_and_idle_interrupt() {
    let t = test_app(ScriptedModelService::new());

    let ping = json(send(&t.app, get("/ping")).await).await;
    assert_eq!(ping["status"], "ok");
    assert_eq!(ping["busy"], false);

    let interrupt = json(send(&t.app, post("/interrupt")).await).await;
    assert_eq!(interrupt["interrupted"], false);

    let download = send(&t.app, get("/download/model")).await;
    assert_eq!(download.status(), StatusCode::NOT_FOUND);
}

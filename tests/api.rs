//! End-to-end exercises of the HTTP surface over a fake rendering backend.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

use veduta::application::codec::TokenCodec;
use veduta::application::delivery::DeliveryService;
use veduta::application::pipeline::GenerateService;
use veduta::application::pool::{Backend, BackendLauncher, PoolError, Session, SessionPool};
use veduta::application::store::ArtifactStore;
use veduta::domain::request::{ImageOptions, Source};
use veduta::infra::http::{HttpState, build_router};

const PUBLIC_URL: &str = "http://render.test";
const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-data";
const PDF_BYTES: &[u8] = b"%PDF-1.4 fake-document";

struct CountingLauncher {
    launches: Arc<AtomicUsize>,
}

#[async_trait]
impl BackendLauncher for CountingLauncher {
    async fn launch(&self) -> Result<Arc<dyn Backend>, PoolError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeBackend))
    }
}

struct FakeBackend;

#[async_trait]
impl Backend for FakeBackend {
    async fn open_session(&self, _source: &Source) -> Result<Box<dyn Session>, PoolError> {
        Ok(Box::new(FakeSession))
    }

    async fn shutdown(&self) {}
}

struct FakeSession;

#[async_trait]
impl Session for FakeSession {
    async fn capture_image(&mut self, _options: &ImageOptions) -> Result<Bytes, PoolError> {
        Ok(Bytes::from_static(PNG_BYTES))
    }

    async fn capture_pdf(&mut self) -> Result<Bytes, PoolError> {
        Ok(Bytes::from_static(PDF_BYTES))
    }

    async fn close(&mut self) {}
}

struct Harness {
    _dir: tempfile::TempDir,
    app: Router,
    store: Arc<ArtifactStore>,
    launches: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(ArtifactStore::new(dir.path().join("dump")).expect("store"));
    let launches = Arc::new(AtomicUsize::new(0));
    let pool = SessionPool::new(Arc::new(CountingLauncher {
        launches: Arc::clone(&launches),
    }));
    let codec = TokenCodec::new(*b"an-integration-test-secret-key-1");

    // Long TTLs keep the eviction timers out of the picture; tests that
    // need a miss delete the file themselves.
    let generate = Arc::new(GenerateService::new(
        pool,
        Arc::clone(&store),
        codec.clone(),
        Duration::from_secs(300),
        Duration::from_secs(5),
        Duration::from_secs(5),
    ));
    let delivery = Arc::new(DeliveryService::new(
        Arc::clone(&store),
        codec,
        Arc::clone(&generate),
        Duration::from_secs(300),
    ));

    let app = build_router(HttpState {
        generate,
        delivery,
        public_url: PUBLIC_URL.to_string(),
    });

    Harness {
        _dir: dir,
        app,
        store,
        launches,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn json_body(body: &Bytes) -> serde_json::Value {
    serde_json::from_slice(body).expect("body should be JSON")
}

/// Extract the `/resources/...` request path from an absolute resource link.
fn resource_path(link: &str) -> String {
    link.strip_prefix(PUBLIC_URL)
        .expect("link should be absolute")
        .to_string()
}

fn file_name_of(path: &str) -> String {
    let after = path.strip_prefix("/resources/").expect("resource path");
    after
        .split_once('?')
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| after.to_string())
}

#[tokio::test]
async fn health_reports_up() {
    let h = harness();
    let (status, _, body) = send(&h.app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["success"], serde_json::json!(true));
    assert_eq!(body["message"], serde_json::json!("Up and running!"));
}

#[tokio::test]
async fn generate_returns_resource_and_download_links() {
    let h = harness();
    let (status, _, body) = send(
        &h.app,
        post_json(
            "/generate",
            serde_json::json!({ "url": "https://example.com", "type": "image" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["success"], serde_json::json!(true));

    let resource = body["resourceLink"].as_str().expect("resourceLink");
    let download = body["downloadLink"].as_str().expect("downloadLink");
    assert!(resource.starts_with(&format!("{PUBLIC_URL}/resources/vdt_")));
    assert!(download.starts_with(&format!("{PUBLIC_URL}/downloads/vdt_")));
    assert!(resource.contains(".png"));
    assert_eq!(h.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn generate_accepts_query_parameters() {
    let h = harness();
    let (status, _, body) = send(
        &h.app,
        get("/generate?url=https%3A%2F%2Fexample.com&type=pdf"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert!(
        body["resourceLink"]
            .as_str()
            .expect("resourceLink")
            .contains(".pdf")
    );
}

#[tokio::test]
async fn generate_without_a_source_is_rejected() {
    let h = harness();
    let (status, _, body) = send(&h.app, post_json("/generate", serde_json::json!({}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = json_body(&body);
    assert_eq!(body["success"], serde_json::json!(false));
    // Validation failures never touch the backend.
    assert_eq!(h.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn generate_with_both_sources_is_rejected() {
    let h = harness();
    let (status, _, _) = send(
        &h.app,
        post_json(
            "/generate",
            serde_json::json!({ "url": "https://example.com", "html": "<p>hi</p>" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generate_with_unrecognized_type_is_rejected() {
    let h = harness();
    let (status, _, body) = send(
        &h.app,
        post_json(
            "/generate",
            serde_json::json!({ "url": "https://example.com", "type": "jpeg" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = json_body(&body)["message"].as_str().expect("message").to_string();
    assert!(message.contains("jpeg"));
}

#[tokio::test]
async fn buffer_response_returns_artifact_bytes() {
    let h = harness();
    let (status, headers, body) = send(
        &h.app,
        post_json(
            "/generate",
            serde_json::json!({
                "url": "https://example.com",
                "responseKind": "buffer"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).expect("content type"),
        "image/png"
    );
    assert_eq!(&body[..], PNG_BYTES);
}

#[tokio::test]
async fn resource_kind_redirects_to_the_artifact() {
    let h = harness();
    let (status, headers, _) = send(
        &h.app,
        post_json(
            "/generate",
            serde_json::json!({
                "url": "https://example.com",
                "responseKind": "resource"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SEE_OTHER);
    let location = headers
        .get(header::LOCATION)
        .expect("location")
        .to_str()
        .expect("location should be ascii");
    assert!(location.starts_with("/resources/vdt_"));
}

#[tokio::test]
async fn generated_resources_are_served_back() {
    let h = harness();
    let (_, _, body) = send(
        &h.app,
        post_json("/generate", serde_json::json!({ "url": "https://example.com" })),
    )
    .await;
    let link = json_body(&body)["resourceLink"]
        .as_str()
        .expect("resourceLink")
        .to_string();

    let (status, headers, body) = send(&h.app, get(&resource_path(&link))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).expect("content type"),
        "image/png"
    );
    assert_eq!(&body[..], PNG_BYTES);
}

#[tokio::test]
async fn downloads_carry_an_attachment_disposition() {
    let h = harness();
    let (_, _, body) = send(
        &h.app,
        post_json("/generate", serde_json::json!({ "url": "https://example.com" })),
    )
    .await;
    let link = json_body(&body)["downloadLink"]
        .as_str()
        .expect("downloadLink")
        .to_string();
    let path = link.strip_prefix(PUBLIC_URL).expect("absolute link");

    let (status, headers, _) = send(&h.app, get(path)).await;

    assert_eq!(status, StatusCode::OK);
    let disposition = headers
        .get(header::CONTENT_DISPOSITION)
        .expect("disposition")
        .to_str()
        .expect("ascii");
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains(".png"));
}

#[tokio::test]
async fn evicted_resources_regenerate_transparently() {
    let h = harness();
    let (_, _, body) = send(
        &h.app,
        post_json("/generate", serde_json::json!({ "url": "https://example.com" })),
    )
    .await;
    let link = json_body(&body)["resourceLink"]
        .as_str()
        .expect("resourceLink")
        .to_string();
    let path = resource_path(&link);
    let file_name = file_name_of(&path);

    // Simulate the eviction timer having fired.
    h.store.remove(&file_name).await.expect("remove");

    let (status, _, body) = send(&h.app, get(&path)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], PNG_BYTES);
    // The second response came from a fresh rendering pass.
    assert_eq!(h.launches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn markup_artifacts_do_not_regenerate() {
    let h = harness();
    let (_, _, body) = send(
        &h.app,
        post_json(
            "/generate",
            serde_json::json!({ "html": "<h1>once only</h1>" }),
        ),
    )
    .await;
    let link = json_body(&body)["resourceLink"]
        .as_str()
        .expect("resourceLink")
        .to_string();
    let path = resource_path(&link);
    let file_name = file_name_of(&path);

    h.store.remove(&file_name).await.expect("remove");

    let (status, _, _) = send(&h.app, get(&path)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(h.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_artifacts_redirect_to_the_fallback() {
    let h = harness();
    let (status, headers, _) = send(
        &h.app,
        get("/resources/not-a-token.png?fallbackUrl=https%3A%2F%2Fexample.com%2Fsorry"),
    )
    .await;

    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(
        headers.get(header::LOCATION).expect("location"),
        "https://example.com/sorry"
    );
    assert_eq!(h.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_artifacts_without_fallback_render_a_404_page() {
    let h = harness();
    let (status, headers, body) = send(&h.app, get("/resources/not-a-token.png")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .expect("content type")
        .to_str()
        .expect("ascii");
    assert!(content_type.starts_with("text/html"));
    assert!(String::from_utf8_lossy(&body).contains("404"));
}

#[tokio::test]
async fn token_fallback_survives_the_round_trip() {
    let h = harness();
    let (_, _, body) = send(
        &h.app,
        post_json(
            "/generate",
            serde_json::json!({
                "url": "https://example.com",
                "autoRegenerate": false,
                "fallbackUrl": "https://example.com/baked-in"
            }),
        ),
    )
    .await;
    let link = json_body(&body)["resourceLink"]
        .as_str()
        .expect("resourceLink")
        .to_string();
    // The fallback travels in the link's query string.
    assert!(link.contains("fallbackUrl="));

    let path = resource_path(&link);
    let file_name = file_name_of(&path);
    h.store.remove(&file_name).await.expect("remove");

    let (status, headers, _) = send(&h.app, get(&path)).await;

    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(
        headers.get(header::LOCATION).expect("location"),
        "https://example.com/baked-in"
    );
}

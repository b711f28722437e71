//! HTTP API tests.
//!
//! Each test drives the router directly with `oneshot`, backed by in-memory
//! storage and a fast-ticking scheduler.

use std::sync::Arc;
use std::time::Duration;

use assetuploader::routes::{GetAssetResponse, HealthResponse, PostAssetResponse, StatusBody};
use assetuploader::{AppState, AssetManager, MemoryStorage, create_router};
use assetuploader_scheduler::{BucketGranularity, JobStore, PeriodicScheduler};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use pretty_assertions::assert_eq;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

const BUCKET: &str = "assets";

struct TestApp {
    router: Router,
    storage: Arc<MemoryStorage>,
    scheduler: Arc<PeriodicScheduler>,
}

impl TestApp {
    /// An app whose uploads are confirmable immediately.
    async fn new() -> Self {
        Self::with_bucket(BUCKET).await
    }

    /// An app configured for `bucket`, which only exists if it is [`BUCKET`].
    async fn with_bucket(bucket: &str) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        storage.create_bucket(BUCKET).await;

        let store = JobStore::spawn(BucketGranularity::Millis);
        let scheduler = Arc::new(PeriodicScheduler::start(
            store.clone(),
            Duration::from_millis(50),
        ));
        let manager = AssetManager::new(storage.clone(), scheduler.clone(), Duration::ZERO);

        let state = Arc::new(AppState {
            manager,
            storage: storage.clone(),
            store,
            bucket: bucket.to_string(),
            shutdown: CancellationToken::new(),
        });

        Self {
            router: create_router(state),
            storage,
            scheduler,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post_asset(&self) -> PostAssetResponse {
        let request = Request::builder()
            .method("POST")
            .uri("/asset")
            .body(Body::empty())
            .unwrap();
        let (status, body) = self.send(request).await;
        assert_eq!(status, StatusCode::OK);
        json(&body)
    }

    async fn put_status(&self, id: &str, status: &str) -> (StatusCode, Vec<u8>) {
        let body = serde_json::to_vec(&StatusBody {
            status: status.to_string(),
        })
        .unwrap();
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/asset/{}", id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    async fn upload(&self, id: &str) {
        self.storage
            .upload(BUCKET, &format!("temp/{}", id), b"data".to_vec())
            .await
            .unwrap();
    }

    async fn wait_for_download(&self, id: &str) -> Option<GetAssetResponse> {
        for _ in 0..60 {
            let (status, body) = self.get(&format!("/asset/{}", id)).await;
            if status == StatusCode::OK {
                return Some(json(&body));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        None
    }
}

fn json<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_healthcheck_up() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/healthcheck").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json::<HealthResponse>(&body).status, "UP");

    app.scheduler.stop().await;
}

#[tokio::test]
async fn test_healthcheck_down_without_bucket() {
    let app = TestApp::with_bucket("missing").await;

    let (status, body) = app.get("/healthcheck").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json::<HealthResponse>(&body).status, "DOWN");

    app.scheduler.stop().await;
}

#[tokio::test]
async fn test_post_asset_returns_upload_url() {
    let app = TestApp::new().await;

    let created = app.post_asset().await;
    let id = Uuid::parse_str(&created.id).unwrap();
    assert_eq!(id.get_version_num(), 4);
    assert!(created
        .upload_url
        .starts_with(&format!("memory://{}/temp/{}?", BUCKET, id)));

    app.scheduler.stop().await;
}

#[tokio::test]
async fn test_post_asset_missing_bucket_is_not_found() {
    let app = TestApp::with_bucket("missing").await;

    let request = Request::builder()
        .method("POST")
        .uri("/asset")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json::<String>(&body), "bucket missing is not found");

    app.scheduler.stop().await;
}

#[tokio::test]
async fn test_upload_lifecycle() {
    let app = TestApp::new().await;
    let created = app.post_asset().await;

    // Not downloadable before confirmation
    let (status, _) = app.get(&format!("/asset/{}", created.id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.upload(&created.id).await;
    let (status, body) = app.put_status(&created.id, "uploaded").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json::<StatusBody>(&body).status, "Accepted");

    let download = app
        .wait_for_download(&created.id)
        .await
        .expect("asset was never confirmed");
    assert!(download
        .download_url
        .starts_with(&format!("memory://{}/uploaded/{}?", BUCKET, created.id)));
    assert!(download.download_url.contains("X-Amz-Expires=60"));

    // Confirmed assets cannot be reported again
    let (status, body) = app.put_status(&created.id, "uploaded").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        json::<String>(&body),
        format!("asset {} already uploaded", created.id)
    );

    app.scheduler.stop().await;
}

#[tokio::test]
async fn test_get_asset_custom_timeout() {
    let app = TestApp::new().await;
    let created = app.post_asset().await;
    app.upload(&created.id).await;
    app.put_status(&created.id, "uploaded").await;
    app.wait_for_download(&created.id)
        .await
        .expect("asset was never confirmed");

    let (status, body) = app.get(&format!("/asset/{}?timeout=5", created.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json::<GetAssetResponse>(&body)
        .download_url
        .contains("X-Amz-Expires=5"));

    let (status, _) = app.get(&format!("/asset/{}?timeout=soon", created.id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.scheduler.stop().await;
}

#[tokio::test]
async fn test_put_wrong_status_is_bad_input() {
    let app = TestApp::new().await;
    let created = app.post_asset().await;

    let (status, body) = app.put_status(&created.id, "pending").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json::<String>(&body), "expected status uploaded, not pending");

    app.scheduler.stop().await;
}

#[tokio::test]
async fn test_put_without_body_is_bad_input() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/asset/{}", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();

    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.scheduler.stop().await;
}

#[tokio::test]
async fn test_invalid_asset_id_is_bad_input() {
    let app = TestApp::new().await;

    let (status, _) = app.put_status("not-a-uuid", "uploaded").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.get("/asset/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.scheduler.stop().await;
}

#[tokio::test]
async fn test_unknown_asset_is_not_found() {
    let app = TestApp::new().await;
    let id = Uuid::new_v4();

    let (status, body) = app.put_status(&id.to_string(), "uploaded").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json::<String>(&body), format!("asset {} is not found", id));

    app.scheduler.stop().await;
}

#[tokio::test]
async fn test_jobs_listing() {
    let app = TestApp::new().await;
    let created = app.post_asset().await;
    app.upload(&created.id).await;
    app.put_status(&created.id, "uploaded").await;
    app.wait_for_download(&created.id)
        .await
        .expect("asset was never confirmed");

    let mut completed = Vec::new();
    for _ in 0..20 {
        let (status, body) = app.get("/jobs?status=completed").await;
        assert_eq!(status, StatusCode::OK);
        completed = json::<Vec<Value>>(&body);
        if !completed.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["id"], created.id.as_str());
    assert_eq!(completed[0]["status"], "completed");

    let (status, body) = app.get("/jobs?status=new").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json::<Vec<Value>>(&body).is_empty());

    let (status, _) = app.get("/jobs?status=finished").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.scheduler.stop().await;
}

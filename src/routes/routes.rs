//! Defines routes for scanning, health and backend configuration.
//!
//! ## Structure
//! - **Scanning**
//!   - `POST /scan`     : scan the request body (options in `X-*` headers)
//!   - `POST /s3/scan`  : scan an object in the remote store
//!
//! - **Health**
//!   - `GET /health`    : active backend; 503 when none
//!   - `GET /healthz`   : liveness only
//!
//! - **Backend configuration**
//!   - `GET  /config/backend`        : active session and controller phase
//!   - `PUT  /config/backend`        : swap backend
//!   - `POST /config/backend/probe`  : connectivity check

use crate::{
    handlers::{
        config_handlers::{backend_status, probe_backend, reconfigure},
        health_handlers::{health, healthz},
        scan_handlers::{scan_object, scan_upload},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Inline uploads larger than `max_upload_bytes` get 413.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/health", get(health))
        .route("/healthz", get(healthz))
        // scanning
        .route(
            "/scan",
            post(scan_upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/s3/scan", post(scan_object))
        // backend configuration
        .route("/config/backend", get(backend_status).put(reconfigure))
        .route("/config/backend/probe", post(probe_backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::{config_handlers::ReconfigureResponse, scan_handlers::ScanResponse},
        models::backend_config::BackendConfig,
        services::{
            backend::{
                BackendOptions,
                fake_engine::{EICAR, EngineBehavior, FakeEngine},
            },
            reconfig_service::ReconfigService,
            scan_service::ScanService,
            selector::BackendSelector,
            store_connector::FixedStoreConnector,
        },
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
        response::Response,
    };
    use object_store::{ObjectStore, PutOptions, PutPayload, memory::InMemory, path::Path};
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        store: Arc<InMemory>,
        _engine: FakeEngine,
    }

    /// App wired to a fake engine; `install` decides whether it starts active.
    async fn app(install: bool) -> TestApp {
        let engine = FakeEngine::spawn(EngineBehavior::default()).await;
        let store = Arc::new(InMemory::new());
        let selector = BackendSelector::new();
        let custom_tags: Arc<[String]> = vec!["env=test".to_string()].into();

        let reconfig = ReconfigService::new(
            selector.clone(),
            BackendOptions::default(),
            Duration::from_secs(2),
        );
        if install {
            let config =
                BackendConfig::from_parts(None, None, None, Some(engine.address()), false);
            reconfig.apply(config, false).await.unwrap();
        }

        let state = AppState {
            scans: ScanService::new(
                selector.clone(),
                Arc::new(FixedStoreConnector(store.clone())),
                custom_tags.to_vec(),
            ),
            reconfig,
            selector,
            custom_tags,
        };

        TestApp {
            router: routes(1024 * 1024).with_state(state),
            store,
            _engine: engine,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_tracks_active_session() {
        let empty = app(false).await;
        let response = send(&empty.router, get_request("/health")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = json_body(response).await;
        assert_eq!(body["status"], "unhealthy");

        let live = app(true).await;
        let response = send(&live.router, get_request("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["mode"], "external");
        assert_eq!(body["generation"], 1);
        assert_eq!(body["customTags"], json!(["env=test"]));
        assert!(
            body["activeEndpointDescriptor"]
                .as_str()
                .unwrap()
                .starts_with("tcp://127.0.0.1:")
        );

        let response = send(&live.router, get_request("/healthz")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upload_scan_reports_detection() {
        let test = app(true).await;
        let mut content = b"MZ\x90\x00".to_vec();
        content.extend_from_slice(EICAR);

        let request = Request::post("/scan")
            .header("X-Filename", "dropper.exe")
            .header("X-Scan-Method", "stream")
            .header("X-PML-Enabled", "true")
            .header("X-Scan-Tags", "team=secops, ticket=42")
            .body(Body::from(content))
            .unwrap();
        let response = send(&test.router, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: ScanResponse = json_body(response).await;
        assert!(!body.safe);
        assert_eq!(body.malware_names, vec!["Eicar_test_file"]);
        assert!(body.scan_id.ends_with("-dropper.exe"));
        assert_eq!(body.generation, 1);
        assert_eq!(&body.tags[..3], ["file_type=.exe", "scan_method=streaming", "source=upload"]);
        assert!(body.tags.contains(&"ml_enabled=true".to_string()));
        let tail: Vec<_> = body.tags.iter().rev().take(4).rev().cloned().collect();
        assert_eq!(
            tail,
            vec![
                "env=test",
                "team=secops",
                "ticket=42",
                "malware_name=Eicar_test_file"
            ]
        );
    }

    #[tokio::test]
    async fn malformed_uploads_are_rejected() {
        let test = app(true).await;

        let empty = Request::post("/scan").body(Body::empty()).unwrap();
        assert_eq!(send(&test.router, empty).await.status(), StatusCode::BAD_REQUEST);

        let bad_method = Request::post("/scan")
            .header("X-Scan-Method", "file")
            .body(Body::from("data"))
            .unwrap();
        let response = send(&test.router, bad_method).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = json_body(response).await;
        assert_eq!(body["status"], 400);

        let bad_tag = Request::post("/scan")
            .header("X-Scan-Tags", "novalue")
            .body(Body::from("data"))
            .unwrap();
        assert_eq!(send(&test.router, bad_tag).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_without_backend_is_unavailable() {
        let test = app(false).await;
        let request = Request::post("/scan").body(Body::from("data")).unwrap();
        assert_eq!(
            send(&test.router, request).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn object_scan_reads_from_store() {
        let test = app(true).await;
        test.store
            .put_opts(
                &Path::from("invoices/march.pdf"),
                PutPayload::from(b"%PDF-1.7 clean".to_vec()),
                PutOptions::default(),
            )
            .await
            .unwrap();

        let request = json_request(
            "POST",
            "/s3/scan",
            json!({
                "bucket": "finance",
                "key": "invoices/march.pdf",
                "scanMethod": "streaming",
                "tags": ["owner=ap"],
                "options": { "digestEnabled": false }
            }),
        );
        let response = send(&test.router, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: ScanResponse = json_body(response).await;
        assert!(body.safe);
        assert!(body.malware_names.is_empty());
        assert!(body.tags.contains(&"digest=false".to_string()));
        assert!(body.tags.contains(&"source=object_store".to_string()));
        assert_eq!(body.tags.last().map(String::as_str), Some("owner=ap"));

        let missing = json_request(
            "POST",
            "/s3/scan",
            json!({ "bucket": "finance", "key": "invoices/april.pdf" }),
        );
        assert_eq!(send(&test.router, missing).await.status(), StatusCode::NOT_FOUND);

        let half_credentials = json_request(
            "POST",
            "/s3/scan",
            json!({ "bucket": "finance", "key": "invoices/march.pdf", "awsAccessKey": "AKIA" }),
        );
        assert_eq!(
            send(&test.router, half_credentials).await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn rejected_reconfiguration_keeps_backend() {
        let test = app(true).await;

        let request = json_request("PUT", "/config/backend", json!({ "region": "eu-1" }));
        let response = send(&test.router, request).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: ReconfigureResponse = json_body(response).await;
        assert!(!body.applied);
        assert!(body.error.unwrap().contains("API key"));
        assert_eq!(body.generation, Some(1));

        let status = send(
            &test.router,
            get_request("/config/backend"),
        )
        .await;
        let status: Value = json_body(status).await;
        assert_eq!(status["generation"], 1);
        assert_eq!(status["state"], "active");
        assert_eq!(status["phase"], "idle");
    }

    #[tokio::test]
    async fn reconfiguration_swaps_backend() {
        let test = app(false).await;
        let other = FakeEngine::spawn(EngineBehavior::default()).await;

        let request = json_request(
            "PUT",
            "/config/backend",
            json!({ "externalAddress": other.address(), "verify": true, "apiKey": "ignored" }),
        );
        let response = send(&test.router, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: ReconfigureResponse = json_body(response).await;
        assert!(body.applied);
        assert_eq!(
            body.active_endpoint_descriptor,
            Some(format!("tcp://{}", other.address()))
        );

        let status = send(
            &test.router,
            get_request("/config/backend"),
        )
        .await;
        let text = String::from_utf8(
            to_bytes(status.into_body(), usize::MAX).await.unwrap().to_vec(),
        )
        .unwrap();
        assert!(!text.contains("ignored"));
    }

    #[tokio::test]
    async fn probe_never_touches_active_session() {
        let test = app(true).await;

        let request = json_request(
            "POST",
            "/config/backend/probe",
            json!({ "externalAddress": "https://scanner:443" }),
        );
        let response = send(&test.router, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = json_body(response).await;
        assert_eq!(body["reachable"], false);
        assert_eq!(body["failure"], "malformed_address");

        let health = send(&test.router, get_request("/health")).await;
        let health: Value = json_body(health).await;
        assert_eq!(health["generation"], 1);
    }
}

//! Resize RPC: the worker HTTP server and the orchestrator's client stub.
//!
//! # Wire contract
//!
//! | Request | Response |
//! |---|---|
//! | `POST /v1/zoom?percent=<n>`, body = image bytes | `200`, body = PNG |
//! | `GET /health` | `200 ok` |
//!
//! Failures come back as JSON `{"kind": ..., "error": ...}`:
//!
//! | Kind | Status |
//! |---|---|
//! | `invalid_request` | 400 |
//! | `image_decode` | 422 |
//! | `image_encode` | 500 |
//!
//! The worker holds no per-request state. Decode, resample, and encode run on
//! the blocking pool so one large image doesn't stall the accept loop.

use crate::imaging::{ImagingError, OutputFormat, RustBackend, ZoomLimits, ZoomPercent};
use crate::imaging::{validate_zoom_request, zoom};
use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub const ZOOM_PATH: &str = "/v1/zoom";
pub const HEALTH_PATH: &str = "/health";

// ============================================================================
// Server
// ============================================================================

pub struct WorkerState {
    backend: RustBackend,
    limits: ZoomLimits,
}

impl WorkerState {
    pub fn new(limits: ZoomLimits) -> Self {
        Self {
            backend: RustBackend::new(),
            limits,
        }
    }
}

/// JSON body of every non-2xx worker response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: String,
    pub error: String,
}

/// Handler-side wrapper so imaging failures render as the wire contract says.
#[derive(Debug)]
pub struct WorkerError(ImagingError);

impl From<ImagingError> for WorkerError {
    fn from(e: ImagingError) -> Self {
        Self(e)
    }
}

impl WorkerError {
    fn status(&self) -> StatusCode {
        match self.0 {
            ImagingError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ImagingError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ImagingError::Encode(_) | ImagingError::WidthMismatch { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!(kind = self.0.kind(), status = status.as_u16(), error = %self.0, "Zoom request failed");
        let body = ErrorBody {
            kind: self.0.kind().to_string(),
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ZoomQuery {
    percent: Option<String>,
}

fn parse_percent(query: ZoomQuery) -> Result<i64, ImagingError> {
    let text = query
        .percent
        .ok_or_else(|| ImagingError::InvalidRequest("missing 'percent' query parameter".into()))?;
    text.trim()
        .parse::<i64>()
        .map_err(|_| ImagingError::InvalidRequest(format!("percent '{text}' is not an integer")))
}

async fn zoom_handler(
    State(state): State<Arc<WorkerState>>,
    Query(query): Query<ZoomQuery>,
    body: Bytes,
) -> Result<Response, WorkerError> {
    let percent = parse_percent(query)?;
    let started = Instant::now();
    let bytes_in = body.len();

    let task_state = state.clone();
    let (png, dims) = tokio::task::spawn_blocking(move || {
        let percent = validate_zoom_request(&body, percent, &task_state.limits)?;
        zoom(&task_state.backend, &body, percent, &task_state.limits)
    })
    .await
    .map_err(|e| ImagingError::Encode(format!("resize task failed: {e}")))??;

    debug!(
        zoom_percent = percent,
        bytes = bytes_in,
        width = dims.width,
        height = dims.height,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Zoomed image"
    );
    Ok(([(header::CONTENT_TYPE, OutputFormat::TRANSPORT.mime_type())], png).into_response())
}

async fn health() -> &'static str {
    "ok"
}

/// Build the worker router.
pub fn router(state: WorkerState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(ZOOM_PATH, post(zoom_handler))
        .route(HEALTH_PATH, get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(Arc::new(state))
}

/// Serve a router on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Bind and run one resize worker.
pub async fn run_worker(
    bind: SocketAddr,
    limits: ZoomLimits,
    max_body_bytes: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(
        bind = %listener.local_addr()?,
        max_zoom_percent = limits.max_percent,
        max_output_pixels = limits.max_output_pixels,
        "Resize worker listening"
    );
    serve(listener, router(WorkerState::new(limits), max_body_bytes), shutdown).await
}

// ============================================================================
// Client
// ============================================================================

#[derive(Error, Debug)]
pub enum RemoteCallError {
    #[error("{endpoint} rejected the request with {status} ({kind}): {message}")]
    Rejected {
        endpoint: String,
        status: u16,
        kind: String,
        message: String,
    },
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("call to {endpoint} timed out after {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },
}

/// Anything that can resize an encoded image by a percentage.
#[async_trait]
pub trait ResizeClient: Send + Sync {
    /// Where calls go, for logs.
    fn endpoint(&self) -> &str;

    async fn zoom(&self, image: Bytes, percent: ZoomPercent) -> Result<Bytes, RemoteCallError>;
}

/// HTTP stub for one remote resize worker.
#[derive(Clone)]
pub struct HttpResizeClient {
    http: reqwest::Client,
    endpoint: String,
    url: String,
    timeout: Duration,
}

impl HttpResizeClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteCallError> {
        let endpoint = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RemoteCallError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        Ok(Self {
            http,
            url: format!("{endpoint}{ZOOM_PATH}"),
            endpoint,
            timeout,
        })
    }

    fn timed_out(&self) -> RemoteCallError {
        RemoteCallError::Timeout {
            endpoint: self.endpoint.clone(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    fn transport(&self, source: reqwest::Error) -> RemoteCallError {
        if source.is_timeout() {
            return self.timed_out();
        }
        RemoteCallError::Transport {
            endpoint: self.endpoint.clone(),
            source,
        }
    }

    async fn call(&self, image: Bytes, percent: ZoomPercent) -> Result<Bytes, RemoteCallError> {
        let response = self
            .http
            .post(&self.url)
            .query(&[("percent", percent.value())])
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (kind, message) = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) => (body.kind, body.error),
                Err(_) => ("unknown".to_string(), text),
            };
            return Err(RemoteCallError::Rejected {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                kind,
                message,
            });
        }

        response.bytes().await.map_err(|e| self.transport(e))
    }
}

#[async_trait]
impl ResizeClient for HttpResizeClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn zoom(&self, image: Bytes, percent: ZoomPercent) -> Result<Bytes, RemoteCallError> {
        tokio::time::timeout(self.timeout, self.call(image, percent))
            .await
            .map_err(|_| self.timed_out())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{image_dimensions, solid_png, spawn_router};

    const MAX_BODY: usize = 16 * 1024 * 1024;

    async fn spawn_worker() -> String {
        let addr = spawn_router(router(WorkerState::new(ZoomLimits::default()), MAX_BODY)).await;
        format!("http://{addr}")
    }

    fn pct(value: u32) -> ZoomPercent {
        ZoomPercent::new(value).unwrap()
    }

    fn client(base: &str) -> HttpResizeClient {
        HttpResizeClient::new(base, Duration::from_secs(5)).unwrap()
    }

    async fn post_raw(base: &str, query: &str, body: Vec<u8>) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{base}{ZOOM_PATH}{query}"))
            .body(body)
            .send()
            .await
            .unwrap()
    }

    // =========================================================================
    // Server
    // =========================================================================

    #[tokio::test]
    async fn health_returns_ok() {
        let base = spawn_worker().await;
        let body = reqwest::get(format!("{base}{HEALTH_PATH}"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn zoom_doubles_dimensions() {
        let base = spawn_worker().await;
        let response = post_raw(&base, "?percent=200", solid_png(4, 2)).await;
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE.as_str()],
            "image/png"
        );
        let png = response.bytes().await.unwrap();
        assert_eq!(image_dimensions(&png), (8, 4));
    }

    #[tokio::test]
    async fn zero_percent_is_invalid_request() {
        let base = spawn_worker().await;
        let response = post_raw(&base, "?percent=0", solid_png(4, 2)).await;
        assert_eq!(response.status(), 400);
        let body: ErrorBody = response.json().await.unwrap();
        assert_eq!(body.kind, "invalid_request");
    }

    #[tokio::test]
    async fn missing_or_garbled_percent_is_invalid_request() {
        let base = spawn_worker().await;
        for query in ["", "?percent=abc", "?percent=-5"] {
            let response = post_raw(&base, query, solid_png(4, 2)).await;
            assert_eq!(response.status(), 400, "query {query:?}");
            let body: ErrorBody = response.json().await.unwrap();
            assert_eq!(body.kind, "invalid_request");
        }
    }

    #[tokio::test]
    async fn percent_above_limit_is_invalid_request() {
        let base = spawn_worker().await;
        let response = post_raw(&base, "?percent=5000", solid_png(4, 2)).await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn oversized_output_is_invalid_request() {
        let base = spawn_worker().await;
        // 800x600 at 1000% would be 48 megapixels
        let response = post_raw(&base, "?percent=1000", solid_png(800, 600)).await;
        assert_eq!(response.status(), 400);
        let body: ErrorBody = response.json().await.unwrap();
        assert_eq!(body.kind, "invalid_request");
        assert!(body.error.contains("8000x6000"));
    }

    #[tokio::test]
    async fn configured_pixel_limit_applies() {
        let limits = ZoomLimits {
            max_percent: 1000,
            max_output_pixels: 10_000,
        };
        let addr = spawn_router(router(WorkerState::new(limits), MAX_BODY)).await;
        let base = format!("http://{addr}");

        let refused = post_raw(&base, "?percent=1000", solid_png(20, 20)).await;
        assert_eq!(refused.status(), 400);
        let allowed = post_raw(&base, "?percent=500", solid_png(20, 20)).await;
        assert_eq!(allowed.status(), 200);
    }

    #[tokio::test]
    async fn empty_body_is_invalid_request() {
        let base = spawn_worker().await;
        let response = post_raw(&base, "?percent=50", Vec::new()).await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn garbage_body_is_decode_error() {
        let base = spawn_worker().await;
        let response = post_raw(&base, "?percent=50", b"definitely not an image".to_vec()).await;
        assert_eq!(response.status(), 422);
        let body: ErrorBody = response.json().await.unwrap();
        assert_eq!(body.kind, "image_decode");
    }

    #[tokio::test]
    async fn zoom_to_zero_pixels_is_invalid_request() {
        let base = spawn_worker().await;
        let response = post_raw(&base, "?percent=10", solid_png(4, 4)).await;
        assert_eq!(response.status(), 400);
    }

    // =========================================================================
    // Client
    // =========================================================================

    #[tokio::test]
    async fn client_returns_resized_png() {
        let base = spawn_worker().await;
        let out = client(&base).zoom(Bytes::from(solid_png(10, 6)), pct(50)).await.unwrap();
        assert_eq!(image_dimensions(&out), (5, 3));
    }

    #[tokio::test]
    async fn client_maps_error_body() {
        let base = spawn_worker().await;
        let err = client(&base)
            .zoom(Bytes::from_static(b"nope"), pct(50))
            .await
            .unwrap_err();
        match err {
            RemoteCallError::Rejected { status, kind, .. } => {
                assert_eq!(status, 422);
                assert_eq!(kind, "image_decode");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_trims_trailing_slash() {
        let base = spawn_worker().await;
        let c = client(&format!("{base}/"));
        assert_eq!(c.endpoint(), base);
        assert!(c.zoom(Bytes::from(solid_png(2, 2)), pct(100)).await.is_ok());
    }

    #[tokio::test]
    async fn client_times_out_on_slow_worker() {
        let slow = Router::new().route(
            ZOOM_PATH,
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let addr = spawn_router(slow).await;
        let c = HttpResizeClient::new(&format!("http://{addr}"), Duration::from_millis(100)).unwrap();

        let err = c.zoom(Bytes::from(solid_png(2, 2)), pct(100)).await.unwrap_err();
        assert!(matches!(err, RemoteCallError::Timeout { timeout_ms: 100, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn client_reports_unreachable_worker_as_transport() {
        // Bind then drop so the port is very likely closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"))
            .zoom(Bytes::from(solid_png(2, 2)), pct(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteCallError::Transport { .. }), "{err:?}");
    }
}

//! Forward of assembled images to the storage sink.
//!
//! The sink accepts `POST {url}{upload_path}` with the encoded image as an
//! octet-stream body and answers `200`/`201` with a JSON object whose
//! `id_field` member is the integer identifier it assigned. The idempotency
//! key travels in the `X-Unique-ID` header.

use crate::types::{AssembledImage, ContentId};
use async_trait::async_trait;
use axum::http::header;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const UNIQUE_ID_HEADER: &str = "X-Unique-ID";

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("storage sink {endpoint} answered {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("transport error forwarding to {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("forward to {endpoint} timed out after {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },
    #[error("storage sink {endpoint} response has no integer '{field}'")]
    MissingContentId { endpoint: String, field: String },
}

/// Destination for finished images.
#[async_trait]
pub trait ImageSink: Send + Sync {
    /// Persist the image. `key` identifies the originating message.
    async fn store(&self, image: &AssembledImage, key: &str) -> Result<ContentId, ForwardError>;
}

#[derive(Debug, Clone)]
pub struct HttpSinkOptions {
    pub base_url: String,
    pub upload_path: String,
    pub id_field: String,
    pub timeout: Duration,
}

pub struct HttpImageSink {
    http: reqwest::Client,
    endpoint: String,
    id_field: String,
    timeout: Duration,
}

impl HttpImageSink {
    pub fn new(options: HttpSinkOptions) -> Result<Self, ForwardError> {
        let endpoint = format!(
            "{}{}",
            options.base_url.trim_end_matches('/'),
            options.upload_path
        );
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|source| ForwardError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        Ok(Self {
            http,
            endpoint,
            id_field: options.id_field,
            timeout: options.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn timed_out(&self) -> ForwardError {
        ForwardError::Timeout {
            endpoint: self.endpoint.clone(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    fn transport(&self, source: reqwest::Error) -> ForwardError {
        if source.is_timeout() {
            return self.timed_out();
        }
        ForwardError::Transport {
            endpoint: self.endpoint.clone(),
            source,
        }
    }

    async fn post(&self, image: &AssembledImage, key: &str) -> Result<ContentId, ForwardError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(UNIQUE_ID_HEADER, key)
            .body(image.bytes.clone())
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.transport(e))?;
        if status != 200 && status != 201 {
            return Err(ForwardError::Status {
                endpoint: self.endpoint.clone(),
                status,
                body,
            });
        }
        extract_content_id(&body, &self.id_field).ok_or_else(|| ForwardError::MissingContentId {
            endpoint: self.endpoint.clone(),
            field: self.id_field.clone(),
        })
    }
}

/// Pull the integer id out of a sink response body.
fn extract_content_id(body: &str, field: &str) -> Option<ContentId> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get(field)?.as_i64().map(ContentId)
}

#[async_trait]
impl ImageSink for HttpImageSink {
    async fn store(&self, image: &AssembledImage, key: &str) -> Result<ContentId, ForwardError> {
        let content_id = tokio::time::timeout(self.timeout, self.post(image, key))
            .await
            .map_err(|_| self.timed_out())??;
        info!(
            content_id = %content_id,
            bytes = image.bytes.len(),
            width = image.width,
            height = image.height,
            endpoint = %self.endpoint,
            "Stored assembled image"
        );
        Ok(content_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::spawn_router;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    fn image() -> AssembledImage {
        AssembledImage {
            bytes: Bytes::from_static(b"BM fake"),
            width: 1,
            height: 2,
        }
    }

    async fn sink_for(router: Router, timeout: Duration) -> HttpImageSink {
        let addr = spawn_router(router).await;
        HttpImageSink::new(HttpSinkOptions {
            base_url: format!("http://{addr}/"),
            upload_path: "/api/bmp/upload".into(),
            id_field: "pictureId".into(),
            timeout,
        })
        .unwrap()
    }

    fn answering(status: StatusCode, body: &'static str) -> Router {
        Router::new().route("/api/bmp/upload", post(move || async move { (status, body) }))
    }

    #[test]
    fn extract_content_id_cases() {
        assert_eq!(
            extract_content_id(r#"{"message":"ok","pictureId":12}"#, "pictureId"),
            Some(ContentId(12))
        );
        assert_eq!(extract_content_id(r#"{"pictureId":"12"}"#, "pictureId"), None);
        assert_eq!(extract_content_id(r#"{"id":12}"#, "pictureId"), None);
        assert_eq!(extract_content_id("not json", "pictureId"), None);
    }

    #[tokio::test]
    async fn store_sends_body_and_key() {
        let seen: Arc<Mutex<Option<(String, Vec<u8>)>>> = Arc::default();
        let seen_in_handler = seen.clone();
        let router = Router::new().route(
            "/api/bmp/upload",
            post(move |headers: HeaderMap, body: Bytes| {
                let seen = seen_in_handler.clone();
                async move {
                    let key = headers["x-unique-id"].to_str().unwrap().to_string();
                    *seen.lock().unwrap() = Some((key, body.to_vec()));
                    (StatusCode::CREATED, r#"{"message":"stored","pictureId":31}"#)
                }
            }),
        );
        let sink = sink_for(router, Duration::from_secs(5)).await;

        let id = sink.store(&image(), "abc123").await.unwrap();

        assert_eq!(id, ContentId(31));
        let (key, body) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(key, "abc123");
        assert_eq!(body, b"BM fake");
    }

    #[tokio::test]
    async fn store_accepts_200() {
        let sink = sink_for(answering(StatusCode::OK, r#"{"pictureId":4}"#), Duration::from_secs(5)).await;
        assert_eq!(sink.store(&image(), "k").await.unwrap(), ContentId(4));
    }

    #[tokio::test]
    async fn non_success_status_is_error() {
        let sink = sink_for(
            answering(StatusCode::INTERNAL_SERVER_ERROR, "db down"),
            Duration::from_secs(5),
        )
        .await;
        match sink.store(&image(), "k").await.unwrap_err() {
            ForwardError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "db down");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_2xx_is_error() {
        let sink = sink_for(answering(StatusCode::ACCEPTED, r#"{"pictureId":4}"#), Duration::from_secs(5)).await;
        assert!(matches!(
            sink.store(&image(), "k").await,
            Err(ForwardError::Status { status: 202, .. })
        ));
    }

    #[tokio::test]
    async fn missing_id_is_error() {
        let sink = sink_for(answering(StatusCode::CREATED, r#"{"message":"ok"}"#), Duration::from_secs(5)).await;
        assert!(matches!(
            sink.store(&image(), "k").await,
            Err(ForwardError::MissingContentId { .. })
        ));
    }

    #[tokio::test]
    async fn slow_sink_times_out() {
        let router = Router::new().route(
            "/api/bmp/upload",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                r#"{"pictureId":1}"#
            }),
        );
        let sink = sink_for(router, Duration::from_millis(100)).await;
        assert!(matches!(
            sink.store(&image(), "k").await,
            Err(ForwardError::Timeout { timeout_ms: 100, .. })
        ));
    }

    #[tokio::test]
    async fn endpoint_joins_base_and_path() {
        let sink = HttpImageSink::new(HttpSinkOptions {
            base_url: "http://sink:3000/".into(),
            upload_path: "/api/bmp/upload".into(),
            id_field: "pictureId".into(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(sink.endpoint(), "http://sink:3000/api/bmp/upload");
    }
}

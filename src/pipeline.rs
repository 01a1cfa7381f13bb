//! Orchestration: one work message from decode to completion notification.
//!
//! ```text
//! payload ─► decode ─► partition ─┬─► TOP worker ────┐
//!                                 └─► BOTTOM worker ─┴─► assemble ─► store ─► notify
//! ```
//!
//! Both worker calls are issued before either is awaited and each carries its
//! own timeout. Nothing is forwarded unless both halves came back. If both
//! calls fail, the error names TOP.
//!
//! Every failure is classified as a [`PipelineError`]; the consumer loop logs
//! it with its [`kind`](PipelineError::kind) and moves to the next message.
//!
//! ## Redelivery
//!
//! Before any work the message key is looked up in the [`Ledger`]. A message
//! whose image is already stored is never processed again, but its
//! `NewImage:<id>` is always published, so every accepted message produces a
//! completion event.

use crate::broker::{BrokerError, Subscription};
use crate::imaging::{ImagingError, ReassemblyPolicy, RustBackend, ZoomPercent, assemble, partition};
use crate::ledger::{Ledger, LedgerEntry, message_key};
use crate::notifier::{Notifier, PublishError};
use crate::rpc::{RemoteCallError, ResizeClient};
use crate::storage::{ForwardError, ImageSink};
use crate::types::{AssembledImage, ContentId, ImageHalf, ResizeResult, Role, WorkItem};
use crate::work_item::{self, WorkItemError};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("malformed work item: {0}")]
    MalformedWorkItem(#[from] WorkItemError),
    #[error("image decode failed: {0}")]
    ImageDecode(String),
    #[error("image encode failed: {0}")]
    ImageEncode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{role} worker call failed: {source}")]
    WorkerCall {
        role: Role,
        #[source]
        source: RemoteCallError,
    },
    #[error("reassembly failed: {0}")]
    Reassembly(String),
    #[error("forward failed: {0}")]
    Forward(#[from] ForwardError),
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
}

impl PipelineError {
    /// Stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedWorkItem(_) => "malformed_work_item",
            PipelineError::ImageDecode(_) => "image_decode",
            PipelineError::ImageEncode(_) => "image_encode",
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::WorkerCall { .. } => "worker_call",
            PipelineError::Reassembly(_) => "reassembly",
            PipelineError::Forward(_) => "forward",
            PipelineError::Publish(_) => "publish",
        }
    }
}

impl From<ImagingError> for PipelineError {
    fn from(e: ImagingError) -> Self {
        match e {
            ImagingError::InvalidRequest(msg) => PipelineError::InvalidRequest(msg),
            ImagingError::Decode(msg) => PipelineError::ImageDecode(msg),
            ImagingError::Encode(msg) => PipelineError::ImageEncode(msg),
            mismatch @ ImagingError::WidthMismatch { .. } => {
                PipelineError::Reassembly(mismatch.to_string())
            }
        }
    }
}

/// What happened to a message that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Full pipeline ran; image stored and announced.
    Completed(ContentId),
    /// Stored earlier but the announcement failed; it was sent now.
    Republished(ContentId),
    /// Stored and announced earlier; announced again without reprocessing.
    Duplicate(ContentId),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub call_timeout: Duration,
    pub reassembly: ReassemblyPolicy,
    pub ledger_capacity: usize,
    pub ledger_path: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            reassembly: ReassemblyPolicy::default(),
            ledger_capacity: 10_000,
            ledger_path: None,
        }
    }
}

pub struct Orchestrator {
    backend: Arc<RustBackend>,
    top: Arc<dyn ResizeClient>,
    bottom: Arc<dyn ResizeClient>,
    sink: Arc<dyn ImageSink>,
    notifier: Notifier,
    settings: PipelineSettings,
    ledger: Mutex<Ledger>,
}

impl Orchestrator {
    pub fn new(
        top: Arc<dyn ResizeClient>,
        bottom: Arc<dyn ResizeClient>,
        sink: Arc<dyn ImageSink>,
        notifier: Notifier,
        settings: PipelineSettings,
    ) -> Self {
        let ledger = match &settings.ledger_path {
            Some(path) => Ledger::load(path, settings.ledger_capacity),
            None => Ledger::empty(settings.ledger_capacity),
        };
        if !ledger.is_empty() {
            info!(entries = ledger.len(), "Loaded idempotency ledger");
        }
        Self {
            backend: Arc::new(RustBackend::new()),
            top,
            bottom,
            sink,
            notifier,
            settings,
            ledger: Mutex::new(ledger),
        }
    }

    /// Consume work messages until shutdown or until the subscription ends.
    ///
    /// Messages are handled one at a time. No [`PipelineError`] stops the
    /// loop; a closed subscription does.
    pub async fn run(
        &self,
        mut subscription: Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        info!(topic = %subscription.topic(), "Orchestrator consuming work messages");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping orchestrator");
                        return Ok(());
                    }
                }
                message = subscription.next() => match message {
                    Some(payload) => {
                        if let Err(e) = self.handle_message(&payload).await {
                            error!(kind = e.kind(), error = %e, "Work message failed");
                        }
                    }
                    None => {
                        warn!(topic = %subscription.topic(), "Work stream ended");
                        return Err(BrokerError::Closed(subscription.topic().to_string()));
                    }
                },
            }
        }
    }

    /// Run one raw work message through the pipeline.
    pub async fn handle_message(&self, payload: &str) -> Result<Outcome, PipelineError> {
        let key = message_key(payload);
        let span = info_span!("work_message", key = %&key[..12]);
        self.handle_keyed(payload, &key).instrument(span).await
    }

    async fn handle_keyed(&self, payload: &str, key: &str) -> Result<Outcome, PipelineError> {
        let seen = self.ledger().get(key);
        if let Some(entry) = seen {
            return self.redeliver(key, entry).await;
        }
        let item = work_item::decode(payload)?;
        self.process(&item, key).await.map(Outcome::Completed)
    }

    async fn redeliver(&self, key: &str, entry: LedgerEntry) -> Result<Outcome, PipelineError> {
        if entry.notified {
            info!(content_id = %entry.content_id, "Duplicate message, re-announcing stored image");
        } else {
            info!(content_id = %entry.content_id, "Redelivered message, retrying publish only");
        }
        self.announce(key, entry.content_id).await?;
        Ok(if entry.notified {
            Outcome::Duplicate(entry.content_id)
        } else {
            Outcome::Republished(entry.content_id)
        })
    }

    /// Partition, fan out, reassemble, forward, notify.
    pub async fn process(&self, item: &WorkItem, key: &str) -> Result<ContentId, PipelineError> {
        let started = Instant::now();
        info!(zoom_percent = item.zoom.value(), bytes = item.image.len(), "Processing work item");

        let (top, bottom) = self.partition(item).await?;
        let (top, bottom) = self.fan_out(top, bottom, item.zoom).await?;
        let assembled = self.reassemble(top, bottom).await?;

        let content_id = self.sink.store(&assembled, key).await?;
        self.update_ledger(|ledger| ledger.record_stored(key, content_id));

        self.announce(key, content_id).await?;
        info!(
            content_id = %content_id,
            width = assembled.width,
            height = assembled.height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Work item completed"
        );
        Ok(content_id)
    }

    async fn partition(&self, item: &WorkItem) -> Result<(ImageHalf, ImageHalf), PipelineError> {
        let backend = self.backend.clone();
        let image = item.image.clone();
        let halves = tokio::task::spawn_blocking(move || partition(backend.as_ref(), &image))
            .await
            .map_err(|e| PipelineError::ImageEncode(format!("partition task panicked: {e}")))??;
        debug!(top_rows = halves.0.rows, bottom_rows = halves.1.rows, "Partitioned image");
        Ok(halves)
    }

    /// Resize both halves concurrently. Both must succeed.
    async fn fan_out(
        &self,
        top: ImageHalf,
        bottom: ImageHalf,
        zoom: ZoomPercent,
    ) -> Result<(ResizeResult, ResizeResult), PipelineError> {
        let (top, bottom) = tokio::join!(
            self.call_worker(self.top.as_ref(), top, zoom),
            self.call_worker(self.bottom.as_ref(), bottom, zoom),
        );
        Ok((top?, bottom?))
    }

    async fn call_worker(
        &self,
        client: &dyn ResizeClient,
        half: ImageHalf,
        zoom: ZoomPercent,
    ) -> Result<ResizeResult, PipelineError> {
        let role = half.role;
        let bytes_out = half.bytes.len();
        let started = Instant::now();
        let timeout = self.settings.call_timeout;

        let outcome = match tokio::time::timeout(timeout, client.zoom(half.bytes, zoom)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RemoteCallError::Timeout {
                endpoint: client.endpoint().to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(bytes) => {
                debug!(
                    role = role.as_str(),
                    endpoint = client.endpoint(),
                    bytes = bytes.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Worker call succeeded"
                );
                Ok(ResizeResult { bytes, role })
            }
            Err(source) => {
                warn!(
                    role = role.as_str(),
                    endpoint = client.endpoint(),
                    zoom_percent = zoom.value(),
                    bytes = bytes_out,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %source,
                    "Worker call failed"
                );
                Err(PipelineError::WorkerCall { role, source })
            }
        }
    }

    async fn reassemble(
        &self,
        top: ResizeResult,
        bottom: ResizeResult,
    ) -> Result<AssembledImage, PipelineError> {
        let backend = self.backend.clone();
        let policy = self.settings.reassembly;
        let assembled =
            tokio::task::spawn_blocking(move || assemble(backend.as_ref(), &top, &bottom, policy))
                .await
                .map_err(|e| PipelineError::ImageEncode(format!("assemble task panicked: {e}")))??;
        Ok(assembled)
    }

    async fn announce(&self, key: &str, content_id: ContentId) -> Result<(), PipelineError> {
        self.notifier.notify(content_id).await?;
        self.update_ledger(|ledger| ledger.mark_notified(key));
        Ok(())
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update_ledger(&self, change: impl FnOnce(&mut Ledger)) {
        let mut ledger = self.ledger();
        change(&mut ledger);
        if let Some(path) = &self.settings.ledger_path {
            if let Err(e) = ledger.save(path) {
                warn!(path = %path.display(), error = %e, "Failed to persist idempotency ledger");
            }
        }
    }
}

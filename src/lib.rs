//! # split-zoom
//!
//! A distributed image zoom pipeline. A producer publishes an image and a zoom
//! percentage on a broker topic; the orchestrator cuts the image into two
//! horizontal halves, has two resize workers scale them in parallel, stacks
//! the results back together, hands the image to a storage sink, and announces
//! the stored id. A push server relays that announcement to every connected
//! WebSocket client.
//!
//! # Architecture: Four Processes, One Binary
//!
//! ```text
//!  submit ──► [imageTopic] ──► orchestrator ──┬─► worker (TOP)    ─┐
//!                                             └─► worker (BOTTOM) ─┴─► storage sink
//!                                                        │
//!  browser ◄── push ◄── [imageNotifications] ◄───────────┘  NewImage:<id>
//! ```
//!
//! Each box is a subcommand of the same binary. They share one config file
//! and only talk over the broker and HTTP, so any of them can run on any host.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`work_item`] | `Image=<base64>;Zoom=<n>` message codec |
//! | [`imaging`] | Pure-Rust image operations: partition, zoom, assemble |
//! | [`rpc`] | Resize worker HTTP server and the client stub that calls it |
//! | [`pipeline`] | The orchestrator: fan-out, reassembly, forward, notify, consumer loop |
//! | [`storage`] | Forward of finished images to the storage sink |
//! | [`broker`] | Topic pub/sub over Redis, plus an in-memory broker |
//! | [`notifier`] | `NewImage:<id>` publisher and parser |
//! | [`registry`] | Set of live push subscribers with failure-isolating broadcast |
//! | [`push`] | WebSocket endpoint and the notification listener feeding the registry |
//! | [`ledger`] | Redelivery ledger keyed by message digest |
//! | [`config`] | Layered TOML configuration, validation, stock config |
//! | [`telemetry`] | `tracing` subscriber setup |
//! | [`types`] | Values passed between stages |
//!
//! # Design Decisions
//!
//! ## Halves Travel as PNG, Results Are Stored as BMP
//!
//! The halves and the worker results are re-encoded losslessly, so the
//! assembled image carries exactly the pixels the workers produced. The sink
//! stores BMP, so the final composition is encoded once, as BMP.
//!
//! ## Both Halves or Nothing
//!
//! The two worker calls run concurrently with independent timeouts, and the
//! pipeline waits for both. A single failure abandons the work item: a
//! half-zoomed image is never forwarded.
//!
//! ## At-Least-Once In, At-Most-Once Out
//!
//! The broker may deliver a work message more than once. The [`ledger`]
//! remembers what was stored and announced per message, so a redelivery only
//! redoes the step that didn't finish. A stored image is never processed
//! twice, but a repeated message is always answered with its `NewImage:<id>`.

pub mod broker;
pub mod config;
pub mod imaging;
pub mod ledger;
pub mod notifier;
pub mod pipeline;
pub mod push;
pub mod registry;
pub mod rpc;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod work_item;

#[cfg(test)]
pub(crate) mod test_helpers;

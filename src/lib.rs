//! # envtrack-ingest
//!
//! TCP ingestion endpoint for environmental monitoring stations.
//!
//! A station connects, identifies itself with `HELO <guid>`, announces and
//! uploads payload chunks with `SIZE`/`DATA` pairs and ends with `FINI`. The
//! server acknowledges each step with `ACK`/`NAK`, answers `FINI` with `FINI`
//! and closes. The accumulated payload of an authenticated station is then
//! handed to an ingestion callback.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//! TCP clients ──► │ Acceptor (live sessions) │
//!                 └────────────┬─────────────┘
//!                              │ one task per connection
//!                 ┌────────────▼─────────────┐     ┌─────────────────┐
//!                 │ StationSession           │ ──► │ StationRegistry │
//!                 │  FrameBuffer → Frame     │     └─────────────────┘
//!                 │  ProtocolStateMachine    │
//!                 │  DataBuffer              │
//!                 │  ReplyWriter → ACK/NAK   │
//!                 └────────────┬─────────────┘
//!                              │ (station_id, payload)
//!                 ┌────────────▼─────────────┐
//!                 │ PayloadHandler           │
//!                 └──────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use envtrack_ingest::{Acceptor, StaticStationRegistry};
//!
//! #[tokio::main]
//! async fn main() -> envtrack_ingest::Result<()> {
//!     let acceptor = Acceptor::builder()
//!         .station_registry(Arc::new(StaticStationRegistry::new(["1f0c0e1a"])))
//!         .on_payload(|station_id, payload| async move {
//!             tracing::info!(%station_id, bytes = payload.len(), "payload");
//!         })
//!         .bind("0.0.0.0:8787")
//!         .await?;
//!
//!     acceptor.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod writer;

mod acceptor;

pub use acceptor::{
    Acceptor, AcceptorBuilder, LiveSessionInfo, LiveSessions, DEFAULT_MAX_CONNECTIONS,
};
pub use buffer::DataBuffer;
pub use error::{IngestError, Result};
pub use handler::{PayloadHandler, PayloadRecord};
pub use registry::{JsonFileStationRegistry, StaticStationRegistry, StationRegistry};
pub use session::{Completion, ConnectionId, SessionConfig, SessionEnd, StationSession};

//! Handler module - delivery of finished station payloads.
//!
//! Provides:
//! - [`PayloadHandler`] - the ingestion callback the acceptor invokes
//! - [`FnPayloadHandler`] - adapter for async closures
//! - [`spawn_sink_task`] - JSON-lines sink decoupled through a channel
//!
//! # Example
//!
//! ```ignore
//! use envtrack_ingest::handler::spawn_sink_task;
//!
//! let (sink, sink_task) = spawn_sink_task(tokio::io::stdout(), 256);
//!
//! let acceptor = Acceptor::builder()
//!     .station_registry(registry)
//!     .payload_handler(Arc::new(sink))
//!     .bind("0.0.0.0:8787")
//!     .await?;
//! ```

mod callback;
mod sink;

pub use callback::{BoxFuture, FnPayloadHandler, PayloadHandler};
pub use sink::{spawn_sink_task, PayloadRecord, SinkHandle, DEFAULT_SINK_CAPACITY};

//! Ingestion callback invoked for every completed, authenticated session.
//!
//! The acceptor hands `(station_id, payload)` to a [`PayloadHandler`]. Any
//! async closure of the right shape can be used through [`FnPayloadHandler`].
//!
//! # Example
//!
//! ```ignore
//! use envtrack_ingest::handler::FnPayloadHandler;
//!
//! let handler = FnPayloadHandler::new(|station_id, payload| async move {
//!     tracing::info!(%station_id, bytes = payload.len(), "payload received");
//! });
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receiver of finished station payloads.
///
/// Called from the connection task that handled the station, after the
/// session has been removed from the live registry. Implementations that do
/// slow work should hand it off instead of holding the connection task.
pub trait PayloadHandler: Send + Sync + 'static {
    fn on_station_payload(&self, station_id: String, payload: Bytes) -> BoxFuture<'static, ()>;
}

/// Adapter turning an async closure into a [`PayloadHandler`].
pub struct FnPayloadHandler<F, Fut>
where
    F: Fn(String, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnPayloadHandler<F, Fut>
where
    F: Fn(String, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> PayloadHandler for FnPayloadHandler<F, Fut>
where
    F: Fn(String, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_station_payload(&self, station_id: String, payload: Bytes) -> BoxFuture<'static, ()> {
        Box::pin((self.handler)(station_id, payload))
    }
}

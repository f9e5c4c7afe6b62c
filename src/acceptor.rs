//! Connection acceptor and runtime loop.
//!
//! The [`AcceptorBuilder`] collects the collaborators (station registry,
//! ingestion callback) and limits, then binds the listener. The
//! [`Acceptor`] manages the lifecycle:
//! 1. Accept a TCP connection
//! 2. Assign the next connection id and register the live session
//! 3. Run the station session on its own task
//! 4. On termination, retire the session and hand the payload over
//!
//! # Example
//!
//! ```ignore
//! use envtrack_ingest::{Acceptor, StaticStationRegistry};
//!
//! #[tokio::main]
//! async fn main() -> envtrack_ingest::Result<()> {
//!     let acceptor = Acceptor::builder()
//!         .station_registry(Arc::new(StaticStationRegistry::new(["1f0c..."])))
//!         .on_payload(|station_id, payload| async move {
//!             println!("{station_id}: {} bytes", payload.len());
//!         })
//!         .bind("0.0.0.0:8787")
//!         .await?;
//!
//!     acceptor.run().await
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;

use crate::error::{IngestError, Result};
use crate::handler::{FnPayloadHandler, PayloadHandler};
use crate::protocol::max_frame_len_for;
use crate::registry::StationRegistry;
use crate::session::{ConnectionId, SessionConfig, SessionEnd, StationSession};

/// Default maximum concurrently live sessions.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Pause after a failed accept before polling the listener again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Builder for configuring and binding an [`Acceptor`].
pub struct AcceptorBuilder {
    registry: Option<Arc<dyn StationRegistry>>,
    handler: Option<Arc<dyn PayloadHandler>>,
    session: SessionConfig,
    /// Set once the frame limit was chosen by the caller.
    frame_len_pinned: bool,
    max_connections: usize,
}

impl AcceptorBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            handler: None,
            session: SessionConfig::default(),
            frame_len_pinned: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Registry consulted on every `HELO`. Required.
    pub fn station_registry(mut self, registry: Arc<dyn StationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Ingestion callback for completed, authenticated sessions. Required.
    pub fn payload_handler(mut self, handler: Arc<dyn PayloadHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Use an async closure as the ingestion callback.
    pub fn on_payload<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(String, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.payload_handler(Arc::new(FnPayloadHandler::new(handler)))
    }

    /// Replace all per-session limits at once.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self.frame_len_pinned = true;
        self
    }

    /// Receive buffer capacity per session.
    ///
    /// Unless [`max_frame_len`](Self::max_frame_len) was set, the frame
    /// limit follows the capacity so any acknowledged DATA line still fits.
    ///
    /// Default: 4096
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.session.buffer_capacity = capacity;
        if !self.frame_len_pinned {
            self.session.max_frame_len = max_frame_len_for(capacity);
        }
        self
    }

    /// Default: 30 seconds
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.session.idle_timeout = timeout;
        self
    }

    /// Time from accept within which a station must send a valid `HELO`,
    /// however much else it sends.
    ///
    /// Default: 30 seconds
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.session.auth_timeout = timeout;
        self
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.session.max_frame_len = len;
        self.frame_len_pinned = true;
        self
    }

    /// Maximum concurrently live sessions. Connections over the limit are
    /// closed right after accept.
    ///
    /// Default: 1024
    pub fn max_connections(mut self, limit: usize) -> Self {
        self.max_connections = limit;
        self
    }

    /// Bind the listener.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<Acceptor> {
        let registry = self
            .registry
            .ok_or_else(|| IngestError::Config("station registry not set".into()))?;
        let handler = self
            .handler
            .ok_or_else(|| IngestError::Config("payload handler not set".into()))?;

        if self.max_connections == 0 {
            return Err(IngestError::Config("max_connections must be at least 1".into()));
        }

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening for stations on {}", listener.local_addr()?);

        Ok(Acceptor {
            listener,
            registry,
            handler,
            session: self.session,
            limit: Arc::new(Semaphore::new(self.max_connections)),
            live: LiveSessions::default(),
            next_id: 0,
        })
    }
}

impl Default for AcceptorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct LiveEntry {
    peer: SocketAddr,
    connected_at: Instant,
    abort: AbortHandle,
}

/// Snapshot of one live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveSessionInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub connected_at: Instant,
}

/// Shared registry of sessions currently being served.
///
/// Sessions are added on accept and removed when they end, whichever way
/// they end.
#[derive(Clone, Default)]
pub struct LiveSessions {
    inner: Arc<Mutex<HashMap<ConnectionId, LiveEntry>>>,
}

impl LiveSessions {
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.lock().contains_key(&id)
    }

    /// Ids of live sessions in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.inner.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn get(&self, id: ConnectionId) -> Option<LiveSessionInfo> {
        self.inner.lock().get(&id).map(|entry| LiveSessionInfo {
            id,
            peer: entry.peer,
            connected_at: entry.connected_at,
        })
    }

    fn remove(&self, id: ConnectionId) {
        self.inner.lock().remove(&id);
    }

    fn abort_all(&self) -> usize {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        for (_, entry) in &drained {
            entry.abort.abort();
        }
        drained.len()
    }
}

/// A bound station listener.
pub struct Acceptor {
    listener: TcpListener,
    registry: Arc<dyn StationRegistry>,
    handler: Arc<dyn PayloadHandler>,
    session: SessionConfig,
    limit: Arc<Semaphore>,
    live: LiveSessions,
    next_id: ConnectionId,
}

impl Acceptor {
    pub fn builder() -> AcceptorBuilder {
        AcceptorBuilder::new()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle onto the live-session registry, usable after `run` consumed
    /// the acceptor.
    pub fn live_sessions(&self) -> LiveSessions {
        self.live.clone()
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves, then abort every live
    /// session and return.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(stream, peer),
                    Err(e) => pause_after_accept_error(&e).await,
                },
            }
        }

        let aborted = self.live.abort_all();
        tracing::info!(aborted, "Acceptor stopped");
        Ok(())
    }

    /// Start a session for an accepted connection.
    fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) {
        let permit = match self.limit.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(%peer, "Connection limit reached, closing connection");
                return;
            }
        };

        let id = self.next_id;
        self.next_id += 1;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(connection_id = id, "Cannot set TCP_NODELAY: {}", e);
        }

        tracing::info!(connection_id = id, %peer, "Station connected");

        let session = StationSession::new(id, self.session.clone(), self.registry.clone());
        let task = serve(session, stream, self.handler.clone(), self.live.clone(), permit);

        // Held across spawn so the task cannot retire itself before it is registered.
        let mut live = self.live.inner.lock();
        let handle = tokio::spawn(task);
        live.insert(
            id,
            LiveEntry {
                peer,
                connected_at: Instant::now(),
                abort: handle.abort_handle(),
            },
        );
    }
}

/// Log a failed accept and back off so a persistent failure (descriptor
/// exhaustion) does not spin the loop.
async fn pause_after_accept_error(e: &std::io::Error) {
    tracing::error!("Accept failed: {}", e);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Per-connection task: run the session, retire it, deliver the payload.
async fn serve(
    session: StationSession,
    stream: TcpStream,
    handler: Arc<dyn PayloadHandler>,
    live: LiveSessions,
    permit: OwnedSemaphorePermit,
) {
    let id = session.id();

    let result = session.run(stream).await;
    live.remove(id);
    // Slot is free once the session is retired, before the hand-off
    drop(permit);

    match result {
        Ok(SessionEnd::Finished(completion)) if completion.authenticated => {
            tracing::info!(
                connection_id = id,
                station_id = %completion.station_id,
                bytes = completion.payload.len(),
                "Station transmission complete"
            );
            handler
                .on_station_payload(completion.station_id, completion.payload)
                .await;
        }
        Ok(SessionEnd::Finished(_)) => {
            tracing::info!(connection_id = id, "Unauthenticated connection terminated");
        }
        Ok(SessionEnd::PeerClosed) => {
            tracing::info!(connection_id = id, "Station disconnected before FINI");
        }
        Ok(SessionEnd::IdleTimeout) => {
            tracing::info!(connection_id = id, "Idle connection closed");
        }
        Ok(SessionEnd::AuthTimeout) => {
            tracing::info!(connection_id = id, "Connection closed without authentication");
        }
        Err(e) => {
            tracing::warn!(connection_id = id, "Session error: {}", e);
        }
    }
}

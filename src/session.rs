//! Station session: one TCP connection from HELO to FINI.
//!
//! A session owns its connection, its [`ProtocolStateMachine`] and its
//! [`DataBuffer`]. Frames are handled strictly one at a time; the replies a
//! frame produces are flushed before the next frame is read.
//!
//! ```text
//! STATION   =>  HELO <STATION_GUID>   => SERVER
//! SERVER    =>  ACK                   => STATION
//! STATION   =>  SIZE <BYTE_COUNT>     => SERVER
//! SERVER    =>  ACK | NAK             => STATION
//! STATION   =>  DATA <PAYLOAD>        => SERVER
//! SERVER    =>  ACK | NAK             => STATION
//! STATION   =>  FINI                  => SERVER
//! SERVER    =>  FINI, close           => STATION
//! ```
//!
//! SIZE/DATA may repeat to append several chunks to the buffer before FINI.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::Instant;

use crate::buffer::{DataBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::error::Result;
use crate::protocol::{
    Command, Frame, FrameBuffer, ProtocolAction, ProtocolHandler, ProtocolStateMachine, Reply,
    ServerState, DEFAULT_MAX_FRAME_LEN,
};
use crate::registry::StationRegistry;
use crate::writer::ReplyWriter;

/// Monotonic identifier assigned by the acceptor.
pub type ConnectionId = u64;

/// Default idle timeout between frames (and before HELO).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline, counted from accept, for a successful HELO.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of trailing marker bytes cut from the payload.
pub const DEFAULT_PAYLOAD_TRAILER_LEN: usize = 2;

/// Size of a single socket read.
const READ_CHUNK_SIZE: usize = 4096;

/// Per-session limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Capacity of the receive buffer.
    pub buffer_capacity: usize,
    /// Longest silence tolerated before the connection is dropped.
    pub idle_timeout: Duration,
    /// Time from accept within which the station must authenticate.
    pub auth_timeout: Duration,
    /// Longest accepted frame, delimiter included.
    pub max_frame_len: usize,
    /// Bytes removed from the end of the accumulated payload on completion.
    pub payload_trailer_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            payload_trailer_len: DEFAULT_PAYLOAD_TRAILER_LEN,
        }
    }
}

/// Completion event emitted when a session reaches `Finish`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub connection_id: ConnectionId,
    /// Empty if the station never authenticated.
    pub station_id: String,
    pub authenticated: bool,
    pub payload: Bytes,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// `Finish` was reached (FINI or the unauthenticated guard).
    Finished(Completion),
    /// The peer closed the connection first.
    PeerClosed,
    /// No frame arrived within the idle timeout.
    IdleTimeout,
    /// No successful HELO within the authentication deadline.
    AuthTimeout,
}

/// Side effects queued by the state machine while handling one frame.
#[derive(Debug, Default)]
pub struct ReplyQueue {
    replies: Vec<Reply>,
    finish_requested: bool,
}

impl ReplyQueue {
    pub fn replies(&self) -> &[Reply] {
        &self.replies
    }

    pub fn finish_requested(&self) -> bool {
        self.finish_requested
    }

    fn push(&mut self, reply: Reply) {
        self.replies.push(reply);
    }

    fn request_finish(&mut self) {
        self.finish_requested = true;
    }

    fn take(&mut self) -> Vec<Reply> {
        std::mem::take(&mut self.replies)
    }
}

impl ProtocolHandler for ReplyQueue {
    fn on_send_ack(&mut self) {
        self.push(Reply::Ack);
    }

    fn on_send_nak(&mut self) {
        self.push(Reply::Nak);
    }

    fn on_receive_fini(&mut self) {
        self.request_finish();
    }
}

/// Server-side state of one station connection.
pub struct StationSession {
    id: ConnectionId,
    config: SessionConfig,
    protocol: ProtocolStateMachine<ReplyQueue>,
    buffer: DataBuffer,
    authenticated: bool,
    station_id: String,
    /// Size agreed by the last acknowledged SIZE, consumed by the next DATA.
    pending_size: Option<usize>,
    registry: Arc<dyn StationRegistry>,
}

impl StationSession {
    pub fn new(id: ConnectionId, config: SessionConfig, registry: Arc<dyn StationRegistry>) -> Self {
        Self {
            id,
            buffer: DataBuffer::new(config.buffer_capacity),
            config,
            protocol: ProtocolStateMachine::new(ReplyQueue::default()),
            authenticated: false,
            station_id: String::new(),
            pending_size: None,
            registry,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> ServerState {
        self.protocol.state()
    }

    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    #[inline]
    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    #[inline]
    pub fn pending_size(&self) -> Option<usize> {
        self.pending_size
    }

    #[inline]
    pub fn buffer(&self) -> &DataBuffer {
        &self.buffer
    }

    /// Whether `Finish` has been requested.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.protocol.handler().finish_requested()
    }

    /// Drain the replies queued since the last call.
    pub fn take_replies(&mut self) -> Vec<Reply> {
        self.protocol.handler_mut().take()
    }

    /// Completion event for the current buffer contents.
    ///
    /// The payload is the written data minus the trailing marker.
    pub fn completion(&self) -> Completion {
        let written = self.buffer.written_data();
        let end = written.len().saturating_sub(self.config.payload_trailer_len);

        Completion {
            connection_id: self.id,
            station_id: self.station_id.clone(),
            authenticated: self.authenticated,
            payload: Bytes::copy_from_slice(&written[..end]),
        }
    }

    /// Interpret one inbound frame.
    ///
    /// Protocol violations are answered or logged here and never returned as
    /// errors. After the call, [`take_replies`](Self::take_replies) yields
    /// the frames to send and [`is_finished`](Self::is_finished) tells
    /// whether the connection must be terminated.
    pub async fn handle_frame(&mut self, frame: &Frame) {
        if self.is_finished() {
            tracing::debug!(connection_id = self.id, "Ignoring frame after finish");
            return;
        }

        tracing::trace!(connection_id = self.id, command = %frame.command, "Frame received");

        match &frame.command {
            Command::Helo => self.handle_helo(frame.param()).await,
            Command::Size => self.handle_size(frame.param()),
            Command::Data => self.handle_data(frame),
            Command::Fini => self.handle_fini(),
            Command::Unknown(token) => self.handle_unknown(token),
        }
    }

    async fn handle_helo(&mut self, guid: &str) {
        if self.raise(ProtocolAction::ReceiveHelo).is_err() {
            // Already past the handshake; no re-authentication.
            self.protocol.handler_mut().push(Reply::Nak);
            return;
        }

        let known = match self.registry.exists(guid).await {
            Ok(known) => known,
            Err(e) => {
                tracing::error!(connection_id = self.id, "Station lookup failed: {}", e);
                false
            }
        };

        if !known {
            tracing::warn!(connection_id = self.id, station_id = guid, "Client failed to authenticate.");
            self.authenticated = false;
            self.station_id.clear();
            self.guard_endpoint();
            return;
        }

        self.authenticated = true;
        self.station_id = guid.to_string();
        tracing::info!(connection_id = self.id, station_id = guid, "Station authenticated");

        self.advance(ProtocolAction::SendAck);
    }

    fn handle_size(&mut self, param: &str) {
        if !self.guard_endpoint() {
            return;
        }

        self.advance(ProtocolAction::ReceiveSize);

        let wanted = param.trim().parse::<usize>().ok();
        match wanted {
            Some(size) if self.buffer.can_write(size) => {
                self.pending_size = Some(size);
                self.advance(ProtocolAction::SendAck);
            }
            _ => {
                self.pending_size = None;
                tracing::debug!(
                    connection_id = self.id,
                    requested = param,
                    remaining = self.buffer.remaining(),
                    "Refusing SIZE"
                );
                self.advance(ProtocolAction::SendNak);
            }
        }
    }

    fn handle_data(&mut self, frame: &Frame) {
        if !self.guard_endpoint() {
            return;
        }

        self.advance(ProtocolAction::ReceiveData);

        let negotiated = self.pending_size.take();
        let param_len = frame.param_len();

        if negotiated != Some(param_len) {
            tracing::debug!(
                connection_id = self.id,
                negotiated = ?negotiated,
                received = param_len,
                "DATA length does not match negotiated SIZE"
            );
            self.advance(ProtocolAction::SendNak);
            return;
        }

        if let Err(e) = self.buffer.write(frame.param().as_bytes()) {
            tracing::error!(connection_id = self.id, "Rejecting DATA: {}", e);
            self.advance(ProtocolAction::SendNak);
            return;
        }

        self.advance(ProtocolAction::SendAck);
    }

    fn handle_fini(&mut self) {
        if !self.guard_endpoint() {
            return;
        }

        self.advance(ProtocolAction::ReceiveFini);
    }

    fn handle_unknown(&mut self, token: &str) {
        tracing::warn!(connection_id = self.id, command = token, "Unknown command");

        if self.raise(ProtocolAction::SendNak).is_err() {
            // Out of sequence for the table, but the station still gets an answer.
            self.protocol.handler_mut().push(Reply::Nak);
        }
    }

    /// Terminate unauthenticated clients. Returns true if processing may go on.
    fn guard_endpoint(&mut self) -> bool {
        if self.authenticated {
            return true;
        }

        tracing::warn!(connection_id = self.id, "Terminating connection with unauthenticated client.");
        self.finish();
        false
    }

    fn finish(&mut self) {
        self.protocol.handler_mut().request_finish();
    }

    fn raise(&mut self, action: ProtocolAction) -> Result<ServerState> {
        self.protocol.handle_action(action)
    }

    /// Raise an action the table allows at this point of the exchange.
    fn advance(&mut self, action: ProtocolAction) {
        if let Err(e) = self.raise(action) {
            tracing::error!(connection_id = self.id, "Session out of sync with protocol table: {}", e);
        }
    }

    /// Instant the next read must complete by.
    fn read_deadline(&self, auth_deadline: Instant) -> Instant {
        let idle_deadline = Instant::now() + self.config.idle_timeout;
        if self.authenticated {
            idle_deadline
        } else {
            idle_deadline.min(auth_deadline)
        }
    }

    /// Drive the session over `stream` until it ends.
    ///
    /// # Errors
    ///
    /// Transport failures and oversized frames end the session with an error;
    /// no completion is produced in that case.
    pub async fn run<S>(mut self, stream: S) -> Result<SessionEnd>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        let mut writer = ReplyWriter::new(writer);
        let mut frames = FrameBuffer::with_max_frame_len(self.config.max_frame_len);
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let auth_deadline = Instant::now() + self.config.auth_timeout;

        loop {
            let deadline = self.read_deadline(auth_deadline);
            let n = match tokio::time::timeout_at(deadline, reader.read(&mut buf)).await {
                Err(_) => {
                    let _ = writer.close().await;

                    if !self.authenticated && Instant::now() >= auth_deadline {
                        tracing::warn!(
                            connection_id = self.id,
                            "No HELO within {:?}",
                            self.config.auth_timeout
                        );
                        return Ok(SessionEnd::AuthTimeout);
                    }

                    tracing::warn!(
                        connection_id = self.id,
                        station_id = %self.station_id,
                        "Idle timeout after {:?}",
                        self.config.idle_timeout
                    );
                    return Ok(SessionEnd::IdleTimeout);
                }
                Ok(Ok(0)) => return Ok(SessionEnd::PeerClosed),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.into()),
            };

            for frame in frames.push(&buf[..n])? {
                self.handle_frame(&frame).await;

                let replies = self.take_replies();
                writer.write_replies(&replies).await?;

                if self.is_finished() {
                    if let Err(e) = writer.finish().await {
                        tracing::debug!(connection_id = self.id, "FINI not delivered: {}", e);
                    }
                    return Ok(SessionEnd::Finished(self.completion()));
                }
            }
        }
    }
}

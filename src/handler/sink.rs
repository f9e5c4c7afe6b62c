//! Dedicated sink task that serialises station payloads as JSON lines.
//!
//! Connection tasks never wait on the downstream consumer: they push a
//! [`PayloadRecord`] into a bounded mpsc channel and return, and a single
//! task drains the channel into any `AsyncWrite` (stdout in the binary).
//!
//! ```text
//! Session 1 ─┐
//! Session 2 ─┼─► mpsc::Sender<PayloadRecord> ─► Sink Task ─► stdout (one JSON object per line)
//! Session N ─┘
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{BoxFuture, PayloadHandler};
use crate::error::{IngestError, Result};

/// Default channel capacity.
pub const DEFAULT_SINK_CAPACITY: usize = 256;

/// One finished station transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRecord {
    pub station_id: String,
    /// Milliseconds since the Unix epoch at hand-off.
    pub received_at_ms: u64,
    /// Payload length in bytes.
    pub length: usize,
    /// Payload as text, invalid UTF-8 replaced.
    pub payload: String,
}

impl PayloadRecord {
    pub fn new(station_id: String, payload: &[u8]) -> Self {
        let received_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            station_id,
            received_at_ms,
            length: payload.len(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

/// Handle for sending records to the sink task.
///
/// Cheaply cloneable; the task stops once every handle is dropped.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<PayloadRecord>,
}

impl SinkHandle {
    /// Queue a record, waiting for channel capacity.
    pub async fn send(&self, record: PayloadRecord) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| IngestError::ConnectionClosed)
    }
}

impl PayloadHandler for SinkHandle {
    fn on_station_payload(&self, station_id: String, payload: Bytes) -> BoxFuture<'static, ()> {
        let sink = self.clone();
        Box::pin(async move {
            let record = PayloadRecord::new(station_id, &payload);
            if let Err(e) = sink.send(record).await {
                tracing::error!("Dropping payload, sink is gone: {}", e);
            }
        })
    }
}

/// Spawn the sink task and return a handle for sending records.
pub fn spawn_sink_task<W>(writer: W, capacity: usize) -> (SinkHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(sink_loop(rx, writer));

    (SinkHandle { tx }, task)
}

/// Receive records and write them out, one JSON document per line.
async fn sink_loop<W>(mut rx: mpsc::Receiver<PayloadRecord>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(record) = rx.recv().await {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        writer.write_all(&line).await?;
        writer.flush().await?;

        tracing::debug!(
            station_id = %record.station_id,
            bytes = record.length,
            "Payload written to sink"
        );
    }

    Ok(())
}

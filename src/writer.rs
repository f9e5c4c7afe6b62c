//! Reply writer for the station side of a connection.
//!
//! Replies produced while handling one inbound frame are written as a single
//! batch with scatter/gather I/O (`write_vectored`) and flushed before the
//! next frame is read, which keeps the conversation strictly half-duplex.
//!
//! ```text
//! handle_frame ─► [Reply, ..] ─► ReplyWriter ─► socket write half
//! ```

use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{IngestError, Result};
use crate::protocol::Reply;

/// Writes reply frames to the write half of a station connection.
pub struct ReplyWriter<W> {
    inner: W,
    /// Total bytes written so far.
    bytes_written: u64,
}

impl<W> ReplyWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    /// Write and flush a batch of replies.
    ///
    /// An empty batch is a no-op.
    pub async fn write_replies(&mut self, replies: &[Reply]) -> Result<()> {
        write_batch(&mut self.inner, replies).await?;
        self.bytes_written += replies.iter().map(|r| r.encoded_len() as u64).sum::<u64>();
        Ok(())
    }

    /// Send the terminal `FINI` frame and shut down the write half.
    pub async fn finish(&mut self) -> Result<()> {
        self.write_replies(&[Reply::Fini]).await?;
        self.close().await
    }

    /// Shut down the write half without sending anything.
    pub async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Write a batch of replies using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[Reply]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let slices: Vec<IoSlice<'_>> = batch.iter().map(|r| IoSlice::new(r.as_bytes())).collect();
    let total_size: usize = batch.iter().map(|r| r.encoded_len()).sum();

    // Fast path: the whole batch usually fits in one call
    let mut total_written = writer.write_vectored(&slices).await?;

    while total_written < total_size {
        if total_written == 0 {
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        let remaining = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&remaining).await?;
        if written == 0 {
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after a partial write.
fn build_remaining_slices(batch: &[Reply], skip_bytes: usize) -> Vec<IoSlice<'static>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut skipped = 0;

    for reply in batch {
        let bytes = reply.as_bytes();
        let start = skipped;
        let end = skipped + bytes.len();

        if skip_bytes < end {
            let start_in_reply = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&bytes[start_in_reply..]));
        }
        skipped = end;
    }

    slices
}

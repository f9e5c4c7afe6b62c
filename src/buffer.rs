//! Bounded receive buffer for station payloads.
//!
//! Every session owns exactly one [`DataBuffer`] whose capacity is fixed at
//! construction. Writes that would move the cursor past the capacity are
//! refused, so a misbehaving station can never grow server memory.

use crate::error::{IngestError, Result};

/// Default payload capacity per session (4 KiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Fixed-capacity byte store with a write cursor.
///
/// Invariant: `0 <= cursor <= capacity`.
#[derive(Debug)]
pub struct DataBuffer {
    data: Box<[u8]>,
    cursor: usize,
}

impl DataBuffer {
    /// Create a zeroed buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            cursor: 0,
        }
    }

    /// True iff `length >= 1` and `cursor + length <= capacity`.
    #[inline]
    pub fn can_write(&self, length: usize) -> bool {
        length >= 1 && length <= self.remaining()
    }

    /// Copy `data` into the buffer at the cursor and advance it.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Capacity`] if [`can_write`](Self::can_write)
    /// is false for `data.len()`. The buffer is untouched on failure.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let length = data.len();
        if !self.can_write(length) {
            return Err(IngestError::Capacity {
                requested: length,
                remaining: self.remaining(),
            });
        }

        let end = self.cursor + length;
        self.data[self.cursor..end].copy_from_slice(data);
        self.cursor = end;
        Ok(())
    }

    /// Bytes in `[0, cursor)`.
    #[inline]
    pub fn written_data(&self) -> &[u8] {
        &self.data[..self.cursor]
    }

    /// Current write cursor.
    #[inline]
    pub fn len(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes still available before the buffer is full.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }
}

impl Default for DataBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

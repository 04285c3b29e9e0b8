// SPDX-License-Identifier: GPL-3.0-only

//! Output buffer descriptors exchanged across the fill protocol.
//!
//! A descriptor's payload region is owned by exactly one side at a time:
//! by the core between a fill request and its fill-done notification, by the
//! orchestrator otherwise. The mutex enforces exclusive access; honoring the
//! hand-off points is the callers' part of the contract.

use std::sync::Mutex;

/// Payload flags reported with a filled buffer.
pub mod buffer_flags {
    /// Last buffer of the stream
    pub const END_OF_STREAM: u32 = 0x1;
    /// Buffer ends on a frame boundary
    pub const END_OF_FRAME: u32 = 0x10;
    /// Buffer holds a sync (key) frame
    pub const SYNC_FRAME: u32 = 0x20;
    /// Buffer holds codec setup data rather than picture data
    pub const CODEC_CONFIG: u32 = 0x80;
}

/// Metadata describing the valid payload of a filled buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferMeta {
    /// Number of valid payload bytes
    pub filled_len: usize,
    /// Byte offset of the valid payload within the buffer
    pub offset: usize,
    /// Presentation timestamp in microseconds
    pub timestamp_us: i64,
    /// Bitwise OR of [`buffer_flags`] values
    pub flags: u32,
}

struct Payload {
    data: Vec<u8>,
    meta: BufferMeta,
}

/// An allocated output buffer for a non-tunneled port.
pub struct OutputBuffer {
    port: u32,
    payload: Mutex<Payload>,
}

impl OutputBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes for `port`.
    pub fn new(port: u32, capacity: usize) -> Self {
        Self {
            port,
            payload: Mutex::new(Payload {
                data: vec![0; capacity],
                meta: BufferMeta::default(),
            }),
        }
    }

    /// Port the buffer was allocated on.
    pub fn port(&self) -> u32 {
        self.port
    }

    pub fn capacity(&self) -> usize {
        self.payload
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .data
            .len()
    }

    /// Write a payload into the buffer. Core side of the fill protocol;
    /// called only between a fill request and its fill-done notification.
    /// Payloads larger than the buffer are truncated.
    pub fn fill(&self, bytes: &[u8], timestamp_us: i64, flags: u32) {
        let mut payload = self.payload.lock().unwrap_or_else(|e| e.into_inner());
        let len = bytes.len().min(payload.data.len());
        payload.data[..len].copy_from_slice(&bytes[..len]);
        payload.meta = BufferMeta {
            filled_len: len,
            offset: 0,
            timestamp_us,
            flags,
        };
    }

    /// Read the valid payload range. Orchestrator side of the fill protocol;
    /// called only after the fill-done notification was consumed.
    pub fn with_payload<R>(&self, f: impl FnOnce(&[u8], BufferMeta) -> R) -> R {
        let payload = self.payload.lock().unwrap_or_else(|e| e.into_inner());
        let meta = payload.meta;
        let end = (meta.offset + meta.filled_len).min(payload.data.len());
        f(&payload.data[meta.offset..end], meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_then_read_valid_range() {
        let buffer = OutputBuffer::new(201, 16);
        buffer.fill(b"abcdef", 42, buffer_flags::SYNC_FRAME);

        buffer.with_payload(|bytes, meta| {
            assert_eq!(bytes, b"abcdef");
            assert_eq!(meta.filled_len, 6);
            assert_eq!(meta.offset, 0);
            assert_eq!(meta.timestamp_us, 42);
            assert_eq!(meta.flags, buffer_flags::SYNC_FRAME);
        });
    }

    #[test]
    fn oversized_payload_is_truncated() {
        let buffer = OutputBuffer::new(201, 4);
        buffer.fill(b"abcdef", 0, 0);
        buffer.with_payload(|bytes, meta| {
            assert_eq!(bytes, b"abcd");
            assert_eq!(meta.filled_len, 4);
        });
    }

    #[test]
    fn empty_fill_yields_empty_range() {
        let buffer = OutputBuffer::new(201, 8);
        buffer.fill(b"", 0, 0);
        buffer.with_payload(|bytes, _| assert!(bytes.is_empty()));
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Destinations for the encoded stream.

use crate::core::BufferMeta;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Receives encoded payloads in presentation order.
pub trait StreamSink: Send {
    /// Write one payload. `payload` is exactly the valid range the encoder
    /// reported; codec setup data arrives through the same path as frames.
    fn write(&mut self, payload: &[u8], meta: BufferMeta) -> io::Result<()>;

    /// Flush buffered data once the capture loop has stopped.
    fn finish(&mut self) -> io::Result<()>;
}

/// Writes the raw Annex-B stream to a file.
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    bytes_written: u64,
}

impl FileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl StreamSink for FileSink {
    fn write(&mut self, payload: &[u8], _meta: BufferMeta) -> io::Result<()> {
        self.writer.write_all(payload)?;
        self.bytes_written += payload.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        info!(
            path = %self.path.display(),
            bytes = self.bytes_written,
            "stream file finished"
        );
        Ok(())
    }
}

/// Accumulates the stream in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    data: Vec<u8>,
    payloads: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of payloads written, codec setup data included.
    pub fn payload_count(&self) -> usize {
        self.payloads
    }
}

impl StreamSink for MemorySink {
    fn write(&mut self, payload: &[u8], _meta: BufferMeta) -> io::Result<()> {
        self.data.extend_from_slice(payload);
        self.payloads += 1;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_counts_bytes() {
        let dir = std::env::temp_dir().join("omxcam-sink-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.h264");

        let mut sink = FileSink::create(&path).unwrap();
        sink.write(&[0, 0, 0, 1, 0x67], BufferMeta::default()).unwrap();
        sink.write(&[0, 0, 0, 1, 0x65], BufferMeta::default()).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.bytes_written(), 10);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 10);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn memory_sink_concatenates_payloads() {
        let mut sink = MemorySink::new();
        sink.write(b"ab", BufferMeta::default()).unwrap();
        sink.write(b"cd", BufferMeta::default()).unwrap();
        assert_eq!(sink.bytes(), b"abcd");
        assert_eq!(sink.payload_count(), 2);
    }
}

//! Raw byte sinks
//!
//! The parser hands every consumed command (id byte plus payload) to a sink
//! exactly once, in arrival order. Sinks are append-only: nothing here ever
//! reads back or seeks. Durable persistence lives outside this crate and
//! plugs in through [`ByteSink`].

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

/// Append-only destination for a source's command bytes
pub trait ByteSink: Send + Sync {
    /// A handshake was seen; the bytes that follow belong to a new match
    fn begin_match(&self, _source: &str) {}

    /// Append one complete command
    fn append(&self, source: &str, bytes: &[u8]);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ByteSink for NullSink {
    fn append(&self, _source: &str, _bytes: &[u8]) {}
}

#[derive(Debug, Default)]
struct Capture {
    data: BytesMut,
    /// Offsets into `data` where each match began
    match_starts: Vec<usize>,
}

/// In-memory capture, one growing buffer per source
#[derive(Debug, Default)]
pub struct MemorySink {
    captures: Mutex<HashMap<String, Capture>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended for `source` so far
    pub fn contents(&self, source: &str) -> Bytes {
        self.captures
            .lock()
            .get(source)
            .map(|c| Bytes::copy_from_slice(&c.data))
            .unwrap_or_default()
    }

    /// Bytes of the most recent match for `source`
    pub fn current_match(&self, source: &str) -> Bytes {
        let captures = self.captures.lock();
        match captures.get(source) {
            Some(c) => {
                let start = c.match_starts.last().copied().unwrap_or(0);
                Bytes::copy_from_slice(&c.data[start..])
            }
            None => Bytes::new(),
        }
    }

    /// Number of matches begun on `source`
    pub fn match_count(&self, source: &str) -> usize {
        self.captures
            .lock()
            .get(source)
            .map_or(0, |c| c.match_starts.len())
    }
}

impl ByteSink for MemorySink {
    fn begin_match(&self, source: &str) {
        let mut captures = self.captures.lock();
        let capture = captures.entry(source.to_string()).or_default();
        let offset = capture.data.len();
        capture.match_starts.push(offset);
    }

    fn append(&self, source: &str, bytes: &[u8]) {
        self.captures
            .lock()
            .entry(source.to_string())
            .or_default()
            .data
            .extend_from_slice(bytes);
    }
}

//! Statistics for sources and the relay hub

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::protocol::ParseSummary;

/// Live counters for one source, updated by its reader task
#[derive(Debug)]
pub struct SourceCounters {
    started_at: Instant,
    bytes_received: AtomicU64,
    bytes_relayed: AtomicU64,
    commands: AtomicU64,
    matches: AtomicU64,
    desyncs: AtomicU64,
    decode_errors: AtomicU64,
}

impl SourceCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            bytes_received: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            matches: AtomicU64::new(0),
            desyncs: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count bytes delivered to viewers (chunk size times recipients)
    pub fn record_relayed(&self, bytes: usize, recipients: usize) {
        self.bytes_relayed
            .fetch_add((bytes * recipients) as u64, Ordering::Relaxed);
    }

    pub fn record_summary(&self, summary: &ParseSummary) {
        self.commands
            .fetch_add(summary.commands as u64, Ordering::Relaxed);
        self.decode_errors
            .fetch_add(summary.decode_errors as u64, Ordering::Relaxed);
        if summary.new_match {
            self.matches.fetch_add(1, Ordering::Relaxed);
        }
        if summary.desync.is_some() {
            self.desyncs.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SourceStats {
        SourceStats {
            uptime: self.started_at.elapsed(),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            desyncs: self.desyncs.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for SourceCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time statistics for one source
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    /// Time since the source was registered
    pub uptime: Duration,
    /// Total bytes read from the console
    pub bytes_received: u64,
    /// Total bytes written to viewers
    pub bytes_relayed: u64,
    /// Complete commands parsed
    pub commands: u64,
    /// Handshakes seen
    pub matches: u64,
    /// Chunks abandoned on an unannounced command
    pub desyncs: u64,
    /// Payloads the decoder rejected
    pub decode_errors: u64,
}

impl SourceStats {
    /// Average inbound rate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}

/// Hub-wide snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Registered sources (any state)
    pub sources: usize,
    /// Connected viewers
    pub clients: usize,
    /// Viewers attached to a source
    pub attached_clients: usize,
    /// Viewers currently receiving relayed bytes
    pub relaying_clients: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn test_counters_new() {
        let stats = SourceCounters::new().snapshot();
        assert_eq!(stats.bytes_received, 0);
        assert_eq!(stats.bytes_relayed, 0);
        assert_eq!(stats.commands, 0);
        assert_eq!(stats.matches, 0);
    }

    #[test]
    fn test_record_summary() {
        let counters = SourceCounters::new();
        counters.record_received(100);
        counters.record_relayed(100, 3);
        counters.record_summary(&ParseSummary {
            commands: 4,
            new_match: true,
            decode_errors: 1,
            ..Default::default()
        });
        counters.record_summary(&ParseSummary {
            desync: Some(ProtocolError::Desync { command: 0x40 }),
            ..Default::default()
        });

        let stats = counters.snapshot();
        assert_eq!(stats.bytes_received, 100);
        assert_eq!(stats.bytes_relayed, 300);
        assert_eq!(stats.commands, 4);
        assert_eq!(stats.matches, 1);
        assert_eq!(stats.desyncs, 1);
        assert_eq!(stats.decode_errors, 1);
    }

    #[test]
    fn test_bitrate() {
        let stats = SourceStats {
            uptime: Duration::from_secs(10),
            bytes_received: 1_000_000,
            ..Default::default()
        };
        assert_eq!(stats.bitrate(), 800_000);

        let stats = SourceStats {
            uptime: Duration::ZERO,
            bytes_received: 1_000_000,
            ..Default::default()
        };
        assert_eq!(stats.bitrate(), 0);
    }
}

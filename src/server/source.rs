//! Per-source reader task
//!
//! Reads the console socket with a short timeout, feeds the parser, and
//! relays the consumed bytes verbatim to the source's active clients. Relayed
//! data always ends on a command boundary. A read timeout outside a match
//! marks the source idle. The loop exits on EOF, on a read
//! error, or once removal has been requested, and then cleans up the source.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::constants::CMD_MATCH_END;
use crate::protocol::StreamParser;
use crate::registry::entry::{SourceHandle, SourceState};
use crate::registry::RelayHub;

pub(crate) struct SourceReader<S> {
    hub: Arc<RelayHub>,
    handle: Arc<SourceHandle>,
    stream: S,
    parser: StreamParser,
}

impl<S> SourceReader<S>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    fn new(hub: Arc<RelayHub>, handle: Arc<SourceHandle>, stream: S) -> Self {
        let parser = StreamParser::new(
            handle.name(),
            Arc::clone(hub.sink()),
            hub.events().clone(),
        );
        Self {
            hub,
            handle,
            stream,
            parser,
        }
    }

    /// Run the reader for `handle` on its own task
    ///
    /// The source is detached and unregistered once the read loop ends, even
    /// if the loop panicked.
    pub(crate) fn spawn(hub: Arc<RelayHub>, handle: Arc<SourceHandle>, stream: S) {
        let reader = Self::new(Arc::clone(&hub), Arc::clone(&handle), stream);
        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(reader.read_loop()).await {
                tracing::error!(source = handle.name(), error = %e, "Source reader failed");
            }
            hub.detach_source(&handle).await;
            hub.unregister_source(&handle).await;
        });
    }

    async fn read_loop(mut self) {
        let read_timeout = self.hub.config().read_timeout;
        let mut buf = vec![0u8; self.hub.config().read_buffer_size];

        loop {
            if self.handle.is_terminating() {
                tracing::debug!(source = self.handle.name(), "Reader stopping on request");
                break;
            }

            match tokio::time::timeout(read_timeout, self.stream.read(&mut buf)).await {
                Err(_) => {
                    if self.parser.mark_idle() {
                        self.handle.transition(SourceState::Idle);
                    }
                }
                Ok(Ok(0)) => {
                    tracing::info!(source = self.handle.name(), "Source closed the connection");
                    break;
                }
                Ok(Ok(n)) => self.process(&buf[..n]).await,
                Ok(Err(e)) => {
                    tracing::warn!(source = self.handle.name(), error = %e, "Source read failed");
                    break;
                }
            }
        }
    }

    async fn process(&mut self, chunk: &[u8]) {
        let name = self.handle.name();
        self.handle.stats.record_received(chunk.len());

        let mut outgoing = BytesMut::with_capacity(self.parser.pending().len() + chunk.len());
        outgoing.extend_from_slice(self.parser.pending());
        outgoing.extend_from_slice(chunk);

        let summary = self.parser.feed(chunk);
        self.handle.stats.record_summary(&summary);

        if self.parser.is_active() {
            self.handle.transition(SourceState::Active);
        }
        if let Some(size) = self.parser.sizes().get(CMD_MATCH_END) {
            self.handle.set_match_end_size(size);
        }

        // Clients switch on at the handshake so they see the whole match.
        if summary.new_match {
            self.hub.activate(name).await;
        }
        if let Some(in_match) = summary.match_status {
            self.hub.set_match_status(name, in_match).await;
        }

        // An incomplete trailing command stays with the parser until it is whole
        outgoing.truncate(outgoing.len() - self.parser.pending().len());
        if !outgoing.is_empty() {
            let len = outgoing.len();
            let recipients = self.hub.relay(name, outgoing.freeze()).await;
            self.handle.stats.record_relayed(len, recipients);
        }

        if summary.commands > 0 {
            self.handle.publish_game(self.parser.game());
        }
    }
}

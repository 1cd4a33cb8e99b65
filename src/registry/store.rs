//! Relay hub implementation
//!
//! The central registry that owns every source and client connection and
//! routes raw console bytes from sources to their attached viewers.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::config::RegistryConfig;
use super::entry::{
    ClientEntry, ClientSnapshot, ClientState, ClientWriter, SharedWriter, SourceHandle,
    SourceState,
};
use super::error::RelayError;
use crate::events::{EventBus, RelayEvent};
use crate::game::GameState;
use crate::protocol::constants::LIVENESS_TOKEN;
use crate::protocol::inconclusive_end_frame;
use crate::server::source::SourceReader;
use crate::sink::{ByteSink, NullSink};
use crate::stats::{RelayStats, SourceStats};

/// Central registry for sources and clients
///
/// The source table and the client table have independent locks, so adding
/// or removing a source never stalls liveness pings. Socket writes happen
/// outside both locks. A client's writer lock, when needed together with the
/// client table, is always taken first.
pub struct RelayHub {
    /// Map of source name to source entry
    sources: RwLock<HashMap<String, Arc<SourceHandle>>>,

    /// Map of client name to client entry
    clients: Mutex<HashMap<String, ClientEntry>>,

    next_client_id: AtomicU64,
    sink: Arc<dyn ByteSink>,
    events: EventBus,
    config: RegistryConfig,
}

impl RelayHub {
    /// Create a hub with default configuration and no persistence
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a hub with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_sink(config, Arc::new(NullSink))
    }

    /// Create a hub that appends every parsed command to `sink`
    pub fn with_sink(config: RegistryConfig, sink: Arc<dyn ByteSink>) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            sink,
            events: EventBus::new(config.event_capacity),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn sink(&self) -> &Arc<dyn ByteSink> {
        &self.sink
    }

    // Sources

    /// Connect to a console and start relaying it
    ///
    /// Fails with `NameConflict` if the name is taken and with
    /// `SourceUnreachable` if the console does not accept within the connect
    /// timeout. Nothing stays registered on failure.
    pub async fn add_source(
        self: &Arc<Self>,
        name: &str,
        host: &str,
        port: u16,
    ) -> Result<(), RelayError> {
        let endpoint = format!("{host}:{port}");
        let handle = self.reserve_source(name, &endpoint).await?;

        let connect = TcpStream::connect((host, port));
        let stream = match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.abandon_source(&handle).await;
                return Err(source_unreachable(name, &endpoint, e.to_string()));
            }
            Err(_) => {
                self.abandon_source(&handle).await;
                return Err(source_unreachable(name, &endpoint, "connect timed out".into()));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(source = name, error = %e, "Failed to set TCP_NODELAY");
        }
        let peer = stream.peer_addr().ok();
        self.start_source(handle, stream, peer);
        Ok(())
    }

    /// Register an already-connected source stream
    pub async fn add_source_stream<S>(
        self: &Arc<Self>,
        name: &str,
        stream: S,
        peer: Option<SocketAddr>,
    ) -> Result<(), RelayError>
    where
        S: AsyncRead + Unpin + Send + 'static,
    {
        let endpoint = peer.map_or_else(|| "stream".to_string(), |addr| addr.to_string());
        let handle = self.reserve_source(name, &endpoint).await?;
        self.start_source(handle, stream, peer);
        Ok(())
    }

    async fn reserve_source(
        &self,
        name: &str,
        endpoint: &str,
    ) -> Result<Arc<SourceHandle>, RelayError> {
        let mut sources = self.sources.write().await;
        if sources.contains_key(name) {
            return Err(RelayError::NameConflict(name.to_string()));
        }
        let handle = Arc::new(SourceHandle::new(name, endpoint));
        sources.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Drop a reservation whose connect failed
    async fn abandon_source(&self, handle: &Arc<SourceHandle>) {
        self.detach_source(handle).await;
        self.remove_entry(handle).await;
        handle.mark_removed();
    }

    fn start_source<S>(
        self: &Arc<Self>,
        handle: Arc<SourceHandle>,
        stream: S,
        peer: Option<SocketAddr>,
    ) where
        S: AsyncRead + Unpin + Send + 'static,
    {
        handle.set_peer_addr(peer);
        handle.transition(SourceState::Active);

        tracing::info!(
            source = handle.name(),
            endpoint = handle.endpoint(),
            "Source connected"
        );
        self.events.publish(RelayEvent::SourceAdded {
            source: handle.name().to_string(),
        });

        SourceReader::spawn(Arc::clone(self), handle, stream);
    }

    /// Stop relaying a source and wait for its cleanup to finish
    ///
    /// Attached clients get an inconclusive end frame if they were mid-match
    /// and return to the unattached pool. Returns `false` if no such source
    /// was registered.
    pub async fn remove_source(&self, name: &str) -> bool {
        let handle = match self.sources.read().await.get(name) {
            Some(handle) => Arc::clone(handle),
            None => return false,
        };

        if handle.request_terminate() {
            tracing::info!(source = name, "Source removal requested");
        }
        handle.removed().await;
        true
    }

    /// Force every client of `handle` back to the unattached pool
    ///
    /// The source is marked terminating first, so no client can attach to it
    /// once this has run.
    pub(crate) async fn detach_source(&self, handle: &SourceHandle) {
        handle.request_terminate();
        let detached: Vec<(String, SharedWriter, bool)> = {
            let mut clients = self.clients.lock().await;
            clients
                .iter_mut()
                .filter(|(_, entry)| entry.is_attached_to(handle.name()))
                .map(|(name, entry)| {
                    let in_match = entry.in_match;
                    entry.reassign(None);
                    (name.clone(), Arc::clone(&entry.writer), in_match)
                })
                .collect()
        };

        if detached.is_empty() {
            return;
        }

        let frame = inconclusive_end_frame(handle.match_end_size());
        let mut failed = Vec::new();
        for (name, writer, in_match) in &detached {
            if *in_match && self.write_to(writer, &frame).await.is_err() {
                failed.push(name.clone());
            }
        }
        for name in failed {
            self.remove_client(&name).await;
        }

        tracing::info!(
            source = handle.name(),
            clients = detached.len(),
            "Clients detached from source"
        );
    }

    /// Remove a terminated source and free its name
    pub(crate) async fn unregister_source(&self, handle: &Arc<SourceHandle>) {
        self.remove_entry(handle).await;
        handle.mark_removed();

        let stats = handle.stats.snapshot();
        tracing::info!(
            source = handle.name(),
            bytes_received = stats.bytes_received,
            matches = stats.matches,
            "Source removed"
        );
        self.events.publish(RelayEvent::SourceRemoved {
            source: handle.name().to_string(),
        });
    }

    async fn remove_entry(&self, handle: &Arc<SourceHandle>) {
        let mut sources = self.sources.write().await;
        if let Some(current) = sources.get(handle.name()) {
            if Arc::ptr_eq(current, handle) {
                sources.remove(handle.name());
            }
        }
    }

    async fn end_frame_for(&self, source: &str) -> Vec<u8> {
        let size = self
            .sources
            .read()
            .await
            .get(source)
            .map_or(1, |handle| handle.match_end_size());
        inconclusive_end_frame(size)
    }

    // Clients

    /// Register a new viewer in the unattached pool
    ///
    /// Returns the generated client name.
    pub async fn register_client(&self, writer: ClientWriter, peer: Option<SocketAddr>) -> String {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("client-{id}");

        self.clients
            .lock()
            .await
            .insert(name.clone(), ClientEntry::new(writer, peer));

        tracing::info!(client = %name, peer = ?peer, "Client connected");
        self.events.publish(RelayEvent::ClientConnected {
            client: name.clone(),
            peer,
        });
        name
    }

    /// Remove a viewer and close its socket
    ///
    /// Returns `false` if it was already gone.
    pub async fn remove_client(&self, name: &str) -> bool {
        let entry = match self.clients.lock().await.remove(name) {
            Some(entry) => entry,
            None => return false,
        };

        let mut writer = entry.writer.lock().await;
        let _ = tokio::time::timeout(self.config.write_timeout, writer.shutdown()).await;
        drop(writer);

        tracing::info!(client = name, "Client removed");
        self.events.publish(RelayEvent::ClientRemoved {
            client: name.to_string(),
        });
        true
    }

    /// Attach a viewer to a source
    ///
    /// Only a connected source that is not shutting down accepts clients. A
    /// client that was mid-match on another source gets an inconclusive end
    /// frame first. The client waits in the liveness pool until the source's
    /// next match activates it.
    pub async fn attach(&self, client: &str, source: &str) -> Result<(), RelayError> {
        let handle = match self.sources.read().await.get(source) {
            Some(handle) if handle.is_running() => Arc::clone(handle),
            _ => return Err(RelayError::SourceNotFound(source.to_string())),
        };
        self.reassign(client, Some(&handle)).await
    }

    /// Return a viewer to the unattached pool
    pub async fn detach(&self, client: &str) -> Result<(), RelayError> {
        self.reassign(client, None).await
    }

    async fn reassign(
        &self,
        client: &str,
        target: Option<&Arc<SourceHandle>>,
    ) -> Result<(), RelayError> {
        let target_name = target.map(|handle| handle.name());
        let writer = {
            let clients = self.clients.lock().await;
            let entry = clients
                .get(client)
                .ok_or_else(|| RelayError::ClientNotFound(client.to_string()))?;
            if entry.source.as_deref() == target_name {
                return Ok(());
            }
            Arc::clone(&entry.writer)
        };

        // Held until the end frame is out so nothing else reaches this viewer
        // in between.
        let mut guard = writer.lock().await;

        let previous = {
            let mut clients = self.clients.lock().await;
            let entry = clients
                .get_mut(client)
                .ok_or_else(|| RelayError::ClientNotFound(client.to_string()))?;
            if entry.source.as_deref() == target_name {
                return Ok(());
            }
            // detach_source marks the source before it takes this lock
            if let Some(handle) = target {
                if !handle.is_running() {
                    return Err(RelayError::SourceNotFound(handle.name().to_string()));
                }
            }
            let previous = entry.source.clone().filter(|_| entry.in_match);
            entry.reassign(target_name.map(str::to_string));
            previous
        };

        tracing::info!(client, source = ?target_name, "Client attachment changed");

        if let Some(previous) = previous {
            let frame = self.end_frame_for(&previous).await;
            if let Err(e) = write_with_timeout(&mut guard, &frame, self.config.write_timeout).await
            {
                drop(guard);
                tracing::debug!(client, error = %e, "End frame write failed");
                self.remove_client(client).await;
                return Err(RelayError::PeerDisconnected(client.to_string()));
            }
        }
        Ok(())
    }

    /// Enable relaying for every client attached to `source`
    ///
    /// Returns the number of clients that were switched on.
    pub async fn activate(&self, source: &str) -> usize {
        let mut clients = self.clients.lock().await;
        let mut activated = 0;
        for entry in clients.values_mut() {
            if entry.is_attached_to(source) && !entry.relay_enabled {
                entry.relay_enabled = true;
                activated += 1;
            }
        }
        if activated > 0 {
            tracing::debug!(source, clients = activated, "Clients activated");
        }
        activated
    }

    /// Record whether `source` is mid-match on each of its clients
    pub async fn set_match_status(&self, source: &str, in_match: bool) {
        let mut clients = self.clients.lock().await;
        for entry in clients.values_mut() {
            if entry.is_attached_to(source) {
                entry.in_match = in_match;
            }
        }
    }

    /// Send raw bytes to every relaying client of `source`
    ///
    /// Clients whose write fails are removed; delivery to the rest continues.
    /// Returns the number of clients that received the bytes.
    pub async fn relay(&self, source: &str, bytes: Bytes) -> usize {
        self.deliver(&bytes, |entry| entry.relay_enabled && entry.is_attached_to(source))
            .await
    }

    /// Send a liveness token to every client not yet relaying
    pub async fn send_liveness(&self) -> usize {
        self.deliver(LIVENESS_TOKEN, |entry| !entry.relay_enabled).await
    }

    /// Write `bytes` to every client matching `wanted`
    ///
    /// The match is checked again under each writer lock, so a client whose
    /// attachment changed after the snapshot is skipped.
    async fn deliver<F>(&self, bytes: &[u8], wanted: F) -> usize
    where
        F: Fn(&ClientEntry) -> bool,
    {
        let targets: Vec<(String, SharedWriter)> = {
            let clients = self.clients.lock().await;
            clients
                .iter()
                .filter(|(_, entry)| wanted(entry))
                .map(|(name, entry)| (name.clone(), Arc::clone(&entry.writer)))
                .collect()
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (name, writer) in targets {
            let mut guard = writer.lock().await;
            let still_wanted = self
                .clients
                .lock()
                .await
                .get(&name)
                .is_some_and(|entry| wanted(entry));
            if !still_wanted {
                continue;
            }
            match write_with_timeout(&mut guard, bytes, self.config.write_timeout).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(client = %name, error = %e, "Client write failed");
                    failed.push(name);
                }
            }
        }
        for name in failed {
            self.remove_client(&name).await;
        }
        delivered
    }

    async fn write_to(&self, writer: &SharedWriter, bytes: &[u8]) -> io::Result<()> {
        let mut guard = writer.lock().await;
        write_with_timeout(&mut guard, bytes, self.config.write_timeout).await
    }

    /// Spawn the periodic liveness task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_liveness_task(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let period = hub.config.liveness_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                hub.send_liveness().await;
            }
        })
    }

    /// Remove every source and client
    pub async fn shutdown(&self) {
        for name in self.source_names().await {
            self.remove_source(&name).await;
        }
        for name in self.client_names().await {
            self.remove_client(&name).await;
        }
    }

    // Queries

    /// Registered source names, sorted
    pub async fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn source_state(&self, name: &str) -> Option<SourceState> {
        self.sources.read().await.get(name).map(|handle| handle.state())
    }

    pub async fn source_stats(&self, name: &str) -> Option<SourceStats> {
        self.sources
            .read()
            .await
            .get(name)
            .map(|handle| handle.stats.snapshot())
    }

    /// Address of a source's console, if it was connected over TCP
    pub async fn source_peer(&self, name: &str) -> Option<SocketAddr> {
        self.sources
            .read()
            .await
            .get(name)
            .and_then(|handle| handle.peer_addr())
    }

    /// Watch the decoded game state of a source
    pub async fn watch_game(&self, name: &str) -> Option<watch::Receiver<GameState>> {
        self.sources
            .read()
            .await
            .get(name)
            .map(|handle| handle.watch_game())
    }

    /// Connected client names, sorted
    pub async fn client_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn client(&self, name: &str) -> Option<ClientSnapshot> {
        self.clients
            .lock()
            .await
            .get(name)
            .map(|entry| entry.snapshot(name))
    }

    /// Names of clients attached to `source`, sorted
    pub async fn clients_of(&self, source: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .clients
            .lock()
            .await
            .iter()
            .filter(|(_, entry)| entry.is_attached_to(source))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn stats(&self) -> RelayStats {
        let sources = self.sources.read().await.len();
        let clients = self.clients.lock().await;
        RelayStats {
            sources,
            clients: clients.len(),
            attached_clients: clients
                .values()
                .filter(|entry| entry.state() != ClientState::Pending)
                .count(),
            relaying_clients: clients
                .values()
                .filter(|entry| entry.state() == ClientState::AttachedActive)
                .count(),
        }
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}

fn source_unreachable(name: &str, addr: &str, reason: String) -> RelayError {
    RelayError::SourceUnreachable {
        name: name.to_string(),
        addr: addr.to_string(),
        reason,
    }
}

async fn write_with_timeout(
    writer: &mut ClientWriter,
    bytes: &[u8],
    limit: Duration,
) -> io::Result<()> {
    let write = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    };
    match tokio::time::timeout(limit, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::broadcast;

    use super::*;
    use crate::protocol::parser::fixtures::*;
    use crate::sink::MemorySink;

    fn hub() -> Arc<RelayHub> {
        let config = RegistryConfig::default()
            .read_timeout(Duration::from_millis(20))
            .write_timeout(Duration::from_millis(200))
            .connect_timeout(Duration::from_millis(500));
        Arc::new(RelayHub::with_config(config))
    }

    async fn client(hub: &RelayHub) -> (String, DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let name = hub.register_client(Box::new(ours), None).await;
        (name, theirs)
    }

    /// Register a source backed by an in-memory pipe; returns the console end
    async fn source(hub: &Arc<RelayHub>, name: &str) -> DuplexStream {
        let (console, ours) = tokio::io::duplex(64 * 1024);
        hub.add_source_stream(name, ours, None).await.unwrap();
        console
    }

    async fn read_available(viewer: &mut DuplexStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while let Ok(Ok(n)) =
            tokio::time::timeout(Duration::from_millis(50), viewer.read(&mut buf)).await
        {
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    async fn next_event(rx: &mut broadcast::Receiver<RelayEvent>) -> RelayEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event timeout")
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_client() {
        let hub = hub();
        let mut events = hub.events().subscribe();

        let (a, _va) = client(&hub).await;
        let (b, _vb) = client(&hub).await;
        assert_eq!(a, "client-1");
        assert_eq!(b, "client-2");
        assert_eq!(hub.client_names().await, vec![a.clone(), b]);

        assert_eq!(
            next_event(&mut events).await,
            RelayEvent::ClientConnected {
                client: a.clone(),
                peer: None
            }
        );
        assert_eq!(hub.client(&a).await.unwrap().state, ClientState::Pending);
    }

    #[tokio::test]
    async fn test_attach_errors() {
        let hub = hub();
        let _console = source(&hub, "a").await;
        let (name, _viewer) = client(&hub).await;

        assert_eq!(
            hub.attach(&name, "missing").await,
            Err(RelayError::SourceNotFound("missing".into()))
        );
        assert_eq!(
            hub.attach("client-99", "a").await,
            Err(RelayError::ClientNotFound("client-99".into()))
        );
        assert_eq!(
            hub.detach("client-99").await,
            Err(RelayError::ClientNotFound("client-99".into()))
        );
    }

    #[tokio::test]
    async fn test_reattach_mid_match_sends_one_end_frame() {
        let hub = hub();
        let _a = source(&hub, "a").await;
        let _b = source(&hub, "b").await;
        let (name, mut viewer) = client(&hub).await;

        hub.attach(&name, "a").await.unwrap();
        hub.set_match_status("a", true).await;
        assert!(hub.client(&name).await.unwrap().in_match);

        hub.attach(&name, "b").await.unwrap();
        // already attached: no-op
        hub.attach(&name, "b").await.unwrap();

        assert_eq!(read_available(&mut viewer).await, vec![0x39, 0x00]);

        let snapshot = hub.client(&name).await.unwrap();
        assert_eq!(snapshot.source.as_deref(), Some("b"));
        assert_eq!(snapshot.state, ClientState::AttachedInactive);
        assert!(!snapshot.in_match);

        // not mid-match anymore, so no frame this time
        hub.attach(&name, "a").await.unwrap();
        assert!(read_available(&mut viewer).await.is_empty());
    }

    #[tokio::test]
    async fn test_activate_and_match_status() {
        let hub = hub();
        let _a = source(&hub, "a").await;
        let (one, _v1) = client(&hub).await;
        let (two, _v2) = client(&hub).await;
        let (other, _v3) = client(&hub).await;

        hub.attach(&one, "a").await.unwrap();
        hub.attach(&two, "a").await.unwrap();

        assert_eq!(hub.activate("a").await, 2);
        assert_eq!(hub.activate("a").await, 0);
        assert_eq!(hub.activate("b").await, 0);

        hub.set_match_status("a", true).await;
        assert!(hub.client(&one).await.unwrap().in_match);
        assert!(!hub.client(&other).await.unwrap().in_match);

        assert_eq!(hub.clients_of("a").await, vec![one.clone(), two]);
        let stats = hub.stats().await;
        assert_eq!(stats.sources, 1);
        assert_eq!(stats.clients, 3);
        assert_eq!(stats.attached_clients, 2);
        assert_eq!(stats.relaying_clients, 2);

        // changing attachment resets relaying
        hub.detach(&one).await.unwrap();
        assert_eq!(hub.client(&one).await.unwrap().state, ClientState::Pending);
    }

    #[tokio::test]
    async fn test_relay_drops_only_failed_client() {
        let hub = hub();
        let _a = source(&hub, "a").await;
        let (keep, mut kept) = client(&hub).await;
        let (lose, lost) = client(&hub).await;
        let mut events = hub.events().subscribe();

        hub.attach(&keep, "a").await.unwrap();
        hub.attach(&lose, "a").await.unwrap();
        hub.activate("a").await;

        drop(lost);
        assert_eq!(hub.relay("a", Bytes::from_static(b"\x38\x01")).await, 1);
        assert_eq!(hub.client_names().await, vec![keep.clone()]);
        assert_eq!(
            next_event(&mut events).await,
            RelayEvent::ClientRemoved { client: lose }
        );

        assert_eq!(hub.relay("a", Bytes::from_static(b"\x38\x02")).await, 1);
        assert_eq!(read_available(&mut kept).await, b"\x38\x01\x38\x02");
    }

    #[tokio::test]
    async fn test_relay_skips_inactive_clients() {
        let hub = hub();
        let _a = source(&hub, "a").await;
        let (name, mut viewer) = client(&hub).await;
        hub.attach(&name, "a").await.unwrap();

        assert_eq!(hub.relay("a", Bytes::from_static(b"\x38")).await, 0);
        assert!(read_available(&mut viewer).await.is_empty());
    }

    #[tokio::test]
    async fn test_liveness_goes_to_waiting_clients() {
        let hub = hub();
        let _a = source(&hub, "a").await;
        let (relaying, mut relaying_viewer) = client(&hub).await;
        let (_pending, mut pending_viewer) = client(&hub).await;
        let (gone, gone_viewer) = client(&hub).await;

        hub.attach(&relaying, "a").await.unwrap();
        hub.activate("a").await;
        drop(gone_viewer);

        assert_eq!(hub.send_liveness().await, 1);
        assert_eq!(read_available(&mut pending_viewer).await, LIVENESS_TOKEN);
        assert!(read_available(&mut relaying_viewer).await.is_empty());
        assert!(hub.client(&gone).await.is_none());
    }

    #[tokio::test]
    async fn test_liveness_task() {
        let config = RegistryConfig::default().liveness_interval(Duration::from_millis(10));
        let hub = Arc::new(RelayHub::with_config(config));
        let (_name, mut viewer) = client(&hub).await;

        let task = hub.spawn_liveness_task();
        let mut buf = [0u8; 10];
        viewer.read_exact(&mut buf).await.unwrap();
        task.abort();

        assert_eq!(&buf[..5], LIVENESS_TOKEN);
        assert_eq!(&buf[5..], LIVENESS_TOKEN);
    }

    #[tokio::test]
    async fn test_attach_requires_connected_source() {
        let hub = hub();
        let (name, _viewer) = client(&hub).await;

        // a reservation still waiting for its connect
        let pending = hub.reserve_source("wii", "10.0.0.1:666").await.unwrap();
        assert_eq!(hub.source_state("wii").await, Some(SourceState::Connecting));
        assert_eq!(
            hub.attach(&name, "wii").await,
            Err(RelayError::SourceNotFound("wii".into()))
        );

        hub.abandon_source(&pending).await;
        assert_eq!(pending.state(), SourceState::Removed);
        assert!(hub.source_names().await.is_empty());
        assert_eq!(hub.client(&name).await.unwrap().source, None);

        // a later source under the same name starts with no clients
        let _console = source(&hub, "wii").await;
        assert!(hub.clients_of("wii").await.is_empty());
    }

    #[tokio::test]
    async fn test_attach_refused_once_source_is_closing() {
        let hub = hub();
        let _console = source(&hub, "a").await;
        let (name, _viewer) = client(&hub).await;

        let handle = Arc::clone(hub.sources.read().await.get("a").unwrap());
        hub.detach_source(&handle).await;
        assert!(handle.is_terminating());
        assert_eq!(
            hub.attach(&name, "a").await,
            Err(RelayError::SourceNotFound("a".into()))
        );
        assert_eq!(hub.client(&name).await.unwrap().source, None);
    }

    #[tokio::test]
    async fn test_name_conflict() {
        let hub = hub();
        let _a = source(&hub, "a").await;
        let (_console, stream) = tokio::io::duplex(64);

        assert_eq!(
            hub.add_source_stream("a", stream, None).await,
            Err(RelayError::NameConflict("a".into()))
        );
        assert_eq!(hub.source_names().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_source_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let hub = hub();
        let result = hub.add_source("wii", "127.0.0.1", port).await;
        assert!(matches!(
            result,
            Err(RelayError::SourceUnreachable { ref name, .. }) if name == "wii"
        ));
        assert!(hub.source_names().await.is_empty());
        assert!(!hub.remove_source("wii").await);
    }

    #[tokio::test]
    async fn test_add_source_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let hub = hub();
        hub.add_source("wii", "127.0.0.1", port).await.unwrap();
        let (console, _) = listener.accept().await.unwrap();

        assert_eq!(hub.source_state("wii").await, Some(SourceState::Active));
        assert_eq!(hub.source_peer("wii").await, Some(console.local_addr().unwrap()));
        assert!(hub.remove_source("wii").await);
        assert_eq!(hub.source_state("wii").await, None);
    }

    #[tokio::test]
    async fn test_remove_source_idempotent() {
        let hub = hub();
        let _console = source(&hub, "a").await;
        let (name, mut viewer) = client(&hub).await;
        let mut events = hub.events().subscribe();

        hub.attach(&name, "a").await.unwrap();
        hub.set_match_status("a", true).await;

        assert!(hub.remove_source("a").await);
        assert!(!hub.remove_source("a").await);

        assert_eq!(
            next_event(&mut events).await,
            RelayEvent::SourceRemoved { source: "a".into() }
        );
        assert!(events.try_recv().is_err());

        assert_eq!(read_available(&mut viewer).await, vec![0x39, 0x00]);
        let snapshot = hub.client(&name).await.unwrap();
        assert_eq!(snapshot.source, None);
        assert_eq!(snapshot.state, ClientState::Pending);
        assert!(hub.source_names().await.is_empty());

        // name is free again
        let _again = source(&hub, "a").await;
        assert_eq!(hub.source_names().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_source_eof_removes_source() {
        let hub = hub();
        let mut events = hub.events().subscribe();
        let console = source(&hub, "a").await;

        assert_eq!(
            next_event(&mut events).await,
            RelayEvent::SourceAdded { source: "a".into() }
        );
        drop(console);
        assert_eq!(
            next_event(&mut events).await,
            RelayEvent::SourceRemoved { source: "a".into() }
        );
        assert!(hub.source_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_reader_relays_and_decodes_match() {
        let sink = Arc::new(MemorySink::new());
        let config = RegistryConfig::default().read_timeout(Duration::from_millis(20));
        let hub = Arc::new(RelayHub::with_sink(config, sink.clone()));
        let mut console = source(&hub, "a").await;
        let (name, mut viewer) = client(&hub).await;
        hub.attach(&name, "a").await.unwrap();
        let mut game = hub.watch_game("a").await.unwrap();

        let stream = match_stream();
        let (head, tail) = stream.split_at(100);
        console.write_all(head).await.unwrap();
        console.write_all(tail).await.unwrap();

        let mut received = vec![0u8; stream.len()];
        viewer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, stream);

        let state = game
            .wait_for(|game| game.has_ended())
            .await
            .unwrap()
            .clone();
        assert!(state.ready);
        assert_eq!(state.characters[0].percent, 37.0);

        let snapshot = hub.client(&name).await.unwrap();
        assert_eq!(snapshot.state, ClientState::AttachedActive);
        assert!(!snapshot.in_match);

        assert_eq!(hub.source_peer("a").await, None);
        let stats = hub.source_stats("a").await.unwrap();
        assert_eq!(stats.matches, 1);
        assert_eq!(stats.commands, match_commands().len() as u64);
        assert_eq!(stats.bytes_received, stream.len() as u64);
        assert_eq!(stats.bytes_relayed, stream.len() as u64);
        assert_eq!(sink.match_count("a"), 1);
    }
}

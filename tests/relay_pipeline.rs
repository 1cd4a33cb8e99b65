//! End-to-end relay tests over loopback TCP
//!
//! A fake console streams a match to the hub; viewers connect through the
//! relay server and decode what they receive with their own parser.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use slippi_relay::{
    EventBus, MemorySink, RegistryConfig, RelayEvent, RelayHub, RelayServer, ServerConfig,
    StreamParser,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};

const HELO: &[u8] = b"HELO\0";

fn handshake() -> Vec<u8> {
    vec![
        0x35, 0x0D, // id, 1 + 4 * 3
        0x36, 0x01, 0xA0, //
        0x37, 0x00, 0x40, //
        0x38, 0x00, 0x34, //
        0x39, 0x00, 0x02,
    ]
}

fn match_start() -> Vec<u8> {
    let mut bytes = vec![0u8; 1 + 0x1A0];
    bytes[0] = 0x36;
    bytes[0x13..0x15].copy_from_slice(&31u16.to_be_bytes());
    // slot 0 and slot 1: external character, player type, stocks
    bytes[0x65] = 0x02;
    bytes[0x67] = 4;
    bytes[0x65 + 0x24] = 0x14;
    bytes[0x67 + 0x24] = 4;
    bytes[0x13D..0x141].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
    bytes
}

fn post_frame(frame: i32, slot: u8, percent: f32, stocks: u8) -> Vec<u8> {
    let mut bytes = vec![0u8; 1 + 0x34];
    bytes[0] = 0x38;
    bytes[1..5].copy_from_slice(&frame.to_be_bytes());
    bytes[5] = slot;
    bytes[7] = if slot == 0 { 0x01 } else { 0x16 };
    bytes[0x16..0x1A].copy_from_slice(&percent.to_be_bytes());
    bytes[0x21] = stocks;
    bytes
}

/// Opening of a match, without its end
fn opening() -> Vec<u8> {
    let mut stream = handshake();
    stream.extend(match_start());
    stream.extend(post_frame(-123, 0, 0.0, 4));
    stream.extend(post_frame(-123, 1, 0.0, 4));
    stream.extend(post_frame(-122, 0, 37.0, 4));
    stream.extend(post_frame(-122, 1, 12.0, 3));
    stream
}

struct Relay {
    hub: Arc<RelayHub>,
    addr: SocketAddr,
    events: broadcast::Receiver<RelayEvent>,
    _shutdown: oneshot::Sender<()>,
}

async fn start_relay() -> Relay {
    let registry = RegistryConfig::default()
        .read_timeout(Duration::from_millis(20))
        .liveness_interval(Duration::from_millis(20));
    let server = RelayServer::with_registry_config(ServerConfig::default(), registry);
    let hub = Arc::clone(server.hub());
    let events = hub.events().subscribe();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .serve_until(listener, async {
                let _ = rx.await;
            })
            .await
    });

    Relay {
        hub,
        addr,
        events,
        _shutdown: tx,
    }
}

/// Start a fake console and register it with the hub
async fn connect_console(hub: &Arc<RelayHub>, name: &str) -> TcpStream {
    let console = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = console.local_addr().unwrap().port();
    hub.add_source(name, "127.0.0.1", port).await.unwrap();
    let (socket, _) = console.accept().await.unwrap();
    socket
}

async fn next_client(events: &mut broadcast::Receiver<RelayEvent>) -> String {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let RelayEvent::ClientConnected { client, .. } = events.recv().await.unwrap() {
                return client;
            }
        }
    })
    .await
    .unwrap()
}

async fn wait_removed(events: &mut broadcast::Receiver<RelayEvent>, name: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let RelayEvent::ClientRemoved { client } = events.recv().await.unwrap() {
                if client == name {
                    return;
                }
            }
        }
    })
    .await
    .unwrap()
}

/// Viewer side: a socket plus a parser over everything it has received
struct Viewer {
    socket: TcpStream,
    parser: StreamParser,
    sink: Arc<MemorySink>,
}

impl Viewer {
    async fn connect(addr: SocketAddr) -> Self {
        let sink = Arc::new(MemorySink::new());
        Self {
            socket: TcpStream::connect(addr).await.unwrap(),
            parser: StreamParser::new("viewer", sink.clone(), EventBus::default()),
            sink,
        }
    }

    /// Read until `done` holds for the viewer's parser
    async fn read_until(&mut self, done: impl Fn(&StreamParser) -> bool) {
        let mut buf = [0u8; 4096];
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done(&self.parser) {
                let n = self.socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "relay closed the viewer");
                self.parser.feed(&buf[..n]);
            }
        })
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn test_viewer_sees_match_and_inconclusive_end() {
    let mut relay = start_relay().await;
    let mut console = connect_console(&relay.hub, "wii").await;
    let mut game = relay.hub.watch_game("wii").await.unwrap();

    let mut viewer = Viewer::connect(relay.addr).await;
    let client = next_client(&mut relay.events).await;
    relay.hub.attach(&client, "wii").await.unwrap();

    // the console stream arrives in odd fragments with its own keepalives
    let stream = opening();
    console.write_all(HELO).await.unwrap();
    for piece in stream.chunks(37) {
        console.write_all(piece).await.unwrap();
        console.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    console.write_all(HELO).await.unwrap();

    viewer
        .read_until(|p| p.game().player(1).is_some_and(|c| c.stocks == 3))
        .await;

    let ours = viewer.parser.game().clone();
    let hubs = game
        .wait_for(|g| g.player(1).is_some_and(|c| c.stocks == 3))
        .await
        .unwrap()
        .clone();
    assert_eq!(ours, hubs);
    assert!(ours.ready);
    assert_eq!(ours.player(0).unwrap().percent, 37.0);
    assert_eq!(ours.player(1).unwrap().percent, 12.0);
    let info = ours.match_info.as_ref().unwrap();
    assert_eq!(info.stage, 31);
    assert_eq!(info.random_seed, 0xDEAD_BEEF);
    assert_eq!(info.slots[1].external_char_id, 0x14);

    // the viewer's capture is exactly the console's commands
    assert_eq!(&viewer.sink.contents("viewer")[..], &stream[..]);

    // removing the source mid-match ends the viewer's match inconclusively
    assert!(relay.hub.remove_source("wii").await);
    viewer.read_until(|p| p.game().has_ended()).await;
    let ended = viewer.parser.game();
    assert_eq!(ended.match_info.as_ref().unwrap().end_reason, Some(0));
    assert_eq!(viewer.sink.contents("viewer").len(), stream.len() + 3);

    let snapshot = relay.hub.client(&client).await.unwrap();
    assert_eq!(snapshot.source, None);
    assert!(relay.hub.source_names().await.is_empty());
}

#[tokio::test]
async fn test_dropped_viewer_does_not_affect_others() {
    let mut relay = start_relay().await;
    let mut console = connect_console(&relay.hub, "wii").await;

    let mut stays = Viewer::connect(relay.addr).await;
    let stays_name = next_client(&mut relay.events).await;
    let leaves = Viewer::connect(relay.addr).await;
    let leaves_name = next_client(&mut relay.events).await;
    relay.hub.attach(&stays_name, "wii").await.unwrap();
    relay.hub.attach(&leaves_name, "wii").await.unwrap();

    let mut stream = handshake();
    stream.extend(match_start());
    console.write_all(&stream).await.unwrap();
    stays.read_until(|p| p.game().has_match()).await;

    drop(leaves);
    wait_removed(&mut relay.events, &leaves_name).await;

    console
        .write_all(&post_frame(-123, 0, 37.0, 4))
        .await
        .unwrap();
    stays.read_until(|p| p.game().ready).await;
    assert_eq!(stays.parser.game().player(0).unwrap().percent, 37.0);
    assert_eq!(relay.hub.client_names().await, vec![stays_name]);
}

#[tokio::test]
async fn test_console_disconnect_frees_name() {
    let mut relay = start_relay().await;
    let console = connect_console(&relay.hub, "wii").await;

    drop(console);
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let RelayEvent::SourceRemoved { source } = relay.events.recv().await.unwrap() {
                assert_eq!(source, "wii");
                return;
            }
        }
    })
    .await
    .unwrap();

    let _again = connect_console(&relay.hub, "wii").await;
    assert_eq!(relay.hub.source_names().await, vec!["wii".to_string()]);
}

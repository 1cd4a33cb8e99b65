//! Relay server example
//!
//! Run with: cargo run --example relay_server [BIND_ADDR] NAME=HOST[:PORT]...
//!
//! Examples:
//!   cargo run --example relay_server left=192.168.1.20
//!   cargo run --example relay_server 0.0.0.0:6660 left=192.168.1.20 right=192.168.1.21
//!
//! Viewers connecting to BIND_ADDR are attached to the first source. Any
//! Slippi-compatible viewer pointed at the relay sees the console's stream
//! from the start of its next match.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use slippi_relay::{RelayEvent, RelayHub, RelayServer, ServerConfig, SourceEndpoint};

fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 666;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: relay_server [BIND_ADDR] NAME=HOST[:PORT]...");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR         Address viewers connect to (default: 0.0.0.0:666)");
    eprintln!("  NAME=HOST[:PORT]  Console to relay (default port: 666)");
}

/// Log hub events and attach new viewers to `default_source`
async fn watch_events(hub: Arc<RelayHub>, default_source: String) {
    let mut events = hub.events().subscribe();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event watcher lagging");
                continue;
            }
            Err(_) => break,
        };

        match &event {
            RelayEvent::ClientConnected { client, .. } => {
                if let Err(e) = hub.attach(client, &default_source).await {
                    tracing::warn!(client = %client, error = %e, "Auto-attach failed");
                }
            }
            RelayEvent::MatchStatus {
                source,
                in_match: false,
            } => {
                if let Some(game) = hub.watch_game(source).await {
                    let game = game.borrow().clone();
                    for slot in 0..4 {
                        if let Some(player) = game.player(slot) {
                            tracing::info!(
                                source = %source,
                                slot,
                                stocks = player.stocks,
                                percent = player.percent,
                                "Final state"
                            );
                        }
                    }
                }
            }
            _ => {}
        }
        tracing::info!(?event, "Relay event");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let (bind_addr, source_args) = if args[0].contains('=') {
        (SocketAddr::from(([0, 0, 0, 0], 666)), &args[..])
    } else {
        match parse_bind_addr(&args[0]) {
            Ok(addr) => (addr, &args[1..]),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    };

    let mut sources = Vec::new();
    for arg in source_args {
        sources.push(SourceEndpoint::parse(arg)?);
    }
    let Some(default_source) = sources.first().map(|s| s.name.clone()) else {
        print_usage();
        std::process::exit(1);
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("slippi_relay=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let server = RelayServer::new(ServerConfig::with_addr(bind_addr));
    let hub = Arc::clone(server.hub());

    for source in &sources {
        match hub.add_source(&source.name, &source.host, source.port).await {
            Ok(()) => println!("Relaying {}", source),
            Err(e) => eprintln!("Skipping {}: {}", source, e),
        }
    }

    tokio::spawn(watch_events(Arc::clone(&hub), default_source));

    // Periodic stats
    let stats_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let stats = stats_hub.stats().await;
            println!(
                "Stats: sources={} clients={} relaying={}",
                stats.sources, stats.clients, stats.relaying_clients
            );
            for name in stats_hub.source_names().await {
                if let Some(s) = stats_hub.source_stats(&name).await {
                    let peer = stats_hub
                        .source_peer(&name)
                        .await
                        .map_or_else(|| "-".to_string(), |addr| addr.to_string());
                    println!(
                        "  {} ({}): matches={} bytes={} ({} bit/s)",
                        name,
                        peer,
                        s.matches,
                        s.bytes_received,
                        s.bitrate()
                    );
                }
            }
        }
    });

    println!("Viewers connect to {}", bind_addr);

    // Run with Ctrl+C handling
    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await;

    if let Err(e) = result {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}

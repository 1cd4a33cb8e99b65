//! Server configuration

use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::protocol::constants::DEFAULT_CONSOLE_PORT;

/// Viewer listener options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to accept viewers on
    pub bind_addr: SocketAddr,

    /// Maximum concurrent viewers (0 = unlimited)
    pub max_clients: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CONSOLE_PORT)),
            max_clients: 0, // Unlimited
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum concurrent viewers
    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Enable or disable TCP_NODELAY on accepted sockets
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

/// A named console address, as supplied by the host's source list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl SourceEndpoint {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// Parse `name=host[:port]`; the port defaults to the console port
    pub fn parse(arg: &str) -> Result<Self> {
        let (name, addr) = arg
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected name=host[:port], got {arg:?}")))?;
        let name = name.trim();
        let addr = addr.trim();
        if name.is_empty() || addr.is_empty() {
            return Err(Error::Config(format!(
                "expected name=host[:port], got {arg:?}"
            )));
        }

        let (host, port) = match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid port in {arg:?}")))?;
                (host, port)
            }
            _ => (addr, DEFAULT_CONSOLE_PORT),
        };

        Ok(Self::new(name, host, port))
    }
}

impl FromStr for SourceEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for SourceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}:{}", self.name, self.host, self.port)
    }
}

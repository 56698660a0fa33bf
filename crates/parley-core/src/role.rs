//! Role strategies
//!
//! A [`Role`] only knows how to obtain the two sockets of a session. The
//! [`Initiator`] dials out to both remote endpoints, the [`Responder`] binds two
//! listeners and accepts one peer on each. Everything after that is shared by
//! [`Transport`](crate::Transport).

use core::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info};

use crate::errors::{Result, TransportError};

/// Pending connections each responder listener will queue
const RESPONDER_BACKLOG: u32 = 1;

// ----------------------------------------------------------------------------
// Addressing
// ----------------------------------------------------------------------------

/// A (host, port) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    /// Resolve to the first socket address the host maps to
    pub async fn resolve(&self) -> std::io::Result<SocketAddr> {
        lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve to any address", self.host),
                )
            })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Deployment convention: one host, two adjacent ports, named from the
/// responder's side. The initiator uses the same pair mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    pub host: String,
    /// Port the responder sends on (the initiator listens on it)
    pub responder_send_port: u16,
    /// Port the responder listens on (the initiator sends to it)
    pub responder_listen_port: u16,
}

impl Default for PortPair {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            responder_send_port: 60442,
            responder_listen_port: 60441,
        }
    }
}

impl PortPair {
    /// `(send_addr, listen_addr)` for a responder
    pub fn responder_endpoints(&self) -> (Endpoint, Endpoint) {
        (
            Endpoint::new(self.host.clone(), self.responder_send_port),
            Endpoint::new(self.host.clone(), self.responder_listen_port),
        )
    }

    /// `(send_addr, listen_addr)` for an initiator
    pub fn initiator_endpoints(&self) -> (Endpoint, Endpoint) {
        (
            Endpoint::new(self.host.clone(), self.responder_listen_port),
            Endpoint::new(self.host.clone(), self.responder_send_port),
        )
    }
}

fn ensure_distinct(send_addr: &Endpoint, listen_addr: &Endpoint) -> Result<()> {
    if send_addr == listen_addr {
        return Err(TransportError::InvalidConfiguration {
            reason: format!("send and listen addresses must differ, both are {}", send_addr),
        });
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Role Trait
// ----------------------------------------------------------------------------

/// Which side of the pair a role plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Initiator,
    Responder,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Initiator => write!(f, "initiator"),
            RoleKind::Responder => write!(f, "responder"),
        }
    }
}

/// The two connected sockets of one session
#[derive(Debug)]
pub struct SocketPair {
    pub send: TcpStream,
    pub listen: TcpStream,
}

/// Strategy for obtaining a connected [`SocketPair`]
#[async_trait]
pub trait Role: Send + Sync + fmt::Debug {
    fn kind(&self) -> RoleKind;

    fn send_addr(&self) -> &Endpoint;

    fn listen_addr(&self) -> &Endpoint;

    /// Produce both sockets, connected. Any failure is fatal for the run;
    /// sockets opened before the failure are dropped on return.
    async fn establish(&mut self) -> Result<SocketPair>;
}

// ----------------------------------------------------------------------------
// Initiator
// ----------------------------------------------------------------------------

/// Connects outward to two fixed remote endpoints
#[derive(Debug, Clone)]
pub struct Initiator {
    send_addr: Endpoint,
    listen_addr: Endpoint,
}

impl Initiator {
    pub fn new(send_addr: Endpoint, listen_addr: Endpoint) -> Result<Self> {
        ensure_distinct(&send_addr, &listen_addr)?;
        Ok(Self {
            send_addr,
            listen_addr,
        })
    }

    pub fn from_ports(ports: &PortPair) -> Result<Self> {
        let (send_addr, listen_addr) = ports.initiator_endpoints();
        Self::new(send_addr, listen_addr)
    }
}

async fn connect(endpoint: &Endpoint) -> Result<TcpStream> {
    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|source| TransportError::Connect {
            endpoint: endpoint.clone(),
            source,
        })?;
    debug!("Connected to {}", endpoint);
    Ok(stream)
}

#[async_trait]
impl Role for Initiator {
    fn kind(&self) -> RoleKind {
        RoleKind::Initiator
    }

    fn send_addr(&self) -> &Endpoint {
        &self.send_addr
    }

    fn listen_addr(&self) -> &Endpoint {
        &self.listen_addr
    }

    async fn establish(&mut self) -> Result<SocketPair> {
        let send = connect(&self.send_addr).await?;
        let listen = connect(&self.listen_addr).await?;
        info!(
            "Connected to peer (send {}, listen {})",
            self.send_addr, self.listen_addr
        );
        Ok(SocketPair { send, listen })
    }
}

// ----------------------------------------------------------------------------
// Responder
// ----------------------------------------------------------------------------

/// Binds two local ports and accepts exactly one peer connection on each
#[derive(Debug)]
pub struct Responder {
    send_addr: Endpoint,
    listen_addr: Endpoint,
    listeners: Option<(TcpListener, TcpListener)>,
}

impl Responder {
    /// Create a responder that binds when the transport is set up
    pub fn new(send_addr: Endpoint, listen_addr: Endpoint) -> Result<Self> {
        ensure_distinct(&send_addr, &listen_addr)?;
        Ok(Self {
            send_addr,
            listen_addr,
            listeners: None,
        })
    }

    pub fn from_ports(ports: &PortPair) -> Result<Self> {
        let (send_addr, listen_addr) = ports.responder_endpoints();
        Self::new(send_addr, listen_addr)
    }

    /// Bind both listeners now and report the addresses actually bound.
    ///
    /// Port 0 picks a free port; the resolved ports become `send_addr` and
    /// `listen_addr`, so an initiator can be pointed at them before setup.
    pub async fn bind(send_addr: Endpoint, listen_addr: Endpoint) -> Result<Self> {
        let send_listener = bind_listener(&send_addr).await?;
        let listen_listener = bind_listener(&listen_addr).await?;

        let send_addr = local_endpoint(&send_listener, &send_addr)?;
        let listen_addr = local_endpoint(&listen_listener, &listen_addr)?;
        ensure_distinct(&send_addr, &listen_addr)?;

        Ok(Self {
            send_addr,
            listen_addr,
            listeners: Some((send_listener, listen_listener)),
        })
    }

    pub fn is_bound(&self) -> bool {
        self.listeners.is_some()
    }
}

async fn bind_listener(endpoint: &Endpoint) -> Result<TcpListener> {
    let bind_err = |source: std::io::Error| TransportError::Bind {
        endpoint: endpoint.clone(),
        source,
    };

    let addr = endpoint.resolve().await.map_err(bind_err)?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;

    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    let listener = socket.listen(RESPONDER_BACKLOG).map_err(bind_err)?;
    debug!("Listening on {}", endpoint);
    Ok(listener)
}

fn local_endpoint(listener: &TcpListener, requested: &Endpoint) -> Result<Endpoint> {
    let local = listener.local_addr().map_err(|source| TransportError::Bind {
        endpoint: requested.clone(),
        source,
    })?;
    Ok(Endpoint::new(requested.host.clone(), local.port()))
}

async fn accept_one(listener: &TcpListener, endpoint: &Endpoint) -> Result<TcpStream> {
    let (stream, peer) = listener
        .accept()
        .await
        .map_err(|source| TransportError::Accept {
            endpoint: endpoint.clone(),
            source,
        })?;
    info!("Accepted peer {} on {}", peer, endpoint);
    Ok(stream)
}

#[async_trait]
impl Role for Responder {
    fn kind(&self) -> RoleKind {
        RoleKind::Responder
    }

    fn send_addr(&self) -> &Endpoint {
        &self.send_addr
    }

    fn listen_addr(&self) -> &Endpoint {
        &self.listen_addr
    }

    async fn establish(&mut self) -> Result<SocketPair> {
        let (send_listener, listen_listener) = match self.listeners.take() {
            Some(listeners) => listeners,
            None => (
                bind_listener(&self.send_addr).await?,
                bind_listener(&self.listen_addr).await?,
            ),
        };

        info!(
            "Waiting for peer (send {}, listen {})",
            self.send_addr, self.listen_addr
        );
        let send = accept_one(&send_listener, &self.send_addr).await?;
        let listen = accept_one(&listen_listener, &self.listen_addr).await?;
        Ok(SocketPair { send, listen })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

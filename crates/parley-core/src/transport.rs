//! Duplex messaging transport
//!
//! A [`Transport`] owns the two sockets of a session: it sends on one and
//! receives on the other. Setup is delegated to a [`Role`]; once both sockets
//! are connected the transport behaves the same whichever side it plays.
//!
//! ## Lifecycle
//!
//! `Uninitialized -> SettingUp -> Active -> Closing -> Closed`
//!
//! The session ends when the termination [`Signal`] is set, by the host or by
//! the transport itself (peer closed, socket error, quit frame). Either way
//! both sockets are closed and the signal stays set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{TransportConfig, MAX_RECV_BUFFER_SIZE};
use crate::errors::{Result, TransportError};
use crate::role::{Endpoint, Role, RoleKind, SocketPair};
use crate::signal::Signal;
use crate::sink::Sink;
use crate::wire::{Frame, FrameDecoder};

// ----------------------------------------------------------------------------
// Lifecycle Types
// ----------------------------------------------------------------------------

/// Where a transport is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    SettingUp,
    Active,
    Closing,
    Closed,
}

/// How a session ended, handed back to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed its side (zero-length read)
    PeerClosed,
    /// The termination signal was set by the host
    Signalled,
    /// The peer sent a quit frame
    QuitReceived,
    /// This side sent a quit frame
    QuitSent,
    /// A socket error ended the session
    Failed(String),
}

impl SessionEnd {
    /// Whether the session ended without a socket error
    pub fn is_clean(&self) -> bool {
        !matches!(self, SessionEnd::Failed(_))
    }
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// Two-socket duplex transport, shared between the host and its receive task
#[derive(Debug)]
pub struct Transport {
    role: tokio::sync::Mutex<Box<dyn Role>>,
    kind: RoleKind,
    send_addr: Endpoint,
    listen_addr: Endpoint,
    recv_buffer_size: usize,
    quit_on_token: bool,
    state: Mutex<TransportState>,
    send_socket: tokio::sync::Mutex<Option<TcpStream>>,
    listen_socket: Mutex<Option<TcpStream>>,
    signal: Mutex<Option<Signal>>,
    shutdown: Signal,
    quit_sent: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport {
    /// Create a transport with default settings
    pub fn new(role: impl Role + 'static) -> Self {
        Self::with_config(Box::new(role), &TransportConfig::default())
    }

    /// Create a transport for an already boxed role
    pub fn with_config(role: Box<dyn Role>, config: &TransportConfig) -> Self {
        Self {
            kind: role.kind(),
            send_addr: role.send_addr().clone(),
            listen_addr: role.listen_addr().clone(),
            role: tokio::sync::Mutex::new(role),
            recv_buffer_size: config.recv_buffer_size.clamp(1, MAX_RECV_BUFFER_SIZE),
            quit_on_token: config.quit_on_token,
            state: Mutex::new(TransportState::Uninitialized),
            send_socket: tokio::sync::Mutex::new(None),
            listen_socket: Mutex::new(None),
            signal: Mutex::new(None),
            shutdown: Signal::new(),
            quit_sent: AtomicBool::new(false),
        }
    }

    /// Build the role for `kind` from `config` and wrap it
    pub fn from_config(kind: RoleKind, config: &TransportConfig) -> Result<Self> {
        let role = config.role(kind)?;
        Ok(Self::with_config(role, config))
    }

    pub fn kind(&self) -> RoleKind {
        self.kind
    }

    pub fn send_addr(&self) -> &Endpoint {
        &self.send_addr
    }

    pub fn listen_addr(&self) -> &Endpoint {
        &self.listen_addr
    }

    pub fn state(&self) -> TransportState {
        *lock(&self.state)
    }

    fn set_state(&self, state: TransportState) {
        *lock(&self.state) = state;
    }

    fn attached_signal(&self) -> Option<Signal> {
        lock(&self.signal).clone()
    }

    /// Resolves once the transport is closing or the session signal is set
    async fn stopping(&self) {
        match self.attached_signal() {
            Some(signal) => tokio::select! {
                _ = signal.wait() => {}
                _ = self.shutdown.wait() => {}
            },
            None => self.shutdown.wait().await,
        }
    }

    fn attach(&self, signal: Signal) -> Result<()> {
        let mut slot = lock(&self.signal);
        if slot.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        *slot = Some(signal);
        Ok(())
    }

    /// Connect both sockets through the role
    ///
    /// Setup errors are fatal and leave the transport `Closed`. If the
    /// transport was started with a signal, setting it aborts a pending
    /// connect or accept.
    pub async fn setup(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            match *state {
                TransportState::Uninitialized => *state = TransportState::SettingUp,
                TransportState::Closing | TransportState::Closed => {
                    return Err(TransportError::TransportClosed)
                }
                TransportState::SettingUp | TransportState::Active => {
                    return Err(TransportError::AlreadyStarted)
                }
            }
        }

        debug!(
            "Setting up {} transport (send {}, listen {})",
            self.kind, self.send_addr, self.listen_addr
        );

        let established = {
            let mut role = self.role.lock().await;
            match self.attached_signal() {
                Some(signal) => tokio::select! {
                    result = role.establish() => result,
                    _ = signal.wait() => Err(TransportError::TransportClosed),
                },
                None => role.establish().await,
            }
        };

        let SocketPair { send, listen } = match established {
            Ok(pair) => pair,
            Err(e) => {
                self.set_state(TransportState::Closed);
                return Err(e);
            }
        };

        {
            let mut send_slot = self.send_socket.lock().await;
            let mut state = lock(&self.state);
            if *state != TransportState::SettingUp {
                // Closed while connecting; the fresh sockets drop here.
                return Err(TransportError::TransportClosed);
            }
            *send_slot = Some(send);
            *lock(&self.listen_socket) = Some(listen);
            *state = TransportState::Active;
        }

        info!("{} transport active", self.kind);
        Ok(())
    }

    /// Send one text message to the peer
    pub async fn send(&self, text: &str) -> Result<()> {
        self.send_frame(&Frame::text(text)).await
    }

    /// Tell the peer this side is typing
    pub async fn send_typing(&self) -> Result<()> {
        self.send_frame(&Frame::Typing).await
    }

    /// Send a quit frame; ends the session when `quit_on_token` is enabled
    pub async fn send_quit(&self) -> Result<()> {
        self.send_frame(&Frame::Quit).await
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let write_result = {
            let mut socket = self.send_socket.lock().await;
            let stream = match socket.as_mut() {
                Some(stream) => stream,
                None => {
                    return Err(match self.state() {
                        TransportState::Uninitialized | TransportState::SettingUp => {
                            TransportError::NotConnected
                        }
                        _ => TransportError::TransportClosed,
                    })
                }
            };
            let bytes = frame.encode();
            // A peer that stops reading must not hold the socket past the session.
            tokio::select! {
                biased;
                result = stream.write_all(&bytes) => result,
                _ = self.stopping() => {
                    debug!("Send abandoned, session is ending");
                    return Err(TransportError::TransportClosed);
                }
            }
        };

        if let Err(e) = write_result {
            warn!("Send failed, ending session: {}", e);
            self.close().await;
            return Err(TransportError::SessionEnded(e));
        }

        if *frame == Frame::Quit && self.quit_on_token {
            info!("Quit sent, ending session");
            self.quit_sent.store(true, Ordering::SeqCst);
            if let Some(signal) = self.attached_signal() {
                signal.set();
            }
        }
        Ok(())
    }

    /// Receive until `signal` is set or the peer goes away
    ///
    /// Waits on socket readability and the signal together, so a set signal
    /// is observed immediately. Each read takes at most `recv_buffer_size`
    /// bytes; frames and characters cut by a read boundary are completed by
    /// the next read. The signal is always set on return.
    pub async fn listen_loop<S: Sink>(&self, signal: Signal, mut sink: S) -> SessionEnd {
        let taken = lock(&self.listen_socket).take();
        let mut stream = match taken {
            Some(stream) => stream,
            None => {
                signal.set();
                return SessionEnd::Failed(TransportError::NotConnected.to_string());
            }
        };

        let mut buf = vec![0u8; self.recv_buffer_size];
        let mut decoder = FrameDecoder::new();
        let end = 'session: loop {
            tokio::select! {
                biased;
                _ = signal.wait() => {
                    break if self.quit_sent.load(Ordering::SeqCst) {
                        SessionEnd::QuitSent
                    } else {
                        SessionEnd::Signalled
                    };
                }
                read = stream.read(&mut buf) => match read {
                    Ok(0) => {
                        if !decoder.pending().is_empty() {
                            warn!(
                                "Peer closed with {} undecoded bytes",
                                decoder.pending().len()
                            );
                        }
                        info!("Peer closed the connection");
                        break SessionEnd::PeerClosed;
                    }
                    Ok(n) => {
                        debug!("Received {} bytes", n);
                        for frame in decoder.decode(&buf[..n]) {
                            match frame {
                                Ok(Frame::Text(text)) => sink.deliver(text).await,
                                Ok(Frame::Typing) => sink.typing().await,
                                Ok(Frame::Quit) if self.quit_on_token => {
                                    info!("Peer sent quit, ending session");
                                    break 'session SessionEnd::QuitReceived;
                                }
                                Ok(Frame::Quit) => debug!("Ignoring quit frame"),
                                Err(e) => warn!("Dropping inbound bytes: {}", e),
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Receive failed, ending session: {}", e);
                        break SessionEnd::Failed(e.to_string());
                    }
                },
            }
        };

        signal.set();
        drop(stream);
        end
    }

    /// Set up and spawn the receive task without blocking on the session
    ///
    /// For hosts that drive their own event loop. The returned handle yields
    /// the [`SessionEnd`] once the session is over and both sockets are closed.
    pub async fn start<S>(self: &Arc<Self>, signal: Signal, sink: S) -> Result<SessionHandle>
    where
        S: Sink + 'static,
    {
        self.attach(signal.clone())?;

        if let Err(e) = self.setup().await {
            signal.set();
            return Err(e);
        }

        let transport = Arc::clone(self);
        let task_signal = signal.clone();
        let task = tokio::spawn(async move {
            let end = transport.listen_loop(task_signal, sink).await;
            transport.close().await;
            end
        });

        Ok(SessionHandle { task })
    }

    /// Run a whole session: setup, receive in the background, wait for the
    /// signal, close
    pub async fn run<S>(self: &Arc<Self>, signal: Signal, sink: S) -> Result<SessionEnd>
    where
        S: Sink + 'static,
    {
        let session = self.start(signal.clone(), sink).await?;
        signal.wait().await;
        self.close().await;
        let end = session.join().await;
        info!("Session ended: {:?}", end);
        Ok(end)
    }

    /// Close both sockets and assert the session signal
    ///
    /// Idempotent, and safe on a transport that never finished setup.
    pub async fn close(&self) {
        {
            let mut state = lock(&self.state);
            if *state == TransportState::Closed {
                return;
            }
            *state = TransportState::Closing;
        }

        self.shutdown.set();
        if let Some(signal) = self.attached_signal() {
            signal.set();
        }

        if let Some(mut stream) = self.send_socket.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Send socket shutdown: {}", e);
            }
        }
        lock(&self.listen_socket).take();

        self.set_state(TransportState::Closed);
        debug!("{} transport closed", self.kind);
    }
}

// ----------------------------------------------------------------------------
// Session Handle
// ----------------------------------------------------------------------------

/// A running session started with [`Transport::start`]
#[derive(Debug)]
pub struct SessionHandle {
    task: JoinHandle<SessionEnd>,
}

impl SessionHandle {
    /// Wait for the receive task to finish
    pub async fn join(self) -> SessionEnd {
        match self.task.await {
            Ok(end) => end,
            Err(e) => SessionEnd::Failed(format!("Receive task failed: {}", e)),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{Initiator, Responder};

    fn unreachable_initiator() -> Initiator {
        Initiator::new(Endpoint::localhost(1), Endpoint::localhost(2)).unwrap()
    }

    #[tokio::test]
    async fn test_new_transport_is_uninitialized() {
        let transport = Transport::new(unreachable_initiator());
        assert_eq!(transport.state(), TransportState::Uninitialized);
        assert_eq!(transport.kind(), RoleKind::Initiator);
        assert_eq!(transport.send_addr(), &Endpoint::localhost(1));
        assert_eq!(transport.listen_addr(), &Endpoint::localhost(2));
    }

    #[tokio::test]
    async fn test_send_before_setup_is_not_connected() {
        let transport = Transport::new(unreachable_initiator());
        let err = transport.send("hi").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_before_setup_is_idempotent() {
        let transport = Transport::new(unreachable_initiator());
        transport.close().await;
        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);

        let err = transport.send("hi").await.unwrap_err();
        assert!(matches!(err, TransportError::TransportClosed));
        let err = transport.setup().await.unwrap_err();
        assert!(matches!(err, TransportError::TransportClosed));
    }

    #[tokio::test]
    async fn test_listen_loop_without_setup_sets_signal() {
        let transport = Transport::new(unreachable_initiator());
        let signal = Signal::new();
        let end = transport.listen_loop(signal.clone(), |_: String| {}).await;
        assert!(matches!(end, SessionEnd::Failed(_)));
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_signal_aborts_pending_accept() {
        let responder = Responder::bind(Endpoint::localhost(0), Endpoint::localhost(0))
            .await
            .unwrap();
        let transport = Arc::new(Transport::new(responder));
        let signal = Signal::new();

        let starting = {
            let transport = Arc::clone(&transport);
            let signal = signal.clone();
            tokio::spawn(async move { transport.start(signal, |_: String| {}).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        signal.set();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), starting)
            .await
            .expect("setup should abort once the signal is set")
            .unwrap();
        assert!(matches!(result, Err(TransportError::TransportClosed)));
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[test]
    fn test_receive_buffer_is_bounded() {
        let config = TransportConfig {
            recv_buffer_size: usize::MAX,
            ..TransportConfig::default()
        };
        let transport = Transport::with_config(Box::new(unreachable_initiator()), &config);
        assert_eq!(transport.recv_buffer_size, MAX_RECV_BUFFER_SIZE);
    }

    #[test]
    fn test_session_end_cleanliness() {
        assert!(SessionEnd::PeerClosed.is_clean());
        assert!(SessionEnd::QuitReceived.is_clean());
        assert!(!SessionEnd::Failed("reset".to_string()).is_clean());
    }
}

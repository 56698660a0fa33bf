//! Parley Core
//!
//! Duplex messaging transport for the Parley peer-to-peer messenger. Two
//! endpoints exchange text over a pair of TCP connections, one per direction.
//! The [`Initiator`] connects out, the [`Responder`] binds and accepts; after
//! setup both are driven through the same [`Transport`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley_core::{PortPair, Responder, Signal, Transport};
//!
//! # async fn demo() -> parley_core::Result<()> {
//! let transport = Arc::new(Transport::new(Responder::from_ports(&PortPair::default())?));
//! let signal = Signal::new();
//! let end = transport.run(signal, |text: String| print!("{}", text)).await?;
//! println!("session ended: {:?}", end);
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod role;
pub mod signal;
pub mod sink;
pub mod transport;
pub mod wire;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{TransportConfig, DEFAULT_RECV_BUFFER_SIZE, MAX_RECV_BUFFER_SIZE};
pub use errors::{Result, TransportError};
pub use role::{Endpoint, Initiator, PortPair, Responder, Role, RoleKind, SocketPair};
pub use signal::Signal;
pub use sink::Sink;
pub use transport::{SessionEnd, SessionHandle, Transport, TransportState};
pub use wire::{DecodeError, Frame, FrameDecoder};

//! Transport configuration

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TransportError};
use crate::role::{Initiator, PortPair, Responder, Role, RoleKind};

/// Upper bound for a single `recv`
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 2048;

/// Largest receive buffer a configuration may ask for
pub const MAX_RECV_BUFFER_SIZE: usize = 1024 * 1024;

/// Settings shared by both roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum number of bytes read per `recv`
    pub recv_buffer_size: usize,

    /// Treat quit frames as session termination in both directions
    pub quit_on_token: bool,

    /// Host and port convention for the pair
    pub ports: PortPair,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            quit_on_token: false,
            ports: PortPair::default(),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.recv_buffer_size == 0 || self.recv_buffer_size > MAX_RECV_BUFFER_SIZE {
            return Err(TransportError::InvalidConfiguration {
                reason: format!(
                    "recv_buffer_size must be between 1 and {}, got {}",
                    MAX_RECV_BUFFER_SIZE, self.recv_buffer_size
                ),
            });
        }

        if self.ports.host.is_empty() {
            return Err(TransportError::InvalidConfiguration {
                reason: "host must not be empty".to_string(),
            });
        }

        if self.ports.responder_send_port == self.ports.responder_listen_port {
            return Err(TransportError::InvalidConfiguration {
                reason: format!(
                    "send and listen ports must differ, both are {}",
                    self.ports.responder_send_port
                ),
            });
        }

        Ok(())
    }

    /// Build the role for `kind` from the configured port pair
    pub fn role(&self, kind: RoleKind) -> Result<Box<dyn Role>> {
        self.validate()?;
        Ok(match kind {
            RoleKind::Initiator => Box::new(Initiator::from_ports(&self.ports)?),
            RoleKind::Responder => Box::new(Responder::from_ports(&self.ports)?),
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

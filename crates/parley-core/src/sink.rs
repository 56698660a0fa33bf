//! Inbound delivery interface
//!
//! The host hands the transport a [`Sink`] and receives one delivery per
//! received text chunk. Closures and tokio channels work out of the box.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

/// Receiver of decoded inbound messages, owned by the host application
#[async_trait]
pub trait Sink: Send {
    /// Deliver one decoded text chunk
    async fn deliver(&mut self, text: String);

    /// The peer reported that it is typing
    async fn typing(&mut self) {}
}

#[async_trait]
impl<F> Sink for F
where
    F: FnMut(String) + Send,
{
    async fn deliver(&mut self, text: String) {
        self(text)
    }
}

#[async_trait]
impl Sink for mpsc::UnboundedSender<String> {
    async fn deliver(&mut self, text: String) {
        if self.send(text).is_err() {
            warn!("Inbound queue receiver dropped, discarding message");
        }
    }
}

#[async_trait]
impl Sink for mpsc::Sender<String> {
    async fn deliver(&mut self, text: String) {
        if self.send(text).await.is_err() {
            warn!("Inbound queue receiver dropped, discarding message");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

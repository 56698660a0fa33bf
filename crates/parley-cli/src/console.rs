//! Console front-end
//!
//! Reads outbound lines from stdin, prints inbound text, and turns the quit
//! command into a quit frame. The stdin reader runs on a dedicated thread so a
//! pending read never holds up the async runtime.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use parley_core::{RoleKind, SessionEnd, Signal, Sink, Transport, TransportError};

use crate::config::ConsoleConfig;
use crate::error::Result;

/// Output shared between inbound printing and local echo
pub type SharedOutput<W> = Arc<Mutex<W>>;

/// Format one chat line, dropping the trailing line break
pub fn format_line(label: &str, text: &str) -> String {
    format!("{}: {}", label, text.trim_end_matches(['\r', '\n']))
}

fn write_line<W: Write>(output: &SharedOutput<W>, line: &str) {
    let mut out = output.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
        warn!("Failed to write to console: {}", e);
    }
}

// ----------------------------------------------------------------------------
// Inbound Sink
// ----------------------------------------------------------------------------

/// Prints every inbound message with the peer label
pub struct ConsoleSink<W> {
    label: String,
    output: SharedOutput<W>,
}

impl<W> ConsoleSink<W> {
    pub fn new(label: impl Into<String>, output: SharedOutput<W>) -> Self {
        Self {
            label: label.into(),
            output,
        }
    }
}

#[async_trait]
impl<W: Write + Send> Sink for ConsoleSink<W> {
    async fn deliver(&mut self, text: String) {
        write_line(&self.output, &format_line(&self.label, &text));
    }

    async fn typing(&mut self) {
        debug!("{} is typing", self.label);
    }
}

// ----------------------------------------------------------------------------
// Stdin Reader
// ----------------------------------------------------------------------------

/// Forward stdin lines on a dedicated thread until EOF or the signal is set
pub fn spawn_stdin_reader(signal: Signal) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        while !signal.is_set() {
            match lines.next() {
                Some(Ok(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
                None => break,
            }
        }
        debug!("Stdin reader stopped");
    });

    rx
}

// ----------------------------------------------------------------------------
// Console Session
// ----------------------------------------------------------------------------

/// One interactive chat session on top of a transport
pub struct Console<W> {
    transport: Arc<Transport>,
    config: ConsoleConfig,
    output: SharedOutput<W>,
}

impl<W: Write + Send + 'static> Console<W> {
    pub fn new(transport: Arc<Transport>, config: ConsoleConfig, output: SharedOutput<W>) -> Self {
        Self {
            transport,
            config,
            output,
        }
    }

    /// Run until the user quits, input ends, or the peer leaves
    ///
    /// Setup failures are returned as errors; everything after setup ends in
    /// a [`SessionEnd`].
    pub async fn run(
        &self,
        signal: Signal,
        mut input: mpsc::UnboundedReceiver<String>,
    ) -> Result<SessionEnd> {
        if self.transport.kind() == RoleKind::Responder {
            write_line(&self.output, "Waiting for peer...");
        }

        let sink = ConsoleSink::new(self.config.peer_label.clone(), Arc::clone(&self.output));
        let session = self.transport.start(signal.clone(), sink).await?;

        write_line(
            &self.output,
            &format!(
                "Type {} to quit\nEnter message to send...",
                self.config.quit_command
            ),
        );

        loop {
            tokio::select! {
                biased;
                _ = signal.wait() => break,
                line = input.recv() => match line {
                    Some(line) => {
                        if !self.handle_line(&signal, &line).await {
                            break;
                        }
                    }
                    None => {
                        info!("Input closed, ending session");
                        signal.set();
                        break;
                    }
                },
            }
        }

        self.transport.close().await;
        Ok(session.join().await)
    }

    /// Send one input line. Returns `false` once the session should end.
    async fn handle_line(&self, signal: &Signal, line: &str) -> bool {
        if line.trim() == self.config.quit_command {
            if let Err(e) = self.transport.send_quit().await {
                debug!("Quit frame not sent: {}", e);
            }
            // Without the quit policy the peer learns about it from the socket close.
            signal.set();
            return false;
        }

        match self.transport.send(&format!("{}\n", line)).await {
            Ok(()) => {
                write_line(&self.output, &format_line(&self.config.local_label, line));
                true
            }
            Err(TransportError::SessionEnded(e)) => {
                warn!("Peer connection lost: {}", e);
                false
            }
            Err(e) => {
                warn!("Message not sent: {}", e);
                !signal.is_set()
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

//! Command hand-off from the orchestrator and operator side to the link thread.

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::TransportError;
use crate::icd::Command;

/// Anything that accepts commands bound for the firmware
///
/// Sending never blocks: commands are queued and written in order on the
/// link's single socket, between status polls.
pub trait CommandSink: Send + Sync {
    /// Queue a command for transmission
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ChannelClosed` if the link is gone
    fn send(&self, command: Command) -> Result<(), TransportError>;
}

/// Cloneable queue handle feeding the link thread
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Create a sender and the receiver the link drains
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CommandSink for CommandSender {
    fn send(&self, command: Command) -> Result<(), TransportError> {
        trace!("queue {}", command.name());
        self.tx
            .send(command)
            .map_err(|_| TransportError::ChannelClosed)
    }
}

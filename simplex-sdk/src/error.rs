//! Error taxonomy for the daemon client.

use std::time::Duration;

/// Everything that can go wrong between a bot module and the chat daemon.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// The websocket to `ws://host:port` could not be opened.
    #[error("failed to connect to chat daemon on port {port}: {source}")]
    Connect {
        port: u16,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// The socket went away before a reply arrived.
    #[error("connection to chat daemon on port {port} is closed")]
    Closed { port: u16 },
    /// No reply carrying our correlation id arrived in time.
    #[error("timeout after {}s waiting for reply to command: {command}", .after.as_secs())]
    Timeout { command: String, after: Duration },
    /// The reply did not match any known response shape.
    #[error("could not decode daemon response: {0}")]
    Decode(String),
    /// The daemon rejected the command. Carries the remote error text.
    #[error("{0}")]
    Command(String),
    /// A chat history item could not be decoded. Fatal for the polling module.
    #[error("unparseable chat item: {0}")]
    Reconciliation(String),
}

impl SdkError {
    /// Errors after which a polling loop must not continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SdkError::Reconciliation(_))
    }
}

pub type Result<T, E = SdkError> = std::result::Result<T, E>;

//! Link errors

use thiserror::Error;

/// Errors that can occur while talking to the multimeter
#[derive(Error, Debug)]
pub enum LinkError {
    /// Opening or configuring the port failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Nothing arrived before the read timeout
    #[error("Read timed out with no data")]
    Timeout,

    /// The link has no open channel
    #[error("Not connected to instrument")]
    NotConnected,

    /// Handshake requested on a link that is already synced
    #[error("Link already synced")]
    AlreadySynced,

    /// The port answered, but not like the instrument
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Replies stopped lining up with requests
    #[error("Lost sync after {reads} extra reads (last line {last:?})")]
    Desync {
        /// Extra reads spent looking for a measurement
        reads: u32,
        /// Last line received
        last: String,
    },

    /// No candidate port answered the handshake
    #[error("No instrument found on {tried} candidate port(s)")]
    NotFound {
        /// Ports attempted
        tried: usize,
    },

    /// Raw I/O failure on the channel
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LinkError {
    /// Errors that mean the port is unusable and must be closed
    pub fn is_link_loss(&self) -> bool {
        matches!(
            self,
            LinkError::SerialError(_)
                | LinkError::Timeout
                | LinkError::NotConnected
                | LinkError::Desync { .. }
                | LinkError::IoError(_)
        )
    }
}

//! Client errors.
//!
//! Only conditions the caller cannot treat as an ordinary protocol result
//! end up here. Timeouts and dropped frames are values, see [`crate::Reply`].

use std::io;
use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The local endpoint could not be created.
    #[error("failed to bind local endpoint: {0}")]
    Bind(#[source] io::Error),

    /// The datagram could not be handed to the network stack.
    #[error("failed to send to {server}: {source}")]
    Send {
        server: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to receive: {0}")]
    Receive(#[source] io::Error),

    /// The encoded request does not fit in one datagram.
    #[error("datagram of {size} bytes exceeds the {max} byte limit")]
    DatagramTooLarge { size: usize, max: usize },
}

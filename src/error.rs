use std::io;
use std::time::Duration;

use thiserror::Error as ThisError;

/// Transport level failures. Background tasks never return these; they hand them to the
/// handler's `on_exception` callback instead.
#[derive(Debug, ThisError)]
pub enum SocketError {
    #[error("write queue overflow, data discarded")]
    QueueOverflow,
    #[error("no activity for {0:?}")]
    IdleTimeout(Duration),
    #[error("connect attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("connection closed by peer")]
    PeerClosed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

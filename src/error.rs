use std::io;

/// Everything that can go wrong inside the client.
///
/// Server `-ERR` replies are not errors at this level: they come back as
/// [`Output::Error`](crate::Output::Error) values inside the batch result so
/// the rest of a pipelined batch stays readable. Likewise a discarded
/// transaction surfaces as `false`, not as an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection URL could not be understood.
    #[error("invalid connection url: {0}")]
    Config(String),

    /// Connecting, the TLS handshake, `AUTH` or `SELECT` failed.
    #[error("could not establish connection: {0}")]
    Connect(String),

    /// An argument's JSON serialisation failed.
    #[error("could not encode argument: {0}")]
    Encode(#[from] serde_json::Error),

    /// Malformed RESP framing. The connection that produced this is broken
    /// and will not be pooled again.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Transport failure on the socket.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The pool was shut down; no further connections are handed out.
    #[error("connection pool is closed")]
    PoolClosed,
}

pub(crate) fn protocol(msg: impl Into<String>) -> Error {
    Error::Protocol(msg.into())
}

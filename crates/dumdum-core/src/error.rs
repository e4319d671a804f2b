//! Error types for dumdum.
//!
//! Protocol violations (malformed data, buffer overflow, invalid state)
//! are fatal: whoever holds the protocol instance must close the
//! connection. "Need more data" is never an error here; the byte reader
//! reports it separately through [`crate::protocol::ReadError`].

use thiserror::Error;

/// Core error type for dumdum operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Unambiguously malformed data (unknown tag, invalid UTF-8, truncated batch).
    #[error("malformed data: {0}")]
    MalformedData(String),

    /// A variable-length field declared a length above its bound.
    #[error("expected length up to {max_length}, got {length} instead")]
    InvalidLength {
        /// Declared or actual length.
        length: usize,
        /// Maximum permitted length.
        max_length: usize,
    },

    /// An operation was attempted in a state that does not allow it.
    #[error("{machine} must be {}, but is currently {current}", expected.join(" or "))]
    InvalidState {
        /// Name of the state machine.
        machine: &'static str,
        /// Current state name.
        current: &'static str,
        /// States in which the operation is legal.
        expected: Vec<&'static str>,
    },

    /// Accumulated unparsed input would exceed the configured ceiling.
    #[error("buffer limit cannot be exceeded ({limit} bytes)")]
    BufferOverflow {
        /// Configured ceiling.
        limit: usize,
        /// Bytes already buffered.
        buffered: usize,
        /// Bytes that were being appended.
        incoming: usize,
    },

    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server refused our protocol version.
    #[error("server requires protocol version {server_version}, we speak {client_version}")]
    IncompatibleVersion {
        /// Version the server requires.
        server_version: u8,
        /// Version we sent.
        client_version: u8,
    },

    /// The server rejected our nickname.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The server wants TLS and no connector was configured.
    #[error("server requires TLS but no TLS configuration was provided")]
    TlsRequired,

    /// TLS setup or handshake failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using dumdum's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Malformed input, including out-of-bound lengths.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MalformedData(_) | Error::InvalidLength { .. })
    }

    /// Protocol violations after which the connection must be closed.
    pub fn is_fatal(&self) -> bool {
        self.is_malformed()
            || matches!(self, Error::BufferOverflow { .. } | Error::InvalidState { .. })
    }

    /// Expected disconnects that are not worth an error-level log line.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

use thiserror::Error;

pub mod common;
pub mod framing;
pub mod tcp;

/// Error types for the netframe library
#[derive(Error, Debug)]
pub enum NetError {
    /// `connect` was called on a client that already has a live connection
    #[error("Unable to connect: client is already connected")]
    AlreadyConnected,

    /// The operation requires an established connection
    #[error("Client is not connected")]
    NotConnected,

    /// Protocol-specific configuration was accessed on the wrong protocol type
    #[error("Protocol mismatch: operation requires the {expected} protocol, but {actual} is configured")]
    ProtocolMismatch {
        expected: ProtocolType,
        actual: ProtocolType,
    },

    /// No client with this ID is currently registered
    #[error("No client with id {0} exists")]
    UnknownClient(ClientId),

    /// The transport was closed (end of stream or closed write queue)
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// TCP connect or TLS negotiation failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Socket-level I/O errors (bind, accept, read, write)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Payload that cannot be framed by the configured protocol
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Result type for the netframe library
pub type Result<T> = std::result::Result<T, NetError>;

// Re-export main types for convenience
pub use common::{
    ClientHandler, ClientId, DataContainer, DisconnectReason, NoopHandler, ServerHandler, TextCodec,
};
pub use framing::{FramingProtocol, ProtocolType};
pub use tcp::{
    CertificateValidation, ClientConfig, NetClient, NetServer, ServerConfig, TlsOptions,
};

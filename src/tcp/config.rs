use crate::Result;
use crate::common::TextCodec;
use crate::framing::{DEFAULT_DELIMITER, FramingProtocol, ProtocolType};
use rustls::client::danger::ServerCertVerifier;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`NetClient`](super::NetClient)
///
/// # Examples
///
/// ```
/// use netframe::{ClientConfig, ProtocolType, TextCodec};
/// use std::time::Duration;
///
/// let config = ClientConfig::new(ProtocolType::Delimited)
///     .with_delimiter(b"\n")
///     .with_text_codec(TextCodec::Latin1)
///     .with_dispatch_interval(Duration::from_millis(10));
///
/// assert_eq!(config.delimiter, b"\n".to_vec());
/// ```
///
/// Using the default configuration:
///
/// ```
/// use netframe::{ClientConfig, ProtocolType};
///
/// let config = ClientConfig::default();
/// assert_eq!(config.protocol, ProtocolType::Delimited);
/// assert_eq!(config.delimiter, b"\r\n".to_vec());
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Wire framing
    pub protocol: ProtocolType,
    /// Codec used to decode message text and encode `send` strings
    pub text_codec: TextCodec,
    /// Message delimiter (delimited protocol only)
    pub delimiter: Vec<u8>,
    /// Frame width in bytes (fixed-size protocol only, must be non-zero)
    pub frame_size: usize,
    /// Local endpoint to bind before connecting
    pub local_addr: Option<SocketAddr>,
    /// Idle wait of the dispatch loop when no message is queued; zero busy-polls
    pub dispatch_interval: Duration,
    /// Upper bound on TCP connect plus TLS handshake
    pub connect_timeout: Duration,
    /// Size of the socket read buffer
    pub buffer_size: usize,
}

impl ClientConfig {
    /// Create a new configuration for the given protocol
    pub fn new(protocol: ProtocolType) -> Self {
        Self {
            protocol,
            text_codec: TextCodec::Utf8,
            delimiter: DEFAULT_DELIMITER.to_vec(),
            frame_size: 0,
            local_addr: None,
            dispatch_interval: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(10),
            buffer_size: 8192,
        }
    }

    pub fn with_text_codec(mut self, codec: TextCodec) -> Self {
        self.text_codec = codec;
        self
    }

    pub fn with_delimiter(mut self, delimiter: &[u8]) -> Self {
        self.delimiter = delimiter.to_vec();
        self
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Validates the protocol parameters and builds the framing protocol
    pub fn framing(&self) -> Result<FramingProtocol> {
        FramingProtocol::from_config(
            self.protocol,
            self.text_codec,
            &self.delimiter,
            self.frame_size,
        )
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(ProtocolType::Delimited)
    }
}

/// Configuration for a [`NetServer`](super::NetServer)
///
/// # Examples
///
/// ```
/// use netframe::{ProtocolType, ServerConfig};
///
/// let config = ServerConfig::new("127.0.0.1:9000".parse().unwrap(), ProtocolType::FixedSize)
///     .with_frame_size(16)
///     .with_max_connections(10);
///
/// assert_eq!(config.frame_size, 16);
/// assert_eq!(config.max_connections, 10);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub bind_addr: SocketAddr,
    /// Wire framing, applied to every accepted connection
    pub protocol: ProtocolType,
    /// Codec used to decode message text and encode `send` strings
    pub text_codec: TextCodec,
    /// Message delimiter (delimited protocol only)
    pub delimiter: Vec<u8>,
    /// Frame width in bytes (fixed-size protocol only, must be non-zero)
    pub frame_size: usize,
    /// Maximum number of concurrently registered clients
    pub max_connections: usize,
    /// Size of each client's read buffer
    pub buffer_size: usize,
}

impl ServerConfig {
    /// Create a new configuration with the given address and protocol
    pub fn new(bind_addr: SocketAddr, protocol: ProtocolType) -> Self {
        Self {
            bind_addr,
            protocol,
            text_codec: TextCodec::Utf8,
            delimiter: DEFAULT_DELIMITER.to_vec(),
            frame_size: 0,
            max_connections: 1000,
            buffer_size: 8192,
        }
    }

    pub fn with_text_codec(mut self, codec: TextCodec) -> Self {
        self.text_codec = codec;
        self
    }

    pub fn with_delimiter(mut self, delimiter: &[u8]) -> Self {
        self.delimiter = delimiter.to_vec();
        self
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Validates the protocol parameters and builds the framing template
    pub fn framing(&self) -> Result<FramingProtocol> {
        FramingProtocol::from_config(
            self.protocol,
            self.text_codec,
            &self.delimiter,
            self.frame_size,
        )
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(([127, 0, 0, 1], 0).into(), ProtocolType::Delimited)
    }
}

/// How the server certificate is checked during a TLS handshake
#[derive(Debug, Clone, Default)]
pub enum CertificateValidation {
    /// Verify the chain against the bundled Mozilla root store
    #[default]
    WebPki,
    /// Accept any certificate. Only for testing against self-signed peers.
    Disabled,
    /// Delegate the decision to a caller-supplied verifier
    Custom(Arc<dyn ServerCertVerifier>),
}

/// TLS settings for [`NetClient::connect_secure`](super::NetClient::connect_secure)
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub validation: CertificateValidation,
}

impl TlsOptions {
    /// Validation on or off, mirroring a plain boolean switch
    pub fn validate(enabled: bool) -> Self {
        let validation = if enabled {
            CertificateValidation::WebPki
        } else {
            CertificateValidation::Disabled
        };
        Self { validation }
    }

    pub fn with_verifier(verifier: Arc<dyn ServerCertVerifier>) -> Self {
        Self {
            validation: CertificateValidation::Custom(verifier),
        }
    }
}

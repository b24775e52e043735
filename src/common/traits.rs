use super::ClientId;
use crate::NetError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Why a connection ended
#[derive(Debug)]
pub enum DisconnectReason {
    /// The local side called `disconnect`
    Requested,
    /// The peer closed the stream (zero-length read)
    EndOfStream,
    /// A read or write failed while the connection was live
    Failed(NetError),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "disconnect requested"),
            DisconnectReason::EndOfStream => write!(f, "end of stream reached"),
            DisconnectReason::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Event handler for a [`NetClient`](crate::NetClient)
///
/// Every method has an empty default, so implementors only override the
/// events they care about. Message events are delivered from the client's
/// dispatch loop in the order the frames completed; a slow handler delays
/// later messages but never the socket reads.
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// A framed message is available, decoded as text
    async fn on_text(&self, _text: &str, _client_id: ClientId) {}

    /// A framed message is available, as raw bytes
    async fn on_bytes(&self, _bytes: &Bytes, _client_id: ClientId) {}

    /// The connection ended. Fires at most once per connection, after every
    /// message read before the close has been delivered.
    async fn on_disconnected(&self, _reason: &DisconnectReason) {}

    /// The local port was bound during connect
    async fn on_local_port_known(&self, _port: u16) {}

    /// Connection-level diagnostics
    async fn on_log(&self, _message: &str) {}
}

/// Event handler for a [`NetServer`](crate::NetServer)
///
/// Message events for one client are delivered in frame order from that
/// client's read loop. Handlers may call back into the server (e.g. `send`).
#[async_trait]
pub trait ServerHandler: Send + Sync + 'static {
    /// A client was accepted and registered; no message event for this ID
    /// fires before this returns
    async fn on_client_connected(&self, _client_id: ClientId) {}

    /// A registered client dropped. Fires at most once per client.
    async fn on_client_disconnected(&self, _client_id: ClientId, _reason: &DisconnectReason) {}

    /// A framed message is available, decoded as text
    async fn on_text(&self, _text: &str, _client_id: ClientId) {}

    /// A framed message is available, as raw bytes
    async fn on_bytes(&self, _bytes: &Bytes, _client_id: ClientId) {}

    /// Server-level diagnostics
    async fn on_log(&self, _message: &str) {}
}

/// Handler that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ClientHandler for NoopHandler {}

impl ServerHandler for NoopHandler {}

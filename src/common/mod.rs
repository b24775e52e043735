//! Common traits and types used across the netframe library
//!
//! This module contains the message value type, the text codecs and the
//! handler traits through which clients and servers report events.

pub mod codec;
pub mod container;
pub mod test_utils;
pub mod traits;

pub use codec::TextCodec;
pub use container::DataContainer;
pub use traits::{ClientHandler, DisconnectReason, NoopHandler, ServerHandler};

/// Identifier of one accepted server connection.
///
/// Client-side events carry `0`; server-assigned IDs start at `1`.
pub type ClientId = u64;

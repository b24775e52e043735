//! TCP client and server built on the framing protocols
//!
//! Each connection runs a read loop and a writer loop on their own Tokio
//! tasks. The writer drains a queue filled by `send`, so writes to one socket
//! never interleave.

pub mod client;
pub mod config;
pub mod server;
pub mod tls;
pub mod transport;


pub use client::NetClient;
pub use config::{CertificateValidation, ClientConfig, ServerConfig, TlsOptions};
pub use server::NetServer;

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Locks a mutex, recovering the data if a handler panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writes one coalesced batch and flushes it
pub(crate) async fn write_batch<W>(writer: &mut W, batch: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(batch).await?;
    writer.flush().await
}

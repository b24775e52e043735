use super::config::{ClientConfig, TlsOptions};
use super::{lock, write_batch};
use super::tls;
use super::transport::{BoxedTransport, connect_tcp};
use crate::common::{ClientHandler, DataContainer, DisconnectReason};
use crate::framing::FramingProtocol;
use crate::{NetError, Result};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Client-side events carry this ID
const CLIENT_SIDE_ID: u64 = 0;

/// One live connection: the handles its three loops share
struct Session {
    outgoing: UnboundedSender<Bytes>,
    cancel: CancellationToken,
    disconnected: AtomicBool,
    /// Reported by the dispatch loop once the queued messages are delivered
    reason: Mutex<Option<DisconnectReason>>,
    handler: Arc<dyn ClientHandler>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl Session {
    fn is_closed(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Marks the session closed and stops its reader. Only the first caller
    /// gets `true`, and only its reason is reported; `None` closes silently.
    fn close(&self, reason: Option<DisconnectReason>) -> bool {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return false;
        }
        match &reason {
            Some(reason) => info!(peer = %self.peer_addr, %reason, "Disconnected"),
            None => info!(peer = %self.peer_addr, "Disconnected without event"),
        }
        // Stored before cancelling: the dispatch loop reads it once the
        // reader is gone.
        *lock(&self.reason) = reason;
        self.cancel.cancel();
        true
    }
}

/// Resets the in-progress flag when a connect attempt ends
struct ConnectGuard<'a>(&'a AtomicBool);

impl<'a> ConnectGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(NetError::AlreadyConnected);
        }
        Ok(Self(flag))
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// TCP client that exchanges framed messages with one server
///
/// Reads, writes and handler dispatch run on three separate tasks per
/// connection, so a slow handler never stalls the socket. The disconnect
/// notification is delivered by the dispatch task after every message read
/// before the close.
///
/// # Examples
///
/// ```no_run
/// use netframe::{ClientConfig, ClientHandler, NetClient};
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// struct Printer;
///
/// #[async_trait]
/// impl ClientHandler for Printer {
///     async fn on_text(&self, text: &str, _client_id: u64) {
///         println!("received: {text}");
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = NetClient::new(ClientConfig::default(), Arc::new(Printer))?;
///     client.connect("127.0.0.1", 9000).await?;
///     client.send("PING")?;
///     // Frames queued before the disconnect are still written.
///     client.disconnect();
///     Ok(())
/// }
/// ```
pub struct NetClient {
    config: ClientConfig,
    framing: Arc<Mutex<FramingProtocol>>,
    handler: Arc<dyn ClientHandler>,
    session: Mutex<Option<Arc<Session>>>,
    connecting: AtomicBool,
}

impl NetClient {
    /// Creates a client; fails if the protocol parameters are invalid
    pub fn new(config: ClientConfig, handler: Arc<dyn ClientHandler>) -> Result<Self> {
        let framing = config.framing()?;
        Ok(Self {
            config,
            framing: Arc::new(Mutex::new(framing)),
            handler,
            session: Mutex::new(None),
            connecting: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects over plain TCP
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.open(host, port, None).await
    }

    /// Connects over TLS, checking the server certificate as `tls` specifies
    pub async fn connect_secure(&self, host: &str, port: u16, tls: TlsOptions) -> Result<()> {
        self.open(host, port, Some(tls)).await
    }

    async fn open(&self, host: &str, port: u16, tls: Option<TlsOptions>) -> Result<()> {
        let _guard = ConnectGuard::acquire(&self.connecting)?;
        if self.is_connected() {
            return Err(NetError::AlreadyConnected);
        }

        let tcp = connect_tcp(host, port, self.config.local_addr, self.config.connect_timeout).await?;
        tcp.set_nodelay(true)?;
        let local_addr = tcp.local_addr()?;
        let peer_addr = tcp.peer_addr()?;
        info!(%local_addr, %peer_addr, "Connected");
        self.handler.on_local_port_known(local_addr.port()).await;

        let stream: BoxedTransport = match tls {
            None => Box::new(tcp),
            Some(options) => {
                let stream = timeout(self.config.connect_timeout, tls::handshake(tcp, host, &options))
                    .await
                    .map_err(|_| NetError::HandshakeFailed(format!("TLS handshake with {host} timed out")))??;
                let summary = tls::describe_session(&stream);
                info!(%peer_addr, "{summary}");
                self.handler.on_log(&summary).await;
                Box::new(stream)
            }
        };

        {
            let mut framing = lock(&self.framing);
            *framing = framing.fresh();
        }

        let (reader, writer) = tokio::io::split(stream);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            outgoing: outgoing_tx,
            cancel: CancellationToken::new(),
            disconnected: AtomicBool::new(false),
            reason: Mutex::new(None),
            handler: self.handler.clone(),
            local_addr,
            peer_addr,
        });
        *lock(&self.session) = Some(session.clone());

        let span = tracing::info_span!("client", %peer_addr);
        tokio::spawn(
            read_loop(
                session.clone(),
                reader,
                self.framing.clone(),
                incoming_tx,
                self.config.buffer_size,
            )
            .instrument(span.clone()),
        );
        tokio::spawn(write_loop(session.clone(), writer, outgoing_rx).instrument(span.clone()));
        tokio::spawn(
            dispatch_loop(session, incoming_rx, self.config.dispatch_interval).instrument(span),
        );
        Ok(())
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        lock(&self.session).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current_session().is_some_and(|s| !s.is_closed())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.current_session().map(|s| s.local_addr)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.current_session().map(|s| s.peer_addr)
    }

    /// Encodes `text` with the configured codec and queues it for sending
    pub fn send(&self, text: &str) -> Result<()> {
        let payload = self.config.text_codec.encode(text);
        self.send_bytes(&payload)
    }

    /// Frames `payload` and queues it for the writer loop
    pub fn send_bytes(&self, payload: &[u8]) -> Result<()> {
        let session = self.current_session().ok_or(NetError::NotConnected)?;
        if session.is_closed() {
            return Err(NetError::TransportClosed("connection is closed".into()));
        }
        let frame = lock(&self.framing).format_data(payload)?;
        session
            .outgoing
            .send(frame)
            .map_err(|_| NetError::TransportClosed("write queue is closed".into()))
    }

    /// Closes the connection; `on_disconnected` follows unless the
    /// connection already ended. Safe to call repeatedly.
    ///
    /// Frames already queued by `send` are written before the socket closes.
    pub fn disconnect(&self) {
        if let Some(session) = self.current_session() {
            session.close(Some(DisconnectReason::Requested));
        }
    }

    /// Closes the connection without notifying the handler
    pub fn disconnect_without_event(&self) {
        if let Some(session) = self.current_session() {
            session.close(None);
        }
    }

    /// Current delimiter; fails unless the protocol is delimited
    pub fn delimiter(&self) -> Result<Vec<u8>> {
        lock(&self.framing).delimiter().map(<[u8]>::to_vec)
    }

    /// Replaces the delimiter for both directions
    pub fn set_delimiter(&self, delimiter: &[u8]) -> Result<()> {
        lock(&self.framing).set_delimiter(delimiter)
    }
}

impl Drop for NetClient {
    fn drop(&mut self) {
        if let Some(session) = self.current_session() {
            session.close(None);
        }
    }
}

async fn read_loop(
    session: Arc<Session>,
    mut reader: ReadHalf<BoxedTransport>,
    framing: Arc<Mutex<FramingProtocol>>,
    incoming: UnboundedSender<DataContainer>,
    buffer_size: usize,
) {
    let mut buffer = vec![0u8; buffer_size];

    loop {
        let read = tokio::select! {
            _ = session.cancel.cancelled() => break,
            read = reader.read(&mut buffer) => read,
        };

        let n = match read {
            Ok(0) => {
                info!("Server closed connection");
                session.close(Some(DisconnectReason::EndOfStream));
                break;
            }
            Ok(n) => n,
            Err(e) if session.is_closed() => {
                debug!(error = %e, "Read failed after disconnect");
                break;
            }
            Err(e) => {
                error!(error = %e, "Read failed while connected");
                session.close(Some(DisconnectReason::Failed(e.into())));
                break;
            }
        };

        debug!(size = n, "Received data");
        let processed = lock(&framing).process_data(&buffer[..n], CLIENT_SIDE_ID);
        match processed {
            Ok(containers) => {
                for container in containers {
                    // Receiver only goes away once the dispatch loop has stopped.
                    let _ = incoming.send(container);
                }
            }
            Err(e) => {
                error!(error = %e, "Framing failed");
                session.close(Some(DisconnectReason::Failed(e)));
                break;
            }
        }
    }
}

async fn write_loop(
    session: Arc<Session>,
    mut writer: WriteHalf<BoxedTransport>,
    mut outgoing: UnboundedReceiver<Bytes>,
) {
    loop {
        // Queued frames win over cancellation so a requested disconnect
        // still writes what was sent before it.
        let first = tokio::select! {
            biased;
            next = outgoing.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
            _ = session.cancel.cancelled() => break,
        };

        // Coalesce everything already queued into one write.
        let mut batch = BytesMut::from(&first[..]);
        while let Ok(next) = outgoing.try_recv() {
            batch.extend_from_slice(&next);
        }

        let written = tokio::select! {
            biased;
            written = write_batch(&mut writer, &batch) => written,
            _ = session.cancel.cancelled() => break,
        };
        match written {
            Ok(()) => debug!(size = batch.len(), "Sent data"),
            Err(e) => {
                warn!(error = %e, "Write failed");
                session.close(Some(DisconnectReason::Failed(e.into())));
                break;
            }
        }
    }
}

async fn dispatch_loop(
    session: Arc<Session>,
    mut incoming: UnboundedReceiver<DataContainer>,
    interval: Duration,
) {
    loop {
        match incoming.try_recv() {
            Ok(message) => {
                session.handler.on_text(message.text(), CLIENT_SIDE_ID).await;
                session.handler.on_bytes(message.bytes(), CLIENT_SIDE_ID).await;
            }
            Err(TryRecvError::Empty) if interval.is_zero() => tokio::task::yield_now().await,
            Err(TryRecvError::Empty) => sleep(interval).await,
            Err(TryRecvError::Disconnected) => break,
        }
    }

    let reason = lock(&session.reason).take();
    if let Some(reason) = reason {
        session.handler.on_disconnected(&reason).await;
    }
    debug!("Leaving dispatch loop");
    session.handler.on_log("Leaving dispatch loop").await;
}

use super::config::ServerConfig;
use super::{lock, write_batch};
use crate::common::{ClientId, DisconnectReason, ServerHandler};
use crate::framing::FramingProtocol;
use crate::{NetError, Result};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Registry entry for one accepted connection
struct ClientEntry {
    peer_addr: SocketAddr,
    framing: Arc<Mutex<FramingProtocol>>,
    outgoing: UnboundedSender<Bytes>,
    cancel: CancellationToken,
}

struct Registry {
    config: ServerConfig,
    /// Template each accepted connection clones its framing state from
    framing: Mutex<FramingProtocol>,
    handler: Arc<dyn ServerHandler>,
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Registry {
    fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.register(stream, addr),
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
            }
        }
        info!("Accept loop stopped");
    }

    /// Assigns an ID and inserts the client, then hands the socket to its own
    /// tasks. Never waits on handler code, so a slow callback cannot hold up
    /// the accept loop.
    fn register(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let framing = Arc::new(Mutex::new(lock(&self.framing).fresh()));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = self.shutdown.child_token();

        let (client_id, current) = {
            let mut clients = lock(&self.clients);
            if self.is_stopped() {
                return;
            }
            if clients.len() >= self.config.max_connections {
                warn!(%peer_addr, current = clients.len(), limit = self.config.max_connections, "Connection rejected: limit reached");
                return;
            }
            let client_id = self.next_id.fetch_add(1, Ordering::SeqCst);
            clients.insert(
                client_id,
                ClientEntry {
                    peer_addr,
                    framing: framing.clone(),
                    outgoing: outgoing_tx,
                    cancel: cancel.clone(),
                },
            );
            (client_id, clients.len())
        };
        info!(%peer_addr, client_id, current, "Accepted connection");

        let (reader, writer) = stream.into_split();
        let span = tracing::info_span!("connection", %peer_addr, client_id);
        tokio::spawn(
            self.clone()
                .write_loop(client_id, writer, outgoing_rx, cancel.clone())
                .instrument(span.clone()),
        );
        tokio::spawn(
            self.clone()
                .serve(client_id, reader, framing, cancel)
                .instrument(span),
        );
    }

    /// Announces the client, then reads from it. No message event for an ID
    /// can precede its connect event.
    async fn serve(
        self: Arc<Self>,
        client_id: ClientId,
        reader: OwnedReadHalf,
        framing: Arc<Mutex<FramingProtocol>>,
        cancel: CancellationToken,
    ) {
        // Stopped or closed between registration and this task starting.
        if cancel.is_cancelled() {
            return;
        }
        self.handler.on_client_connected(client_id).await;
        self.read_loop(client_id, reader, framing, cancel).await;
    }

    async fn read_loop(
        self: Arc<Self>,
        client_id: ClientId,
        mut reader: OwnedReadHalf,
        framing: Arc<Mutex<FramingProtocol>>,
        cancel: CancellationToken,
    ) {
        let mut buffer = vec![0u8; self.config.buffer_size];

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read(&mut buffer) => read,
            };

            let n = match read {
                Ok(0) => {
                    info!("Client closed connection");
                    self.handle_disconnect(client_id, DisconnectReason::EndOfStream).await;
                    break;
                }
                Ok(n) => n,
                Err(e) if cancel.is_cancelled() => {
                    debug!(error = %e, "Read failed after disconnect");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Read failed");
                    self.handle_disconnect(client_id, DisconnectReason::Failed(e.into())).await;
                    break;
                }
            };

            debug!(size = n, "Received data");
            let processed = lock(&framing).process_data(&buffer[..n], client_id);
            let containers = match processed {
                Ok(containers) => containers,
                Err(e) => {
                    error!(error = %e, "Framing failed");
                    self.handle_disconnect(client_id, DisconnectReason::Failed(e)).await;
                    break;
                }
            };

            for container in containers {
                if cancel.is_cancelled() {
                    return;
                }
                self.handler.on_text(container.text(), client_id).await;
                self.handler.on_bytes(container.bytes(), client_id).await;
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        client_id: ClientId,
        mut writer: OwnedWriteHalf,
        mut outgoing: UnboundedReceiver<Bytes>,
        cancel: CancellationToken,
    ) {
        loop {
            let first = tokio::select! {
                biased;
                next = outgoing.recv() => match next {
                    Some(frame) => frame,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };

            let mut batch = BytesMut::from(&first[..]);
            while let Ok(next) = outgoing.try_recv() {
                batch.extend_from_slice(&next);
            }

            let written = tokio::select! {
                biased;
                written = write_batch(&mut writer, &batch) => written,
                _ = cancel.cancelled() => break,
            };
            match written {
                Ok(()) => debug!(size = batch.len(), "Sent data"),
                Err(e) => {
                    warn!(error = %e, "Write failed");
                    self.handle_disconnect(client_id, DisconnectReason::Failed(e.into())).await;
                    break;
                }
            }
        }
    }

    /// Removes a client after its transport failed. Only the caller that
    /// actually removes the entry notifies the handler.
    async fn handle_disconnect(&self, client_id: ClientId, reason: DisconnectReason) {
        let removed = lock(&self.clients).remove(&client_id);
        let Some(entry) = removed else {
            return;
        };
        entry.cancel.cancel();
        info!(peer_addr = %entry.peer_addr, client_id, %reason, "Client disconnected");
        if !self.is_stopped() {
            self.handler.on_client_disconnected(client_id, &reason).await;
        }
    }
}

/// TCP server that accepts many clients and exchanges framed messages
///
/// Every accepted socket is registered under a fresh [`ClientId`] and gets its
/// own framing state, read loop and writer loop.
///
/// # Examples
///
/// ```no_run
/// use netframe::{ClientId, NetServer, ServerConfig, ServerHandler};
/// use async_trait::async_trait;
/// use std::sync::{Arc, OnceLock};
///
/// #[derive(Default)]
/// struct Echo {
///     server: OnceLock<NetServer>,
/// }
///
/// #[async_trait]
/// impl ServerHandler for Echo {
///     async fn on_text(&self, text: &str, client_id: ClientId) {
///         if let Some(server) = self.server.get() {
///             let _ = server.send(text, client_id);
///         }
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let handler = Arc::new(Echo::default());
///     let server = NetServer::new(ServerConfig::default(), handler.clone())?;
///     let _ = handler.server.set(server.clone());
///
///     let addr = server.start_listening().await?;
///     println!("listening on {addr}");
///     server.run().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct NetServer {
    registry: Arc<Registry>,
    listener: Arc<Mutex<Option<(SocketAddr, JoinHandle<()>)>>>,
}

impl NetServer {
    /// Creates a server; fails if the protocol parameters are invalid
    pub fn new(config: ServerConfig, handler: Arc<dyn ServerHandler>) -> Result<Self> {
        let framing = config.framing()?;
        Ok(Self {
            registry: Arc::new(Registry {
                config,
                framing: Mutex::new(framing),
                handler,
                clients: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
            listener: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.registry.config
    }

    /// Binds the listener and starts accepting in the background.
    ///
    /// Returns the bound address. Calling it again while listening returns
    /// the same address; calling it after [`stop`](Self::stop) fails.
    pub async fn start_listening(&self) -> Result<SocketAddr> {
        if self.registry.is_stopped() {
            return Err(NetError::Config("server has been stopped".into()));
        }
        if let Some((addr, _)) = lock(&self.listener).as_ref() {
            return Ok(*addr);
        }

        let bind_addr = self.registry.config.bind_addr;
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let mut slot = lock(&self.listener);
        if let Some((addr, _)) = slot.as_ref() {
            // Lost a race with a concurrent call; keep the first listener.
            return Ok(*addr);
        }
        info!(address = %local_addr, protocol = %self.registry.config.protocol, "Server listening");
        let task = tokio::spawn(
            self.registry
                .clone()
                .accept_loop(listener)
                .instrument(tracing::info_span!("server", address = %local_addr)),
        );
        *slot = Some((local_addr, task));
        Ok(local_addr)
    }

    /// Starts listening if needed and waits until `stop` is called or the
    /// process receives Ctrl-C
    pub async fn run(&self) -> Result<()> {
        self.start_listening().await?;
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, stopping server");
                self.stop();
            }
            _ = self.registry.shutdown.cancelled() => {}
        }
        info!("Server stopped");
        Ok(())
    }

    /// Address the listener is bound to, once listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.listener).as_ref().map(|(addr, _)| *addr)
    }

    /// Closes the listener and every client. No handler fires afterwards.
    pub fn stop(&self) {
        self.registry.shutdown.cancel();
        if let Some((_, task)) = lock(&self.listener).take() {
            task.abort();
        }
        let clients: Vec<_> = lock(&self.registry.clients).drain().collect();
        for (client_id, entry) in clients {
            debug!(client_id, "Closing client on stop");
            entry.cancel.cancel();
        }
    }

    /// Encodes `text` with the configured codec and queues it for one client
    pub fn send(&self, text: &str, client_id: ClientId) -> Result<()> {
        let payload = self.registry.config.text_codec.encode(text);
        self.send_bytes(&payload, client_id)
    }

    /// Frames `payload` and queues it for one client.
    ///
    /// Fails with [`NetError::UnknownClient`] if the client is not (or no
    /// longer) registered.
    pub fn send_bytes(&self, payload: &[u8], client_id: ClientId) -> Result<()> {
        let (framing, outgoing) = {
            let clients = lock(&self.registry.clients);
            let entry = clients
                .get(&client_id)
                .ok_or(NetError::UnknownClient(client_id))?;
            (entry.framing.clone(), entry.outgoing.clone())
        };
        let frame = lock(&framing).format_data(payload)?;
        outgoing
            .send(frame)
            .map_err(|_| NetError::TransportClosed(format!("write queue of client {client_id} is closed")))
    }

    /// Forcibly closes one client without firing `on_client_disconnected`
    pub fn close_client_connection(&self, client_id: ClientId) -> Result<()> {
        let entry = lock(&self.registry.clients)
            .remove(&client_id)
            .ok_or(NetError::UnknownClient(client_id))?;
        entry.cancel.cancel();
        info!(peer_addr = %entry.peer_addr, client_id, "Closed client connection");
        Ok(())
    }

    /// IDs of the currently registered clients
    pub fn clients(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = lock(&self.registry.clients).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn client_count(&self) -> usize {
        lock(&self.registry.clients).len()
    }

    pub fn peer_addr(&self, client_id: ClientId) -> Result<SocketAddr> {
        lock(&self.registry.clients)
            .get(&client_id)
            .map(|entry| entry.peer_addr)
            .ok_or(NetError::UnknownClient(client_id))
    }

    /// Delimiter applied to new connections; fails unless delimited
    pub fn delimiter(&self) -> Result<Vec<u8>> {
        lock(&self.registry.framing).delimiter().map(<[u8]>::to_vec)
    }

    /// Replaces the delimiter for connections accepted from now on
    pub fn set_delimiter(&self, delimiter: &[u8]) -> Result<()> {
        lock(&self.registry.framing).set_delimiter(delimiter)
    }
}

//! Helpers for tests that observe handler events
//!
//! [`RecordingHandler`] implements both handler traits and forwards every
//! event into a channel; [`EventLog`] reads them back with a timeout so a
//! missing event fails the test instead of hanging it.

use super::{ClientHandler, ClientId, DisconnectReason, ServerHandler};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep, timeout};

/// How long [`EventLog`] waits for the next event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A handler callback, as recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected(ClientId),
    ClientDisconnected(ClientId),
    Disconnected(String),
    Text(ClientId, String),
    Bytes(ClientId, Vec<u8>),
    LocalPort(u16),
    Log(String),
}

/// Handler that records every callback it receives
pub struct RecordingHandler {
    events: UnboundedSender<Event>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, EventLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events: tx }), EventLog { events: rx })
    }

    fn record(&self, event: Event) {
        // The log may already be dropped at the end of a test.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ClientHandler for RecordingHandler {
    async fn on_text(&self, text: &str, client_id: ClientId) {
        self.record(Event::Text(client_id, text.to_string()));
    }

    async fn on_bytes(&self, bytes: &Bytes, client_id: ClientId) {
        self.record(Event::Bytes(client_id, bytes.to_vec()));
    }

    async fn on_disconnected(&self, reason: &DisconnectReason) {
        self.record(Event::Disconnected(reason.to_string()));
    }

    async fn on_local_port_known(&self, port: u16) {
        self.record(Event::LocalPort(port));
    }

    async fn on_log(&self, message: &str) {
        self.record(Event::Log(message.to_string()));
    }
}

#[async_trait]
impl ServerHandler for RecordingHandler {
    async fn on_client_connected(&self, client_id: ClientId) {
        self.record(Event::Connected(client_id));
    }

    async fn on_client_disconnected(&self, client_id: ClientId, _reason: &DisconnectReason) {
        self.record(Event::ClientDisconnected(client_id));
    }

    async fn on_text(&self, text: &str, client_id: ClientId) {
        self.record(Event::Text(client_id, text.to_string()));
    }

    async fn on_bytes(&self, bytes: &Bytes, client_id: ClientId) {
        self.record(Event::Bytes(client_id, bytes.to_vec()));
    }

    async fn on_log(&self, message: &str) {
        self.record(Event::Log(message.to_string()));
    }
}

/// Receiving end of a [`RecordingHandler`]
pub struct EventLog {
    events: UnboundedReceiver<Event>,
}

impl EventLog {
    /// Next event of any kind, or `None` after [`EVENT_TIMEOUT`]
    pub async fn next(&mut self) -> Option<Event> {
        timeout(EVENT_TIMEOUT, self.events.recv()).await.ok().flatten()
    }

    /// Skips events until one matches `predicate`
    pub async fn next_matching<F>(&mut self, mut predicate: F) -> Option<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        loop {
            let event = tokio::time::timeout_at(deadline, self.events.recv())
                .await
                .ok()
                .flatten()?;
            if predicate(&event) {
                return Some(event);
            }
        }
    }

    /// Next text message, skipping every other kind of event
    pub async fn next_text(&mut self) -> Option<(ClientId, String)> {
        match self.next_matching(|e| matches!(e, Event::Text(..))).await? {
            Event::Text(id, text) => Some((id, text)),
            _ => None,
        }
    }

    /// Next event that is not a byte, log or port notification
    pub async fn next_significant(&mut self) -> Option<Event> {
        self.next_matching(|e| !is_noise(e)).await
    }

    /// Next connection lifecycle event, skipping message and log events
    pub async fn next_lifecycle(&mut self) -> Option<Event> {
        self.next_matching(|e| {
            matches!(
                e,
                Event::Connected(_) | Event::ClientDisconnected(_) | Event::Disconnected(_)
            )
        })
        .await
    }

    /// Everything recorded so far, without waiting
    pub fn drain_now(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Waits `window` and returns the lifecycle events recorded meanwhile
    pub async fn lifecycle_within(&mut self, window: Duration) -> Vec<Event> {
        sleep(window).await;
        self.drain_now()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::Connected(_) | Event::ClientDisconnected(_) | Event::Disconnected(_)
                )
            })
            .collect()
    }
}

fn is_noise(event: &Event) -> bool {
    matches!(event, Event::Bytes(..) | Event::Log(_) | Event::LocalPort(_))
}

/// Binds a plain listener on an ephemeral loopback port
pub async fn loopback_listener() -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

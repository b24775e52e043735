use color_eyre::eyre::{Result, eyre};
use netframe::common::test_utils::{Event, RecordingHandler};
use netframe::{ClientConfig, ClientId, NetClient, NetServer, ProtocolType, ServerConfig, ServerHandler};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::info;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netframe=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Server handler that answers every message with `ECHO:<message>`
#[derive(Default)]
struct EchoHandler {
    server: OnceLock<NetServer>,
}

#[async_trait]
impl ServerHandler for EchoHandler {
    async fn on_text(&self, text: &str, client_id: ClientId) {
        if let Some(server) = self.server.get() {
            let _ = server.send(&format!("ECHO:{text}"), client_id);
        }
    }
}

async fn start_echo_server(config: ServerConfig) -> Result<NetServer> {
    let handler = Arc::new(EchoHandler::default());
    let server = NetServer::new(config, handler.clone())?;
    handler
        .server
        .set(server.clone())
        .map_err(|_| eyre!("server already set"))?;
    server.start_listening().await?;
    Ok(server)
}

#[tokio::test]
async fn test_echo_conversation() -> Result<()> {
    init_tracing();
    let server = start_echo_server(ServerConfig::default()).await?;
    let port = server.local_addr().ok_or_else(|| eyre!("not listening"))?.port();

    let (handler, mut events) = RecordingHandler::new();
    let client = NetClient::new(ClientConfig::default(), handler)?;
    client.connect("127.0.0.1", port).await?;

    client.send("PING")?;
    client.send("PONG")?;
    assert_eq!(events.next_text().await, Some((0, "ECHO:PING".to_string())));
    assert_eq!(events.next_text().await, Some((0, "ECHO:PONG".to_string())));

    client.disconnect();
    server.stop();
    Ok(())
}

#[tokio::test]
async fn test_concurrent_clients() -> Result<()> {
    init_tracing();
    let server = start_echo_server(ServerConfig::default().with_delimiter(b"\n")).await?;
    let port = server.local_addr().ok_or_else(|| eyre!("not listening"))?.port();

    let mut tasks = Vec::new();
    for i in 0..10 {
        tasks.push(tokio::spawn(async move {
            let (handler, mut events) = RecordingHandler::new();
            let config = ClientConfig::default()
                .with_delimiter(b"\n")
                .with_dispatch_interval(Duration::from_millis(1));
            let client = NetClient::new(config, handler)?;
            client.connect("127.0.0.1", port).await?;

            for j in 0..5 {
                client.send(&format!("client{i}-msg{j}"))?;
            }
            for j in 0..5 {
                let expected = format!("ECHO:client{i}-msg{j}");
                match events.next_text().await {
                    Some((_, text)) if text == expected => {}
                    other => return Err(eyre!("client {i}: expected {expected}, got {other:?}")),
                }
            }
            client.disconnect();
            Ok::<_, color_eyre::eyre::Report>(())
        }));
    }

    for task in tasks {
        task.await??;
    }
    info!("All clients completed");
    server.stop();
    Ok(())
}

#[tokio::test]
async fn test_server_assigns_distinct_ids() -> Result<()> {
    init_tracing();
    let (handler, mut events) = RecordingHandler::new();
    let server = NetServer::new(ServerConfig::default(), handler)?;
    let addr = server.start_listening().await?;

    let mut clients = Vec::new();
    for _ in 0..5 {
        let client = NetClient::new(ClientConfig::default(), Arc::new(netframe::NoopHandler))?;
        client.connect("127.0.0.1", addr.port()).await?;
        clients.push(client);
    }

    let mut ids = HashSet::new();
    while ids.len() < 5 {
        match events.next_lifecycle().await {
            Some(Event::Connected(id)) => assert!(ids.insert(id), "id {id} reused"),
            other => return Err(eyre!("unexpected event {other:?}")),
        }
    }
    assert_eq!(server.client_count(), 5);

    let victim = server.clients()[0];
    server.close_client_connection(victim)?;
    assert_eq!(server.client_count(), 4);
    assert!(server.send("x", victim).is_err());

    server.stop();
    Ok(())
}

#[tokio::test]
async fn test_fixed_size_exchange() -> Result<()> {
    init_tracing();
    let config = ServerConfig::new(([127, 0, 0, 1], 0).into(), ProtocolType::FixedSize)
        .with_frame_size(8);
    let (handler, mut server_events) = RecordingHandler::new();
    let server = NetServer::new(config, handler)?;
    let addr = server.start_listening().await?;

    let client_config = ClientConfig::new(ProtocolType::FixedSize).with_frame_size(8);
    let (client_handler, mut client_events) = RecordingHandler::new();
    let client = NetClient::new(client_config, client_handler)?;
    client.connect("127.0.0.1", addr.port()).await?;

    client.send_bytes(b"01234567abcdefgh")?;
    assert_eq!(server_events.next_text().await, Some((1, "01234567".to_string())));
    assert_eq!(server_events.next_text().await, Some((1, "abcdefgh".to_string())));

    assert!(client.send("short").is_err());
    server.send("ABCDEFGH", 1)?;
    assert_eq!(client_events.next_text().await, Some((0, "ABCDEFGH".to_string())));

    server.stop();
    Ok(())
}

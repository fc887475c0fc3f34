//! IPC Server - Unix socket server for local clients
//!
//! Handles incoming connections and dispatches commands to the Orchestrator.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::ipc::protocol::{parse_command, serialize_response, Command, Response, PROTOCOL_VERSION};
use crate::orchestrator::Orchestrator;

/// IPC Server that listens for commands from local clients
pub struct IpcServer {
    orchestrator: Arc<Orchestrator>,
    socket_path: PathBuf,
    /// Used when a purge command carries no retention window
    default_retention_days: u64,
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl IpcServer {
    pub fn new(orchestrator: Arc<Orchestrator>, socket_path: PathBuf, default_retention_days: u64) -> Self {
        Self {
            orchestrator,
            socket_path,
            default_retention_days,
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Bind the socket, replacing a stale socket file left by a previous run
    pub async fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind Unix socket at {}", self.socket_path.display()))?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let orchestrator = Arc::clone(&self.orchestrator);
                    let connection_count = Arc::clone(&self.connection_count);
                    let retention_days = self.default_retention_days;

                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, orchestrator, retention_days, connection_count).await
                        {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Remove the socket file
    pub async fn stop(&self) -> Result<()> {
        remove_socket(&self.socket_path)?;
        info!("IPC server stopped");
        Ok(())
    }
}

fn remove_socket(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).context("Failed to remove socket file")?;
    }
    Ok(())
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    orchestrator: Arc<Orchestrator>,
    default_retention_days: u64,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => {
                        debug!(command = command_name(&command), "Received command");
                        process_command(command, &orchestrator, default_retention_days).await
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to parse command");
                        Response::Error {
                            kind: "invalid_command".to_string(),
                            error: format!("Invalid command: {}", e),
                        }
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

/// Command name without its payload, so message text never reaches the logs
fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Submit { .. } => "submit",
        Command::Fetch { .. } => "fetch",
        Command::History { .. } => "history",
        Command::GetStatus => "getStatus",
        Command::SetOnline { .. } => "setOnline",
        Command::Purge { .. } => "purge",
    }
}

/// Process a command and return a response
async fn process_command(
    command: Command,
    orchestrator: &Orchestrator,
    default_retention_days: u64,
) -> Response {
    let result = match command {
        Command::Submit { text } => orchestrator.submit(&text).await.map(|receipt| Response::Submitted {
            id: receipt.id,
            origin: receipt.origin,
            size: receipt.size,
        }),

        Command::Fetch { id } => orchestrator
            .fetch(&id)
            .await
            .map(|data| Response::Content { id, data }),

        Command::History { limit } => orchestrator
            .history(limit)
            .await
            .map(|messages| Response::History { messages }),

        Command::GetStatus => orchestrator.status().await.map(|status| Response::Status {
            version: PROTOCOL_VERSION,
            status,
        }),

        Command::SetOnline { online } => {
            let state = orchestrator.set_online(online).await;
            Ok(Response::Success {
                message: Some(format!("connectivity state: {}", state)),
            })
        }

        Command::Purge { retention_days } => {
            let days = retention_days.unwrap_or(default_retention_days);
            info!(retention_days = days, "Processing purge command");
            orchestrator
                .purge(days)
                .await
                .map(|deleted_count| Response::Purged { deleted_count })
        }
    };

    result.unwrap_or_else(|e| Response::Error {
        kind: e.kind().to_string(),
        error: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LocalCacheStore, SystemClock};
    use crate::remote::testing::test_config;
    use crate::remote::RemoteStoreClient;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn offline_orchestrator(dir: &TempDir) -> Arc<Orchestrator> {
        let remote = RemoteStoreClient::new(test_config(), None, None);
        let cache = LocalCacheStore::with_clock(dir.path().join("cache"), 1024 * 1024, Arc::new(SystemClock));
        let orchestrator = Orchestrator::new(remote, cache);
        orchestrator.start().await.unwrap();
        Arc::new(orchestrator)
    }

    async fn roundtrip(
        reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>,
        writer: &mut tokio::net::unix::OwnedWriteHalf,
        command: &str,
    ) -> serde_json::Value {
        writer.write_all(command.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_process_command_maps_errors() {
        let dir = TempDir::new().unwrap();
        let orchestrator = offline_orchestrator(&dir).await;

        let response = process_command(
            Command::Fetch {
                id: "local-1-nothere".to_string(),
            },
            &orchestrator,
            30,
        )
        .await;
        match response {
            Response::Error { kind, .. } => assert_eq!(kind, "not_found"),
            other => panic!("Expected Error response, got {:?}", other),
        }

        let response = process_command(Command::Submit { text: " ".to_string() }, &orchestrator, 30).await;
        match response {
            Response::Error { kind, .. } => assert_eq!(kind, "validation"),
            other => panic!("Expected Error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_socket_session() {
        let dir = TempDir::new().unwrap();
        let orchestrator = offline_orchestrator(&dir).await;
        let socket_path = dir.path().join("daemon.sock");

        let mut server = IpcServer::new(orchestrator, socket_path.clone(), 30);
        server.start().await.unwrap();
        let server = Arc::new(server);
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move { runner.run().await });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let submitted = roundtrip(&mut reader, &mut writer, r#"{"type":"submit","text":"over the socket"}"#).await;
        assert_eq!(submitted["type"], "submitted");
        assert_eq!(submitted["origin"], "local");
        let id = submitted["id"].as_str().unwrap().to_string();

        let fetch = format!(r#"{{"type":"fetch","id":"{}"}}"#, id);
        let content = roundtrip(&mut reader, &mut writer, &fetch).await;
        assert_eq!(content["data"], "over the socket");

        let history = roundtrip(&mut reader, &mut writer, r#"{"type":"history","limit":10}"#).await;
        assert_eq!(history["messages"].as_array().unwrap().len(), 1);

        let status = roundtrip(&mut reader, &mut writer, r#"{"type":"getStatus"}"#).await;
        assert_eq!(status["state"], "fallback");
        assert_eq!(status["version"], PROTOCOL_VERSION);

        let invalid = roundtrip(&mut reader, &mut writer, "{not json").await;
        assert_eq!(invalid["kind"], "invalid_command");

        let purged = roundtrip(&mut reader, &mut writer, r#"{"type":"purge"}"#).await;
        assert_eq!(purged["deletedCount"], 0);

        handle.abort();
        server.stop().await.unwrap();
        assert!(!socket_path.exists());
    }
}

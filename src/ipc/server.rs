//! IPC Server - Unix socket server for client communication
//!
//! Each connection is registered as a client of the proxy. Commands are read
//! line by line and dispatched to the CacheProxy.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::errors::ProxyError;
use crate::http::{CacheMode, Request, RequestMode};
use crate::ipc::protocol::{parse_command, serialize_response, Command, Response};
use crate::worker::{CacheProxy, ClientId};

/// IPC Server that listens for commands from clients
pub struct IpcServer {
    /// Proxy handling lifecycle commands and fetches
    proxy: Arc<CacheProxy>,
    /// Path of the Unix socket
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(proxy: Arc<CacheProxy>, socket_path: PathBuf) -> Self {
        Self {
            proxy,
            socket_path,
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Start the IPC server
    pub async fn start(&mut self) -> Result<()> {
        // Clean up any existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind Unix socket {}", self.socket_path.display()))?;

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
                    let proxy = Arc::clone(&self.proxy);
                    let connection_count = Arc::clone(&self.connection_count);

                    // Spawn a new task to handle this connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, proxy, connection_count).await {
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

    /// Stop the IPC server and clean up
    pub async fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!(connections = self.connection_count().await, "IPC server stopped");
        Ok(())
    }

    /// Get the number of active connections
    pub async fn connection_count(&self) -> u32 {
        *self.connection_count.read().await
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    proxy: Arc<CacheProxy>,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let client = proxy.connect_client().await;

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Read commands line by line (newline-delimited JSON)
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(client = client, "Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(client = client, command = %trimmed, "Received command");

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => process_command(command, &proxy, client).await,
                    Err(e) => {
                        error!(error = %e, command = %trimmed, "Failed to parse command");
                        Response::Error {
                            error: format!("Invalid command: {}", e),
                            kind: "invalidCommand".to_string(),
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

    proxy.disconnect_client(client).await;

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

/// Build the intercepted request from a fetch command
fn build_request(
    proxy: &CacheProxy,
    url: &str,
    method: Option<String>,
    headers: Vec<(String, String)>,
    cache: CacheMode,
    mode: RequestMode,
) -> Result<Request, ProxyError> {
    let mut request = proxy.resolve(url)?.with_cache(cache).with_mode(mode);
    if let Some(method) = method {
        request = request.with_method(&method);
    }
    for (name, value) in headers {
        request.headers.append(name, value);
    }
    Ok(request)
}

/// Process a command and return a response
async fn process_command(command: Command, proxy: &CacheProxy, client: ClientId) -> Response {
    match command {
        Command::Install => {
            info!(client = client, "Processing install command");
            match proxy.install().await {
                Ok(report) => report.into(),
                Err(e) => Response::from_error(&e),
            }
        }

        Command::Activate => {
            info!(client = client, "Processing activate command");
            match proxy.activate().await {
                Ok(report) => report.into(),
                Err(e) => Response::from_error(&e),
            }
        }

        Command::Fetch {
            url,
            method,
            headers,
            cache,
            mode,
        } => {
            let request = match build_request(proxy, &url, method, headers, cache, mode) {
                Ok(request) => request,
                Err(e) => return Response::from_error(&e),
            };

            match proxy.handle_fetch(client, request).await {
                Ok(outcome) => Response::from_outcome(outcome),
                Err(e) => {
                    warn!(client = client, url = %url, error = %e, "Fetch failed");
                    Response::from_error(&e)
                }
            }
        }

        Command::DeleteCache { name } => {
            info!(cache = %name, "Processing deleteCache command");
            match proxy.delete_cache(&name).await {
                Ok(true) => Response::Success {
                    message: Some(format!("Deleted cache '{}'", name)),
                },
                Ok(false) => Response::Error {
                    error: format!("No cache named '{}'", name),
                    kind: "notFound".to_string(),
                },
                Err(e) => Response::from_error(&e),
            }
        }

        Command::ListEntries => {
            debug!("Processing listEntries command");
            match proxy.entries().await {
                Ok(urls) => Response::Entries {
                    cache_name: proxy.cache_name(),
                    urls,
                },
                Err(e) => Response::from_error(&e),
            }
        }

        Command::DeleteEntry { url } => {
            info!(url = %url, "Processing deleteEntry command");
            match proxy.delete_entry(&url).await {
                Ok(true) => Response::Success {
                    message: Some(format!("Deleted entry '{}'", url)),
                },
                Ok(false) => Response::Error {
                    error: format!("No cached entry for '{}'", url),
                    kind: "notFound".to_string(),
                },
                Err(e) => Response::from_error(&e),
            }
        }

        Command::GetStatus => {
            debug!("Processing getStatus command");
            match proxy.status().await {
                Ok(status) => status.into(),
                Err(e) => Response::from_error(&e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;
    use crate::config::ProxyConfig;
    use crate::http::fetcher::mock::MockFetcher;
    use crate::http::{self, Fetcher};
    use crate::worker::{ResponseSource, WorkerState};
    use base64::Engine;
    use tokio::io::{BufReader, Lines};
    use tokio::net::unix::OwnedReadHalf;
    use tokio::net::unix::OwnedWriteHalf;

    struct TestClient {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl TestClient {
        async fn connect(path: &std::path::Path) -> Self {
            let stream = UnixStream::connect(path).await.unwrap();
            let (reader, writer) = stream.into_split();
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
            }
        }

        async fn send(&mut self, command: &str) -> Response {
            self.writer.write_all(command.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }
    }

    async fn start_server(
        dir: &tempfile::TempDir,
        fetcher: Arc<MockFetcher>,
    ) -> (Arc<CacheProxy>, Arc<IpcServer>, PathBuf) {
        let config = ProxyConfig {
            origin: "http://localhost:8080".to_string(),
            assets: vec!["/a.html".to_string()],
            ..Default::default()
        };
        let fetcher: Arc<dyn Fetcher> = fetcher;
        let proxy =
            Arc::new(CacheProxy::new(config, Arc::new(CacheStorage::in_memory()), fetcher).unwrap());

        let socket_path = dir.path().join("proxy.sock");
        let mut server = IpcServer::new(Arc::clone(&proxy), socket_path.clone());
        server.start().await.unwrap();
        let server = Arc::new(server);

        let runner = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = runner.run().await;
        });

        (proxy, server, socket_path)
    }

    fn site() -> Arc<MockFetcher> {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(
            "http://localhost:8080/a.html",
            http::Response::new(200, "<h1>a</h1>"),
        );
        fetcher
    }

    #[tokio::test]
    async fn test_lifecycle_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = site();
        let (proxy, server, socket_path) = start_server(&dir, Arc::clone(&fetcher)).await;

        let mut client = TestClient::connect(&socket_path).await;

        match client.send(r#"{"type":"install"}"#).await {
            Response::Installed { cached, failed, .. } => {
                assert_eq!(cached, vec!["http://localhost:8080/a.html"]);
                assert!(failed.is_empty());
            }
            other => panic!("Expected Installed, got {:?}", other),
        }

        // Not yet controlled
        assert!(matches!(
            client.send(r#"{"type":"fetch","url":"/a.html"}"#).await,
            Response::Passthrough
        ));

        match client.send(r#"{"type":"activate"}"#).await {
            Response::Activated { claimed, .. } => assert_eq!(claimed, 1),
            other => panic!("Expected Activated, got {:?}", other),
        }

        match client.send(r#"{"type":"fetch","url":"/a.html"}"#).await {
            Response::Fetched {
                status,
                body,
                source,
                ..
            } => {
                assert_eq!(status, 200);
                assert_eq!(source, ResponseSource::Cache);
                let decoded = base64::engine::general_purpose::STANDARD.decode(body).unwrap();
                assert_eq!(decoded, b"<h1>a</h1>");
            }
            other => panic!("Expected Fetched, got {:?}", other),
        }

        assert_eq!(proxy.state().await, WorkerState::Activated);
        assert_eq!(server.connection_count().await, 1);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_status_and_errors_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = site();
        fetcher.fail("http://localhost:8080/down.html");
        let (proxy, server, socket_path) = start_server(&dir, fetcher).await;
        proxy.install().await.unwrap();
        proxy.activate().await.unwrap();

        let mut client = TestClient::connect(&socket_path).await;

        match client.send(r#"{"type":"getStatus"}"#).await {
            Response::Status {
                version,
                state,
                entries,
                clients,
                ..
            } => {
                assert_eq!(version, 1);
                assert_eq!(state, WorkerState::Activated);
                assert_eq!(entries, 1);
                assert_eq!(clients, 1);
            }
            other => panic!("Expected Status, got {:?}", other),
        }

        match client.send(r#"{"type":"fetch","url":"/down.html"}"#).await {
            Response::Error { kind, .. } => assert_eq!(kind, "network"),
            other => panic!("Expected Error, got {:?}", other),
        }

        match client.send("not json").await {
            Response::Error { kind, .. } => assert_eq!(kind, "invalidCommand"),
            other => panic!("Expected Error, got {:?}", other),
        }

        match client.send(r#"{"type":"listEntries"}"#).await {
            Response::Entries { cache_name, urls } => {
                assert_eq!(cache_name, "offline");
                assert_eq!(urls, vec!["http://localhost:8080/a.html"]);
            }
            other => panic!("Expected Entries, got {:?}", other),
        }
        assert!(matches!(
            client.send(r#"{"type":"deleteEntry","url":"/a.html"}"#).await,
            Response::Success { .. }
        ));
        match client.send(r#"{"type":"deleteEntry","url":"/a.html"}"#).await {
            Response::Error { kind, .. } => assert_eq!(kind, "notFound"),
            other => panic!("Expected Error, got {:?}", other),
        }

        match client.send(r#"{"type":"deleteCache","name":"offline"}"#).await {
            Response::Success { message } => assert!(message.unwrap().contains("offline")),
            other => panic!("Expected Success, got {:?}", other),
        }
        match client.send(r#"{"type":"deleteCache","name":"offline"}"#).await {
            Response::Error { kind, .. } => assert_eq!(kind, "notFound"),
            other => panic!("Expected Error, got {:?}", other),
        }

        server.stop().await.unwrap();
        assert!(!socket_path.exists());
    }
}

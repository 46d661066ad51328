//! Test server harness for E2E testing
//!
//! Provides `TestPollServer` for spawning real poll service instances in
//! tests, and `TestClient` for talking to them over WebSocket.

use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use poll_service::config::Config;
use poll_service::persistence::{InMemoryPollStore, PersistenceGateway};
use poll_service::routes::{self, AppState};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// How long a test waits for an expected frame.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Test harness for spawning the poll service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// let server = TestPollServer::spawn().await?;
/// let response = reqwest::get(format!("{}/health", server.url())).await?;
/// assert_eq!(response.status(), 200);
/// ```
pub struct TestPollServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    _handle: JoinHandle<()>,
}

impl TestPollServer {
    /// Spawn with an in-memory store and default configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(Config::default(), Arc::new(InMemoryPollStore::new())).await
    }

    /// Spawn with an explicit configuration and storage gateway.
    ///
    /// The server binds to 127.0.0.1:0 and is marked ready before returning.
    pub async fn spawn_with(
        config: Config,
        persistence: Arc<dyn PersistenceGateway>,
    ) -> Result<Self, anyhow::Error> {
        let state = Arc::new(AppState::new(&config, persistence));
        // Not installed globally, so any number of servers can coexist.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(Arc::clone(&state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        state.health.set_ready();

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL for a namespace.
    pub fn ws_url(&self, namespace: &str) -> String {
        format!("ws://{}/ws/{}", self.addr, namespace)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Open a WebSocket to `namespace`.
    pub async fn connect(&self, namespace: &str) -> Result<TestClient, anyhow::Error> {
        TestClient::connect(&self.ws_url(namespace)).await
    }
}

impl Drop for TestPollServer {
    fn drop(&mut self) {
        self.state.coordinator.cancel();
        self._handle.abort();
    }
}

/// WebSocket client speaking the `{"event", "data"}` frame format.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect to {} failed: {}", url, e))?;
        Ok(Self { ws })
    }

    /// Send one text frame.
    pub async fn send(&mut self, frame: String) {
        self.ws
            .send(Message::Text(frame))
            .await
            .expect("failed to send frame");
    }

    /// Next event as `{"event", "data"}` JSON. Panics on timeout or close.
    pub async fn next_event(&mut self) -> Value {
        match self.try_next_event(RECEIVE_TIMEOUT).await {
            Some(event) => event,
            None => panic!("no event received within {RECEIVE_TIMEOUT:?}"),
        }
    }

    /// Next event, or `None` if nothing arrives within `wait` or the
    /// socket closes.
    pub async fn try_next_event(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .ok()??;
            match frame {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).expect("server sent invalid JSON"))
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Next event, asserting its name; returns its `data`.
    pub async fn expect_event(&mut self, name: &str) -> Value {
        let event = self.next_event().await;
        assert_eq!(event["event"], name, "unexpected event: {event}");
        event["data"].clone()
    }

    /// Skip events until one named `name` arrives; returns its `data`.
    pub async fn wait_for_event(&mut self, name: &str) -> Value {
        loop {
            let event = self.next_event().await;
            if event["event"] == name {
                return event["data"].clone();
            }
        }
    }

    /// Read until the server closes the socket; returns the close code.
    pub async fn expect_close(&mut self) -> Option<u16> {
        let deadline = tokio::time::Instant::now() + RECEIVE_TIMEOUT;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .expect("socket not closed in time");
            match frame {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    }

    /// Close from the client side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

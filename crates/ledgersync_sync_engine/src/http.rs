//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any library
//! (or an in-process [`LoopbackClient`]) can carry the JSON bodies.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use ledgersync_protocol::{BalanceReport, BatchResponse, ClientId, SyncBatch};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::warn;

/// Path of the batch endpoint.
pub const SYNC_ENDPOINT: &str = "/api/sync";

/// Path prefix of the balance endpoint.
pub const BALANCE_ENDPOINT: &str = "/api/ledger/balance/";

/// Why an HTTP exchange failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// The request never completed.
    Network(String),
    /// No answer within the request timeout.
    Timeout,
    /// The server answered with an error status.
    Status {
        /// HTTP status code.
        code: u16,
        /// Response text.
        message: String,
    },
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpFailure::Network(message) => write!(f, "network: {message}"),
            HttpFailure::Timeout => f.write_str("timed out"),
            HttpFailure::Status { code, message } => write!(f, "status {code}: {message}"),
        }
    }
}

/// HTTP client abstraction.
///
/// A request that has no answer after `timeout` must fail with
/// [`HttpFailure::Timeout`].
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, HttpFailure>;

    /// Sends a GET request and returns the response body.
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, HttpFailure>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
///
/// Uses JSON request and response bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://books.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Per-request timeout.
    timeout: Duration,
    /// False once closed.
    open: AtomicBool,
    /// False after a network failure, until the next success.
    reachable: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout: SyncConfig::default().timeout,
            open: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport for the configured server URL and timeout.
    pub fn from_config(config: &SyncConfig, client: C) -> Self {
        Self::new(config.server_url.clone(), client).with_timeout(config.timeout)
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// The wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn exchange(
        &self,
        endpoint: &str,
        send: impl FnOnce(&C, &str, Duration) -> Result<Vec<u8>, HttpFailure>,
    ) -> SyncResult<Vec<u8>> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }

        let url = format!("{}{}", self.base_url, endpoint);
        match send(&self.client, &url, self.timeout) {
            Ok(body) => {
                self.reachable.store(true, Ordering::SeqCst);
                *self.last_error.write() = None;
                Ok(body)
            }
            Err(failure) => {
                warn!(%url, %failure, "request failed");
                *self.last_error.write() = Some(failure.to_string());
                Err(match failure {
                    HttpFailure::Network(message) => {
                        self.reachable.store(false, Ordering::SeqCst);
                        SyncError::transport_retryable(message)
                    }
                    HttpFailure::Timeout => SyncError::Timeout,
                    HttpFailure::Status { code, message } if code >= 500 => {
                        SyncError::ServerError(message)
                    }
                    HttpFailure::Status { message, .. } => SyncError::Rejected(message),
                })
            }
        }
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push_batch(&self, batch: &SyncBatch) -> SyncResult<BatchResponse> {
        let body = batch.encode()?;
        let response = self.exchange(SYNC_ENDPOINT, |client, url, timeout| client.post(url, body, timeout))?;
        BatchResponse::decode(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }

    fn balance(&self, account_id: &ClientId) -> SyncResult<BalanceReport> {
        let endpoint = format!("{BALANCE_ENDPOINT}{account_id}");
        let response = self.exchange(&endpoint, |client, url, timeout| client.get(url, timeout))?;
        BalanceReport::decode(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode balance: {e}")))
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
            && self.reachable.load(Ordering::SeqCst)
            && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync + 'static {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpFailure>;

    /// Handles a GET request and returns the response body.
    fn handle_get(&self, path: &str) -> Result<Vec<u8>, HttpFailure>;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for tests and single-process setups without network overhead.
/// Each request runs on its own thread so a stalled server surfaces as
/// [`HttpFailure::Timeout`]; a late answer is discarded.
pub struct LoopbackClient<S: LoopbackServer> {
    server: Arc<S>,
    healthy: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server: Arc::new(server),
            healthy: AtomicBool::new(true),
        }
    }

    /// The wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Simulates losing or regaining the network.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), HttpFailure> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HttpFailure::Network("loopback offline".into()))
        }
    }

    fn call<F>(&self, timeout: Duration, request: F) -> Result<Vec<u8>, HttpFailure>
    where
        F: FnOnce(&S) -> Result<Vec<u8>, HttpFailure> + Send + 'static,
    {
        self.check()?;
        let server = Arc::clone(&self.server);
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("loopback-request".into())
            .spawn(move || {
                // the receiver is gone once the caller timed out
                let _ = tx.send(request(&*server));
            })
            .map_err(|e| HttpFailure::Network(format!("cannot start request: {e}")))?;

        match rx.recv_timeout(timeout) {
            Ok(response) => response,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(HttpFailure::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(HttpFailure::Network("loopback request aborted".into()))
            }
        }
    }
}

fn path_of(url: &str) -> &str {
    url.find("/api/").map_or(url, |i| &url[i..])
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, HttpFailure> {
        let path = path_of(url).to_string();
        self.call(timeout, move |server| server.handle_post(&path, &body))
    }

    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, HttpFailure> {
        let path = path_of(url).to_string();
        self.call(timeout, move |server| server.handle_get(&path))
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

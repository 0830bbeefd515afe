//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::reconciler::{Reconciler, ReconcilerStats};
use ledgersync_core::{CoreError, Drift, EntityStore, StoreConfig};
use ledgersync_protocol::{BalanceReport, BatchResponse, ClientId, SyncBatch};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Route accepting a JSON [`SyncBatch`].
pub const SYNC_PATH: &str = "/api/sync";

/// Route prefix for balance reports; the account id follows it.
pub const BALANCE_PATH_PREFIX: &str = "/api/ledger/balance/";

/// The sync server.
///
/// Transport-agnostic: an HTTP front end maps requests onto
/// [`handle_post`](Self::handle_post) and [`handle_get`](Self::handle_get).
///
/// # Example
///
/// ```
/// use ledgersync_sync_server::{ServerConfig, SyncServer, SYNC_PATH};
///
/// let server = SyncServer::in_memory(ServerConfig::default()).unwrap();
/// let body = br#"{"accounts":[],"transactions":[],"ledger":[],"payments":[]}"#;
/// let response = server.handle_post(SYNC_PATH, body).unwrap();
/// assert!(!response.is_empty());
/// ```
pub struct SyncServer {
    reconciler: Reconciler,
    config: ServerConfig,
}

impl SyncServer {
    /// Creates a server over an existing store.
    pub fn new(store: Arc<EntityStore>, config: ServerConfig) -> Self {
        Self {
            reconciler: Reconciler::new(store),
            config,
        }
    }

    /// Opens or creates a store directory and serves it.
    pub fn open(path: &Path, config: ServerConfig) -> ServerResult<Self> {
        let store = EntityStore::open(path, StoreConfig::default())?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// A server with a volatile store.
    pub fn in_memory(config: ServerConfig) -> ServerResult<Self> {
        let store = EntityStore::open_in_memory()?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// The server store.
    #[must_use]
    pub fn store(&self) -> &Arc<EntityStore> {
        self.reconciler.store()
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Reconciler counters.
    #[must_use]
    pub fn stats(&self) -> ReconcilerStats {
        self.reconciler.stats()
    }

    /// Applies a decoded batch.
    pub fn handle_batch(&self, batch: SyncBatch) -> ServerResult<BatchResponse> {
        self.check_size(batch.len())?;
        self.reconciler.apply(batch)
    }

    /// Applies a JSON batch and returns the JSON response.
    ///
    /// Records that fail to decode are reported as validation errors next
    /// to the ones the reconciler rejects.
    pub fn handle_json(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let decoded = SyncBatch::decode(body)?;
        self.check_size(decoded.batch.len() + decoded.rejected.len())?;

        let mut response = self.reconciler.apply(decoded.batch)?;
        let mut errors = decoded.rejected;
        errors.append(&mut response.errors);
        response.errors = errors;
        Ok(response.encode()?)
    }

    /// Cache-independent balance of one account.
    pub fn balance_report(&self, account_id: &ClientId) -> ServerResult<BalanceReport> {
        self.reconciler
            .books()
            .balance_report(account_id)
            .map_err(not_found)
    }

    /// Repairs one account's cached balance from its ledger.
    pub fn recalculate(&self, account_id: &ClientId) -> ServerResult<i64> {
        self.reconciler
            .books()
            .recalculate(account_id)
            .map_err(not_found)
    }

    /// Accounts whose cached balance disagrees with their ledger.
    #[must_use]
    pub fn audit_all(&self) -> Vec<Drift> {
        self.reconciler.books().audit_all()
    }

    /// Dispatches a POST.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        debug!(path, bytes = body.len(), "POST");
        match route(path) {
            Route::Sync => self.handle_json(body),
            Route::Balance(_) | Route::Unknown => Err(ServerError::NotFound(path.to_string())),
        }
    }

    /// Dispatches a GET.
    pub fn handle_get(&self, path: &str) -> ServerResult<Vec<u8>> {
        debug!(path, "GET");
        match route(path) {
            Route::Balance(id) => Ok(self.balance_report(&ClientId::from(id))?.encode()?),
            Route::Sync | Route::Unknown => Err(ServerError::NotFound(path.to_string())),
        }
    }

    fn check_size(&self, records: usize) -> ServerResult<()> {
        let max = self.config.max_batch_records;
        if records > max {
            return Err(ServerError::BatchTooLarge { records, max });
        }
        Ok(())
    }
}

enum Route<'p> {
    Sync,
    Balance(&'p str),
    Unknown,
}

fn route(path: &str) -> Route<'_> {
    let path = path.split('?').next().unwrap_or(path);
    if path == SYNC_PATH {
        return Route::Sync;
    }
    match path.strip_prefix(BALANCE_PATH_PREFIX) {
        Some(id) if !id.is_empty() && !id.contains('/') => Route::Balance(id),
        _ => Route::Unknown,
    }
}

fn not_found(err: CoreError) -> ServerError {
    match err {
        CoreError::NotFound { .. } => ServerError::NotFound(err.to_string()),
        other => ServerError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_protocol::{Account, BatchResponse, RecordErrorKind};

    fn server() -> SyncServer {
        SyncServer::in_memory(ServerConfig::default()).unwrap()
    }

    #[test]
    fn routes() {
        assert!(matches!(route("/api/sync"), Route::Sync));
        assert!(matches!(route("/api/sync?x=1"), Route::Sync));
        assert!(matches!(route("/api/ledger/balance/A1"), Route::Balance("A1")));
        assert!(matches!(route("/api/ledger/balance/"), Route::Unknown));
        assert!(matches!(route("/api/ledger/balance/A1/x"), Route::Unknown));
        assert!(matches!(route("/health"), Route::Unknown));
    }

    #[test]
    fn unknown_route_is_client_error() {
        let err = server().handle_post("/nope", b"{}").unwrap_err();
        assert!(err.is_client_error());
        let err = server().handle_get(SYNC_PATH).unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[test]
    fn oversized_batch_is_refused() {
        let server = SyncServer::in_memory(ServerConfig::new().with_max_batch_records(1)).unwrap();
        let batch = SyncBatch {
            accounts: vec![Account::new("A1".into(), "a"), Account::new("A2".into(), "b")],
            ..SyncBatch::default()
        };
        let err = server.handle_batch(batch).unwrap_err();
        assert!(matches!(err, ServerError::BatchTooLarge { records: 2, max: 1 }));
        assert!(server.store().get::<Account>(&"A1".into()).is_none());
    }

    #[test]
    fn malformed_body_is_invalid_request() {
        let err = server().handle_post(SYNC_PATH, b"not json").unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[test]
    fn undecodable_record_is_reported_per_record() {
        let body = br#"{
            "accounts": [
                {"clientId": "A1", "name": "Ravi"},
                {"clientId": "A2"}
            ]
        }"#;
        let bytes = server().handle_post(SYNC_PATH, body).unwrap();
        let response = BatchResponse::decode(&bytes).unwrap();
        assert_eq!(response.synced.accounts, 1);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].client_id.as_str(), "A2");
        assert_eq!(response.errors[0].kind, RecordErrorKind::Validation);
    }

    #[test]
    fn balance_of_unknown_account_is_not_found() {
        let err = server().handle_get("/api/ledger/balance/ghost").unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }
}

//! redb-backed request queue.
//!
//! Three tables:
//!
//! ```text
//! requests  request_id (UUIDv7 string) -> PendingRequest (JSON)
//! dedupe    dedupe_key                 -> request_id
//! pending   request_id                 -> ()   (requests not yet terminal)
//! ```
//!
//! Hyphenated UUIDv7 strings sort in creation order, so a forward scan of
//! `pending` visits the oldest open request first. Claiming and recovery
//! walk `pending` only; finished requests leave it in the same transaction
//! that makes them terminal. Every mutation is one write transaction; a
//! failed status transition aborts it.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use podgate_types::{
    IngressConfig, IngressError, PendingRequest, RequestId, RequestStatus, Result,
};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use thiserror::Error;

use crate::store::{InsertOutcome, RequestStore};

/// Requests table: key = request id, value = JSON
const REQUESTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("requests");

/// Index: dedupe key -> request id
const DEDUPE_TABLE: TableDefinition<&str, &str> = TableDefinition::new("request_dedupe");

/// Index: ids of requests that are not terminal
const PENDING_TABLE: TableDefinition<&str, ()> = TableDefinition::new("request_pending");

#[derive(Debug, Error)]
enum DurableError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Request(#[from] IngressError),
}

impl From<DurableError> for IngressError {
    fn from(err: DurableError) -> Self {
        match err {
            DurableError::Request(inner) => inner,
            other => IngressError::Storage(other.to_string()),
        }
    }
}

type DurableResult<T> = std::result::Result<T, DurableError>;

/// File-backed [`RequestStore`].
#[derive(Clone)]
pub struct RedbRequestStore {
    db: Arc<Database>,
}

impl RedbRequestStore {
    /// Open or create the queue at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::open_inner(path.as_ref())?)
    }

    /// Open the queue at the configured `queue_path`.
    pub fn open_from_config(config: &IngressConfig) -> Result<Self> {
        Self::open(&config.queue_path)
    }

    /// A queue held entirely in memory.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(DurableError::from)?;
        Ok(Self::init(db)?)
    }

    fn open_inner(path: &Path) -> DurableResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        tracing::info!(path = %path.display(), "request queue opened");
        Self::init(db)
    }

    fn init(db: Database) -> DurableResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(REQUESTS_TABLE)?;
            let _ = write_txn.open_table(DEDUPE_TABLE)?;
            let _ = write_txn.open_table(PENDING_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    fn insert_inner(&self, request: &PendingRequest) -> DurableResult<InsertOutcome> {
        let key = request.dedupe_key();
        let id = request.id.to_string();

        let txn = self.db.begin_write()?;
        let outcome = {
            let mut dedupe = txn.open_table(DEDUPE_TABLE)?;
            let existing = dedupe.get(key.as_str())?.map(|g| g.value().to_string());
            if let Some(existing) = existing {
                InsertOutcome::Duplicate(RequestId::parse(&existing)?)
            } else {
                dedupe.insert(key.as_str(), id.as_str())?;
                txn.open_table(PENDING_TABLE)?.insert(id.as_str(), ())?;
                let mut requests = txn.open_table(REQUESTS_TABLE)?;
                let value = serde_json::to_vec(request)?;
                requests.insert(id.as_str(), value.as_slice())?;
                InsertOutcome::Inserted(request.id)
            }
        };
        txn.commit()?;
        Ok(outcome)
    }

    fn claim_next_inner(&self, now: DateTime<Utc>) -> DurableResult<Option<PendingRequest>> {
        let txn = self.db.begin_write()?;
        let claimed = {
            let pending = txn.open_table(PENDING_TABLE)?;
            let mut table = txn.open_table(REQUESTS_TABLE)?;

            let mut due = None;
            for entry in pending.iter()? {
                let (key, _) = entry?;
                let Some(value) = table.get(key.value())? else {
                    continue;
                };
                let request: PendingRequest = serde_json::from_slice(value.value())?;
                if request.is_due(now) {
                    due = Some(request);
                    break;
                }
            }

            match due {
                Some(mut request) => {
                    request.transition(RequestStatus::InFlight)?;
                    let value = serde_json::to_vec(&request)?;
                    table.insert(request.id.to_string().as_str(), value.as_slice())?;
                    Some(request)
                }
                None => None,
            }
        };
        txn.commit()?;
        Ok(claimed)
    }

    fn update_inner(
        &self,
        id: RequestId,
        apply: impl FnOnce(&mut PendingRequest) -> Result<()>,
    ) -> DurableResult<PendingRequest> {
        let key = id.to_string();
        let txn = self.db.begin_write()?;
        let updated = {
            let mut table = txn.open_table(REQUESTS_TABLE)?;

            // Read first
            let bytes = {
                let value = table
                    .get(key.as_str())?
                    .ok_or(IngressError::RequestNotFound(id))?;
                value.value().to_vec()
            };

            let mut request: PendingRequest = serde_json::from_slice(&bytes)?;
            apply(&mut request)?;

            let value = serde_json::to_vec(&request)?;
            table.insert(key.as_str(), value.as_slice())?;
            if request.status.is_terminal() {
                txn.open_table(PENDING_TABLE)?.remove(key.as_str())?;
            }
            request
        };
        txn.commit()?;
        Ok(updated)
    }

    fn get_inner(&self, id: RequestId) -> DurableResult<Option<PendingRequest>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REQUESTS_TABLE)?;
        match table.get(id.to_string().as_str())? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn get_by_key_inner(&self, dedupe_key: &str) -> DurableResult<Option<PendingRequest>> {
        let read_txn = self.db.begin_read()?;
        let dedupe = read_txn.open_table(DEDUPE_TABLE)?;
        let requests = read_txn.open_table(REQUESTS_TABLE)?;
        let Some(id) = dedupe.get(dedupe_key)? else {
            return Ok(None);
        };
        match requests.get(id.value())? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn recover_in_flight_inner(&self) -> DurableResult<usize> {
        let txn = self.db.begin_write()?;
        let recovered = {
            let pending = txn.open_table(PENDING_TABLE)?;
            let mut table = txn.open_table(REQUESTS_TABLE)?;

            let mut stuck = Vec::new();
            for entry in pending.iter()? {
                let (key, _) = entry?;
                let Some(value) = table.get(key.value())? else {
                    continue;
                };
                let request: PendingRequest = serde_json::from_slice(value.value())?;
                if request.status == RequestStatus::InFlight {
                    stuck.push(request);
                }
            }

            for request in &mut stuck {
                request.transition(RequestStatus::Accepted)?;
                let value = serde_json::to_vec(&*request)?;
                table.insert(request.id.to_string().as_str(), value.as_slice())?;
            }
            stuck.len()
        };
        txn.commit()?;
        Ok(recovered)
    }

    fn purge_completed_inner(&self, older_than: DateTime<Utc>) -> DurableResult<usize> {
        let txn = self.db.begin_write()?;
        let deleted = {
            let mut table = txn.open_table(REQUESTS_TABLE)?;
            let mut dedupe = txn.open_table(DEDUPE_TABLE)?;

            let mut to_delete = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let request: PendingRequest = serde_json::from_slice(value.value())?;
                if request.status.is_terminal() && request.updated_at < older_than {
                    to_delete.push((key.value().to_string(), request.dedupe_key()));
                }
            }

            for (id, dedupe_key) in &to_delete {
                table.remove(id.as_str())?;
                dedupe.remove(dedupe_key.as_str())?;
            }
            to_delete.len()
        };
        txn.commit()?;
        Ok(deleted)
    }

    fn count_by_status_inner(&self, status: RequestStatus) -> DurableResult<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REQUESTS_TABLE)?;
        let mut count = 0;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let request: PendingRequest = serde_json::from_slice(value.value())?;
            if request.status == status {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl RequestStore for RedbRequestStore {
    fn insert(&self, request: PendingRequest) -> Result<InsertOutcome> {
        Ok(self.insert_inner(&request)?)
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<PendingRequest>> {
        Ok(self.claim_next_inner(now)?)
    }

    fn mark_succeeded(&self, id: RequestId) -> Result<PendingRequest> {
        Ok(self.update_inner(id, |r| r.transition(RequestStatus::Succeeded))?)
    }

    fn mark_retryable(
        &self,
        id: RequestId,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<PendingRequest> {
        Ok(self.update_inner(id, |r| r.schedule_retry(next_attempt_at, error))?)
    }

    fn mark_failed(&self, id: RequestId, error: &str) -> Result<PendingRequest> {
        Ok(self.update_inner(id, |r| r.fail(error))?)
    }

    fn record_distributed(
        &self,
        id: RequestId,
        mappings: &BTreeSet<usize>,
    ) -> Result<PendingRequest> {
        Ok(self.update_inner(id, |r| r.record_distributed(mappings))?)
    }

    fn get(&self, id: RequestId) -> Result<Option<PendingRequest>> {
        Ok(self.get_inner(id)?)
    }

    fn get_by_key(&self, dedupe_key: &str) -> Result<Option<PendingRequest>> {
        Ok(self.get_by_key_inner(dedupe_key)?)
    }

    fn recover_in_flight(&self) -> Result<usize> {
        Ok(self.recover_in_flight_inner()?)
    }

    fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<usize> {
        Ok(self.purge_completed_inner(older_than)?)
    }

    fn count_by_status(&self, status: RequestStatus) -> Result<usize> {
        Ok(self.count_by_status_inner(status)?)
    }
}

impl std::fmt::Debug for RedbRequestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRequestStore").finish_non_exhaustive()
    }
}

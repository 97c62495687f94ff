//! # Durable request queue
//!
//! Accepted requests are recorded here before the caller gets an answer,
//! and the process loop drains them. [`RequestStore`] is the seam; this
//! module also provides [`MemoryRequestStore`] for tests and ephemeral
//! deployments. The file-backed store lives in [`crate::durable`].
//!
//! ## Guarantees every implementation keeps
//!
//! - `insert` is atomic and deduplicates by [`PendingRequest::dedupe_key`].
//! - `claim_next` hands a request to exactly one caller and moves it to
//!   `InFlight` in the same step.
//! - Every status change goes through [`PendingRequest::transition`], so the
//!   lifecycle state machine is enforced in one place.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use podgate_types::{IngressError, PendingRequest, RequestId, RequestStatus, Result};

/// Result of [`RequestStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new record was written.
    Inserted(RequestId),
    /// A record with the same dedupe key already exists; nothing was written.
    Duplicate(RequestId),
}

impl InsertOutcome {
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::Inserted(id) | Self::Duplicate(id) => *id,
        }
    }

    #[must_use]
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Storage seam of the request queue.
///
/// Calls are short and synchronous; async callers may invoke them directly.
pub trait RequestStore: Send + Sync {
    /// Record `request` unless its dedupe key is already present.
    fn insert(&self, request: PendingRequest) -> Result<InsertOutcome>;

    /// Claim the oldest request due at `now`, moving it to `InFlight`.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<PendingRequest>>;

    fn mark_succeeded(&self, id: RequestId) -> Result<PendingRequest>;

    /// `InFlight → Retrying`, claimable again at `next_attempt_at`.
    fn mark_retryable(
        &self,
        id: RequestId,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<PendingRequest>;

    fn mark_failed(&self, id: RequestId, error: &str) -> Result<PendingRequest>;

    /// Record open-order mappings that reached quorum during the current
    /// attempt. The request stays `InFlight`.
    fn record_distributed(
        &self,
        id: RequestId,
        mappings: &BTreeSet<usize>,
    ) -> Result<PendingRequest>;

    fn get(&self, id: RequestId) -> Result<Option<PendingRequest>>;

    /// Look a request up by its dedupe key.
    fn get_by_key(&self, dedupe_key: &str) -> Result<Option<PendingRequest>>;

    /// Return every `InFlight` request to `Accepted`. Called once at start-up,
    /// before anything is claimed. Returns how many were recovered.
    fn recover_in_flight(&self) -> Result<usize>;

    /// Delete terminal requests last updated before `older_than`, freeing
    /// their dedupe keys. Returns how many were deleted.
    fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<usize>;

    fn count_by_status(&self, status: RequestStatus) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// MemoryRequestStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    /// UUIDv7 keys, so iteration order is creation order.
    requests: BTreeMap<RequestId, PendingRequest>,
    dedupe: HashMap<String, RequestId>,
}

/// In-memory [`RequestStore`]. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRequestStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryRequestStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| IngressError::Storage("memory store lock poisoned".into()))
    }

    fn update(
        &self,
        id: RequestId,
        apply: impl FnOnce(&mut PendingRequest) -> Result<()>,
    ) -> Result<PendingRequest> {
        let mut inner = self.lock()?;
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or(IngressError::RequestNotFound(id))?;
        apply(request)?;
        Ok(request.clone())
    }
}

impl RequestStore for MemoryRequestStore {
    fn insert(&self, request: PendingRequest) -> Result<InsertOutcome> {
        let key = request.dedupe_key();
        let mut inner = self.lock()?;
        if let Some(existing) = inner.dedupe.get(&key) {
            return Ok(InsertOutcome::Duplicate(*existing));
        }
        let id = request.id;
        inner.dedupe.insert(key, id);
        inner.requests.insert(id, request);
        Ok(InsertOutcome::Inserted(id))
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<PendingRequest>> {
        let mut inner = self.lock()?;
        let Some(request) = inner.requests.values_mut().find(|r| r.is_due(now)) else {
            return Ok(None);
        };
        request.transition(RequestStatus::InFlight)?;
        Ok(Some(request.clone()))
    }

    fn mark_succeeded(&self, id: RequestId) -> Result<PendingRequest> {
        self.update(id, |r| r.transition(RequestStatus::Succeeded))
    }

    fn mark_retryable(
        &self,
        id: RequestId,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<PendingRequest> {
        self.update(id, |r| r.schedule_retry(next_attempt_at, error))
    }

    fn mark_failed(&self, id: RequestId, error: &str) -> Result<PendingRequest> {
        self.update(id, |r| r.fail(error))
    }

    fn record_distributed(
        &self,
        id: RequestId,
        mappings: &BTreeSet<usize>,
    ) -> Result<PendingRequest> {
        self.update(id, |r| r.record_distributed(mappings))
    }

    fn get(&self, id: RequestId) -> Result<Option<PendingRequest>> {
        Ok(self.lock()?.requests.get(&id).cloned())
    }

    fn get_by_key(&self, dedupe_key: &str) -> Result<Option<PendingRequest>> {
        let inner = self.lock()?;
        Ok(inner
            .dedupe
            .get(dedupe_key)
            .and_then(|id| inner.requests.get(id))
            .cloned())
    }

    fn recover_in_flight(&self) -> Result<usize> {
        let mut inner = self.lock()?;
        let mut recovered = 0;
        for request in inner
            .requests
            .values_mut()
            .filter(|r| r.status == RequestStatus::InFlight)
        {
            request.transition(RequestStatus::Accepted)?;
            recovered += 1;
        }
        Ok(recovered)
    }

    fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.lock()?;
        let expired: Vec<(RequestId, String)> = inner
            .requests
            .values()
            .filter(|r| r.status.is_terminal() && r.updated_at < older_than)
            .map(|r| (r.id, r.dedupe_key()))
            .collect();
        for (id, key) in &expired {
            inner.requests.remove(id);
            inner.dedupe.remove(key);
        }
        Ok(expired.len())
    }

    fn count_by_status(&self, status: RequestStatus) -> Result<usize> {
        Ok(self
            .lock()?
            .requests
            .values()
            .filter(|r| r.status == status)
            .count())
    }
}

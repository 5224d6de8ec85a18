//! Idempotency store deduplicating retried submissions.
//!
//! Keys are scoped by tenant. The first submission for a `(tenant, key)` pair
//! claims the slot and runs the admission pipeline; concurrent duplicates wait
//! on a `watch` channel until the claim resolves. A committed claim is replayed
//! until its TTL elapses. A claim dropped without commit (the owner was
//! rejected) frees the slot, and one of the waiters claims it next.
//!
//! Each slot remembers the payload that claimed it. Reusing a key with a
//! different payload (including a different job kind) is a conflict rather
//! than a replay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::{Accepted, JobPayload};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopeKey {
    tenant: String,
    key: String,
}

/// Cached acceptance for a tenant-scoped idempotency key.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    /// Client-supplied key.
    pub key: String,
    /// Tenant the key is scoped to.
    pub tenant_scope: String,
    /// Acceptance returned on replay.
    pub cached_result: Accepted,
    /// Payload of the submission that committed the key.
    pub payload: JobPayload,
    /// Instant after which the record is ignored.
    pub expires_at: Instant,
}

impl IdempotencyRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

enum Slot {
    InFlight {
        rx: watch::Receiver<Option<Accepted>>,
        payload: JobPayload,
    },
    Ready(IdempotencyRecord),
}

/// Outcome of claiming an idempotency key.
pub enum Claim {
    /// No live record exists; the caller owns the key and must run admission.
    Owner(ClaimGuard),
    /// A previous submission was accepted; replay its result.
    Replay(Accepted),
    /// The key is live for a different payload.
    Conflict,
}

impl std::fmt::Debug for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owner(_) => f.write_str("Claim::Owner"),
            Self::Replay(accepted) => f.debug_tuple("Claim::Replay").field(accepted).finish(),
            Self::Conflict => f.write_str("Claim::Conflict"),
        }
    }
}

/// Exclusive claim on an idempotency key.
///
/// Dropping the guard without [`ClaimGuard::commit`] releases the key.
pub struct ClaimGuard {
    store: Arc<IdempotencyStore>,
    scope: ScopeKey,
    payload: JobPayload,
    tx: Option<watch::Sender<Option<Accepted>>>,
}

impl ClaimGuard {
    /// Record the acceptance and wake every waiting duplicate.
    pub fn commit(mut self, accepted: Accepted) {
        let record = IdempotencyRecord {
            key: self.scope.key.clone(),
            tenant_scope: self.scope.tenant.clone(),
            cached_result: accepted,
            payload: self.payload.clone(),
            expires_at: Instant::now() + self.store.ttl,
        };
        self.store
            .entries
            .lock()
            .insert(self.scope.clone(), Slot::Ready(record));
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(accepted));
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if self.tx.is_none() {
            return;
        }
        let mut entries = self.store.entries.lock();
        if matches!(entries.get(&self.scope), Some(Slot::InFlight { .. })) {
            entries.remove(&self.scope);
        }
        drop(entries);
        tracing::debug!(
            tenant = %self.scope.tenant,
            key = %self.scope.key,
            "idempotency claim released without commit"
        );
        // Dropping the sender wakes waiters so one of them can re-claim.
        self.tx = None;
    }
}

/// Tenant-scoped idempotency store with first-writer-wins semantics.
pub struct IdempotencyStore {
    ttl: Duration,
    entries: Mutex<HashMap<ScopeKey, Slot>>,
}

impl IdempotencyStore {
    /// Create a store whose records live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Claim `(tenant, key)` for `payload` or obtain the cached acceptance.
    ///
    /// Waits while another submission with the same payload holds the key.
    pub async fn claim(self: &Arc<Self>, tenant: &str, key: &str, payload: &JobPayload) -> Claim {
        let scope = ScopeKey {
            tenant: tenant.to_string(),
            key: key.to_string(),
        };

        loop {
            let mut rx = {
                let mut entries = self.entries.lock();
                match entries.get(&scope) {
                    Some(Slot::Ready(record)) if !record.is_expired(Instant::now()) => {
                        if record.payload != *payload {
                            return Claim::Conflict;
                        }
                        return Claim::Replay(record.cached_result);
                    }
                    Some(Slot::InFlight { rx, payload: held }) => {
                        if held != payload {
                            return Claim::Conflict;
                        }
                        rx.clone()
                    }
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        entries.insert(
                            scope.clone(),
                            Slot::InFlight {
                                rx,
                                payload: payload.clone(),
                            },
                        );
                        return Claim::Owner(ClaimGuard {
                            store: Arc::clone(self),
                            scope,
                            payload: payload.clone(),
                            tx: Some(tx),
                        });
                    }
                }
            };

            tracing::debug!(tenant, key, "waiting on in-flight idempotent submission");
            let resolved = match rx.wait_for(Option::is_some).await {
                Ok(value) => *value,
                Err(_) => None,
            };
            if let Some(accepted) = resolved {
                return Claim::Replay(accepted);
            }
            // Owner was rejected; race for the slot again.
        }
    }

    /// Fetch a live record without claiming.
    #[must_use]
    pub fn get(&self, tenant: &str, key: &str) -> Option<IdempotencyRecord> {
        let scope = ScopeKey {
            tenant: tenant.to_string(),
            key: key.to_string(),
        };
        match self.entries.lock().get(&scope) {
            Some(Slot::Ready(record)) if !record.is_expired(Instant::now()) => {
                Some(record.clone())
            }
            _ => None,
        }
    }

    /// Drop expired records and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, slot| match slot {
            Slot::Ready(record) => !record.is_expired(now),
            Slot::InFlight { .. } => true,
        });
        before - entries.len()
    }

    /// Number of tracked keys, in flight or committed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store tracks no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompetitionPayload, JobKind, TaskPayload};
    use uuid::Uuid;

    fn accepted() -> Accepted {
        Accepted::new(Uuid::new_v4(), JobKind::Task)
    }

    fn task(text: &str) -> TaskPayload {
        TaskPayload {
            text: text.into(),
            platforms: vec!["x".into()],
            tags: Vec::new(),
        }
    }

    fn payload() -> JobPayload {
        JobPayload::Task(task("hello"))
    }

    #[tokio::test]
    async fn test_first_claim_owns_then_replays() {
        let store = Arc::new(IdempotencyStore::new(Duration::from_secs(60)));
        let Claim::Owner(guard) = store.claim("acme", "k1", &payload()).await else {
            panic!("first claim must own the key");
        };
        let result = accepted();
        guard.commit(result);

        match store.claim("acme", "k1", &payload()).await {
            Claim::Replay(replayed) => assert_eq!(replayed, result),
            other => panic!("second claim must replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_keys_are_tenant_scoped() {
        let store = Arc::new(IdempotencyStore::new(Duration::from_secs(60)));
        let Claim::Owner(guard) = store.claim("acme", "k1", &payload()).await else {
            panic!("expected owner");
        };
        guard.commit(accepted());
        assert!(matches!(store.claim("globex", "k1", &payload()).await, Claim::Owner(_)));
    }

    #[tokio::test]
    async fn test_dropped_claim_releases_key() {
        let store = Arc::new(IdempotencyStore::new(Duration::from_secs(60)));
        let claim = store.claim("acme", "k1", &payload()).await;
        assert!(matches!(claim, Claim::Owner(_)));
        drop(claim);
        assert!(store.is_empty());
        assert!(matches!(store.claim("acme", "k1", &payload()).await, Claim::Owner(_)));
    }

    #[tokio::test]
    async fn test_waiter_receives_owner_result() {
        let store = Arc::new(IdempotencyStore::new(Duration::from_secs(60)));
        let Claim::Owner(guard) = store.claim("acme", "k1", &payload()).await else {
            panic!("expected owner");
        };

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim("acme", "k1", &payload()).await })
        };
        tokio::task::yield_now().await;

        let result = accepted();
        guard.commit(result);
        match waiter.await.unwrap() {
            Claim::Replay(replayed) => assert_eq!(replayed, result),
            other => panic!("waiter must replay, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_record_is_reclaimable() {
        let store = Arc::new(IdempotencyStore::new(Duration::from_secs(10)));
        let Claim::Owner(guard) = store.claim("acme", "k1", &payload()).await else {
            panic!("expected owner");
        };
        guard.commit(accepted());
        assert!(store.get("acme", "k1").is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("acme", "k1").is_none());
        assert_eq!(store.purge_expired(), 1);
        assert!(matches!(store.claim("acme", "k1", &payload()).await, Claim::Owner(_)));
    }

    #[tokio::test]
    async fn test_key_reused_for_other_kind_conflicts() {
        let store = Arc::new(IdempotencyStore::new(Duration::from_secs(60)));
        let Claim::Owner(guard) = store.claim("acme", "k1", &payload()).await else {
            panic!("expected owner");
        };
        guard.commit(accepted());

        let competition = JobPayload::Competition(CompetitionPayload {
            task: task("hello"),
            competitors: None,
        });
        assert!(matches!(
            store.claim("acme", "k1", &competition).await,
            Claim::Conflict
        ));
        let edited = JobPayload::Task(task("goodbye"));
        assert!(matches!(store.claim("acme", "k1", &edited).await, Claim::Conflict));
    }

    #[tokio::test]
    async fn test_in_flight_key_conflicts_for_other_payload() {
        let store = Arc::new(IdempotencyStore::new(Duration::from_secs(60)));
        let _guard = store.claim("acme", "k1", &payload()).await;
        let edited = JobPayload::Task(task("goodbye"));
        assert!(matches!(store.claim("acme", "k1", &edited).await, Claim::Conflict));
    }

    #[tokio::test]
    async fn test_waiters_reclaim_after_owner_rejection() {
        let store = Arc::new(IdempotencyStore::new(Duration::from_secs(60)));
        let Claim::Owner(first) = store.claim("acme", "k1", &payload()).await else {
            panic!("expected owner");
        };

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim("acme", "k1", &payload()).await })
        };
        tokio::task::yield_now().await;
        drop(first);

        let Claim::Owner(second) = waiter.await.unwrap() else {
            panic!("waiter must take over the released key");
        };
        let result = accepted();
        second.commit(result);
        assert_eq!(store.get("acme", "k1").unwrap().cached_result, result);
    }
}

//! Circuit breakers guarding calls to external collaborators.
//!
//! # State Machine
//!
//! ```text
//!   Closed ──(failure % over rolling window > threshold)──> Open
//!   Open ──(reset_timeout elapsed, next call)──> HalfOpen (one probe admitted)
//!   HalfOpen ──(probe succeeds)──> Closed
//!   HalfOpen ──(probe fails)──> Open
//! ```
//!
//! While Open, and while a HalfOpen probe is in flight, calls never reach the
//! collaborator: the caller's fallback answers instead. Each target owns an
//! independent breaker so one failing publish platform cannot block others.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::CollaboratorError;
use crate::util::metrics::record_short_circuit;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Per-target breaker tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure percentage (0-100) above which the breaker opens.
    pub error_threshold_percentage: f64,
    /// Minimum calls in the window before the percentage is evaluated.
    pub volume_threshold: u32,
    /// Length of the rolling observation window.
    pub rolling_window_ms: u64,
    /// Time spent Open before a probe is allowed.
    pub reset_timeout_ms: u64,
    /// Per-call timeout; slower calls count as failures.
    pub call_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percentage: 50.0,
            volume_threshold: 5,
            rolling_window_ms: 10_000,
            reset_timeout_ms: 30_000,
            call_timeout_ms: 3_000,
        }
    }
}

impl BreakerConfig {
    /// Validate thresholds and timeouts.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.error_threshold_percentage > 0.0 && self.error_threshold_percentage <= 100.0) {
            return Err("error_threshold_percentage must be in (0, 100]".into());
        }
        if self.volume_threshold == 0 {
            return Err("volume_threshold must be greater than 0".into());
        }
        if self.rolling_window_ms == 0 || self.reset_timeout_ms == 0 || self.call_timeout_ms == 0 {
            return Err("breaker durations must be greater than 0".into());
        }
        Ok(())
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls short-circuit to the fallback.
    Open,
    /// One probe call is allowed through.
    HalfOpen,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    /// Target name.
    pub target: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures in the current rolling window.
    pub failure_count: usize,
    /// Milliseconds since the breaker last opened, if it is not closed.
    pub open_for_ms: Option<u64>,
    /// Times the breaker tripped.
    pub trips: u64,
    /// Calls answered by the fallback.
    pub short_circuits: u64,
}

struct Inner {
    state: CircuitState,
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Inner {
    fn evict(&mut self, now: Instant, span: Duration) {
        while let Some(&(at, _)) = self.window.front() {
            if now.duration_since(at) < span {
                break;
            }
            self.window.pop_front();
        }
    }

    fn failures(&self) -> usize {
        self.window.iter().filter(|(_, ok)| !ok).count()
    }
}

#[derive(Clone, Copy)]
enum Permit {
    Pass,
    Probe,
    Reject,
}

/// Admitted call. Dropped before [`CallGuard::finish`] (the call panicked or
/// its future was cancelled), it records a failure and frees the half-open slot.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    armed: bool,
}

impl CallGuard<'_> {
    fn finish(mut self, success: bool) {
        self.armed = false;
        self.breaker.record(self.permit, success);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(target_name = %self.breaker.target, "call abandoned, counted as failure");
            self.breaker.record(self.permit, false);
        }
    }
}

// ─── Circuit Breaker ────────────────────────────────────────────────────────

/// Breaker protecting one collaborator target.
pub struct CircuitBreaker {
    target: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    trip_count: AtomicU64,
    short_circuit_count: AtomicU64,
}

impl CircuitBreaker {
    /// Creates a closed breaker for `target`.
    #[must_use]
    pub fn new(target: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
            trip_count: AtomicU64::new(0),
            short_circuit_count: AtomicU64::new(0),
        }
    }

    /// Target name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current configuration.
    #[must_use]
    pub const fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, applying the Open → HalfOpen timer lazily.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        if inner.state == CircuitState::Open && self.reset_elapsed(&inner, Instant::now()) {
            return CircuitState::HalfOpen;
        }
        inner.state
    }

    /// Run `op` through the breaker.
    ///
    /// When the breaker refuses the call, `fallback` receives
    /// [`CollaboratorError::CircuitOpen`] and its value is returned. Failures
    /// and timeouts of `op` are recorded and returned as-is.
    pub async fn call<T, F, Fut, FB>(&self, op: F, fallback: FB) -> Result<T, CollaboratorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
        FB: FnOnce(CollaboratorError) -> Result<T, CollaboratorError>,
    {
        let permit = self.acquire();
        if matches!(permit, Permit::Reject) {
            self.short_circuit_count.fetch_add(1, Ordering::Relaxed);
            record_short_circuit(&self.target);
            tracing::debug!(target_name = %self.target, "circuit open, using fallback");
            return fallback(CollaboratorError::CircuitOpen {
                target: self.target.clone(),
            });
        }

        let guard = CallGuard {
            breaker: self,
            permit,
            armed: true,
        };
        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout {
                target: self.target.clone(),
                after_ms: self.config.call_timeout_ms,
            }),
        };

        guard.finish(result.is_ok());
        result
    }

    /// Force the breaker open (operator override).
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.trip(&mut inner, Instant::now());
    }

    /// Force the breaker closed and clear its window (operator override).
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        Self::close(&mut inner);
    }

    /// Point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = Instant::now();
        let state = self.state();
        let mut inner = self.inner.lock();
        inner.evict(now, Duration::from_millis(self.config.rolling_window_ms));
        #[allow(clippy::cast_possible_truncation)]
        let open_for_ms = inner
            .opened_at
            .map(|at| now.duration_since(at).as_millis() as u64);
        CircuitSnapshot {
            target: self.target.clone(),
            state,
            failure_count: inner.failures(),
            open_for_ms,
            trips: self.trip_count.load(Ordering::Relaxed),
            short_circuits: self.short_circuit_count.load(Ordering::Relaxed),
        }
    }

    // ─── Internal ───────────────────────────────────────────────────

    fn reset_elapsed(&self, inner: &Inner, now: Instant) -> bool {
        inner.opened_at.is_some_and(|at| {
            now.duration_since(at) >= Duration::from_millis(self.config.reset_timeout_ms)
        })
    }

    fn acquire(&self) -> Permit {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Permit::Pass,
            CircuitState::Open => {
                if self.reset_elapsed(&inner, now) {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!(target_name = %self.target, "circuit half-open, sending probe");
                    Permit::Probe
                } else {
                    Permit::Reject
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Permit::Reject
                } else {
                    inner.probe_in_flight = true;
                    Permit::Probe
                }
            }
        }
    }

    fn record(&self, permit: Permit, success: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if matches!(permit, Permit::Probe) {
            inner.probe_in_flight = false;
            if success {
                Self::close(&mut inner);
                tracing::info!(target_name = %self.target, "probe succeeded, circuit closed");
            } else {
                self.trip(&mut inner, now);
                tracing::warn!(target_name = %self.target, "probe failed, circuit re-opened");
            }
            return;
        }

        // Outcomes of calls admitted before a trip still land here; only a
        // closed breaker evaluates them.
        if inner.state != CircuitState::Closed {
            return;
        }
        inner.evict(now, Duration::from_millis(self.config.rolling_window_ms));
        inner.window.push_back((now, success));

        let total = inner.window.len();
        if total < self.config.volume_threshold as usize {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let failure_pct = inner.failures() as f64 * 100.0 / total as f64;
        if failure_pct > self.config.error_threshold_percentage {
            self.trip(&mut inner, now);
            tracing::warn!(
                target_name = %self.target,
                failure_pct,
                threshold = self.config.error_threshold_percentage,
                "circuit opened"
            );
        }
    }

    fn trip(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.probe_in_flight = false;
        self.trip_count.fetch_add(1, Ordering::Relaxed);
    }

    fn close(inner: &mut Inner) {
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.window.clear();
    }
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// Owns one breaker per target, created on first use.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for `target`, created with `config` if missing.
    pub fn get_or_create(&self, target: &str, config: &BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(target) {
            return Arc::clone(existing);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(target, config.clone()))),
        )
    }

    /// Existing breaker for `target`.
    #[must_use]
    pub fn get(&self, target: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(target).cloned()
    }

    /// Snapshots of every breaker, sorted by target.
    #[must_use]
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .read()
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.target.cmp(&b.target));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn config() -> BreakerConfig {
        BreakerConfig {
            error_threshold_percentage: 50.0,
            volume_threshold: 4,
            rolling_window_ms: 10_000,
            reset_timeout_ms: 1_000,
            call_timeout_ms: 500,
        }
    }

    fn unavailable() -> CollaboratorError {
        CollaboratorError::Unavailable {
            target: "content".into(),
            message: "boom".into(),
        }
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicUsize) -> Result<u32, CollaboratorError> {
        breaker
            .call(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                },
                |_| Ok(0),
            )
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &AtomicUsize) -> Result<u32, CollaboratorError> {
        breaker
            .call(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                },
                |_| Ok(0),
            )
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_uses_fallback() {
        let breaker = CircuitBreaker::new("content", config());
        let calls = AtomicUsize::new(0);

        assert!(succeed(&breaker, &calls).await.is_ok());
        for _ in 0..3 {
            assert!(fail(&breaker, &calls).await.is_err());
        }
        // 3 of 4 failed: 75% > 50%.
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(breaker.snapshot().short_circuits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_threshold_prevents_early_trip() {
        let breaker = CircuitBreaker::new("content", config());
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_closes() {
        let breaker = CircuitBreaker::new("content", config());
        let calls = AtomicUsize::new(0);
        breaker.force_open();

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens_and_restarts_timer() {
        let breaker = CircuitBreaker::new("content", config());
        let calls = AtomicUsize::new(0);
        breaker.force_open();

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(fail(&breaker, &calls).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_probe_in_flight() {
        let breaker = Arc::new(CircuitBreaker::new("content", config()));
        let calls = Arc::new(AtomicUsize::new(0));
        breaker.force_open();
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let breaker = Arc::clone(&breaker);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                breaker
                    .call(
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            let _ = release_rx.await;
                            Ok(7)
                        },
                        |_| Ok(0),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;

        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let _ = release_tx.send(());
        assert_eq!(probe.await.unwrap().unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_counts_as_timeout() {
        let breaker = CircuitBreaker::new("publish:x", config());
        let result: Result<u32, _> = breaker
            .call(
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(1)
                },
                |_| Ok(0),
            )
            .await;
        assert!(matches!(result, Err(CollaboratorError::Timeout { after_ms: 500, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_half_open_call_reopens() {
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        let breaker = CircuitBreaker::new("content", config());
        let calls = AtomicUsize::new(0);
        breaker.force_open();
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let panicked = AssertUnwindSafe(breaker.call(
            || async {
                if calls.load(Ordering::SeqCst) == 0 {
                    panic!("collaborator client bug");
                }
                Ok::<u32, CollaboratorError>(1)
            },
            |_| Ok(0),
        ))
        .catch_unwind()
        .await;
        assert!(panicked.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_half_open_call_releases_slot() {
        let breaker = Arc::new(CircuitBreaker::new("content", config()));
        let calls = AtomicUsize::new(0);
        breaker.force_open();
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let stuck = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .call(
                        || std::future::pending::<Result<u32, CollaboratorError>>(),
                        |_| Ok(0),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        stuck.abort();
        assert!(stuck.await.unwrap_err().is_cancelled());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_reuses_instances() {
        let registry = BreakerRegistry::new();
        let a = registry.get_or_create("publish:x", &config());
        let b = registry.get_or_create("publish:x", &config());
        let c = registry.get_or_create("publish:linkedin", &config());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.snapshots().len(), 2);
    }
}

//! Global error-budget gate.
//!
//! A single sliding window of terminal job outcomes feeds one burn rate for
//! the whole service. The budget is not partitioned by tenant: one noisy
//! tenant can exhaust it and close admission for everyone.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::ErrorBudgetConfig;

struct Window {
    outcomes: VecDeque<(Instant, bool)>,
    failures: usize,
}

impl Window {
    fn evict(&mut self, now: Instant, span: Duration) {
        while let Some(&(at, ok)) = self.outcomes.front() {
            if now.duration_since(at) < span {
                break;
            }
            self.outcomes.pop_front();
            if !ok {
                self.failures -= 1;
            }
        }
    }
}

/// Sliding-window error budget.
pub struct ErrorBudget {
    allowed_failure_ratio: f64,
    span: Duration,
    min_samples: usize,
    window: Mutex<Window>,
    forced: Mutex<Option<f64>>,
}

impl ErrorBudget {
    /// Build from configuration.
    #[must_use]
    pub fn new(cfg: &ErrorBudgetConfig) -> Self {
        Self {
            allowed_failure_ratio: (1.0 - cfg.slo_target).max(f64::EPSILON),
            span: Duration::from_secs(cfg.window_secs),
            min_samples: cfg.min_samples.max(1),
            window: Mutex::new(Window {
                outcomes: VecDeque::new(),
                failures: 0,
            }),
            forced: Mutex::new(None),
        }
    }

    /// Record a terminal job outcome.
    pub fn record(&self, success: bool) {
        let now = Instant::now();
        let mut window = self.window.lock();
        window.evict(now, self.span);
        window.outcomes.push_back((now, success));
        if !success {
            window.failures += 1;
        }
    }

    /// Record a successful job.
    pub fn record_success(&self) {
        self.record(true);
    }

    /// Record a failed job.
    pub fn record_failure(&self) {
        self.record(false);
    }

    /// Fraction of the failure budget consumed in the current window.
    ///
    /// `1.0` means the budget is spent.
    #[must_use]
    pub fn burn_rate(&self) -> f64 {
        if let Some(forced) = *self.forced.lock() {
            return forced;
        }
        let mut window = self.window.lock();
        window.evict(Instant::now(), self.span);
        let denominator = window.outcomes.len().max(self.min_samples);
        #[allow(clippy::cast_precision_loss)]
        let failure_ratio = window.failures as f64 / denominator as f64;
        failure_ratio / self.allowed_failure_ratio
    }

    /// Whether admission must be refused.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.burn_rate() >= 1.0
    }

    /// Pin the burn rate to a value, or clear the pin with `None`.
    ///
    /// Used by operators to close or reopen admission manually.
    pub fn force_burn_rate(&self, burn_rate: Option<f64>) {
        *self.forced.lock() = burn_rate;
    }

    /// Outcomes currently in the window as `(total, failures)`.
    #[must_use]
    pub fn window_counts(&self) -> (usize, usize) {
        let mut window = self.window.lock();
        window.evict(Instant::now(), self.span);
        (window.outcomes.len(), window.failures)
    }
}

use std::collections::VecDeque;

use crate::config::BreakerConfig;

/// Process-wide circuit breaker over live policy applies.
///
/// Counts rollbacks/apply failures in a sliding window; once the count
/// reaches the threshold the breaker trips and every subsequent validation
/// rejects with `CircuitOpen`. It resets after a cool-down with no new
/// failures. Mutated only by the execution coordinator, behind one mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    window_secs: f64,
    threshold: usize,
    cooldown_secs: f64,
    /// Failure timestamps (epoch seconds) within the window, oldest first
    failures: VecDeque<f64>,
    tripped_at: Option<f64>,
    /// An open->closed transition happened and has not been reported yet
    pending_reset: bool,
}

/// What `record_failure` did to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Unchanged,
    /// This failure opened the breaker; carries the window count at trip time.
    Tripped { failures: usize },
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            window_secs: config.window_hours as f64 * 3600.0,
            threshold: config.threshold,
            cooldown_secs: config.cooldown_hours as f64 * 3600.0,
            failures: VecDeque::new(),
            tripped_at: None,
            pending_reset: false,
        }
    }

    fn evict(&mut self, now: f64) {
        while let Some(&oldest) = self.failures.front() {
            if now - oldest > self.window_secs {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record one rollback/apply failure. Returns `Tripped` when this failure
    /// is the one that opened the breaker.
    pub fn record_failure(&mut self, now: f64) -> BreakerTransition {
        self.evict(now);
        self.failures.push_back(now);
        if self.tripped_at.is_none() && self.failures.len() >= self.threshold {
            self.tripped_at = Some(now);
            return BreakerTransition::Tripped {
                failures: self.failures.len(),
            };
        }
        BreakerTransition::Unchanged
    }

    /// Whether live applies are currently vetoed. Auto-resets once the
    /// cool-down has elapsed without a new failure; returns false from then
    /// on. The open->closed transition is latched until `check_reset`
    /// consumes it, whichever call observed it first.
    pub fn is_open(&mut self, now: f64) -> bool {
        if self.tripped_at.is_none() {
            return false;
        }
        let last_failure = self.failures.back().copied().unwrap_or(0.0);
        if now - last_failure >= self.cooldown_secs {
            self.tripped_at = None;
            self.failures.clear();
            self.pending_reset = true;
            return false;
        }
        true
    }

    /// True exactly once per open->closed transition, regardless of whether
    /// this call or an earlier `is_open` performed the reset. Split out so
    /// the coordinator can emit a reset event.
    pub fn check_reset(&mut self, now: f64) -> bool {
        self.is_open(now);
        std::mem::take(&mut self.pending_reset)
    }

    pub fn tripped_at(&self) -> Option<f64> {
        self.tripped_at
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

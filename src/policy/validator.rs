/// Safety bounds and rate limits over proposed fee changes. Read-only:
/// breaker and rate-limit state are passed in as snapshots, and mutation of
/// either happens only in the coordinator once a real outcome is known.

use crate::client::FeePolicy;
use crate::config::{BoundsConfig, CooldownConfig};
use crate::db::RateLimits;
use crate::policy::decision::Evaluation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    CircuitOpen,
    OutOfBounds,
    ExceedsStepBound,
    ExceedsCumulativeBound,
    CooldownActive,
    InsufficientEvidence,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::CircuitOpen => "circuit_open",
            RejectReason::OutOfBounds => "out_of_bounds",
            RejectReason::ExceedsStepBound => "exceeds_step_bound",
            RejectReason::ExceedsCumulativeBound => "exceeds_cumulative_bound",
            RejectReason::CooldownActive => "cooldown_active",
            RejectReason::InsufficientEvidence => "insufficient_evidence",
        }
    }
}

/// A fee decision that cleared every safety check.
#[derive(Debug, Clone)]
pub struct ValidatedAction {
    pub channel_id: String,
    pub current: FeePolicy,
    pub new: FeePolicy,
    /// Largest relative change of the two fee components, percent
    pub step_percent: f64,
    pub approved_at: f64,
}

#[derive(Debug, Clone)]
pub enum Validation {
    Approved(ValidatedAction),
    Rejected(RejectReason),
}

/// Relative change in percent; a change away from zero counts as unbounded.
fn change_percent(old: u64, new: u64) -> f64 {
    if old == 0 {
        return if new == 0 { 0.0 } else { f64::INFINITY };
    }
    (new as f64 - old as f64).abs() / old as f64 * 100.0
}

/// Checks run in order; the first failure wins.
#[allow(clippy::too_many_arguments)]
pub fn validate(
    evaluation: &Evaluation,
    current: &FeePolicy,
    bounds: &BoundsConfig,
    cooldown: &CooldownConfig,
    min_evidence: usize,
    capacity_sats: u64,
    rate: &RateLimits,
    breaker_open: bool,
    now: f64,
) -> Validation {
    let proposed = match evaluation.decision.proposed() {
        Some(p) => p,
        // Non-fee decisions never reach the validator
        None => return Validation::Rejected(RejectReason::OutOfBounds),
    };

    // 1. Circuit breaker vetoes all live applies while tripped
    if breaker_open {
        return Validation::Rejected(RejectReason::CircuitOpen);
    }

    // 2. Absolute bounds; rejected, never silently clamped
    if proposed.base_fee_msat < bounds.min_base_fee_msat
        || proposed.base_fee_msat > bounds.max_base_fee_msat
        || proposed.fee_rate_ppm < bounds.min_fee_rate_ppm
        || proposed.fee_rate_ppm > bounds.max_fee_rate_ppm
    {
        return Validation::Rejected(RejectReason::OutOfBounds);
    }

    // 3. Relative change: single step, then rolling cumulative
    let step_percent = change_percent(current.base_fee_msat, proposed.base_fee_msat)
        .max(change_percent(
            current.fee_rate_ppm as u64,
            proposed.fee_rate_ppm as u64,
        ));
    if step_percent > bounds.max_step_percent {
        return Validation::Rejected(RejectReason::ExceedsStepBound);
    }
    if rate.cumulative_percent + step_percent > bounds.max_cumulative_percent {
        return Validation::Rejected(RejectReason::ExceedsCumulativeBound);
    }

    // 4. Per-channel cooldown, by channel class
    let cooldown_days = if capacity_sats >= cooldown.large_channel_sats {
        cooldown.large_days
    } else {
        cooldown.small_days
    };
    if let Some(last) = rate.last_applied_at {
        if now - last < cooldown_days as f64 * 86_400.0 {
            return Validation::Rejected(RejectReason::CooldownActive);
        }
    }

    // 5. Enough informative heuristics behind the score
    if evaluation.score.evidence_count < min_evidence {
        return Validation::Rejected(RejectReason::InsufficientEvidence);
    }

    Validation::Approved(ValidatedAction {
        channel_id: evaluation.channel_id.clone(),
        current: *current,
        new: proposed,
        step_percent,
        approved_at: now,
    })
}

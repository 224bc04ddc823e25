/// The decision engine: one pure, deterministic pass over a channel's
/// composite score and raw signals. State lives in snapshots and audit
/// records, not in here.

use crate::client::{ChannelSnapshot, FeePolicy};
use crate::config::ThresholdsConfig;
use crate::scoring::ChannelScore;

/// Heuristic values below this are cited in the justification string.
const WEAK_SIGNAL: f64 = 0.4;

/// What to do with one channel this cycle. Closed set; match exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoAction { reason: &'static str },
    IncreaseFee { proposed: FeePolicy },
    DecreaseFee { proposed: FeePolicy },
    Rebalance,
    CloseChannel,
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::NoAction { .. } => "no_action",
            Decision::IncreaseFee { .. } => "increase_fee",
            Decision::DecreaseFee { .. } => "decrease_fee",
            Decision::Rebalance => "rebalance",
            Decision::CloseChannel => "close_channel",
        }
    }

    pub fn proposed(&self) -> Option<FeePolicy> {
        match self {
            Decision::IncreaseFee { proposed } | Decision::DecreaseFee { proposed } => {
                Some(*proposed)
            }
            _ => None,
        }
    }

    /// Fee decisions go through the validator; the rest do not touch the
    /// backend (the backend surface has no close/rebalance operation, so
    /// those are advisory).
    pub fn is_fee_change(&self) -> bool {
        self.proposed().is_some()
    }
}

/// The engine's full verdict for one channel. Exactly one per channel per
/// cycle.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub channel_id: String,
    pub score: ChannelScore,
    pub decision: Decision,
    pub justification: String,
}

fn step_policy(current: &FeePolicy, step_percent: f64) -> FeePolicy {
    let factor = 1.0 + step_percent / 100.0;
    FeePolicy {
        base_fee_msat: (current.base_fee_msat as f64 * factor).round() as u64,
        fee_rate_ppm: (current.fee_rate_ppm as f64 * factor).round().max(0.0) as u32,
    }
}

/// Ordered threshold rules. The ordering encodes the tie-break priority
/// CloseChannel > Rebalance > IncreaseFee/DecreaseFee > NoAction.
pub fn decide(
    score: &ChannelScore,
    snap: &ChannelSnapshot,
    thresholds: &ThresholdsConfig,
) -> Decision {
    let s = score.value;

    // A dead channel (zero activity across a full-length window) is flagged
    // for closure even when the sample count would otherwise force NoAction.
    if s < thresholds.increase_score
        && snap.forward_successes == 0
        && snap.window_days >= thresholds.dead_window_days
    {
        return Decision::CloseChannel;
    }

    // Insufficient statistical confidence: checked before the score bands.
    if snap.forward_attempts < thresholds.min_attempts {
        return Decision::NoAction {
            reason: "insufficient_data",
        };
    }

    if s >= thresholds.healthy_score {
        return Decision::NoAction { reason: "healthy" };
    }

    if s < thresholds.rebalance_score {
        let ratio = snap.liquidity_ratio();
        if ratio < thresholds.imbalance_low || ratio > thresholds.imbalance_high {
            return Decision::Rebalance;
        }
        let current = snap.current_policy();
        if s < thresholds.increase_score {
            return Decision::IncreaseFee {
                proposed: step_policy(&current, thresholds.fee_step_percent),
            };
        }
        return Decision::DecreaseFee {
            proposed: step_policy(&current, -thresholds.fee_step_percent),
        };
    }

    Decision::NoAction { reason: "mid_band" }
}

/// Decide and build the human-readable justification from the heuristics
/// that crossed threshold.
pub fn evaluate(
    snap: &ChannelSnapshot,
    score: ChannelScore,
    thresholds: &ThresholdsConfig,
) -> Evaluation {
    let decision = decide(&score, snap, thresholds);

    let weak: Vec<String> = score
        .parts
        .iter()
        .filter(|p| p.value < WEAK_SIGNAL)
        .map(|p| format!("{}={:.2} ({})", p.heuristic.name(), p.value, p.reason))
        .collect();

    let detail = match &decision {
        Decision::NoAction { reason } => reason.to_string(),
        _ if weak.is_empty() => "all signals nominal".to_string(),
        _ => weak.join(", "),
    };
    let justification = format!("score={:.2}; {}", score.value, detail);

    Evaluation {
        channel_id: snap.channel_id.clone(),
        score,
        decision,
        justification,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{compose_for_tests, Heuristic};

    fn thresholds() -> ThresholdsConfig {
        ThresholdsConfig::default()
    }

    fn score_of(value: f64) -> ChannelScore {
        compose_for_tests(value, 6)
    }

    fn snap() -> ChannelSnapshot {
        ChannelSnapshot {
            channel_id: "ch1".to_string(),
            capacity_sats: 1_000_000,
            local_balance_msat: 500_000_000,
            remote_balance_msat: 500_000_000,
            base_fee_msat: 1000,
            fee_rate_ppm: 100,
            forward_attempts: 50,
            forward_successes: 40,
            window_days: 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_healthy_score_is_no_action() {
        let d = decide(&score_of(0.75), &snap(), &thresholds());
        assert_eq!(d, Decision::NoAction { reason: "healthy" });
    }

    #[test]
    fn test_mid_band_is_no_action() {
        let d = decide(&score_of(0.60), &snap(), &thresholds());
        assert_eq!(d, Decision::NoAction { reason: "mid_band" });
    }

    #[test]
    fn test_low_score_balanced_is_increase() {
        let d = decide(&score_of(0.25), &snap(), &thresholds());
        assert_eq!(
            d,
            Decision::IncreaseFee {
                proposed: FeePolicy {
                    base_fee_msat: 1250,
                    fee_rate_ppm: 125,
                }
            }
        );
    }

    #[test]
    fn test_middling_score_balanced_is_decrease() {
        let d = decide(&score_of(0.40), &snap(), &thresholds());
        assert_eq!(
            d,
            Decision::DecreaseFee {
                proposed: FeePolicy {
                    base_fee_msat: 750,
                    fee_rate_ppm: 75,
                }
            }
        );
    }

    #[test]
    fn test_imbalanced_channel_rebalances_before_fee_change() {
        // 95% local, score 0.28: the imbalance branch outranks IncreaseFee
        let mut s = snap();
        s.local_balance_msat = 950_000_000;
        s.remote_balance_msat = 50_000_000;
        let d = decide(&score_of(0.28), &s, &thresholds());
        assert_eq!(d, Decision::Rebalance);
    }

    #[test]
    fn test_imbalanced_mid_low_band_rebalances() {
        let mut s = snap();
        s.local_balance_msat = 100_000_000; // 10% local
        s.remote_balance_msat = 900_000_000;
        let d = decide(&score_of(0.40), &s, &thresholds());
        assert_eq!(d, Decision::Rebalance);
    }

    #[test]
    fn test_dead_channel_closes_despite_low_sample_count() {
        // 0 attempts over a 30-day window, score 0.15
        let mut s = snap();
        s.forward_attempts = 0;
        s.forward_successes = 0;
        let d = decide(&score_of(0.15), &s, &thresholds());
        assert_eq!(d, Decision::CloseChannel);
    }

    #[test]
    fn test_short_window_dead_channel_is_not_closed() {
        // Same zero activity but the window is too short to call it dead
        let mut s = snap();
        s.forward_attempts = 0;
        s.forward_successes = 0;
        s.window_days = 7;
        let d = decide(&score_of(0.15), &s, &thresholds());
        assert_eq!(
            d,
            Decision::NoAction {
                reason: "insufficient_data"
            }
        );
    }

    #[test]
    fn test_min_attempts_gate_forces_no_action() {
        let mut s = snap();
        s.forward_attempts = 5;
        s.forward_successes = 5;
        let d = decide(&score_of(0.10), &s, &thresholds());
        assert_eq!(
            d,
            Decision::NoAction {
                reason: "insufficient_data"
            }
        );
    }

    #[test]
    fn test_decide_deterministic() {
        let s = snap();
        let t = thresholds();
        let score = score_of(0.40);
        assert_eq!(decide(&score, &s, &t), decide(&score, &s, &t));
    }

    #[test]
    fn test_justification_cites_weak_heuristics() {
        let mut s = snap();
        s.local_balance_msat = 950_000_000;
        s.remote_balance_msat = 50_000_000;
        let mut score = score_of(0.28);
        for part in &mut score.parts {
            if part.heuristic == Heuristic::Liquidity {
                part.value = 0.10;
                part.reason = "remote_depleted";
            }
        }
        let eval = evaluate(&s, score, &thresholds());
        assert_eq!(eval.decision, Decision::Rebalance);
        assert!(
            eval.justification.contains("liquidity=0.10 (remote_depleted)"),
            "justification: {}",
            eval.justification
        );
    }
}

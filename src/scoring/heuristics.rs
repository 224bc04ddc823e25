/// Per-signal channel health scorers.
///
/// Every scorer is pure and total: a missing or degenerate input maps to the
/// neutral score 0.5 (marked non-informative) instead of an error, and each
/// score is monotonic in its underlying signal so its pull on the composite
/// is predictable.

use crate::client::ChannelSnapshot;
use crate::config::ThresholdsConfig;
use crate::state::NodeAggregates;

/// Score used when the underlying signal is absent.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Saturation constant for the centrality rank decay.
const RANK_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Heuristic {
    Liquidity,
    Activity,
    FeeCompetitiveness,
    Reliability,
    Age,
    PeerQuality,
}

impl Heuristic {
    pub fn name(&self) -> &'static str {
        match self {
            Heuristic::Liquidity => "liquidity",
            Heuristic::Activity => "activity",
            Heuristic::FeeCompetitiveness => "fee_competitiveness",
            Heuristic::Reliability => "reliability",
            Heuristic::Age => "age",
            Heuristic::PeerQuality => "peer_quality",
        }
    }
}

/// One heuristic's verdict for one channel in one cycle.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicResult {
    pub heuristic: Heuristic,
    /// Bounded score in [0, 1]
    pub value: f64,
    /// Short machine-readable reason code
    pub reason: &'static str,
    /// False when the input was missing and the neutral default was used
    pub informative: bool,
}

impl HeuristicResult {
    fn new(heuristic: Heuristic, value: f64, reason: &'static str) -> Self {
        Self {
            heuristic,
            value: value.clamp(0.0, 1.0),
            reason,
            informative: true,
        }
    }

    fn neutral(heuristic: Heuristic, reason: &'static str) -> Self {
        Self {
            heuristic,
            value: NEUTRAL_SCORE,
            reason,
            informative: false,
        }
    }
}

/// Penalizes liquidity far from the 50/50 split: 1.0 when balanced, 0.0 when
/// either side is fully depleted.
pub fn liquidity(snap: &ChannelSnapshot) -> HeuristicResult {
    if snap.capacity_sats == 0 {
        return HeuristicResult::neutral(Heuristic::Liquidity, "no_capacity");
    }
    let ratio = snap.liquidity_ratio();
    let value = 1.0 - 2.0 * (ratio - 0.5).abs();
    let reason = if value >= 0.6 {
        "near_balanced"
    } else if ratio < 0.5 {
        "local_depleted"
    } else {
        "remote_depleted"
    };
    HeuristicResult::new(Heuristic::Liquidity, value, reason)
}

/// Rewards forwarding volume relative to the node-wide mean: 0.5 exactly at
/// the mean, saturating towards 1.0 above it.
pub fn activity(snap: &ChannelSnapshot, agg: &NodeAggregates) -> HeuristicResult {
    let mean = agg.mean_successes_per_day;
    if mean <= 0.0 {
        return HeuristicResult::neutral(Heuristic::Activity, "no_node_activity");
    }
    let per_day = snap.successes_per_day();
    let value = per_day / (per_day + mean);
    let reason = if per_day == 0.0 {
        "idle"
    } else if value >= 0.5 {
        "above_mean"
    } else {
        "below_mean"
    };
    HeuristicResult::new(Heuristic::Activity, value, reason)
}

/// Rewards a fee rate near, but not above, the peer-cohort median: 1.0 at the
/// median, a gentle slope below it, a steep penalty above it.
pub fn fee_competitiveness(snap: &ChannelSnapshot, agg: &NodeAggregates) -> HeuristicResult {
    let median = agg.median_fee_rate_ppm;
    if median <= 0.0 {
        return HeuristicResult::neutral(Heuristic::FeeCompetitiveness, "no_cohort_median");
    }
    let ppm = snap.fee_rate_ppm as f64;
    let (value, reason) = if ppm <= median {
        (0.5 + 0.5 * (ppm / median), "at_or_below_median")
    } else {
        ((1.0 - (ppm - median) / median).max(0.0), "above_median")
    };
    HeuristicResult::new(Heuristic::FeeCompetitiveness, value, reason)
}

/// Rewards forwarding success rate (70%) blended with uptime (30%). With zero
/// attempts the success component falls back to neutral.
pub fn reliability(snap: &ChannelSnapshot) -> HeuristicResult {
    let uptime = snap.uptime_ratio.clamp(0.0, 1.0);
    if snap.forward_attempts == 0 {
        let value = 0.7 * NEUTRAL_SCORE + 0.3 * uptime;
        let mut r = HeuristicResult::new(Heuristic::Reliability, value, "no_attempts");
        r.informative = false;
        return r;
    }
    let success_rate = snap.forward_successes as f64 / snap.forward_attempts as f64;
    let value = 0.7 * success_rate.clamp(0.0, 1.0) + 0.3 * uptime;
    let reason = if success_rate >= 0.9 {
        "reliable"
    } else {
        "lossy"
    };
    HeuristicResult::new(Heuristic::Reliability, value, reason)
}

/// Rewards channel age up to the maturity threshold, saturating at 1.0.
pub fn age(snap: &ChannelSnapshot, thresholds: &ThresholdsConfig) -> HeuristicResult {
    let maturity = thresholds.maturity_days.max(1) as f64;
    let value = (snap.age_days as f64 / maturity).min(1.0);
    let reason = if value >= 1.0 { "mature" } else { "immature" };
    HeuristicResult::new(Heuristic::Age, value, reason)
}

/// Rewards peer centrality (rank 1 = most central, saturating decay) blended
/// with the provider's peer reliability score.
pub fn peer_quality(snap: &ChannelSnapshot) -> HeuristicResult {
    if snap.peer_centrality_rank == 0 {
        return HeuristicResult::neutral(Heuristic::PeerQuality, "no_rank");
    }
    let rank_score = RANK_SCALE / (RANK_SCALE + (snap.peer_centrality_rank - 1) as f64);
    let value = 0.5 * rank_score + 0.5 * snap.peer_reliability.clamp(0.0, 1.0);
    HeuristicResult::new(Heuristic::PeerQuality, value, "ranked")
}

/// All heuristics, in a fixed order.
pub fn score_all(
    snap: &ChannelSnapshot,
    agg: &NodeAggregates,
    thresholds: &ThresholdsConfig,
) -> Vec<HeuristicResult> {
    vec![
        liquidity(snap),
        activity(snap, agg),
        fee_competitiveness(snap, agg),
        reliability(snap),
        age(snap, thresholds),
        peer_quality(snap),
    ]
}

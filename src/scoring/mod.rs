pub mod composite;
pub mod heuristics;

use crate::client::ChannelSnapshot;
use crate::config::{ThresholdsConfig, WeightsConfig};
use crate::state::NodeAggregates;

pub use composite::{ChannelScore, ScorePart};
pub use heuristics::{Heuristic, HeuristicResult};

/// Run every heuristic over one snapshot and fold the results into the
/// composite score. Pure; recomputed fresh each cycle.
pub fn score_channel(
    snap: &ChannelSnapshot,
    agg: &NodeAggregates,
    thresholds: &ThresholdsConfig,
    weights: &WeightsConfig,
) -> ChannelScore {
    let results = heuristics::score_all(snap, agg, thresholds);
    composite::compose(&results, weights)
}

/// Build a synthetic score with every heuristic at `value`, for exercising
/// the decision engine against exact composite values.
#[cfg(test)]
pub fn compose_for_tests(value: f64, evidence_count: usize) -> ChannelScore {
    use heuristics::Heuristic::*;
    let parts = [Liquidity, Activity, FeeCompetitiveness, Reliability, Age, PeerQuality]
        .into_iter()
        .map(|heuristic| ScorePart {
            heuristic,
            weight: 1.0 / 6.0,
            value,
            reason: "test",
        })
        .collect();
    ChannelScore {
        value,
        parts,
        evidence_count,
    }
}

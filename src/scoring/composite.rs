use crate::config::WeightsConfig;
use crate::scoring::heuristics::{Heuristic, HeuristicResult};

/// One heuristic's contribution to a composite score, kept for
/// explainability in the audit justification.
#[derive(Debug, Clone, Copy)]
pub struct ScorePart {
    pub heuristic: Heuristic,
    pub weight: f64,
    pub value: f64,
    pub reason: &'static str,
}

/// Weighted composite channel health score in [0, 1].
#[derive(Debug, Clone)]
pub struct ChannelScore {
    pub value: f64,
    pub parts: Vec<ScorePart>,
    /// Number of heuristics whose underlying signal was actually present
    pub evidence_count: usize,
}

fn weight_for(heuristic: Heuristic, weights: &WeightsConfig) -> f64 {
    match heuristic {
        Heuristic::Liquidity => weights.liquidity,
        Heuristic::Activity => weights.activity,
        Heuristic::FeeCompetitiveness => weights.fee_competitiveness,
        Heuristic::Reliability => weights.reliability,
        Heuristic::Age => weights.age,
        Heuristic::PeerQuality => weights.peer_quality,
    }
}

/// `score = sum(weight_i * value_i)`. Weights are validated to sum to 1.0 at
/// config load, so the result stays in [0, 1].
pub fn compose(results: &[HeuristicResult], weights: &WeightsConfig) -> ChannelScore {
    let mut value = 0.0;
    let mut parts = Vec::with_capacity(results.len());
    let mut evidence_count = 0;
    for r in results {
        let weight = weight_for(r.heuristic, weights);
        value += weight * r.value;
        if r.informative {
            evidence_count += 1;
        }
        parts.push(ScorePart {
            heuristic: r.heuristic,
            weight,
            value: r.value,
            reason: r.reason,
        });
    }
    ChannelScore {
        value: value.clamp(0.0, 1.0),
        parts,
        evidence_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(h: Heuristic, value: f64, informative: bool) -> HeuristicResult {
        HeuristicResult {
            heuristic: h,
            value,
            reason: "test",
            informative,
        }
    }

    fn all_at(value: f64) -> Vec<HeuristicResult> {
        vec![
            result(Heuristic::Liquidity, value, true),
            result(Heuristic::Activity, value, true),
            result(Heuristic::FeeCompetitiveness, value, true),
            result(Heuristic::Reliability, value, true),
            result(Heuristic::Age, value, true),
            result(Heuristic::PeerQuality, value, true),
        ]
    }

    #[test]
    fn test_uniform_results_compose_to_same_value() {
        let weights = WeightsConfig::default();
        let score = compose(&all_at(0.8), &weights);
        assert!((score.value - 0.8).abs() < 1e-9);
        assert_eq!(score.evidence_count, 6);
        assert_eq!(score.parts.len(), 6);
    }

    #[test]
    fn test_weighting_shifts_score() {
        let weights = WeightsConfig {
            liquidity: 1.0,
            activity: 0.0,
            fee_competitiveness: 0.0,
            reliability: 0.0,
            age: 0.0,
            peer_quality: 0.0,
        };
        let mut results = all_at(0.0);
        results[0].value = 0.9; // liquidity
        let score = compose(&results, &weights);
        assert!((score.value - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_evidence_count_skips_neutral_defaults() {
        let mut results = all_at(0.5);
        results[1].informative = false;
        results[5].informative = false;
        let score = compose(&results, &WeightsConfig::default());
        assert_eq!(score.evidence_count, 4);
    }

    #[test]
    fn test_contribution_vector_reports_weights_used() {
        let weights = WeightsConfig::default();
        let score = compose(&all_at(0.5), &weights);
        let liquidity_part = score
            .parts
            .iter()
            .find(|p| p.heuristic == Heuristic::Liquidity)
            .unwrap();
        assert_eq!(liquidity_part.weight, weights.liquidity);
        let total: f64 = score.parts.iter().map(|p| p.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}

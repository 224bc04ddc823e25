use std::collections::HashMap;

use log::debug;

use crate::client::{ChannelSnapshot, MetricsClient, PolicyBackend};

/// Node-wide telemetry aggregates consumed by the relative heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeAggregates {
    /// Mean successful forwards per day across all channels
    pub mean_successes_per_day: f64,
    /// Median fee rate across the node's channel cohort
    pub median_fee_rate_ppm: f64,
}

/// Shared snapshot of node state collected at the start of each cycle.
pub struct NodeState {
    /// Channels the backend manages, in evaluation order
    pub channel_ids: Vec<String>,
    /// Snapshots by channel id; a listed channel may be absent here when the
    /// metrics provider had nothing for it ("unavailable this cycle")
    pub snapshots: HashMap<String, ChannelSnapshot>,
    pub aggregates: NodeAggregates,
}

impl NodeState {
    pub async fn collect<C>(client: &C, window_days: u64) -> anyhow::Result<Self>
    where
        C: MetricsClient + PolicyBackend,
    {
        let channel_ids = client.list_channels().await?;
        let snapshot_list = client.node_snapshots(window_days).await?;

        let aggregates = aggregate(&snapshot_list);
        let snapshots: HashMap<String, ChannelSnapshot> = snapshot_list
            .into_iter()
            .map(|s| (s.channel_id.clone(), s))
            .collect();

        debug!(
            "Collected state: {} channels, {} snapshots, mean {:.2} forwards/day, \
             median {:.0} ppm",
            channel_ids.len(),
            snapshots.len(),
            aggregates.mean_successes_per_day,
            aggregates.median_fee_rate_ppm,
        );

        Ok(Self {
            channel_ids,
            snapshots,
            aggregates,
        })
    }
}

fn aggregate(snapshots: &[ChannelSnapshot]) -> NodeAggregates {
    if snapshots.is_empty() {
        return NodeAggregates::default();
    }

    let mean_successes_per_day =
        snapshots.iter().map(|s| s.successes_per_day()).sum::<f64>() / snapshots.len() as f64;

    let mut rates: Vec<u32> = snapshots.iter().map(|s| s.fee_rate_ppm).collect();
    rates.sort_unstable();
    let mid = rates.len() / 2;
    let median_fee_rate_ppm = if rates.len() % 2 == 0 {
        (rates[mid - 1] as f64 + rates[mid] as f64) / 2.0
    } else {
        rates[mid] as f64
    };

    NodeAggregates {
        mean_successes_per_day,
        median_fee_rate_ppm,
    }
}

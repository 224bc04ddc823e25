use anyhow::Context;
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::Config;

/// Per-channel telemetry record produced by the metrics provider.
///
/// Read once per cycle per channel and never mutated; all scorers consume the
/// same snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_id: String,
    pub peer_id: String,
    pub capacity_sats: u64,
    pub local_balance_msat: u64,
    pub remote_balance_msat: u64,
    pub base_fee_msat: u64,
    pub fee_rate_ppm: u32,
    /// Forwarding attempts within the observation window
    pub forward_attempts: u64,
    /// Successful forwards within the observation window
    pub forward_successes: u64,
    /// Observation window length in days
    pub window_days: u64,
    /// Fraction of the window the channel peer was reachable, in [0,1]
    pub uptime_ratio: f64,
    pub age_days: u64,
    /// Peer centrality rank, 1 = most central; 0 = unknown
    pub peer_centrality_rank: u64,
    /// Provider-supplied peer reliability score in [0,1]
    pub peer_reliability: f64,
}

impl ChannelSnapshot {
    /// local / capacity, in [0,1]. Returns 0.5 when capacity is unknown.
    pub fn liquidity_ratio(&self) -> f64 {
        let capacity_msat = self.capacity_sats as f64 * 1000.0;
        if capacity_msat <= 0.0 {
            return 0.5;
        }
        (self.local_balance_msat as f64 / capacity_msat).clamp(0.0, 1.0)
    }

    /// Successful forwards per day over the observation window.
    pub fn successes_per_day(&self) -> f64 {
        if self.window_days == 0 {
            return 0.0;
        }
        self.forward_successes as f64 / self.window_days as f64
    }

    pub fn current_policy(&self) -> FeePolicy {
        FeePolicy {
            base_fee_msat: self.base_fee_msat,
            fee_rate_ppm: self.fee_rate_ppm,
        }
    }
}

/// A channel's routing fee policy as held by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub base_fee_msat: u64,
    pub fee_rate_ppm: u32,
}

/// Read-only telemetry source.
#[async_trait::async_trait]
pub trait MetricsClient: Send + Sync {
    /// All channel snapshots for the managed node, over a bounded window.
    async fn node_snapshots(&self, window_days: u64) -> anyhow::Result<Vec<ChannelSnapshot>>;
    /// Snapshot for a single channel.
    async fn channel_snapshot(
        &self,
        channel_id: &str,
        window_days: u64,
    ) -> anyhow::Result<ChannelSnapshot>;
}

/// Channel-management backend. `set_policy` is the only mutating call the
/// engine ever makes, and only for live validated actions.
#[async_trait::async_trait]
pub trait PolicyBackend: Send + Sync {
    async fn list_channels(&self) -> anyhow::Result<Vec<String>>;
    async fn get_policy(&self, channel_id: &str) -> anyhow::Result<FeePolicy>;
    async fn set_policy(&self, channel_id: &str, policy: FeePolicy) -> anyhow::Result<()>;
}

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_MS: u64 = 500;
const RETRY_JITTER_MS: u64 = 250;

/// Bounded retry with exponential backoff and jitter; every attempt carries
/// its own timeout. A timed-out attempt counts as a failed attempt.
async fn with_retry<F, Fut, T>(name: &str, timeout: Duration, f: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut last_err = String::new();
    for attempt in 0..MAX_RETRIES {
        match tokio::time::timeout(timeout, f()).await {
            Ok(Ok(resp)) => {
                debug!("{}: success", name);
                return Ok(resp);
            }
            Ok(Err(e)) => last_err = format!("{:#}", e),
            Err(_) => last_err = format!("timed out after {:?}", timeout),
        }
        if attempt < MAX_RETRIES - 1 {
            let jitter = rand::thread_rng().gen_range(0..RETRY_JITTER_MS);
            let delay = RETRY_BASE_MS * 2u64.pow(attempt) + jitter;
            warn!(
                "{}: attempt {} failed ({}), retrying in {}ms",
                name,
                attempt + 1,
                last_err,
                delay
            );
            sleep(Duration::from_millis(delay)).await;
        }
    }
    Err(anyhow::anyhow!(
        "{}: all {} attempts failed: {}",
        name,
        MAX_RETRIES,
        last_err
    ))
}

/// HTTP client for both external services.
pub struct HttpApiClient {
    http: reqwest::Client,
    metrics_base: String,
    metrics_key: String,
    metrics_timeout: Duration,
    backend_base: String,
    backend_key: String,
    backend_timeout: Duration,
    node_id: String,
}

#[derive(Deserialize)]
struct SnapshotsResponse {
    snapshots: Vec<ChannelSnapshot>,
}

#[derive(Deserialize)]
struct ChannelsResponse {
    channels: Vec<String>,
}

impl HttpApiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            metrics_base: config.metrics.base_url.trim_end_matches('/').to_string(),
            metrics_key: config.metrics.api_key.clone(),
            metrics_timeout: Duration::from_secs(config.metrics.request_timeout_secs),
            backend_base: config.backend.base_url.trim_end_matches('/').to_string(),
            backend_key: config.backend.api_key.clone(),
            backend_timeout: Duration::from_secs(config.backend.request_timeout_secs),
            node_id: config.backend.node_id.clone(),
        })
    }

    fn get(&self, url: String, key: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.get(url);
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }
        req
    }
}

#[async_trait::async_trait]
impl MetricsClient for HttpApiClient {
    async fn node_snapshots(&self, window_days: u64) -> anyhow::Result<Vec<ChannelSnapshot>> {
        let url = format!(
            "{}/v1/node/{}/snapshots?window_days={}",
            self.metrics_base, self.node_id, window_days
        );
        with_retry("NodeSnapshots", self.metrics_timeout, || async {
            let resp: SnapshotsResponse = self
                .get(url.clone(), &self.metrics_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(resp.snapshots)
        })
        .await
    }

    async fn channel_snapshot(
        &self,
        channel_id: &str,
        window_days: u64,
    ) -> anyhow::Result<ChannelSnapshot> {
        let url = format!(
            "{}/v1/channel/{}/snapshot?window_days={}",
            self.metrics_base, channel_id, window_days
        );
        with_retry("ChannelSnapshot", self.metrics_timeout, || async {
            let snap: ChannelSnapshot = self
                .get(url.clone(), &self.metrics_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(snap)
        })
        .await
    }
}

#[async_trait::async_trait]
impl PolicyBackend for HttpApiClient {
    async fn list_channels(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/v1/node/{}/channels", self.backend_base, self.node_id);
        with_retry("ListChannels", self.backend_timeout, || async {
            let resp: ChannelsResponse = self
                .get(url.clone(), &self.backend_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(resp.channels)
        })
        .await
    }

    async fn get_policy(&self, channel_id: &str) -> anyhow::Result<FeePolicy> {
        let url = format!("{}/v1/channel/{}/policy", self.backend_base, channel_id);
        with_retry("GetPolicy", self.backend_timeout, || async {
            let policy: FeePolicy = self
                .get(url.clone(), &self.backend_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(policy)
        })
        .await
    }

    async fn set_policy(&self, channel_id: &str, policy: FeePolicy) -> anyhow::Result<()> {
        let url = format!("{}/v1/channel/{}/policy", self.backend_base, channel_id);
        with_retry("SetPolicy", self.backend_timeout, || async {
            let mut req = self.http.put(url.clone()).json(&policy);
            if !self.backend_key.is_empty() {
                req = req.bearer_auth(&self.backend_key);
            }
            req.send().await?.error_for_status()?;
            Ok(())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Mock clients for integration testing
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liquidity_ratio() {
        let snap = ChannelSnapshot {
            capacity_sats: 1_000_000,
            local_balance_msat: 250_000_000,
            ..Default::default()
        };
        assert!((snap.liquidity_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_liquidity_ratio_zero_capacity_is_neutral() {
        let snap = ChannelSnapshot::default();
        assert_eq!(snap.liquidity_ratio(), 0.5);
    }

    #[test]
    fn test_successes_per_day() {
        let snap = ChannelSnapshot {
            forward_successes: 60,
            window_days: 30,
            ..Default::default()
        };
        assert!((snap.successes_per_day() - 2.0).abs() < 1e-9);

        let empty = ChannelSnapshot::default();
        assert_eq!(empty.successes_per_day(), 0.0);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_attempts() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: anyhow::Result<()> =
            with_retry("Failing", Duration::from_secs(1), || async {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                anyhow::bail!("nope")
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_with_retry_returns_first_success() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = with_retry("Flaky", Duration::from_secs(1), || async {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                anyhow::bail!("transient")
            }
            Ok(42u32)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}

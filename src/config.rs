use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub metrics: MetricsConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub weights: WeightsConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub bounds: BoundsConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    /// Metrics provider REST endpoint
    pub base_url: String,
    /// Bearer token (empty = no auth header)
    #[serde(default)]
    pub api_key: String,
    /// Forwarding statistics observation window in days
    #[serde(default = "default_window_days")]
    pub window_days: u64,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Channel-management backend REST endpoint
    pub base_url: String,
    /// Bearer token (empty = no auth header)
    #[serde(default)]
    pub api_key: String,
    /// Node identity whose channels are managed
    pub node_id: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    /// Path to the audit/rollback SQLite database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Master enable/disable
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Observation mode: compute and audit decisions, never apply them
    #[serde(default)]
    pub dry_run: bool,
    /// Evaluation cycle interval in seconds
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Overall per-cycle deadline; channels not started by then wait a cycle
    #[serde(default = "default_cycle_deadline")]
    pub cycle_deadline_secs: u64,
    /// Concurrent channel evaluations per cycle
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// Days a policy backup is retained for rollback
    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: u64,
    /// Run the retention purge every Nth cycle
    #[serde(default = "default_purge_every_cycles")]
    pub purge_every_cycles: u64,
}

/// Heuristic weights for the composite score. Must sum to 1.0.
#[derive(Debug, Clone, Deserialize)]
pub struct WeightsConfig {
    #[serde(default = "default_w_liquidity")]
    pub liquidity: f64,
    #[serde(default = "default_w_activity")]
    pub activity: f64,
    #[serde(default = "default_w_fee_competitiveness")]
    pub fee_competitiveness: f64,
    #[serde(default = "default_w_reliability")]
    pub reliability: f64,
    #[serde(default = "default_w_age")]
    pub age: f64,
    #[serde(default = "default_w_peer_quality")]
    pub peer_quality: f64,
}

impl WeightsConfig {
    pub fn sum(&self) -> f64 {
        self.liquidity
            + self.activity
            + self.fee_competitiveness
            + self.reliability
            + self.age
            + self.peer_quality
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdsConfig {
    /// Scores at or above this need no action
    #[serde(default = "default_healthy_score")]
    pub healthy_score: f64,
    /// Scores below this (and above increase_score) are over-priced
    #[serde(default = "default_rebalance_score")]
    pub rebalance_score: f64,
    /// Scores below this are under-monetized
    #[serde(default = "default_increase_score")]
    pub increase_score: f64,
    /// Liquidity ratio band considered acceptably balanced
    #[serde(default = "default_imbalance_low")]
    pub imbalance_low: f64,
    #[serde(default = "default_imbalance_high")]
    pub imbalance_high: f64,
    /// Minimum forwarding attempts in the window for statistical confidence
    #[serde(default = "default_min_attempts")]
    pub min_attempts: u64,
    /// Window length at or past which zero activity means the channel is dead
    #[serde(default = "default_dead_window_days")]
    pub dead_window_days: u64,
    /// Channel age at which the age heuristic saturates
    #[serde(default = "default_maturity_days")]
    pub maturity_days: u64,
    /// Percent moved per IncreaseFee/DecreaseFee proposal
    #[serde(default = "default_fee_step_percent")]
    pub fee_step_percent: f64,
    /// Minimum informative heuristics backing a fee change
    #[serde(default = "default_min_evidence")]
    pub min_evidence: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundsConfig {
    #[serde(default = "default_min_base_fee")]
    pub min_base_fee_msat: u64,
    #[serde(default = "default_max_base_fee")]
    pub max_base_fee_msat: u64,
    #[serde(default = "default_min_fee_rate")]
    pub min_fee_rate_ppm: u32,
    #[serde(default = "default_max_fee_rate")]
    pub max_fee_rate_ppm: u32,
    /// Maximum single-step relative change, percent
    #[serde(default = "default_max_step_percent")]
    pub max_step_percent: f64,
    /// Maximum cumulative relative change over the rolling window, percent
    #[serde(default = "default_max_cumulative_percent")]
    pub max_cumulative_percent: f64,
    /// Rolling window for the cumulative limit, days
    #[serde(default = "default_cumulative_window_days")]
    pub cumulative_window_days: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CooldownConfig {
    /// Channels at or above this capacity use the large-channel cooldown
    #[serde(default = "default_large_channel_sats")]
    pub large_channel_sats: u64,
    #[serde(default = "default_cooldown_large_days")]
    pub large_days: u64,
    #[serde(default = "default_cooldown_small_days")]
    pub small_days: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Sliding failure window in hours
    #[serde(default = "default_breaker_window_hours")]
    pub window_hours: u64,
    /// Failures within the window that trip the breaker
    #[serde(default = "default_breaker_threshold")]
    pub threshold: usize,
    /// Hours without a new failure before the breaker resets
    #[serde(default = "default_breaker_cooldown_hours")]
    pub cooldown_hours: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Webhook for structured events (empty = log only)
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_notify_timeout")]
    pub request_timeout_secs: u64,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("feesteer.db")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_window_days() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    10
}
fn default_cycle_interval() -> u64 {
    21_600
}
fn default_cycle_deadline() -> u64 {
    3_300
}
fn default_worker_concurrency() -> usize {
    4
}
fn default_backup_retention_days() -> u64 {
    90
}
fn default_purge_every_cycles() -> u64 {
    4
}
fn default_w_liquidity() -> f64 {
    0.20
}
fn default_w_activity() -> f64 {
    0.25
}
fn default_w_fee_competitiveness() -> f64 {
    0.15
}
fn default_w_reliability() -> f64 {
    0.20
}
fn default_w_age() -> f64 {
    0.10
}
fn default_w_peer_quality() -> f64 {
    0.10
}
fn default_healthy_score() -> f64 {
    0.70
}
fn default_rebalance_score() -> f64 {
    0.50
}
fn default_increase_score() -> f64 {
    0.30
}
fn default_imbalance_low() -> f64 {
    0.20
}
fn default_imbalance_high() -> f64 {
    0.80
}
fn default_min_attempts() -> u64 {
    10
}
fn default_dead_window_days() -> u64 {
    30
}
fn default_maturity_days() -> u64 {
    30
}
fn default_fee_step_percent() -> f64 {
    25.0
}
fn default_min_evidence() -> usize {
    4
}
fn default_min_base_fee() -> u64 {
    200
}
fn default_max_base_fee() -> u64 {
    2_000
}
fn default_min_fee_rate() -> u32 {
    20
}
fn default_max_fee_rate() -> u32 {
    500
}
fn default_max_step_percent() -> f64 {
    50.0
}
fn default_max_cumulative_percent() -> f64 {
    100.0
}
fn default_cumulative_window_days() -> u64 {
    30
}
fn default_large_channel_sats() -> u64 {
    5_000_000
}
fn default_cooldown_large_days() -> u64 {
    3
}
fn default_cooldown_small_days() -> u64 {
    10
}
fn default_breaker_window_hours() -> u64 {
    24
}
fn default_breaker_threshold() -> usize {
    3
}
fn default_breaker_cooldown_hours() -> u64 {
    6
}
fn default_notify_timeout() -> u64 {
    5
}

// Default implementations
impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            enabled: true,
            dry_run: false,
            cycle_interval_secs: default_cycle_interval(),
            cycle_deadline_secs: default_cycle_deadline(),
            worker_concurrency: default_worker_concurrency(),
            backup_retention_days: default_backup_retention_days(),
            purge_every_cycles: default_purge_every_cycles(),
        }
    }
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            liquidity: default_w_liquidity(),
            activity: default_w_activity(),
            fee_competitiveness: default_w_fee_competitiveness(),
            reliability: default_w_reliability(),
            age: default_w_age(),
            peer_quality: default_w_peer_quality(),
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            healthy_score: default_healthy_score(),
            rebalance_score: default_rebalance_score(),
            increase_score: default_increase_score(),
            imbalance_low: default_imbalance_low(),
            imbalance_high: default_imbalance_high(),
            min_attempts: default_min_attempts(),
            dead_window_days: default_dead_window_days(),
            maturity_days: default_maturity_days(),
            fee_step_percent: default_fee_step_percent(),
            min_evidence: default_min_evidence(),
        }
    }
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            min_base_fee_msat: default_min_base_fee(),
            max_base_fee_msat: default_max_base_fee(),
            min_fee_rate_ppm: default_min_fee_rate(),
            max_fee_rate_ppm: default_max_fee_rate(),
            max_step_percent: default_max_step_percent(),
            max_cumulative_percent: default_max_cumulative_percent(),
            cumulative_window_days: default_cumulative_window_days(),
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            large_channel_sats: default_large_channel_sats(),
            large_days: default_cooldown_large_days(),
            small_days: default_cooldown_small_days(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_hours: default_breaker_window_hours(),
            threshold: default_breaker_threshold(),
            cooldown_hours: default_breaker_cooldown_hours(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            request_timeout_secs: default_notify_timeout(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Invalid configuration fails startup; nothing is silently clamped.
    pub fn validate(&self) -> anyhow::Result<()> {
        // Hard limits (non-configurable safety rails)
        const ABS_MAX_BASE_FEE_MSAT: u64 = 100_000;
        const ABS_MAX_FEE_RATE_PPM: u32 = 50_000;
        const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            anyhow::bail!("heuristic weights must sum to 1.0 (got {:.6})", sum);
        }
        for (name, w) in [
            ("liquidity", self.weights.liquidity),
            ("activity", self.weights.activity),
            ("fee_competitiveness", self.weights.fee_competitiveness),
            ("reliability", self.weights.reliability),
            ("age", self.weights.age),
            ("peer_quality", self.weights.peer_quality),
        ] {
            if !(0.0..=1.0).contains(&w) {
                anyhow::bail!("weight {} ({}) must be within [0, 1]", name, w);
            }
        }

        if self.bounds.min_base_fee_msat > self.bounds.max_base_fee_msat {
            anyhow::bail!(
                "min_base_fee_msat ({}) > max_base_fee_msat ({})",
                self.bounds.min_base_fee_msat,
                self.bounds.max_base_fee_msat
            );
        }
        if self.bounds.min_fee_rate_ppm > self.bounds.max_fee_rate_ppm {
            anyhow::bail!(
                "min_fee_rate_ppm ({}) > max_fee_rate_ppm ({})",
                self.bounds.min_fee_rate_ppm,
                self.bounds.max_fee_rate_ppm
            );
        }
        if self.bounds.max_base_fee_msat > ABS_MAX_BASE_FEE_MSAT {
            anyhow::bail!(
                "max_base_fee_msat ({}) above absolute maximum ({})",
                self.bounds.max_base_fee_msat,
                ABS_MAX_BASE_FEE_MSAT
            );
        }
        if self.bounds.max_fee_rate_ppm > ABS_MAX_FEE_RATE_PPM {
            anyhow::bail!(
                "max_fee_rate_ppm ({}) above absolute maximum ({})",
                self.bounds.max_fee_rate_ppm,
                ABS_MAX_FEE_RATE_PPM
            );
        }
        if self.bounds.max_step_percent <= 0.0 {
            anyhow::bail!("max_step_percent must be positive");
        }
        if self.bounds.max_cumulative_percent < self.bounds.max_step_percent {
            anyhow::bail!("max_cumulative_percent below max_step_percent");
        }

        let t = &self.thresholds;
        if !(t.increase_score < t.rebalance_score && t.rebalance_score <= t.healthy_score) {
            anyhow::bail!(
                "decision thresholds must satisfy increase < rebalance <= healthy \
                 (got {} / {} / {})",
                t.increase_score,
                t.rebalance_score,
                t.healthy_score
            );
        }
        if !(0.0 < t.imbalance_low && t.imbalance_low < t.imbalance_high && t.imbalance_high < 1.0)
        {
            anyhow::bail!("imbalance band must satisfy 0 < low < high < 1");
        }
        if t.fee_step_percent <= 0.0 {
            anyhow::bail!("fee_step_percent must be positive");
        }

        if self.general.worker_concurrency == 0 {
            anyhow::bail!("worker_concurrency must be at least 1");
        }
        if self.general.cycle_deadline_secs == 0 {
            anyhow::bail!("cycle_deadline_secs must be positive");
        }
        if self.breaker.threshold == 0 {
            anyhow::bail!("breaker threshold must be at least 1");
        }
        if self.cooldown.large_days > self.cooldown.small_days {
            anyhow::bail!("large-channel cooldown should not exceed small-channel cooldown");
        }
        if self.backend.node_id.is_empty() {
            anyhow::bail!("backend.node_id must be set");
        }
        Ok(())
    }

    /// Create a config with all defaults for testing purposes.
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            metrics: MetricsConfig {
                base_url: "http://localhost:9735".to_string(),
                api_key: String::new(),
                window_days: default_window_days(),
                request_timeout_secs: default_request_timeout(),
            },
            backend: BackendConfig {
                base_url: "http://localhost:3002".to_string(),
                api_key: String::new(),
                node_id: "test_node".to_string(),
                request_timeout_secs: default_request_timeout(),
            },
            general: GeneralConfig::default(),
            weights: WeightsConfig::default(),
            thresholds: ThresholdsConfig::default(),
            bounds: BoundsConfig::default(),
            cooldown: CooldownConfig::default(),
            breaker: BreakerConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

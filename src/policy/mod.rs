pub mod decision;
pub mod executor;
pub mod validator;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::breaker::{BreakerTransition, CircuitBreaker};
use crate::client::{ChannelSnapshot, PolicyBackend};
use crate::config::Config;
use crate::db::{AuditRecord, Database};
use crate::notify::{Event, EventSink};
use crate::scoring;
use crate::state::{NodeAggregates, NodeState};

use executor::ApplyResult;
use validator::Validation;

pub fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp() as f64
}

#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub evaluated: usize,
    pub deferred: usize,
}

/// Drive one evaluation cycle: snapshot -> score -> decide -> validate ->
/// execute -> audit, per channel, across a bounded worker pool. A single
/// channel's failure never aborts the rest of the cycle.
pub async fn run<C>(
    config: Arc<Config>,
    client: Arc<C>,
    db: Arc<Database>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    sink: Arc<dyn EventSink>,
    state: &NodeState,
) -> anyhow::Result<CycleOutcome>
where
    C: PolicyBackend + 'static,
{
    let cycle_id = db.next_cycle_id()?;
    let now = epoch_now();

    // Emit the reset event exactly once when the cool-down has elapsed
    let reset = breaker.lock().unwrap().check_reset(now);
    if reset {
        sink.emit(Event::BreakerReset { timestamp: now }).await;
        info!("Circuit breaker reset after cool-down");
    }

    info!(
        "Cycle {}: evaluating {} channels ({} workers{})",
        cycle_id,
        state.channel_ids.len(),
        config.general.worker_concurrency,
        if config.general.dry_run { ", dry-run" } else { "" },
    );

    let deadline = Instant::now() + Duration::from_secs(config.general.cycle_deadline_secs);
    let semaphore = Arc::new(Semaphore::new(config.general.worker_concurrency));
    let mut join_set = JoinSet::new();
    let mut deferred = 0usize;

    for (idx, channel_id) in state.channel_ids.iter().enumerate() {
        // Acquiring before the deadline check paces admission at the pool's
        // speed, so the check reflects real progress
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow::anyhow!("worker semaphore closed"))?;

        if Instant::now() >= deadline {
            deferred = state.channel_ids.len() - idx;
            warn!(
                "Cycle {}: deadline reached, deferring {} channels to the next cycle",
                cycle_id, deferred
            );
            break;
        }

        let task = ChannelTask {
            cycle_id,
            channel_id: channel_id.clone(),
            snapshot: state.snapshots.get(channel_id).cloned(),
            aggregates: state.aggregates,
            config: config.clone(),
            client: client.clone(),
            db: db.clone(),
            breaker: breaker.clone(),
            sink: sink.clone(),
        };
        join_set.spawn(async move {
            let _permit = permit;
            task.process().await;
        });
    }

    while join_set.join_next().await.is_some() {}

    Ok(CycleOutcome {
        evaluated: state.channel_ids.len() - deferred,
        deferred,
    })
}

struct ChannelTask<C: PolicyBackend> {
    cycle_id: u64,
    channel_id: String,
    snapshot: Option<ChannelSnapshot>,
    aggregates: NodeAggregates,
    config: Arc<Config>,
    client: Arc<C>,
    db: Arc<Database>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    sink: Arc<dyn EventSink>,
}

struct ChannelOutcome {
    decision: String,
    validation: String,
    apply: ApplyResult,
    justification: String,
    backup_id: Option<i64>,
}

impl<C: PolicyBackend> ChannelTask<C> {
    async fn process(self) {
        let now = epoch_now();
        let outcome = self.evaluate(now).await;

        // Exactly one audit record per (channel, cycle), whatever happened
        let record = AuditRecord {
            cycle_id: self.cycle_id,
            channel_id: self.channel_id.clone(),
            decision: outcome.decision.clone(),
            validation: outcome.validation.clone(),
            dry_run: self.config.general.dry_run,
            apply_result: outcome.apply.label(),
            justification: outcome.justification.clone(),
            backup_id: outcome.backup_id,
        };
        if let Err(e) = self.db.record_audit(&record, now) {
            error!("Audit write failed for channel {}: {:#}", self.channel_id, e);
        }

        self.sink
            .emit(Event::Decision {
                cycle_id: self.cycle_id,
                channel_id: self.channel_id.clone(),
                decision: outcome.decision,
                validation: outcome.validation,
                apply_result: outcome.apply.label(),
                justification: outcome.justification,
                timestamp: now,
            })
            .await;
    }

    async fn evaluate(&self, now: f64) -> ChannelOutcome {
        let snap = match &self.snapshot {
            Some(s) => s,
            None => {
                // Metrics provider had nothing for this channel: NoAction,
                // not a failure
                return ChannelOutcome {
                    decision: "no_action".to_string(),
                    validation: "not_applicable".to_string(),
                    apply: ApplyResult::SkippedUnavailable("no_snapshot".to_string()),
                    justification: "snapshot unavailable this cycle".to_string(),
                    backup_id: None,
                };
            }
        };

        let score = scoring::score_channel(
            snap,
            &self.aggregates,
            &self.config.thresholds,
            &self.config.weights,
        );
        let evaluation = decision::evaluate(snap, score, &self.config.thresholds);
        let decision_label = evaluation.decision.label().to_string();
        let justification = evaluation.justification.clone();

        if !evaluation.decision.is_fee_change() {
            let (validation, apply) = match &evaluation.decision {
                decision::Decision::NoAction { .. } => {
                    ("not_applicable".to_string(), ApplyResult::SkippedNoAction)
                }
                // No backend operation exists for these; surfaced for the
                // operator through the audit trail and event sink
                _ => ("advisory".to_string(), ApplyResult::SkippedAdvisory),
            };
            return ChannelOutcome {
                decision: decision_label,
                validation,
                apply,
                justification,
                backup_id: None,
            };
        }

        // Authoritative current policy for the relative-change checks
        let current = match self.client.get_policy(&self.channel_id).await {
            Ok(p) => p,
            Err(e) => {
                return ChannelOutcome {
                    decision: decision_label,
                    validation: "not_applicable".to_string(),
                    apply: ApplyResult::SkippedUnavailable(format!("policy fetch: {:#}", e)),
                    justification,
                    backup_id: None,
                };
            }
        };

        let since = now - self.config.bounds.cumulative_window_days as f64 * 86_400.0;
        let rate = match self.db.rate_limits(&self.channel_id, since) {
            Ok(r) => r,
            Err(e) => {
                error!(
                    "Rate-limit read failed for channel {}: {:#}",
                    self.channel_id, e
                );
                return ChannelOutcome {
                    decision: decision_label,
                    validation: "not_applicable".to_string(),
                    apply: ApplyResult::SkippedUnavailable("rate_limit_state".to_string()),
                    justification,
                    backup_id: None,
                };
            }
        };
        let breaker_open = self.breaker.lock().unwrap().is_open(now);

        let action = match validator::validate(
            &evaluation,
            &current,
            &self.config.bounds,
            &self.config.cooldown,
            self.config.thresholds.min_evidence,
            snap.capacity_sats,
            &rate,
            breaker_open,
            now,
        ) {
            Validation::Approved(action) => action,
            Validation::Rejected(reason) => {
                return ChannelOutcome {
                    decision: decision_label,
                    validation: format!("rejected:{}", reason.code()),
                    apply: ApplyResult::SkippedRejected,
                    justification,
                    backup_id: None,
                };
            }
        };

        let (apply, backup_id) = match executor::execute(
            self.client.as_ref(),
            &self.db,
            &action,
            self.config.general.dry_run,
            now,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("Execution error for channel {}: {:#}", self.channel_id, e);
                (
                    ApplyResult::SkippedUnavailable(format!("execution error: {:#}", e)),
                    None,
                )
            }
        };

        // Breaker accounting happens here, once the real outcome is known
        if apply.is_failure() {
            let transition = self.breaker.lock().unwrap().record_failure(now);
            if let BreakerTransition::Tripped { failures } = transition {
                warn!("Circuit breaker tripped after {} failures", failures);
                self.sink
                    .emit(Event::BreakerTripped {
                        failures,
                        timestamp: now,
                    })
                    .await;
            }
        }
        if let ApplyResult::RollbackFailed(reason) = &apply {
            self.sink
                .emit(Event::RollbackFailed {
                    channel_id: self.channel_id.clone(),
                    reason: reason.clone(),
                    timestamp: now,
                })
                .await;
        }

        ChannelOutcome {
            decision: decision_label,
            validation: "approved".to_string(),
            apply,
            justification,
            backup_id,
        }
    }
}

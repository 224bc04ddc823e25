use log::{error, info, warn};

use crate::client::PolicyBackend;
use crate::db::Database;
use crate::policy::validator::ValidatedAction;

/// Outcome of the apply phase for one channel, stored verbatim in the audit
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    Success,
    SkippedDryRun,
    SkippedNoAction,
    SkippedAdvisory,
    SkippedRejected,
    SkippedUnavailable(String),
    RolledBack(String),
    /// Restoring the backup itself failed: the live policy is in an unknown
    /// state and an operator alert goes out.
    RollbackFailed(String),
}

impl ApplyResult {
    pub fn label(&self) -> String {
        match self {
            ApplyResult::Success => "success".to_string(),
            ApplyResult::SkippedDryRun => "skipped:dry_run".to_string(),
            ApplyResult::SkippedNoAction => "skipped:no_action".to_string(),
            ApplyResult::SkippedAdvisory => "skipped:advisory".to_string(),
            ApplyResult::SkippedRejected => "skipped:rejected".to_string(),
            ApplyResult::SkippedUnavailable(r) => format!("skipped:unavailable:{}", r),
            ApplyResult::RolledBack(r) => format!("rolled_back:{}", r),
            ApplyResult::RollbackFailed(r) => format!("rollback_failed:{}", r),
        }
    }

    /// Rollbacks and failed rollbacks feed the circuit breaker.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ApplyResult::RolledBack(_) | ApplyResult::RollbackFailed(_)
        )
    }
}

/// Apply one validated fee change: backup, set, verify, roll back on any
/// disagreement. Returns the outcome plus the backup row id when one was
/// created.
pub async fn execute<C: PolicyBackend + ?Sized>(
    client: &C,
    db: &Database,
    action: &ValidatedAction,
    dry_run: bool,
    now: f64,
) -> anyhow::Result<(ApplyResult, Option<i64>)> {
    info!(
        "Executor: channel {} -- base: {}->{}msat, ppm: {}->{}{}",
        action.channel_id,
        action.current.base_fee_msat,
        action.new.base_fee_msat,
        action.current.fee_rate_ppm,
        action.new.fee_rate_ppm,
        if dry_run { " (dry-run: not applying)" } else { "" },
    );

    if dry_run {
        return Ok((ApplyResult::SkippedDryRun, None));
    }

    // Backup must be durable before the backend sees the new policy
    let backup_id = db.save_backup(&action.channel_id, &action.current, now)?;

    if let Err(e) = client.set_policy(&action.channel_id, action.new).await {
        let reason = format!("apply failed: {:#}", e);
        return Ok((rollback(client, action, &reason).await, Some(backup_id)));
    }

    // Verification read; a timed-out or mismatched verify is a failure, not
    // a success
    match client.get_policy(&action.channel_id).await {
        Ok(live) if live == action.new => {}
        Ok(live) => {
            let reason = format!(
                "verify mismatch: expected {}/{}, found {}/{}",
                action.new.base_fee_msat,
                action.new.fee_rate_ppm,
                live.base_fee_msat,
                live.fee_rate_ppm,
            );
            return Ok((rollback(client, action, &reason).await, Some(backup_id)));
        }
        Err(e) => {
            let reason = format!("verify failed: {:#}", e);
            return Ok((rollback(client, action, &reason).await, Some(backup_id)));
        }
    }

    db.record_fee_action(
        &action.channel_id,
        &action.current,
        &action.new,
        action.step_percent,
        now,
    )?;
    info!("Executor: channel {} applied and verified", action.channel_id);
    Ok((ApplyResult::Success, Some(backup_id)))
}

async fn rollback<C: PolicyBackend + ?Sized>(
    client: &C,
    action: &ValidatedAction,
    reason: &str,
) -> ApplyResult {
    warn!(
        "Executor: channel {} apply failed ({}), restoring previous policy",
        action.channel_id, reason
    );
    match client.set_policy(&action.channel_id, action.current).await {
        Ok(()) => ApplyResult::RolledBack(reason.to_string()),
        Err(e) => {
            error!(
                "Executor: channel {} ROLLBACK FAILED, live policy unknown: {:#}",
                action.channel_id, e
            );
            ApplyResult::RollbackFailed(format!("{}; restore failed: {:#}", reason, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClients;
    use crate::client::{ChannelSnapshot, FeePolicy};

    fn action() -> ValidatedAction {
        ValidatedAction {
            channel_id: "ch1".to_string(),
            current: FeePolicy {
                base_fee_msat: 1000,
                fee_rate_ppm: 100,
            },
            new: FeePolicy {
                base_fee_msat: 1250,
                fee_rate_ppm: 125,
            },
            step_percent: 25.0,
            approved_at: 1000.0,
        }
    }

    fn mock_with_channel() -> MockClients {
        let mut mock = MockClients::new();
        mock.add_channel(ChannelSnapshot {
            channel_id: "ch1".to_string(),
            base_fee_msat: 1000,
            fee_rate_ppm: 100,
            ..Default::default()
        });
        mock
    }

    #[tokio::test]
    async fn test_apply_success_verifies_and_records() {
        let mock = mock_with_channel();
        let db = Database::open_in_memory().unwrap();

        let (result, backup_id) = execute(&mock, &db, &action(), false, 1000.0).await.unwrap();
        assert_eq!(result, ApplyResult::Success);
        assert!(backup_id.is_some());

        // Live policy changed, backup holds the pre-apply value
        assert_eq!(mock.policy_of("ch1").unwrap(), action().new);
        let backup = db.latest_backup("ch1").unwrap().unwrap();
        assert_eq!(backup.policy, action().current);

        // Rate-limit state reflects the applied step
        let rate = db.rate_limits("ch1", 0.0).unwrap();
        assert_eq!(rate.last_applied_at, Some(1000.0));
        assert!((rate.cumulative_percent - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_dry_run_never_touches_backend() {
        let mock = mock_with_channel();
        let db = Database::open_in_memory().unwrap();

        let (result, backup_id) = execute(&mock, &db, &action(), true, 1000.0).await.unwrap();
        assert_eq!(result, ApplyResult::SkippedDryRun);
        assert!(backup_id.is_none());
        assert!(mock.set_policy_calls.lock().unwrap().is_empty());
        assert!(db.latest_backup("ch1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_mismatch_rolls_back_to_backup_value() {
        let mut mock = mock_with_channel();
        // set_policy returns Ok but the write is dropped, so verify disagrees
        mock.drop_set_policy.insert("ch1".to_string());
        let db = Database::open_in_memory().unwrap();

        let (result, backup_id) = execute(&mock, &db, &action(), false, 1000.0).await.unwrap();
        assert!(matches!(result, ApplyResult::RolledBack(_)));
        assert!(result.is_failure());
        assert!(backup_id.is_some());

        // Two set_policy calls: the apply and the restore with the backup value
        let calls = mock.set_policy_calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, action().current);

        // Live policy equals the pre-apply backup after recovery
        assert_eq!(mock.policy_of("ch1").unwrap(), action().current);
        // No fee action recorded for a rolled-back apply
        assert!(db.rate_limits("ch1", 0.0).unwrap().last_applied_at.is_none());
    }

    #[tokio::test]
    async fn test_apply_error_and_failed_restore_escalates() {
        let mut mock = mock_with_channel();
        mock.reject_set_policy.insert("ch1".to_string());
        let db = Database::open_in_memory().unwrap();

        let (result, _) = execute(&mock, &db, &action(), false, 1000.0).await.unwrap();
        assert!(matches!(result, ApplyResult::RollbackFailed(_)));
        assert!(result.is_failure());
    }
}

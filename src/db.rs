use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

use crate::client::FeePolicy;

/// Append-only audit and rollback store.
///
/// The connection sits behind a mutex because cycle workers write audit rows
/// concurrently; every accessor takes the lock for the duration of one
/// statement.
pub struct Database {
    conn: Mutex<Connection>,
}

/// One row per (channel, cycle): the system of record for what happened and why.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub cycle_id: u64,
    pub channel_id: String,
    pub decision: String,
    pub validation: String,
    pub dry_run: bool,
    pub apply_result: String,
    pub justification: String,
    pub backup_id: Option<i64>,
}

/// Pre-apply policy snapshot supporting point-in-time rollback.
#[derive(Debug, Clone)]
pub struct PolicyBackup {
    pub id: i64,
    pub channel_id: String,
    pub policy: FeePolicy,
    pub created_at: f64,
}

/// Rate-limit inputs for the validator, read before validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimits {
    /// Epoch seconds of the last applied fee action, if any
    pub last_applied_at: Option<f64>,
    /// Sum of absolute step percentages applied within the rolling window
    pub cumulative_percent: f64,
}

#[derive(Debug, Default)]
pub struct StatusSummary {
    pub audit_records: i64,
    pub applied: i64,
    pub rolled_back: i64,
    pub rejected: i64,
    pub backups: i64,
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        // WAL mode for crash safety
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn.lock().unwrap().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Allocate the next cycle identifier (monotonic, survives restarts).
    pub fn next_cycle_id(&self) -> anyhow::Result<u64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO run_state (key, value) VALUES ('cycle_seq', '1') \
             ON CONFLICT(key) DO UPDATE SET value = CAST(value AS INTEGER) + 1",
            [],
        )?;
        let id: i64 = conn.query_row(
            "SELECT CAST(value AS INTEGER) FROM run_state WHERE key = 'cycle_seq'",
            [],
            |r| r.get(0),
        )?;
        Ok(id as u64)
    }

    pub fn record_audit(&self, rec: &AuditRecord, now: f64) -> anyhow::Result<()> {
        self.conn.lock().unwrap().execute(
            "INSERT INTO audit_records \
             (cycle_id, channel_id, decision, validation, dry_run, apply_result, \
              justification, backup_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                rec.cycle_id as i64,
                rec.channel_id,
                rec.decision,
                rec.validation,
                rec.dry_run as i64,
                rec.apply_result,
                rec.justification,
                rec.backup_id,
                now,
            ],
        )?;
        Ok(())
    }

    /// Persist a pre-apply policy backup and return its id.
    pub fn save_backup(
        &self,
        channel_id: &str,
        policy: &FeePolicy,
        now: f64,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO policy_backups (channel_id, base_fee_msat, fee_rate_ppm, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                channel_id,
                policy.base_fee_msat as i64,
                policy.fee_rate_ppm as i64,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn latest_backup(&self, channel_id: &str) -> anyhow::Result<Option<PolicyBackup>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, channel_id, base_fee_msat, fee_rate_ppm, created_at \
             FROM policy_backups WHERE channel_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            [channel_id],
            |row| {
                Ok(PolicyBackup {
                    id: row.get(0)?,
                    channel_id: row.get(1)?,
                    policy: FeePolicy {
                        base_fee_msat: row.get::<_, i64>(2)? as u64,
                        fee_rate_ppm: row.get::<_, i64>(3)? as u32,
                    },
                    created_at: row.get(4)?,
                })
            },
        );
        match result {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete backups past their retention window. Returns rows removed.
    pub fn purge_expired_backups(&self, cutoff: f64) -> anyhow::Result<usize> {
        let n = self.conn.lock().unwrap().execute(
            "DELETE FROM policy_backups WHERE created_at < ?1",
            [cutoff],
        )?;
        Ok(n)
    }

    /// Record a successfully applied fee change for rate limiting.
    pub fn record_fee_action(
        &self,
        channel_id: &str,
        old: &FeePolicy,
        new: &FeePolicy,
        step_percent: f64,
        now: f64,
    ) -> anyhow::Result<()> {
        self.conn.lock().unwrap().execute(
            "INSERT INTO fee_actions \
             (channel_id, old_base_fee_msat, new_base_fee_msat, old_fee_rate_ppm, \
              new_fee_rate_ppm, step_percent, applied_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                channel_id,
                old.base_fee_msat as i64,
                new.base_fee_msat as i64,
                old.fee_rate_ppm as i64,
                new.fee_rate_ppm as i64,
                step_percent,
                now,
            ],
        )?;
        Ok(())
    }

    /// Rate-limit state for one channel: last applied action plus cumulative
    /// step percent since `since`.
    pub fn rate_limits(&self, channel_id: &str, since: f64) -> anyhow::Result<RateLimits> {
        let conn = self.conn.lock().unwrap();
        let last_applied_at: Option<f64> = conn.query_row(
            "SELECT MAX(applied_at) FROM fee_actions WHERE channel_id = ?1",
            [channel_id],
            |r| r.get(0),
        )?;
        let cumulative_percent: f64 = conn.query_row(
            "SELECT COALESCE(SUM(ABS(step_percent)), 0.0) FROM fee_actions \
             WHERE channel_id = ?1 AND applied_at >= ?2",
            rusqlite::params![channel_id, since],
            |r| r.get(0),
        )?;
        Ok(RateLimits {
            last_applied_at,
            cumulative_percent,
        })
    }

    pub fn status(&self) -> anyhow::Result<StatusSummary> {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str| -> anyhow::Result<i64> {
            Ok(conn.query_row(sql, [], |r| r.get(0))?)
        };
        Ok(StatusSummary {
            audit_records: count("SELECT COUNT(*) FROM audit_records")?,
            applied: count(
                "SELECT COUNT(*) FROM audit_records WHERE apply_result = 'success'",
            )?,
            rolled_back: count(
                "SELECT COUNT(*) FROM audit_records WHERE apply_result LIKE 'rolled_back%' \
                 OR apply_result LIKE 'rollback_failed%'",
            )?,
            rejected: count(
                "SELECT COUNT(*) FROM audit_records WHERE validation LIKE 'rejected%'",
            )?,
            backups: count("SELECT COUNT(*) FROM policy_backups")?,
        })
    }

    #[cfg(test)]
    pub fn audit_rows(&self, cycle_id: u64) -> Vec<AuditRecord> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT cycle_id, channel_id, decision, validation, dry_run, apply_result, \
                 justification, backup_id FROM audit_records WHERE cycle_id = ?1 \
                 ORDER BY channel_id",
            )
            .unwrap();
        stmt.query_map([cycle_id as i64], |row| {
            Ok(AuditRecord {
                cycle_id: row.get::<_, i64>(0)? as u64,
                channel_id: row.get(1)?,
                decision: row.get(2)?,
                validation: row.get(3)?,
                dry_run: row.get::<_, i64>(4)? != 0,
                apply_result: row.get(5)?,
                justification: row.get(6)?,
                backup_id: row.get(7)?,
            })
        })
        .unwrap()
        .filter_map(|r| r.ok())
        .collect()
    }
}

const SCHEMA: &str = r#"
-- One record per (channel, cycle); append-only system of record
CREATE TABLE IF NOT EXISTS audit_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cycle_id INTEGER NOT NULL,
    channel_id TEXT NOT NULL,
    decision TEXT NOT NULL,
    validation TEXT NOT NULL,
    dry_run INTEGER NOT NULL,
    apply_result TEXT NOT NULL,
    justification TEXT NOT NULL,
    backup_id INTEGER,
    created_at REAL NOT NULL,
    UNIQUE (cycle_id, channel_id)
);
CREATE INDEX IF NOT EXISTS idx_audit_channel
    ON audit_records(channel_id, created_at);

-- Pre-apply policy snapshots; removed only by retention expiry
CREATE TABLE IF NOT EXISTS policy_backups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id TEXT NOT NULL,
    base_fee_msat INTEGER NOT NULL,
    fee_rate_ppm INTEGER NOT NULL,
    created_at REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_backups_channel
    ON policy_backups(channel_id, created_at);

-- Applied fee changes, feeding cooldown and cumulative-change limits
CREATE TABLE IF NOT EXISTS fee_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id TEXT NOT NULL,
    old_base_fee_msat INTEGER NOT NULL,
    new_base_fee_msat INTEGER NOT NULL,
    old_fee_rate_ppm INTEGER NOT NULL,
    new_fee_rate_ppm INTEGER NOT NULL,
    step_percent REAL NOT NULL,
    applied_at REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_actions_channel
    ON fee_actions(channel_id, applied_at);

-- General run state (cycle sequence etc.)
CREATE TABLE IF NOT EXISTS run_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, ppm: u32) -> FeePolicy {
        FeePolicy {
            base_fee_msat: base,
            fee_rate_ppm: ppm,
        }
    }

    #[test]
    fn test_schema_tables_exist() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        for table in ["audit_records", "policy_backups", "fee_actions", "run_state"] {
            assert!(tables.contains(&table.to_string()), "Missing table: {}", table);
        }
    }

    #[test]
    fn test_migrate_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
    }

    #[test]
    fn test_cycle_id_monotonic() {
        let db = Database::open_in_memory().unwrap();
        let a = db.next_cycle_id().unwrap();
        let b = db.next_cycle_id().unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_backup_roundtrip_and_purge() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.latest_backup("ch1").unwrap().is_none());

        db.save_backup("ch1", &policy(1000, 100), 100.0).unwrap();
        let id2 = db.save_backup("ch1", &policy(1200, 120), 200.0).unwrap();

        let latest = db.latest_backup("ch1").unwrap().unwrap();
        assert_eq!(latest.id, id2);
        assert_eq!(latest.policy, policy(1200, 120));

        // Purge everything before t=150: only the first backup goes
        let purged = db.purge_expired_backups(150.0).unwrap();
        assert_eq!(purged, 1);
        assert_eq!(db.latest_backup("ch1").unwrap().unwrap().id, id2);
    }

    #[test]
    fn test_rate_limits_accumulate() {
        let db = Database::open_in_memory().unwrap();
        let limits = db.rate_limits("ch1", 0.0).unwrap();
        assert!(limits.last_applied_at.is_none());
        assert_eq!(limits.cumulative_percent, 0.0);

        db.record_fee_action("ch1", &policy(1000, 100), &policy(1250, 125), 25.0, 100.0)
            .unwrap();
        db.record_fee_action("ch1", &policy(1250, 125), &policy(1000, 100), 20.0, 200.0)
            .unwrap();

        let limits = db.rate_limits("ch1", 0.0).unwrap();
        assert_eq!(limits.last_applied_at, Some(200.0));
        assert!((limits.cumulative_percent - 45.0).abs() < 1e-9);

        // Window excludes the first action
        let limits = db.rate_limits("ch1", 150.0).unwrap();
        assert!((limits.cumulative_percent - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_audit_unique_per_channel_cycle() {
        let db = Database::open_in_memory().unwrap();
        let rec = AuditRecord {
            cycle_id: 1,
            channel_id: "ch1".to_string(),
            decision: "no_action".to_string(),
            validation: "not_applicable".to_string(),
            dry_run: false,
            apply_result: "skipped:no_action".to_string(),
            justification: "healthy".to_string(),
            backup_id: None,
        };
        db.record_audit(&rec, 100.0).unwrap();
        // Second record for the same (cycle, channel) violates the invariant
        assert!(db.record_audit(&rec, 101.0).is_err());

        let rows = db.audit_rows(1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_id, "ch1");
    }

    #[test]
    fn test_status_counters() {
        let db = Database::open_in_memory().unwrap();
        let mk = |chan: &str, validation: &str, apply: &str| AuditRecord {
            cycle_id: 1,
            channel_id: chan.to_string(),
            decision: "increase_fee".to_string(),
            validation: validation.to_string(),
            dry_run: false,
            apply_result: apply.to_string(),
            justification: String::new(),
            backup_id: None,
        };
        db.record_audit(&mk("a", "approved", "success"), 1.0).unwrap();
        db.record_audit(&mk("b", "approved", "rolled_back:verify mismatch"), 2.0)
            .unwrap();
        db.record_audit(&mk("c", "rejected:exceeds_step_bound", "skipped:rejected"), 3.0)
            .unwrap();

        let s = db.status().unwrap();
        assert_eq!(s.audit_records, 3);
        assert_eq!(s.applied, 1);
        assert_eq!(s.rolled_back, 1);
        assert_eq!(s.rejected, 1);
    }
}

//! Append-only execution audit log and statistics.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use stagehand_core::error::Result;
use stagehand_core::types::{
    AdvancementExecution, AdvancementStats, ExecutionStatus, FailureSummary, NewExecution,
};

use crate::{AdvanceDb, db_err, parse_enum, parse_json, parse_ts, ts};

impl AdvanceDb {
    /// Append one audit row. Returns the new `execution_id`.
    pub fn record_execution(&self, exec: &NewExecution) -> Result<String> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let results = exec
            .evaluation_results
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()?
            .execute(
                "INSERT INTO advancement_executions
                    (execution_id, schedule_id, application_id, rule_id, from_stage_id,
                     to_stage_id, execution_status, failure_reason, evaluation_results,
                     executed_at, executed_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    execution_id,
                    exec.schedule_id,
                    exec.application_id,
                    exec.rule_id,
                    exec.from_stage_id,
                    exec.to_stage_id,
                    exec.execution_status.as_str(),
                    exec.failure_reason,
                    results,
                    ts(&exec.executed_at),
                    exec.executed_by,
                ],
            )
            .map_err(db_err("Record execution"))?;
        Ok(execution_id)
    }

    /// Audit history of a schedule, oldest first.
    pub fn executions_for_schedule(&self, schedule_id: &str) -> Result<Vec<AdvancementExecution>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT execution_id, schedule_id, application_id, rule_id, from_stage_id,
                        to_stage_id, execution_status, failure_reason, evaluation_results,
                        executed_at, executed_by
                 FROM advancement_executions WHERE schedule_id = ?1
                 ORDER BY executed_at ASC, execution_id ASC",
            )
            .map_err(db_err("Prepare executions"))?;
        let rows = stmt
            .query_map(params![schedule_id], |row| {
                let status: String = row.get(6)?;
                let results: Option<String> = row.get(8)?;
                let executed_at: String = row.get(9)?;
                Ok(AdvancementExecution {
                    execution_id: row.get(0)?,
                    schedule_id: row.get(1)?,
                    application_id: row.get(2)?,
                    rule_id: row.get(3)?,
                    from_stage_id: row.get(4)?,
                    to_stage_id: row.get(5)?,
                    execution_status: parse_enum::<ExecutionStatus>(6, &status)?,
                    failure_reason: row.get(7)?,
                    evaluation_results: results.map(|r| parse_json(8, &r)).transpose()?,
                    executed_at: parse_ts(9, &executed_at)?,
                    executed_by: row.get(10)?,
                })
            })
            .map_err(db_err("Query executions"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read executions"))?;
        Ok(rows)
    }

    /// Counters over the last 30 days plus the latest failures of the last week.
    pub fn statistics(&self, now: DateTime<Utc>) -> Result<AdvancementStats> {
        let conn = self.conn()?;
        let mut stats = AdvancementStats::default();

        let month_ago = ts(&(now - Duration::days(30)));
        let mut stmt = conn
            .prepare(
                "SELECT execution_status, COUNT(*) FROM advancement_executions
                 WHERE executed_at > ?1 GROUP BY execution_status",
            )
            .map_err(db_err("Prepare status counts"))?;
        let counts = stmt
            .query_map(params![month_ago], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(db_err("Query status counts"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read status counts"))?;
        for (status, count) in counts {
            let count = count.max(0) as u64;
            stats.total_executions_30d += count;
            match status.parse::<ExecutionStatus>() {
                Ok(ExecutionStatus::Success) => stats.success_count = count,
                Ok(ExecutionStatus::Failed) => stats.failed_count = count,
                Ok(ExecutionStatus::DryRun) => stats.dry_run_count = count,
                Ok(ExecutionStatus::Rejected) => stats.rejected_count = count,
                Err(_) => tracing::warn!("Unknown execution status in audit log: {status}"),
            }
        }

        let pending: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM interview_schedules
                 WHERE status IN ('WaitingOnFeedback', 'Complete')
                   AND (last_evaluated_for_advancement_at IS NULL
                        OR updated_at > last_evaluated_for_advancement_at)",
                [],
                |r| r.get(0),
            )
            .map_err(db_err("Count pending"))?;
        stats.pending_evaluations = pending.max(0) as u64;

        let active: i64 = conn
            .query_row("SELECT COUNT(*) FROM advancement_rules WHERE is_active = 1", [], |r| r.get(0))
            .map_err(db_err("Count rules"))?;
        stats.active_rules = active.max(0) as u64;

        let week_ago = ts(&(now - Duration::days(7)));
        let mut stmt = conn
            .prepare(
                "SELECT execution_id, schedule_id, application_id, failure_reason, executed_at
                 FROM advancement_executions
                 WHERE execution_status = 'failed' AND executed_at > ?1
                 ORDER BY executed_at DESC
                 LIMIT 10",
            )
            .map_err(db_err("Prepare failures"))?;
        stats.recent_failures = stmt
            .query_map(params![week_ago], |row| {
                let executed_at: String = row.get(4)?;
                Ok(FailureSummary {
                    execution_id: row.get(0)?,
                    schedule_id: row.get(1)?,
                    application_id: row.get(2)?,
                    failure_reason: row.get(3)?,
                    executed_at: parse_ts(4, &executed_at)?,
                })
            })
            .map_err(db_err("Query failures"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read failures"))?;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::types::EXECUTED_BY_SYSTEM;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn exec(status: ExecutionStatus, when: DateTime<Utc>) -> NewExecution {
        NewExecution {
            schedule_id: "sch-1".into(),
            application_id: "app-1".into(),
            rule_id: Some("rule-1".into()),
            from_stage_id: Some("stage-1".into()),
            to_stage_id: Some("stage-2".into()),
            execution_status: status,
            failure_reason: (status == ExecutionStatus::Failed).then(|| "HTTP 503".to_string()),
            evaluation_results: Some(serde_json::json!({"all_passed": true})),
            executed_at: when,
            executed_by: EXECUTED_BY_SYSTEM.into(),
        }
    }

    #[test]
    fn test_audit_rows_append() {
        let db = AdvanceDb::open_in_memory().unwrap();
        let t = at("2026-03-01T10:00:00Z");
        let a = db.record_execution(&exec(ExecutionStatus::DryRun, t)).unwrap();
        let b = db.record_execution(&exec(ExecutionStatus::Success, t + Duration::minutes(1))).unwrap();
        assert_ne!(a, b);

        let rows = db.executions_for_schedule("sch-1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].execution_status, ExecutionStatus::DryRun);
        assert_eq!(rows[1].execution_status, ExecutionStatus::Success);
        assert_eq!(rows[1].evaluation_results, Some(serde_json::json!({"all_passed": true})));
    }

    #[test]
    fn test_statistics_windows() {
        let db = AdvanceDb::open_in_memory().unwrap();
        let now = at("2026-03-31T12:00:00Z");
        db.record_execution(&exec(ExecutionStatus::Success, now - Duration::days(1))).unwrap();
        db.record_execution(&exec(ExecutionStatus::Failed, now - Duration::days(2))).unwrap();
        db.record_execution(&exec(ExecutionStatus::Failed, now - Duration::days(10))).unwrap();
        db.record_execution(&exec(ExecutionStatus::Success, now - Duration::days(45))).unwrap();

        let stats = db.statistics(now).unwrap();
        assert_eq!(stats.total_executions_30d, 3);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failed_count, 2);
        assert_eq!(stats.recent_failures.len(), 1);
        assert_eq!(stats.recent_failures[0].failure_reason.as_deref(), Some("HTTP 503"));
        assert_eq!(stats.active_rules, 0);
        assert_eq!(stats.pending_evaluations, 0);
    }
}

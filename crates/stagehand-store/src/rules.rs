//! Rule catalog: rules → requirements → ordered actions.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use stagehand_core::error::{Result, StagehandError};
use stagehand_core::types::{
    ActionConfig, ActionType, AdvancementRule, ComparisonOperator, NewRule, RuleAction,
    RuleRequirement,
};

use crate::{AdvanceDb, db_err, parse_enum, parse_json, parse_ts, ts};

const RULE_SELECT: &str = "SELECT rule_id, job_id, interview_plan_id, interview_stage_id, \
     target_stage_id, is_active, created_at, updated_at FROM advancement_rules";

fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<AdvancementRule> {
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(AdvancementRule {
        rule_id: row.get(0)?,
        job_id: row.get(1)?,
        interview_plan_id: row.get(2)?,
        interview_stage_id: row.get(3)?,
        target_stage_id: row.get(4)?,
        is_active: row.get::<_, i32>(5)? != 0,
        created_at: parse_ts(6, &created_at)?,
        updated_at: parse_ts(7, &updated_at)?,
        requirements: Vec::new(),
        actions: Vec::new(),
    })
}

/// Fill in requirements and actions for a bare rule row.
fn load_children(conn: &Connection, rule: &mut AdvancementRule) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "SELECT requirement_id, interview_id, score_field_path, operator, threshold_value, is_required
             FROM advancement_rule_requirements WHERE rule_id = ?1 ORDER BY position",
        )
        .map_err(db_err("Prepare requirements"))?;
    rule.requirements = stmt
        .query_map(params![rule.rule_id], |row| {
            let op: String = row.get(3)?;
            Ok(RuleRequirement {
                requirement_id: row.get(0)?,
                interview_id: row.get(1)?,
                score_field_path: row.get(2)?,
                operator: parse_enum::<ComparisonOperator>(3, &op)?,
                threshold_value: row.get(4)?,
                is_required: row.get::<_, i32>(5)? != 0,
            })
        })
        .map_err(db_err("Query requirements"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("Read requirements"))?;

    let mut stmt = conn
        .prepare(
            "SELECT action_id, action_type, action_config, execution_order
             FROM advancement_rule_actions WHERE rule_id = ?1
             ORDER BY execution_order, action_id",
        )
        .map_err(db_err("Prepare actions"))?;
    rule.actions = stmt
        .query_map(params![rule.rule_id], |row| {
            let action_type: String = row.get(1)?;
            let config: String = row.get(2)?;
            Ok(RuleAction {
                action_id: row.get(0)?,
                action_type: ActionType::from(action_type),
                action_config: parse_json::<ActionConfig>(2, &config)?,
                execution_order: row.get(3)?,
            })
        })
        .map_err(db_err("Query actions"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("Read actions"))?;
    Ok(())
}

fn validate(rule: &NewRule) -> Result<Vec<ComparisonOperator>> {
    if rule.interview_plan_id.trim().is_empty() || rule.interview_stage_id.trim().is_empty() {
        return Err(StagehandError::Validation(
            "interview_plan_id and interview_stage_id are required".into(),
        ));
    }
    if rule.requirements.is_empty() {
        return Err(StagehandError::Validation("a rule needs at least one requirement".into()));
    }
    if rule.actions.is_empty() {
        return Err(StagehandError::Validation("a rule needs at least one action".into()));
    }
    for req in &rule.requirements {
        if req.interview_id.trim().is_empty() || req.score_field_path.trim().is_empty() {
            return Err(StagehandError::Validation(
                "requirement interview_id and score_field_path are required".into(),
            ));
        }
        if req.threshold_value.trim().is_empty() {
            return Err(StagehandError::Validation("requirement threshold_value is empty".into()));
        }
    }
    for action in &rule.actions {
        if action.action_type.trim().is_empty() {
            return Err(StagehandError::Validation("action_type is required".into()));
        }
        if action.execution_order < 1 {
            return Err(StagehandError::Validation("execution_order starts at 1".into()));
        }
    }
    rule.requirements.iter().map(|r| r.operator.parse()).collect()
}

impl AdvanceDb {
    /// Validate and insert a rule with its requirements and actions.
    /// A second active rule for the same (job, plan, stage) is rejected.
    pub fn create_rule(&self, rule: &NewRule, now: DateTime<Utc>) -> Result<AdvancementRule> {
        let operators = validate(rule)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err("Begin create rule"))?;

        let clash: Option<String> = tx
            .query_row(
                "SELECT rule_id FROM advancement_rules
                 WHERE is_active = 1 AND interview_plan_id = ?1 AND interview_stage_id = ?2
                   AND job_id IS ?3
                 LIMIT 1",
                params![rule.interview_plan_id, rule.interview_stage_id, rule.job_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err("Rule uniqueness check"))?;
        if let Some(existing) = clash {
            return Err(StagehandError::Validation(format!(
                "active rule {existing} already covers this job/plan/stage"
            )));
        }

        let rule_id = uuid::Uuid::new_v4().to_string();
        let now_s = ts(&now);
        tx.execute(
            "INSERT INTO advancement_rules
                (rule_id, job_id, interview_plan_id, interview_stage_id, target_stage_id,
                 is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
            params![
                rule_id,
                rule.job_id,
                rule.interview_plan_id,
                rule.interview_stage_id,
                rule.target_stage_id,
                now_s,
            ],
        )
        .map_err(db_err("Insert rule"))?;

        for (position, (req, op)) in rule.requirements.iter().zip(operators).enumerate() {
            tx.execute(
                "INSERT INTO advancement_rule_requirements
                    (requirement_id, rule_id, interview_id, score_field_path, operator,
                     threshold_value, is_required, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    rule_id,
                    req.interview_id,
                    req.score_field_path,
                    op.as_str(),
                    req.threshold_value.trim(),
                    req.is_required as i32,
                    position as i64,
                ],
            )
            .map_err(db_err("Insert requirement"))?;
        }

        for action in &rule.actions {
            tx.execute(
                "INSERT INTO advancement_rule_actions
                    (action_id, rule_id, action_type, action_config, execution_order)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    rule_id,
                    action.action_type,
                    serde_json::to_string(&action.action_config)?,
                    action.execution_order,
                ],
            )
            .map_err(db_err("Insert action"))?;
        }

        let mut created = tx
            .query_row(&format!("{RULE_SELECT} WHERE rule_id = ?1"), params![rule_id], row_to_rule)
            .map_err(db_err("Reload rule"))?;
        load_children(&tx, &mut created)?;
        tx.commit().map_err(db_err("Commit create rule"))?;

        tracing::info!(rule_id = %created.rule_id, plan = %created.interview_plan_id,
            stage = %created.interview_stage_id, "advancement rule created");
        Ok(created)
    }

    /// Soft-delete a rule.
    pub fn deactivate_rule(&self, rule_id: &str, now: DateTime<Utc>) -> Result<()> {
        let n = self
            .conn()?
            .execute(
                "UPDATE advancement_rules SET is_active = 0, updated_at = ?1 WHERE rule_id = ?2",
                params![ts(&now), rule_id],
            )
            .map_err(db_err("Deactivate rule"))?;
        if n == 0 {
            return Err(StagehandError::NotFound(format!("rule {rule_id}")));
        }
        tracing::info!(rule_id, "advancement rule deactivated");
        Ok(())
    }

    pub fn get_rule(&self, rule_id: &str) -> Result<Option<AdvancementRule>> {
        let conn = self.conn()?;
        let rule = conn
            .query_row(&format!("{RULE_SELECT} WHERE rule_id = ?1"), params![rule_id], row_to_rule)
            .optional()
            .map_err(db_err("Get rule"))?;
        match rule {
            Some(mut rule) => {
                load_children(&conn, &mut rule)?;
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }

    /// The active rule for a plan/stage. Job-specific rules win over global
    /// ones; among equals the most recently created wins.
    pub fn find_matching_rule(
        &self,
        job_id: Option<&str>,
        interview_plan_id: &str,
        interview_stage_id: &str,
    ) -> Result<Option<AdvancementRule>> {
        let conn = self.conn()?;
        let rule = conn
            .query_row(
                &format!(
                    "{RULE_SELECT}
                     WHERE is_active = 1
                       AND interview_plan_id = ?1
                       AND interview_stage_id = ?2
                       AND (job_id IS NULL OR job_id = ?3)
                     ORDER BY (job_id IS NULL) ASC, created_at DESC, rule_id DESC
                     LIMIT 1"
                ),
                params![interview_plan_id, interview_stage_id, job_id],
                row_to_rule,
            )
            .optional()
            .map_err(db_err("Find matching rule"))?;
        match rule {
            Some(mut rule) => {
                load_children(&conn, &mut rule)?;
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }

    pub fn list_rules(&self, active_only: bool) -> Result<Vec<AdvancementRule>> {
        let conn = self.conn()?;
        let sql = if active_only {
            format!("{RULE_SELECT} WHERE is_active = 1 ORDER BY created_at, rule_id")
        } else {
            format!("{RULE_SELECT} ORDER BY created_at, rule_id")
        };
        let mut stmt = conn.prepare(&sql).map_err(db_err("Prepare rules"))?;
        let mut rules = stmt
            .query_map([], row_to_rule)
            .map_err(db_err("Query rules"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read rules"))?;
        for rule in &mut rules {
            load_children(&conn, rule)?;
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::types::{FieldValue, NewAction, NewRequirement};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn new_rule(job: Option<&str>) -> NewRule {
        let mut config = ActionConfig::new();
        config.insert("notify".into(), FieldValue::Bool(true));
        NewRule {
            job_id: job.map(String::from),
            interview_plan_id: "plan-1".into(),
            interview_stage_id: "stage-1".into(),
            target_stage_id: None,
            requirements: vec![
                NewRequirement {
                    interview_id: "int-1".into(),
                    score_field_path: "overall_score".into(),
                    operator: ">=".into(),
                    threshold_value: "3".into(),
                    is_required: true,
                },
                NewRequirement {
                    interview_id: "int-2".into(),
                    score_field_path: "culture".into(),
                    operator: "==".into(),
                    threshold_value: "yes".into(),
                    is_required: false,
                },
            ],
            actions: vec![
                NewAction {
                    action_type: "send_rejection_notification".into(),
                    action_config: ActionConfig::new(),
                    execution_order: 2,
                },
                NewAction {
                    action_type: "advance_stage".into(),
                    action_config: config,
                    execution_order: 1,
                },
            ],
        }
    }

    #[test]
    fn test_create_and_reload() {
        let db = AdvanceDb::open_in_memory().unwrap();
        let rule = db.create_rule(&new_rule(None), at("2026-03-01T09:00:00Z")).unwrap();
        assert!(rule.is_active);
        assert_eq!(rule.requirements.len(), 2);
        assert_eq!(rule.requirements[0].operator, ComparisonOperator::Gte);
        assert!(!rule.requirements[1].is_required);
        assert_eq!(rule.actions[0].action_type, ActionType::AdvanceStage);
        assert_eq!(rule.actions[0].action_config["notify"], FieldValue::Bool(true));

        let loaded = db.get_rule(&rule.rule_id).unwrap().unwrap();
        assert_eq!(loaded, rule);
    }

    #[test]
    fn test_job_specific_rule_wins() {
        let db = AdvanceDb::open_in_memory().unwrap();
        // Global rule created later must still lose to the job-specific one.
        let specific = db.create_rule(&new_rule(Some("job-1")), at("2026-03-01T09:00:00Z")).unwrap();
        let global = db.create_rule(&new_rule(None), at("2026-03-01T10:00:00Z")).unwrap();

        let hit = db.find_matching_rule(Some("job-1"), "plan-1", "stage-1").unwrap().unwrap();
        assert_eq!(hit.rule_id, specific.rule_id);

        let other_job = db.find_matching_rule(Some("job-2"), "plan-1", "stage-1").unwrap().unwrap();
        assert_eq!(other_job.rule_id, global.rule_id);

        let no_job = db.find_matching_rule(None, "plan-1", "stage-1").unwrap().unwrap();
        assert_eq!(no_job.rule_id, global.rule_id);

        assert!(db.find_matching_rule(Some("job-1"), "plan-1", "stage-2").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_active_rule_rejected() {
        let db = AdvanceDb::open_in_memory().unwrap();
        let now = at("2026-03-01T09:00:00Z");
        let first = db.create_rule(&new_rule(None), now).unwrap();
        let err = db.create_rule(&new_rule(None), now).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        // Deactivation frees the slot and hides the old rule from matching.
        db.deactivate_rule(&first.rule_id, now).unwrap();
        assert!(db.find_matching_rule(None, "plan-1", "stage-1").unwrap().is_none());
        db.create_rule(&new_rule(None), now).unwrap();
        assert_eq!(db.list_rules(true).unwrap().len(), 1);
        assert_eq!(db.list_rules(false).unwrap().len(), 2);
    }

    #[test]
    fn test_validation_errors() {
        let db = AdvanceDb::open_in_memory().unwrap();
        let now = at("2026-03-01T09:00:00Z");

        let mut bad_op = new_rule(None);
        bad_op.requirements[0].operator = "=>".into();
        assert_eq!(db.create_rule(&bad_op, now).unwrap_err().code(), "VALIDATION_ERROR");

        let mut no_actions = new_rule(None);
        no_actions.actions.clear();
        assert!(db.create_rule(&no_actions, now).is_err());

        assert_eq!(
            db.deactivate_rule("missing", now).unwrap_err().code(),
            "NOT_FOUND"
        );
    }
}

use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::Registry;
use super::types::{
    ActionFilter, ApprovalState, NewOperatorAction, OperatorActionRecord, OperatorType,
};
use crate::core::error::{FleetError, FleetResult};

const COLUMNS: &str = "a.id, a.deployment_id, a.operator_type, a.action_type, a.description, \
                       a.before_state, a.after_state, a.auto_applied, a.approved, a.created_at, a.resolved_at";

struct ActionRow {
    id: String,
    deployment_id: String,
    operator_type: String,
    action_type: String,
    description: String,
    before_state: String,
    after_state: String,
    auto_applied: bool,
    approved: Option<bool>,
    created_at: String,
    resolved_at: Option<String>,
}

impl ActionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            deployment_id: row.get(1)?,
            operator_type: row.get(2)?,
            action_type: row.get(3)?,
            description: row.get(4)?,
            before_state: row.get(5)?,
            after_state: row.get(6)?,
            auto_applied: row.get(7)?,
            approved: row.get(8)?,
            created_at: row.get(9)?,
            resolved_at: row.get(10)?,
        })
    }

    fn into_record(self) -> FleetResult<OperatorActionRecord> {
        let operator_type = OperatorType::from_str_opt(&self.operator_type).ok_or_else(|| {
            FleetError::Storage(format!("unknown operator type `{}`", self.operator_type))
        })?;
        Ok(OperatorActionRecord {
            id: self.id,
            deployment_id: self.deployment_id,
            operator_type,
            action_type: self.action_type,
            description: self.description,
            before_state: serde_json::from_str(&self.before_state)?,
            after_state: serde_json::from_str(&self.after_state)?,
            auto_applied: self.auto_applied,
            approved: self.approved,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
        })
    }
}

impl Registry {
    /// Append an audit record. New records are always pending.
    pub async fn insert_operator_action(
        &self,
        new: &NewOperatorAction,
    ) -> FleetResult<OperatorActionRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO operator_actions
                (id, deployment_id, operator_type, action_type, description, before_state, after_state, auto_applied)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                new.deployment_id,
                new.operator_type.as_str(),
                new.action_type,
                new.description,
                serde_json::to_string(&new.before_state)?,
                serde_json::to_string(&new.after_state)?,
                new.auto_applied,
            ],
        )?;
        let row = db.query_row(
            &format!("SELECT {} FROM operator_actions a WHERE a.id = ?1", COLUMNS),
            params![id],
            ActionRow::read,
        )?;
        row.into_record()
    }

    pub async fn get_operator_action(&self, id: &str) -> FleetResult<Option<OperatorActionRecord>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                &format!("SELECT {} FROM operator_actions a WHERE a.id = ?1", COLUMNS),
                params![id],
                ActionRow::read,
            )
            .optional()?;
        row.map(ActionRow::into_record).transpose()
    }

    /// Newest first, filtered and paginated.
    pub async fn list_operator_actions(
        &self,
        filter: &ActionFilter,
    ) -> FleetResult<Vec<OperatorActionRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();

        if let Some(kind) = filter.operator_type {
            args.push(SqlValue::Text(kind.as_str().to_string()));
            clauses.push("a.operator_type = ?");
        }
        match filter.approval {
            Some(ApprovalState::Pending) => clauses.push("a.approved IS NULL"),
            Some(ApprovalState::Approved) => clauses.push("a.approved = 1"),
            Some(ApprovalState::Rejected) => clauses.push("a.approved = 0"),
            None => {}
        }
        if let Some(slug) = &filter.slug {
            args.push(SqlValue::Text(slug.clone()));
            clauses.push("d.slug = ?");
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        args.push(SqlValue::Integer(i64::from(filter.effective_limit())));
        args.push(SqlValue::Integer(i64::from(filter.offset.unwrap_or(0))));

        let sql = format!(
            "SELECT {} FROM operator_actions a
             JOIN deployments d ON d.id = a.deployment_id
             {}
             ORDER BY a.created_at DESC, a.rowid DESC
             LIMIT ? OFFSET ?",
            COLUMNS, where_sql
        );

        let db = self.db.lock().await;
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), ActionRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_record()?);
        }
        Ok(out)
    }

    /// Resolve a pending action exactly once. Unknown ids are `NotFound`,
    /// already-resolved ones `Conflict`.
    pub async fn resolve_operator_action(
        &self,
        id: &str,
        approved: bool,
    ) -> FleetResult<OperatorActionRecord> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE operator_actions SET approved = ?2, resolved_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND approved IS NULL",
            params![id, approved],
        )?;
        let row = db
            .query_row(
                &format!("SELECT {} FROM operator_actions a WHERE a.id = ?1", COLUMNS),
                params![id],
                ActionRow::read,
            )
            .optional()?;
        let Some(row) = row else {
            return Err(FleetError::NotFound(format!("operator action {}", id)));
        };
        if rows == 0 {
            return Err(FleetError::Conflict(format!(
                "operator action {} is already resolved",
                id
            )));
        }
        row.into_record()
    }
}

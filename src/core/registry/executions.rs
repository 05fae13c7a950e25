use rusqlite::{Row, params};

use super::Registry;
use super::types::{ExecutionLogRecord, ExecutionStatus, ExecutionSummary};
use crate::core::error::{FleetError, FleetResult};

const COLUMNS: &str = "id, deployment_id, triggered_by, status, phases_total, phases_completed, \
                       phases_failed, tokens, cost_usd, duration_ms, error_message, started_at, finished_at";

fn read_row(row: &Row<'_>) -> rusqlite::Result<(ExecutionLogRecord, String)> {
    let status: String = row.get(3)?;
    let record = ExecutionLogRecord {
        id: row.get(0)?,
        deployment_id: row.get(1)?,
        triggered_by: row.get(2)?,
        status: ExecutionStatus::Running,
        phases_total: row.get(4)?,
        phases_completed: row.get(5)?,
        phases_failed: row.get(6)?,
        tokens: row.get::<_, i64>(7)?.max(0) as u64,
        cost_usd: row.get(8)?,
        duration_ms: row.get::<_, i64>(9)?.max(0) as u64,
        error_message: row.get(10)?,
        started_at: row.get(11)?,
        finished_at: row.get(12)?,
    };
    Ok((record, status))
}

fn with_status((mut record, status): (ExecutionLogRecord, String)) -> FleetResult<ExecutionLogRecord> {
    record.status = ExecutionStatus::from_status(&status)
        .ok_or_else(|| FleetError::Storage(format!("unknown execution status `{}`", status)))?;
    Ok(record)
}

impl Registry {
    /// Open a `running` execution log row and return its id.
    pub async fn start_execution(
        &self,
        deployment_id: &str,
        triggered_by: &str,
        phases_total: u32,
    ) -> FleetResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO execution_logs (id, deployment_id, triggered_by, status, phases_total)
             VALUES (?1, ?2, ?3, 'running', ?4)",
            params![id, deployment_id, triggered_by, phases_total],
        )?;
        Ok(id)
    }

    pub async fn finish_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        summary: &ExecutionSummary,
    ) -> FleetResult<()> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE execution_logs
             SET status = ?2, phases_completed = ?3, phases_failed = ?4, tokens = ?5, cost_usd = ?6,
                 duration_ms = ?7, error_message = ?8, finished_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                summary.phases_completed,
                summary.phases_failed,
                summary.tokens as i64,
                summary.cost_usd,
                summary.duration_ms as i64,
                summary.error_message,
            ],
        )?;
        if rows == 0 {
            return Err(FleetError::NotFound(format!("execution {}", id)));
        }
        Ok(())
    }

    /// Newest first.
    pub async fn list_executions(
        &self,
        deployment_id: &str,
        limit: u32,
    ) -> FleetResult<Vec<ExecutionLogRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM execution_logs WHERE deployment_id = ?1
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
            COLUMNS
        ))?;
        let rows = stmt.query_map(params![deployment_id, limit], read_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(with_status(row?)?);
        }
        Ok(out)
    }

    /// Error messages of the most recent failed runs, newest first.
    pub async fn recent_execution_errors(
        &self,
        deployment_id: &str,
        limit: u32,
    ) -> FleetResult<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT error_message FROM execution_logs
             WHERE deployment_id = ?1 AND status = 'failed' AND error_message IS NOT NULL
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![deployment_id, limit], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

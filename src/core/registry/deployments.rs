use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use super::Registry;
use super::types::{DeploymentRecord, DeploymentStatus, NewDeployment};
use crate::core::error::{FleetError, FleetResult};

const COLUMNS: &str = "id, name, slug, manifest, graph, operational_config, trigger_type, \
                       trigger_config, path_config, process_name, status, created_at, updated_at";

/// Raw column values; JSON decoding happens outside the row closure so a bad
/// column surfaces as `Storage` rather than a rusqlite conversion error.
struct DeploymentRow {
    id: String,
    name: String,
    slug: String,
    manifest: String,
    graph: String,
    operational_config: String,
    trigger_type: Option<String>,
    trigger_config: String,
    path_config: String,
    process_name: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl DeploymentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            manifest: row.get(3)?,
            graph: row.get(4)?,
            operational_config: row.get(5)?,
            trigger_type: row.get(6)?,
            trigger_config: row.get(7)?,
            path_config: row.get(8)?,
            process_name: row.get(9)?,
            status: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_record(self) -> FleetResult<DeploymentRecord> {
        let status = DeploymentStatus::from_status(&self.status).ok_or_else(|| {
            FleetError::Storage(format!("unknown deployment status `{}`", self.status))
        })?;
        Ok(DeploymentRecord {
            id: self.id,
            name: self.name,
            slug: self.slug,
            manifest: serde_json::from_str(&self.manifest)?,
            graph: serde_json::from_str(&self.graph)?,
            operational_config: serde_json::from_str(&self.operational_config)?,
            trigger_type: self.trigger_type,
            trigger_config: serde_json::from_str(&self.trigger_config)?,
            path_config: serde_json::from_str(&self.path_config)?,
            process_name: self.process_name,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl Registry {
    /// Insert a new live deployment. A live record with the same slug is a
    /// `Conflict`.
    pub async fn insert_deployment(&self, new: &NewDeployment) -> FleetResult<DeploymentRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;

        let taken: Option<String> = db
            .query_row(
                "SELECT id FROM deployments WHERE slug = ?1 AND status != 'archived' LIMIT 1",
                params![new.slug],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(FleetError::Conflict(format!(
                "deployment `{}` already exists",
                new.slug
            )));
        }

        db.execute(
            "INSERT INTO deployments (id, name, slug, manifest, graph, operational_config, process_name, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'deployed')",
            params![
                id,
                new.name,
                new.slug,
                serde_json::to_string(&new.manifest)?,
                serde_json::to_string(&new.graph)?,
                serde_json::to_string(&new.operational_config)?,
                new.process_name,
            ],
        )?;

        let row = db.query_row(
            &format!("SELECT {} FROM deployments WHERE id = ?1", COLUMNS),
            params![id],
            DeploymentRow::read,
        )?;
        row.into_record()
    }

    /// Attach trigger and path configuration to a freshly inserted record.
    pub async fn set_deployment_trigger(
        &self,
        id: &str,
        trigger_type: &str,
        trigger_config: &Value,
        path_config: &Value,
    ) -> FleetResult<()> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE deployments
             SET trigger_type = ?2, trigger_config = ?3, path_config = ?4, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status != 'archived'",
            params![
                id,
                trigger_type,
                serde_json::to_string(trigger_config)?,
                serde_json::to_string(path_config)?,
            ],
        )?;
        if rows == 0 {
            return Err(FleetError::NotFound(format!("deployment {}", id)));
        }
        Ok(())
    }

    pub async fn get_deployment(&self, id: &str) -> FleetResult<Option<DeploymentRecord>> {
        self.find_one("id = ?1", id).await
    }

    pub async fn get_deployment_by_slug(&self, slug: &str) -> FleetResult<Option<DeploymentRecord>> {
        self.find_one("slug = ?1", slug).await
    }

    pub async fn find_by_process_name(&self, name: &str) -> FleetResult<Option<DeploymentRecord>> {
        self.find_one("process_name = ?1", name).await
    }

    /// Same as `get_deployment_by_slug` but a missing record is `NotFound`.
    pub async fn require_deployment(&self, slug: &str) -> FleetResult<DeploymentRecord> {
        self.get_deployment_by_slug(slug)
            .await?
            .ok_or_else(|| FleetError::NotFound(format!("deployment `{}`", slug)))
    }

    async fn find_one(&self, predicate: &str, value: &str) -> FleetResult<Option<DeploymentRecord>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                &format!(
                    "SELECT {} FROM deployments WHERE {} AND status != 'archived' LIMIT 1",
                    COLUMNS, predicate
                ),
                params![value],
                DeploymentRow::read,
            )
            .optional()?;
        row.map(DeploymentRow::into_record).transpose()
    }

    pub async fn list_deployments(&self) -> FleetResult<Vec<DeploymentRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM deployments WHERE status != 'archived' ORDER BY created_at ASC, rowid ASC",
            COLUMNS
        ))?;
        let rows = stmt.query_map([], DeploymentRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_record()?);
        }
        Ok(out)
    }

    /// Move a live record to `next`. Archived records are invisible here and
    /// report `NotFound`.
    pub async fn update_deployment_status(
        &self,
        id: &str,
        next: DeploymentStatus,
    ) -> FleetResult<()> {
        let db = self.db.lock().await;
        let current: Option<String> = db
            .query_row(
                "SELECT status FROM deployments WHERE id = ?1 AND status != 'archived'",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current.as_deref().and_then(DeploymentStatus::from_status) else {
            return Err(FleetError::NotFound(format!("deployment {}", id)));
        };
        if !current.can_transition(next) {
            return Err(FleetError::Conflict(format!(
                "deployment {} cannot move from {} to {}",
                id,
                current.as_str(),
                next.as_str()
            )));
        }
        db.execute(
            "UPDATE deployments SET status = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![id, next.as_str()],
        )?;
        Ok(())
    }

    /// Replace the operational config. Callers do their own read-modify-write.
    pub async fn update_operational_config(&self, id: &str, config: &Value) -> FleetResult<()> {
        if !config.is_object() {
            return Err(FleetError::Validation(
                "operational config must be a JSON object".to_string(),
            ));
        }
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE deployments SET operational_config = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status != 'archived'",
            params![id, serde_json::to_string(config)?],
        )?;
        if rows == 0 {
            return Err(FleetError::NotFound(format!("deployment {}", id)));
        }
        Ok(())
    }
}

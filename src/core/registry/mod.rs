//! SQLite-backed deployment registry, execution history and operator audit
//! trail.

mod deployments;
mod executions;
mod operator_actions;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use rusqlite::Connection;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::error::FleetResult;
use crate::platform::{NativePlatform, Platform};

pub use types::{
    ActionFilter, ApprovalState, DeploymentRecord, DeploymentStatus, ExecutionLogRecord,
    ExecutionStatus, ExecutionSummary, NewDeployment, NewOperatorAction, OperatorActionRecord,
    OperatorType,
};

pub const DB_FILE_NAME: &str = "registry.db";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS deployments (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        slug TEXT NOT NULL,
        manifest TEXT NOT NULL,
        graph TEXT NOT NULL,
        operational_config TEXT NOT NULL DEFAULT '{}',
        trigger_type TEXT,
        trigger_config TEXT NOT NULL DEFAULT '{}',
        path_config TEXT NOT NULL DEFAULT '{}',
        process_name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'deployed',
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_deployments_live_slug
        ON deployments(slug) WHERE status != 'archived';

    CREATE TABLE IF NOT EXISTS execution_logs (
        id TEXT PRIMARY KEY,
        deployment_id TEXT NOT NULL REFERENCES deployments(id),
        triggered_by TEXT NOT NULL,
        status TEXT NOT NULL,
        phases_total INTEGER NOT NULL DEFAULT 0,
        phases_completed INTEGER NOT NULL DEFAULT 0,
        phases_failed INTEGER NOT NULL DEFAULT 0,
        tokens INTEGER NOT NULL DEFAULT 0,
        cost_usd REAL NOT NULL DEFAULT 0,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        started_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        finished_at DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_execution_logs_deployment
        ON execution_logs(deployment_id, started_at);

    CREATE TABLE IF NOT EXISTS operator_actions (
        id TEXT PRIMARY KEY,
        deployment_id TEXT NOT NULL REFERENCES deployments(id),
        operator_type TEXT NOT NULL,
        action_type TEXT NOT NULL,
        description TEXT NOT NULL,
        before_state TEXT NOT NULL DEFAULT '{}',
        after_state TEXT NOT NULL DEFAULT '{}',
        auto_applied INTEGER NOT NULL DEFAULT 0,
        approved INTEGER,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        resolved_at DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_operator_actions_pending
        ON operator_actions(approved, created_at);
";

/// Cheap to clone; every clone shares the same connection.
#[derive(Clone)]
pub struct Registry {
    db: Arc<Mutex<Connection>>,
}

impl Registry {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            fs::create_dir_all(data_dir).await?;
        }
        NativePlatform::restrict_dir_permissions(data_dir);

        let db_path = data_dir.join(DB_FILE_NAME);
        let conn = Connection::open(&db_path)?;
        NativePlatform::restrict_file_permissions(&db_path);

        let registry = Self::from_connection(conn)?;
        info!("Registry opened at {:?}", db_path);
        Ok(registry)
    }

    pub fn in_memory() -> FleetResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Raw statement against the store, for tests that need to tamper with it.
    #[cfg(test)]
    pub(crate) async fn execute_sql(&self, sql: &str) -> FleetResult<()> {
        self.db.lock().await.execute_batch(sql)?;
        Ok(())
    }

    fn from_connection(conn: Connection) -> FleetResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

#[cfg(test)]
mod tests;

//! SQLite database for screenshot, comparison and suite records

use crate::types::{DialogsResult, Screenshot, Size, SuiteResult};
use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for record persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- One row per dialog version and viewport size
            CREATE TABLE IF NOT EXISTS dialog_screenshots (
                dialog_id TEXT NOT NULL,
                dialog_version TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                base64 TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (dialog_id, dialog_version, width, height)
            );

            -- Comparison of two versions of a dialog under one size set
            CREATE TABLE IF NOT EXISTS dialog_results (
                dialog_id TEXT NOT NULL,
                original_version TEXT NOT NULL,
                current_version TEXT NOT NULL,
                options_id TEXT NOT NULL,
                result TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (dialog_id, original_version, current_version, options_id)
            );

            -- Suite runs
            CREATE TABLE IF NOT EXISTS suite_results (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                error_code TEXT,
                timestamp INTEGER NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_suite_results_timestamp ON suite_results(timestamp DESC);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Screenshots
    // ========================================================================

    /// Stored screenshots of a dialog version, restricted to the given sizes
    pub fn get_screenshots(&self, dialog_id: &str, version: &str, sizes: &[Size]) -> Result<Vec<Screenshot>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT width, height, base64 FROM dialog_screenshots
             WHERE dialog_id = ?1 AND dialog_version = ?2",
        )?;

        let rows = stmt.query_map(params![dialog_id, version], |row| {
            Ok(Screenshot {
                width: row.get(0)?,
                height: row.get(1)?,
                base64: row.get(2)?,
            })
        })?;

        let mut stored = Vec::new();
        for row in rows {
            stored.push(row?);
        }

        // Requested order, skipping sizes never captured
        Ok(sizes
            .iter()
            .filter_map(|size| stored.iter().find(|s| s.size() == *size).cloned())
            .collect())
    }

    /// Insert a screenshot, replacing the payload of an existing one
    pub fn upsert_screenshot(&self, dialog_id: &str, version: &str, screenshot: &Screenshot) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO dialog_screenshots
                (dialog_id, dialog_version, width, height, base64, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (dialog_id, dialog_version, width, height)
             DO UPDATE SET base64 = excluded.base64, updated_at = excluded.updated_at",
            params![
                dialog_id,
                version,
                screenshot.width,
                screenshot.height,
                screenshot.base64,
                now,
            ],
        )?;

        debug!(
            "Stored screenshot {}/{} at {}x{}",
            version, dialog_id, screenshot.width, screenshot.height
        );
        Ok(())
    }

    // ========================================================================
    // Dialog comparison results
    // ========================================================================

    pub fn get_dialogs_result(
        &self,
        dialog_id: &str,
        original_version: &str,
        current_version: &str,
        options_id: &str,
    ) -> Result<Option<DialogsResult>> {
        let conn = self.conn.lock();

        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM dialog_results
                 WHERE dialog_id = ?1 AND original_version = ?2
                   AND current_version = ?3 AND options_id = ?4",
                params![dialog_id, original_version, current_version, options_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub fn upsert_dialogs_result(&self, options_id: &str, result: &DialogsResult) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO dialog_results
                (dialog_id, original_version, current_version, options_id, result, payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT (dialog_id, original_version, current_version, options_id)
             DO UPDATE SET result = excluded.result, payload = excluded.payload, updated_at = excluded.updated_at",
            params![
                result.dialog_id,
                result.original_version,
                result.current_version,
                options_id,
                result.result.to_string(),
                serde_json::to_string(result)?,
                now,
            ],
        )?;

        debug!("Stored comparison of dialog {} ({})", result.dialog_id, result.result);
        Ok(())
    }

    // ========================================================================
    // Suite results
    // ========================================================================

    pub fn insert_suite(&self, suite: &SuiteResult) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO suite_results (id, status, error_code, timestamp, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                suite.id,
                suite.status.to_string(),
                suite.error_code,
                suite.timestamp,
                serde_json::to_string(suite)?,
                now,
            ],
        )?;

        debug!("Inserted suite {}", suite.id);
        Ok(())
    }

    /// Overwrite a suite record, creating it when missing
    pub fn upsert_suite(&self, suite: &SuiteResult) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO suite_results (id, status, error_code, timestamp, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                error_code = excluded.error_code,
                timestamp = excluded.timestamp,
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![
                suite.id,
                suite.status.to_string(),
                suite.error_code,
                suite.timestamp,
                serde_json::to_string(suite)?,
                now,
            ],
        )?;

        debug!("Updated suite {} ({})", suite.id, suite.status);
        Ok(())
    }

    pub fn get_suite(&self, id: &str) -> Result<Option<SuiteResult>> {
        let conn = self.conn.lock();

        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM suite_results WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// All suites, newest first
    pub fn list_suites(&self) -> Result<Vec<SuiteResult>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare("SELECT payload FROM suite_results ORDER BY timestamp DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut suites = Vec::new();
        for row in rows {
            suites.push(serde_json::from_str(&row?)?);
        }

        Ok(suites)
    }

    pub fn delete_suite(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM suite_results WHERE id = ?1", params![id])?;

        if rows > 0 {
            debug!("Deleted suite {}", id);
        }

        Ok(rows > 0)
    }

    /// Delete all but the `keep` newest suites, returning how many were removed
    pub fn prune_suites(&self, keep: usize) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM suite_results WHERE id NOT IN
                (SELECT id FROM suite_results ORDER BY timestamp DESC LIMIT ?1)",
            params![keep as i64],
        )?;

        if rows > 0 {
            info!("Pruned {} suite(s), kept {}", rows, keep);
        }

        Ok(rows)
    }
}

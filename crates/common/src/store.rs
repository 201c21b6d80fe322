//! Persistence of screenshots, comparison results and suite records
//!
//! The orchestrators only talk to the [`Store`] trait. Every failure that
//! leaves an implementation is an [`Error::Store`] tagged with the failing
//! operation and the identity it was called with.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::db::Database;
use crate::error::StoreOp;
use crate::identity::{
    dialog_identity, dialogs_result_identity, options_identity, result_identity,
    screenshot_identity,
};
use crate::types::{Dialog, DialogsResult, Screenshot, Size, SuiteOptions, SuiteResult};
use crate::{Error, Result};

#[async_trait]
pub trait Store: Send + Sync {
    /// Stored screenshots of `dialog` among `sizes`, in the order of `sizes`
    async fn get_screenshots(&self, dialog: &Dialog, sizes: &[Size]) -> Result<Vec<Screenshot>>;

    /// Insert or replace one screenshot of `dialog`
    async fn save_screenshot(&self, dialog: &Dialog, screenshot: &Screenshot) -> Result<()>;

    async fn get_dialogs_result(
        &self,
        options: &SuiteOptions,
        original: &Dialog,
        current: &Dialog,
    ) -> Result<Option<DialogsResult>>;

    async fn save_dialogs_result(&self, options: &SuiteOptions, result: &DialogsResult) -> Result<()>;

    /// Insert a new suite record; fails when the id already exists
    async fn create_suite(&self, suite: &SuiteResult) -> Result<()>;

    async fn get_suite(&self, id: &str) -> Result<Option<SuiteResult>>;

    /// Overwrite a suite record
    async fn update_suite(&self, suite: &SuiteResult) -> Result<()>;

    /// All suites, newest first
    async fn list_suites(&self) -> Result<Vec<SuiteResult>>;

    async fn delete_suite(&self, id: &str) -> Result<bool>;

    /// Keep the `keep` newest suites, returning how many were deleted
    async fn prune_suites(&self, keep: usize) -> Result<usize>;

    async fn latest_suite(&self) -> Result<Option<SuiteResult>> {
        Ok(self.list_suites().await?.into_iter().next())
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// [`Store`] backed by the SQLite [`Database`]
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_memory() -> Result<Self> {
        Ok(Self::new(Database::open_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_screenshots(&self, dialog: &Dialog, sizes: &[Size]) -> Result<Vec<Screenshot>> {
        self.db
            .get_screenshots(&dialog.id, &dialog.version, sizes)
            .map_err(|e| Error::store(StoreOp::GetScreenshots, dialog_identity(dialog), e))
    }

    async fn save_screenshot(&self, dialog: &Dialog, screenshot: &Screenshot) -> Result<()> {
        self.db
            .upsert_screenshot(&dialog.id, &dialog.version, screenshot)
            .map_err(|e| {
                Error::store(
                    StoreOp::SaveScreenshot,
                    screenshot_identity(dialog, screenshot),
                    e,
                )
            })
    }

    async fn get_dialogs_result(
        &self,
        options: &SuiteOptions,
        original: &Dialog,
        current: &Dialog,
    ) -> Result<Option<DialogsResult>> {
        self.db
            .get_dialogs_result(
                &original.id,
                &original.version,
                &current.version,
                &options_identity(options),
            )
            .map_err(|e| {
                Error::store(
                    StoreOp::GetDialogsResult,
                    result_identity(options, original, current),
                    e,
                )
            })
    }

    async fn save_dialogs_result(&self, options: &SuiteOptions, result: &DialogsResult) -> Result<()> {
        self.db
            .upsert_dialogs_result(&options_identity(options), result)
            .map_err(|e| {
                Error::store(
                    StoreOp::SaveDialogsResult,
                    dialogs_result_identity(options, result),
                    e,
                )
            })
    }

    async fn create_suite(&self, suite: &SuiteResult) -> Result<()> {
        self.db
            .insert_suite(suite)
            .map_err(|e| Error::store(StoreOp::CreateSuite, suite.id.clone(), e))
    }

    async fn get_suite(&self, id: &str) -> Result<Option<SuiteResult>> {
        self.db
            .get_suite(id)
            .map_err(|e| Error::store(StoreOp::GetSuite, id, e))
    }

    async fn update_suite(&self, suite: &SuiteResult) -> Result<()> {
        self.db
            .upsert_suite(suite)
            .map_err(|e| Error::store(StoreOp::UpdateSuite, suite.id.clone(), e))
    }

    async fn list_suites(&self) -> Result<Vec<SuiteResult>> {
        self.db
            .list_suites()
            .map_err(|e| Error::store(StoreOp::ListSuites, "*", e))
    }

    async fn delete_suite(&self, id: &str) -> Result<bool> {
        self.db
            .delete_suite(id)
            .map_err(|e| Error::store(StoreOp::DeleteSuite, id, e))
    }

    async fn prune_suites(&self, keep: usize) -> Result<usize> {
        self.db
            .prune_suites(keep)
            .map_err(|e| Error::store(StoreOp::PruneSuites, format!("keep={}", keep), e))
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// [`Store`] holding everything in process memory
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    screenshots: HashMap<String, Screenshot>,
    results: HashMap<String, DialogsResult>,
    suites: HashMap<String, SuiteResult>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored screenshots across all dialogs
    pub fn screenshot_count(&self) -> usize {
        self.inner.read().screenshots.len()
    }

    /// Number of stored comparison results
    pub fn result_count(&self) -> usize {
        self.inner.read().results.len()
    }
}

fn newest_first(mut suites: Vec<SuiteResult>) -> Vec<SuiteResult> {
    suites.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    suites
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_screenshots(&self, dialog: &Dialog, sizes: &[Size]) -> Result<Vec<Screenshot>> {
        let state = self.inner.read();
        Ok(sizes
            .iter()
            .filter_map(|size| {
                let probe = Screenshot::new(*size, String::new());
                state
                    .screenshots
                    .get(&screenshot_identity(dialog, &probe))
                    .cloned()
            })
            .collect())
    }

    async fn save_screenshot(&self, dialog: &Dialog, screenshot: &Screenshot) -> Result<()> {
        self.inner
            .write()
            .screenshots
            .insert(screenshot_identity(dialog, screenshot), screenshot.clone());
        Ok(())
    }

    async fn get_dialogs_result(
        &self,
        options: &SuiteOptions,
        original: &Dialog,
        current: &Dialog,
    ) -> Result<Option<DialogsResult>> {
        let key = result_identity(options, original, current);
        Ok(self.inner.read().results.get(&key).cloned())
    }

    async fn save_dialogs_result(&self, options: &SuiteOptions, result: &DialogsResult) -> Result<()> {
        let key = dialogs_result_identity(options, result);
        self.inner.write().results.insert(key, result.clone());
        Ok(())
    }

    async fn create_suite(&self, suite: &SuiteResult) -> Result<()> {
        let mut state = self.inner.write();
        if state.suites.contains_key(&suite.id) {
            return Err(Error::store(
                StoreOp::CreateSuite,
                suite.id.clone(),
                Error::Internal("suite already exists".to_string()),
            ));
        }
        state.suites.insert(suite.id.clone(), suite.clone());
        Ok(())
    }

    async fn get_suite(&self, id: &str) -> Result<Option<SuiteResult>> {
        Ok(self.inner.read().suites.get(id).cloned())
    }

    async fn update_suite(&self, suite: &SuiteResult) -> Result<()> {
        self.inner
            .write()
            .suites
            .insert(suite.id.clone(), suite.clone());
        Ok(())
    }

    async fn list_suites(&self) -> Result<Vec<SuiteResult>> {
        let suites = self.inner.read().suites.values().cloned().collect();
        Ok(newest_first(suites))
    }

    async fn delete_suite(&self, id: &str) -> Result<bool> {
        Ok(self.inner.write().suites.remove(id).is_some())
    }

    async fn prune_suites(&self, keep: usize) -> Result<usize> {
        let mut state = self.inner.write();
        let ordered = newest_first(state.suites.values().cloned().collect());
        let mut removed = 0;
        for suite in ordered.into_iter().skip(keep) {
            state.suites.remove(&suite.id);
            removed += 1;
        }
        Ok(removed)
    }
}

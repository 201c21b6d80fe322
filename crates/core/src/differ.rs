//! Comparison orchestration

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::{stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use dialog_differ_common::identity::result_identity;
use dialog_differ_common::{
    DiffEntry, DiffOutcome, Dialog, DialogsResult, DifferConfig, Error, Result, Screenshot, Store,
    SuiteOptions, SuiteResult, SuiteStats, SuiteStatus,
};

use crate::comparator::{CompareOptions, DiffOptions, ImageComparator};
use crate::events::{EventSink, SuiteEvent};

/// Comparison tuning taken from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffSettings {
    pub highlight_color: [u8; 3],
    pub tolerance: u8,
    pub strict: bool,
    pub concurrency: usize,
}

impl DiffSettings {
    pub fn from_config(config: &DifferConfig) -> Result<Self> {
        Ok(Self {
            highlight_color: config.highlight_color()?,
            tolerance: config.diff_tolerance,
            strict: false,
            concurrency: config.diff_concurrency,
        })
    }
}

impl Default for DiffSettings {
    fn default() -> Self {
        Self {
            highlight_color: [255, 0, 0],
            tolerance: dialog_differ_common::config::DEFAULT_DIFF_TOLERANCE,
            strict: false,
            concurrency: dialog_differ_common::config::DEFAULT_DIFF_CONCURRENCY,
        }
    }
}

/// Comparison orchestrator
#[derive(Clone)]
pub struct Differ {
    comparator: Arc<dyn ImageComparator>,
    store: Arc<dyn Store>,
    settings: DiffSettings,
    events: EventSink,
}

impl Differ {
    pub fn new(
        comparator: Arc<dyn ImageComparator>,
        store: Arc<dyn Store>,
        settings: DiffSettings,
        events: EventSink,
    ) -> Self {
        Self {
            comparator,
            store,
            settings,
            events,
        }
    }

    /// Classify one dialog pair.
    ///
    /// Absent sides win over errors, errors win over the cache, and the
    /// cache wins over a fresh comparison unless the suite forces one.
    pub async fn differ_dialog(
        &self,
        options: &SuiteOptions,
        original: Option<&Dialog>,
        current: Option<&Dialog>,
    ) -> Result<DialogsResult> {
        let result = self.classify(options, original, current).await?;
        self.events.emit(SuiteEvent::Diff(Box::new(result.clone())));
        Ok(result)
    }

    async fn classify(
        &self,
        options: &SuiteOptions,
        original: Option<&Dialog>,
        current: Option<&Dialog>,
    ) -> Result<DialogsResult> {
        let dialog_id = original
            .or(current)
            .map(|d| d.id.clone())
            .ok_or_else(|| Error::Internal("dialog pair has neither side".to_string()))?;
        let mut result = DialogsResult::pending(dialog_id, options, original.cloned(), current.cloned());

        let (original, current) = match (original, current) {
            (None, _) => {
                result.result = DiffOutcome::Added;
                return Ok(result);
            }
            (_, None) => {
                result.result = DiffOutcome::Deleted;
                return Ok(result);
            }
            (Some(o), Some(c)) => (o, c),
        };

        if original.has_error() || current.has_error() {
            result.result = DiffOutcome::Error;
            return Ok(result);
        }

        if !options.is_force_diff {
            if let Some(cached) = self.store.get_dialogs_result(options, original, current).await? {
                debug!("Reusing stored comparison {}", result_identity(options, original, current));
                result.result = cached.result;
                result.differ = cached.differ;
                return Ok(result);
            }
        }

        let count = original.screenshots.len().max(current.screenshots.len());
        let mut outcome = DiffOutcome::Identical;
        for index in 0..count {
            let entry = match (original.screenshots.get(index), current.screenshots.get(index)) {
                (Some(a), Some(b)) => self.compare_pair(&result.dialog_id, index, a, b).await?,
                // Captured at fewer sizes on one side
                _ => DiffEntry {
                    index,
                    result: DiffOutcome::Changed,
                    base64: None,
                },
            };
            if entry.result == DiffOutcome::Changed {
                outcome = DiffOutcome::Changed;
            }
            result.differ.push(entry);
        }
        result.result = outcome;

        self.store.save_dialogs_result(options, &result).await?;
        Ok(result)
    }

    async fn compare_pair(
        &self,
        dialog_id: &str,
        index: usize,
        original: &Screenshot,
        current: &Screenshot,
    ) -> Result<DiffEntry> {
        let comparison_error = |message: String| Error::Comparison {
            dialog_id: dialog_id.to_string(),
            message,
        };

        // Removed from disk when dropped, on every path
        let a = write_scratch(original).await.map_err(|e| comparison_error(e.to_string()))?;
        let b = write_scratch(current).await.map_err(|e| comparison_error(e.to_string()))?;

        let compare = CompareOptions {
            tolerance: self.settings.tolerance,
            strict: self.settings.strict,
        };
        let equal = self
            .comparator
            .compare(a.path(), b.path(), compare)
            .await
            .map_err(|e| comparison_error(e.to_string()))?;

        if equal {
            return Ok(DiffEntry {
                index,
                result: DiffOutcome::Identical,
                base64: None,
            });
        }

        let diff = DiffOptions {
            highlight_color: self.settings.highlight_color,
            tolerance: self.settings.tolerance,
            strict: self.settings.strict,
        };
        let png = self
            .comparator
            .create_diff(a.path(), b.path(), diff)
            .await
            .map_err(|e| comparison_error(e.to_string()))?;

        Ok(DiffEntry {
            index,
            result: DiffOutcome::Changed,
            base64: Some(BASE64.encode(png)),
        })
    }

    /// Compare two dialog sets and finalise the suite record.
    ///
    /// The record `suite_id` is loaded, or created when missing or not given.
    /// A finished or failed record is reset to a fresh running one first.
    /// Results are ordered by dialog id. Any comparison or store failure
    /// aborts the whole call.
    pub async fn differ_suite(
        &self,
        suite_id: Option<&str>,
        options: &SuiteOptions,
        original: &[Dialog],
        current: &[Dialog],
    ) -> Result<SuiteResult> {
        let mut suite = self.load_or_create(suite_id, options).await?;

        let mut pairs: BTreeMap<&str, (Option<&Dialog>, Option<&Dialog>)> = BTreeMap::new();
        for dialog in original {
            pairs.entry(dialog.id.as_str()).or_default().0 = Some(dialog);
        }
        for dialog in current {
            pairs.entry(dialog.id.as_str()).or_default().1 = Some(dialog);
        }
        let pairs: Vec<_> = pairs.into_values().collect();

        info!("Comparing {} dialog pair(s) of suite {}", pairs.len(), suite.id);

        let mut results: Vec<DialogsResult> = pairs
            .iter()
            .map(|(o, c)| {
                let id = o.or(*c).map(|d| d.id.clone()).unwrap_or_default();
                DialogsResult::pending(id, options, o.cloned(), c.cloned())
            })
            .collect();

        let mut completed = stream::iter(pairs.iter().enumerate())
            .map(|(index, (o, c))| async move { (index, self.differ_dialog(options, *o, *c).await) })
            .buffer_unordered(self.settings.concurrency.max(1));

        while let Some((index, result)) = completed.next().await {
            results[index] = result?;
        }
        drop(completed);

        suite.stats = SuiteStats::tally(&results, suite.elapsed_ms());
        suite.results = results;
        suite.transition(SuiteStatus::Finished)?;
        self.store.update_suite(&suite).await?;

        info!(
            "Suite {} finished: {} identical, {} changed, {} added, {} deleted, {} error",
            suite.id,
            suite.stats.identical,
            suite.stats.changed,
            suite.stats.added,
            suite.stats.deleted,
            suite.stats.error
        );
        Ok(suite)
    }

    async fn load_or_create(&self, suite_id: Option<&str>, options: &SuiteOptions) -> Result<SuiteResult> {
        if let Some(id) = suite_id {
            if let Some(existing) = self.store.get_suite(id).await? {
                if existing.status == SuiteStatus::Running {
                    return Ok(existing);
                }
                // Terminal records start over under the same id
                debug!("Restarting {} suite {}", existing.status, id);
                let fresh = SuiteResult::with_id(id, options.clone());
                self.store.update_suite(&fresh).await?;
                return Ok(fresh);
            }
        }

        let suite = match suite_id {
            Some(id) => SuiteResult::with_id(id, options.clone()),
            None => SuiteResult::new(options.clone()),
        };
        self.store.create_suite(&suite).await?;
        Ok(suite)
    }
}

async fn write_scratch(screenshot: &Screenshot) -> Result<NamedTempFile> {
    let bytes = BASE64
        .decode(&screenshot.base64)
        .map_err(|e| Error::Internal(format!("screenshot is not valid base64: {}", e)))?;
    let file = tempfile::Builder::new()
        .prefix("dialog-differ-")
        .suffix(".png")
        .tempfile()?;
    tokio::fs::write(file.path(), bytes).await?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::CompareResult;
    use async_trait::async_trait;
    use dialog_differ_common::{DialogError, MemoryStore, Size};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Equal when both files hold the same bytes
    #[derive(Default)]
    struct BytesComparator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageComparator for BytesComparator {
        async fn compare(&self, a: &Path, b: &Path, _: CompareOptions) -> CompareResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(std::fs::read(a)? == std::fs::read(b)?)
        }

        async fn create_diff(&self, _: &Path, _: &Path, _: DiffOptions) -> CompareResult<Vec<u8>> {
            Ok(b"diff".to_vec())
        }
    }

    fn dialog(version: &str, id: &str, payloads: &[&str]) -> Dialog {
        let mut d = Dialog::new(version, id, format!("http://localhost/{}", id));
        for (i, p) in payloads.iter().enumerate() {
            d.screenshots
                .push(Screenshot::new(Size::new(100 + i as u32, 100), BASE64.encode(p)));
        }
        d
    }

    fn differ() -> (Differ, Arc<BytesComparator>) {
        let comparator = Arc::new(BytesComparator::default());
        let differ = Differ::new(
            comparator.clone(),
            Arc::new(MemoryStore::new()),
            DiffSettings::default(),
            EventSink::default(),
        );
        (differ, comparator)
    }

    fn options() -> SuiteOptions {
        SuiteOptions::new(vec![Size::new(100, 100), Size::new(101, 100)], "1", "2")
    }

    #[tokio::test]
    async fn test_absent_side_wins_over_error() {
        let (differ, comparator) = differ();
        let mut broken = dialog("2", "a", &[]);
        broken.error = Some(DialogError::new("E_CAPTURE_TIMEOUT", "timed out"));

        let added = differ.differ_dialog(&options(), None, Some(&broken)).await.unwrap();
        assert_eq!(added.result, DiffOutcome::Added);
        assert!(added.differ.is_empty());

        let deleted = differ
            .differ_dialog(&options(), Some(&dialog("1", "a", &["x"])), None)
            .await
            .unwrap();
        assert_eq!(deleted.result, DiffOutcome::Deleted);
        assert_eq!(comparator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_side_skips_comparison() {
        let (differ, comparator) = differ();
        let mut broken = dialog("2", "a", &["x", "y"]);
        broken.error = Some(DialogError::new("E_CAPTURE_TIMEOUT", "timed out"));

        let result = differ
            .differ_dialog(&options(), Some(&dialog("1", "a", &["x", "y"])), Some(&broken))
            .await
            .unwrap();
        assert_eq!(result.result, DiffOutcome::Error);
        assert!(result.differ.is_empty());
        assert_eq!(comparator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_changed_size_marks_pair_changed() {
        let (differ, _) = differ();
        let result = differ
            .differ_dialog(
                &options(),
                Some(&dialog("1", "a", &["x", "y"])),
                Some(&dialog("2", "a", &["x", "z"])),
            )
            .await
            .unwrap();

        assert_eq!(result.result, DiffOutcome::Changed);
        assert_eq!(result.differ[0].result, DiffOutcome::Identical);
        assert!(result.differ[0].base64.is_none());
        assert_eq!(result.differ[1].result, DiffOutcome::Changed);
        assert_eq!(result.differ[1].base64.as_deref(), Some(BASE64.encode("diff").as_str()));
    }

    #[tokio::test]
    async fn test_missing_size_on_one_side_is_changed() {
        let (differ, _) = differ();
        let result = differ
            .differ_dialog(
                &options(),
                Some(&dialog("1", "a", &["x", "y"])),
                Some(&dialog("2", "a", &["x"])),
            )
            .await
            .unwrap();

        assert_eq!(result.result, DiffOutcome::Changed);
        assert_eq!(result.differ.len(), 2);
        assert!(result.differ[1].base64.is_none());
    }

    #[tokio::test]
    async fn test_invalid_screenshot_payload_fails_comparison() {
        let (differ, _) = differ();
        let mut broken = dialog("2", "a", &[]);
        broken.screenshots.push(Screenshot::new(Size::new(100, 100), "%%%".to_string()));

        let err = differ
            .differ_dialog(&options(), Some(&dialog("1", "a", &["x"])), Some(&broken))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E_COMPARISON");
    }
}

//! CLI Commands

pub mod config;
pub mod run;
pub mod suites;

use dialog_differ_common::{DialogsResult, SuiteResult};
use serde::Serialize;

use crate::output::TableDisplay;

/// Suite record summary
#[derive(Serialize)]
pub struct SuiteDisplay {
    pub id: String,
    pub status: String,
    pub error_code: Option<String>,
    pub started: String,
    pub versions: String,
    pub identical: usize,
    pub changed: usize,
    pub added: usize,
    pub deleted: usize,
    pub error: usize,
    pub duration_ms: u64,
}

impl From<&SuiteResult> for SuiteDisplay {
    fn from(suite: &SuiteResult) -> Self {
        Self {
            id: suite.id.clone(),
            status: suite.status.to_string(),
            error_code: suite.error_code.clone(),
            started: chrono::DateTime::from_timestamp_millis(suite.timestamp)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            versions: format!(
                "{} -> {}",
                suite.options.original_version, suite.options.current_version
            ),
            identical: suite.stats.identical,
            changed: suite.stats.changed,
            added: suite.stats.added,
            deleted: suite.stats.deleted,
            error: suite.stats.error,
            duration_ms: suite.stats.duration,
        }
    }
}

impl TableDisplay for SuiteDisplay {
    fn headers() -> Vec<&'static str> {
        vec![
            "ID", "Status", "Started", "Versions", "Identical", "Changed", "Added", "Deleted",
            "Error", "Duration",
        ]
    }

    fn row(&self) -> Vec<String> {
        let status = match &self.error_code {
            Some(code) => format!("{} ({})", self.status, code),
            None => self.status.clone(),
        };
        vec![
            self.id.clone(),
            status,
            self.started.clone(),
            self.versions.clone(),
            self.identical.to_string(),
            self.changed.to_string(),
            self.added.to_string(),
            self.deleted.to_string(),
            self.error.to_string(),
            format!("{:.1}s", self.duration_ms as f64 / 1000.0),
        ]
    }
}

/// One compared dialog, without image payloads
#[derive(Serialize)]
pub struct ResultDisplay {
    pub dialog_id: String,
    pub result: String,
    pub sizes: String,
    pub error: Option<String>,
}

impl From<&DialogsResult> for ResultDisplay {
    fn from(result: &DialogsResult) -> Self {
        let sizes = result
            .differ
            .iter()
            .map(|entry| {
                let size = result
                    .original
                    .as_ref()
                    .and_then(|d| d.screenshots.get(entry.index))
                    .map(|s| s.size().to_string())
                    .unwrap_or_else(|| format!("#{}", entry.index));
                format!("{} {}", size, entry.result)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let error = [&result.original, &result.current]
            .into_iter()
            .flatten()
            .find_map(|d| d.error.as_ref())
            .map(|e| format!("{}: {}", e.code, e.message));

        Self {
            dialog_id: result.dialog_id.clone(),
            result: result.result.to_string(),
            sizes,
            error,
        }
    }
}

impl TableDisplay for ResultDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Dialog", "Result", "Sizes", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.dialog_id.clone(),
            self.result.clone(),
            self.sizes.clone(),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

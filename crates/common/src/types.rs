//! Core types for dialog-differ

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// A requested viewport size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Per-dialog overrides of the suite options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<Vec<Size>>,
}

/// A captured screenshot of a dialog at one viewport size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    /// Base64-encoded PNG payload
    pub base64: String,
}

impl Screenshot {
    pub fn new(size: Size, base64: String) -> Self {
        Self {
            width: size.width,
            height: size.height,
            base64,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Error recorded on a dialog when capturing or comparing it failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl DialogError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            stack: None,
            args: serde_json::Value::Null,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }
}

/// A named, versioned view to render and compare
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialog {
    pub version: String,
    pub id: String,
    pub url: String,
    /// Client-side route fragment reached without a full navigation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,
    /// Selector of the element bounding the captured region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<String>,
    /// Milliseconds to wait after every viewport change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// JavaScript function `(width, height) => ({ width, height })` evaluated in the page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DialogError>,
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
    #[serde(default)]
    pub options: DialogOptions,
}

impl Dialog {
    pub fn new(version: impl Into<String>, id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            id: id.into(),
            url: url.into(),
            hash: None,
            wait_for_selector: None,
            crop: None,
            timeout: None,
            resize: None,
            error: None,
            screenshots: Vec::new(),
            options: DialogOptions::default(),
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_wait_for_selector(mut self, selector: impl Into<String>) -> Self {
        self.wait_for_selector = Some(selector.into());
        self
    }

    pub fn with_crop(mut self, selector: impl Into<String>) -> Self {
        self.crop = Some(selector.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_resize(mut self, script: impl Into<String>) -> Self {
        self.resize = Some(script.into());
        self
    }

    pub fn with_sizes(mut self, sizes: Vec<Size>) -> Self {
        self.options.sizes = Some(sizes);
        self
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Sizes this dialog is captured at: its own override, else the suite sizes
    pub fn effective_sizes(&self, options: &SuiteOptions) -> Vec<Size> {
        self.options
            .sizes
            .clone()
            .unwrap_or_else(|| options.sizes.clone())
    }
}

/// Which side of a suite a dialog belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogSide {
    Original,
    Current,
}

impl std::fmt::Display for DialogSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogSide::Original => write!(f, "original"),
            DialogSide::Current => write!(f, "current"),
        }
    }
}

/// Options shared by every dialog of a suite run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteOptions {
    pub sizes: Vec<Size>,
    pub original_version: String,
    pub current_version: String,
    /// Bypass the screenshot cache
    #[serde(default)]
    pub is_force_snap: bool,
    /// Bypass the comparison cache
    #[serde(default)]
    pub is_force_diff: bool,
}

impl SuiteOptions {
    pub fn new(
        sizes: Vec<Size>,
        original_version: impl Into<String>,
        current_version: impl Into<String>,
    ) -> Self {
        Self {
            sizes,
            original_version: original_version.into(),
            current_version: current_version.into(),
            is_force_snap: false,
            is_force_diff: false,
        }
    }

    pub fn force_snap(mut self, force: bool) -> Self {
        self.is_force_snap = force;
        self
    }

    pub fn force_diff(mut self, force: bool) -> Self {
        self.is_force_diff = force;
        self
    }
}

/// Outcome of comparing a dialog pair, or one of its sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOutcome {
    Identical,
    Changed,
    Added,
    Deleted,
    Error,
}

impl std::fmt::Display for DiffOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffOutcome::Identical => write!(f, "identical"),
            DiffOutcome::Changed => write!(f, "changed"),
            DiffOutcome::Added => write!(f, "added"),
            DiffOutcome::Deleted => write!(f, "deleted"),
            DiffOutcome::Error => write!(f, "error"),
        }
    }
}

/// Comparison of one size index of a dialog pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub index: usize,
    pub result: DiffOutcome,
    /// Base64 diff visualisation, present only for changed sizes
    pub base64: Option<String>,
}

/// Comparison outcome for one dialog id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogsResult {
    pub dialog_id: String,
    pub original: Option<Dialog>,
    pub current: Option<Dialog>,
    pub original_version: String,
    pub current_version: String,
    pub result: DiffOutcome,
    #[serde(default)]
    pub differ: Vec<DiffEntry>,
}

impl DialogsResult {
    /// Skeleton entry before comparison; the outcome is filled in by the differ.
    ///
    /// Versions come from the dialogs when present, else from the options.
    pub fn pending(
        dialog_id: impl Into<String>,
        options: &SuiteOptions,
        original: Option<Dialog>,
        current: Option<Dialog>,
    ) -> Self {
        let original_version = original
            .as_ref()
            .map_or_else(|| options.original_version.clone(), |d| d.version.clone());
        let current_version = current
            .as_ref()
            .map_or_else(|| options.current_version.clone(), |d| d.version.clone());
        Self {
            dialog_id: dialog_id.into(),
            original,
            current,
            original_version,
            current_version,
            result: DiffOutcome::Identical,
            differ: Vec::new(),
        }
    }
}

/// Lifecycle of a suite run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStatus {
    Running,
    Finished,
    Error,
}

impl SuiteStatus {
    pub fn can_transition_to(&self, to: SuiteStatus) -> bool {
        matches!(
            (self, to),
            (SuiteStatus::Running, SuiteStatus::Finished) | (SuiteStatus::Running, SuiteStatus::Error)
        )
    }
}

impl std::fmt::Display for SuiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuiteStatus::Running => write!(f, "running"),
            SuiteStatus::Finished => write!(f, "finished"),
            SuiteStatus::Error => write!(f, "error"),
        }
    }
}

/// Aggregated counts of a suite run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteStats {
    pub identical: usize,
    pub changed: usize,
    pub added: usize,
    pub deleted: usize,
    pub error: usize,
    /// Milliseconds between start and finish
    pub duration: u64,
    pub dialogs: usize,
}

impl SuiteStats {
    /// Count every result into exactly one bucket
    pub fn tally(results: &[DialogsResult], duration: u64) -> Self {
        let mut stats = Self {
            duration,
            dialogs: results.len(),
            ..Default::default()
        };

        for result in results {
            match result.result {
                DiffOutcome::Identical => stats.identical += 1,
                DiffOutcome::Changed => stats.changed += 1,
                DiffOutcome::Added => stats.added += 1,
                DiffOutcome::Deleted => stats.deleted += 1,
                DiffOutcome::Error => stats.error += 1,
            }
        }

        stats
    }

    pub fn total(&self) -> usize {
        self.identical + self.changed + self.added + self.deleted + self.error
    }
}

/// Persisted record of a suite run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult {
    pub id: String,
    pub status: SuiteStatus,
    pub error_code: Option<String>,
    /// Start time in milliseconds since the epoch
    pub timestamp: i64,
    pub options: SuiteOptions,
    pub stats: SuiteStats,
    #[serde(default)]
    pub results: Vec<DialogsResult>,
}

impl SuiteResult {
    pub fn new(options: SuiteOptions) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), options)
    }

    pub fn with_id(id: impl Into<String>, options: SuiteOptions) -> Self {
        Self {
            id: id.into(),
            status: SuiteStatus::Running,
            error_code: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            options,
            stats: SuiteStats::default(),
            results: Vec::new(),
        }
    }

    /// Move to a new status; only running -> finished | error is allowed
    pub fn transition(&mut self, to: SuiteStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Milliseconds elapsed since the run started
    pub fn elapsed_ms(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis();
        (now - self.timestamp).max(0) as u64
    }
}

/// A full suite run request: two dialog sets under one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    /// Existing suite id to resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub options: SuiteOptions,
    #[serde(default)]
    pub original: Vec<Dialog>,
    #[serde(default)]
    pub current: Vec<Dialog>,
}

impl Suite {
    pub fn new(options: SuiteOptions, original: Vec<Dialog>, current: Vec<Dialog>) -> Self {
        Self {
            id: None,
            options,
            original,
            current,
        }
    }
}

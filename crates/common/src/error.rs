//! Error types for dialog-differ

use thiserror::Error;

use crate::types::{DialogError, DialogSide, Size};

/// Result type alias using the dialog-differ Error
pub type Result<T> = std::result::Result<T, Error>;

/// dialog-differ error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Capture error: {0}")]
    Capture(#[from] RenderError),

    #[error("Comparison failed for dialog {dialog_id}: {message}")]
    Comparison { dialog_id: String, message: String },

    #[error("Store operation {op} failed for {key}: {source}")]
    Store {
        op: StoreOp,
        key: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Suite {suite_id} failed: {source}")]
    Suite {
        suite_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a failure of a store call with its operation and key
    pub fn store(op: StoreOp, key: impl Into<String>, source: Error) -> Self {
        Error::Store {
            op,
            key: key.into(),
            source: Box::new(source),
        }
    }

    /// Stable code identifying the kind of failure
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(e) => e.code(),
            Error::Capture(e) => e.code(),
            Error::Comparison { .. } => "E_COMPARISON",
            Error::Store { op, .. } => op.code(),
            Error::Suite { source, .. } => source.code(),
            Error::InvalidStateTransition { .. } => "E_STATE_TRANSITION",
            Error::NotFound { .. } => "E_NOT_FOUND",
            Error::InvalidConfig(_) => "E_CONFIG",
            Error::Io(_) => "E_IO",
            Error::Database(_) => "E_DATABASE",
            Error::Serialization(_) => "E_SERIALIZATION",
            Error::Internal(_) => "E_INTERNAL",
        }
    }

    /// Convert into the record attached to a failed dialog
    pub fn to_dialog_error(&self, args: serde_json::Value) -> DialogError {
        DialogError::new(self.code(), self.to_string())
            .with_stack(format!("{:?}", self))
            .with_args(args)
    }
}

/// Suite rejected before any capture or comparison work started
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("suite document is malformed: {0}")]
    Malformed(String),

    #[error("options are missing")]
    MissingOptions,

    #[error("options.sizes must be a non-empty array")]
    MissingSizes,

    #[error("options.sizes[{index}] is invalid: {reason}")]
    InvalidSize { index: usize, reason: String },

    #[error("options.{field} is missing")]
    MissingVersion { field: &'static str },

    #[error("{side} dialogs are missing")]
    MissingDialogs { side: DialogSide },

    #[error("{side}[{index}].{field} is invalid: {reason}")]
    InvalidDialog {
        side: DialogSide,
        index: usize,
        field: String,
        reason: String,
    },

    #[error("{side}[{index}] repeats dialog id {id}")]
    DuplicateDialog {
        side: DialogSide,
        index: usize,
        id: String,
    },

    #[error("{side}[{index}] has version {found}, expected {expected}")]
    VersionMismatch {
        side: DialogSide,
        index: usize,
        found: String,
        expected: String,
    },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Malformed(_) => "E_VALIDATION_MALFORMED",
            ValidationError::MissingOptions => "E_VALIDATION_OPTIONS",
            ValidationError::MissingSizes | ValidationError::InvalidSize { .. } => "E_VALIDATION_SIZE",
            ValidationError::MissingVersion { .. } => "E_VALIDATION_VERSION",
            ValidationError::MissingDialogs { .. } => "E_VALIDATION_DIALOGS",
            ValidationError::InvalidDialog { .. } => "E_VALIDATION_DIALOG",
            ValidationError::DuplicateDialog { .. } => "E_VALIDATION_DUPLICATE",
            ValidationError::VersionMismatch { .. } => "E_VALIDATION_VERSION_MISMATCH",
        }
    }
}

/// Failure of a renderer call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("viewport change to {size} failed: {message}")]
    Viewport { size: Size, message: String },

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("renderer protocol error: {0}")]
    Protocol(String),

    #[error("renderer process closed")]
    Closed,
}

impl RenderError {
    pub fn code(&self) -> &'static str {
        match self {
            RenderError::Launch(_) => "E_CAPTURE_LAUNCH",
            RenderError::Navigation { .. } => "E_CAPTURE_NAVIGATION",
            RenderError::Timeout { .. } => "E_CAPTURE_TIMEOUT",
            RenderError::Evaluation(_) => "E_CAPTURE_EVALUATION",
            RenderError::Viewport { .. } => "E_CAPTURE_VIEWPORT",
            RenderError::Screenshot(_) => "E_CAPTURE_SCREENSHOT",
            RenderError::Protocol(_) => "E_CAPTURE_PROTOCOL",
            RenderError::Closed => "E_CAPTURE_CLOSED",
        }
    }
}

/// Store operation, used to tag persistence failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    GetScreenshots,
    SaveScreenshot,
    GetDialogsResult,
    SaveDialogsResult,
    CreateSuite,
    GetSuite,
    UpdateSuite,
    ListSuites,
    DeleteSuite,
    PruneSuites,
}

impl StoreOp {
    pub fn code(&self) -> &'static str {
        match self {
            StoreOp::GetScreenshots => "E_STORE_GET_SCREENSHOTS",
            StoreOp::SaveScreenshot => "E_STORE_SAVE_SCREENSHOT",
            StoreOp::GetDialogsResult => "E_STORE_GET_DIALOGS_RESULT",
            StoreOp::SaveDialogsResult => "E_STORE_SAVE_DIALOGS_RESULT",
            StoreOp::CreateSuite => "E_STORE_CREATE_SUITE",
            StoreOp::GetSuite => "E_STORE_GET_SUITE",
            StoreOp::UpdateSuite => "E_STORE_UPDATE_SUITE",
            StoreOp::ListSuites => "E_STORE_LIST_SUITES",
            StoreOp::DeleteSuite => "E_STORE_DELETE_SUITE",
            StoreOp::PruneSuites => "E_STORE_PRUNE_SUITES",
        }
    }
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreOp::GetScreenshots => "get_screenshots",
            StoreOp::SaveScreenshot => "save_screenshot",
            StoreOp::GetDialogsResult => "get_dialogs_result",
            StoreOp::SaveDialogsResult => "save_dialogs_result",
            StoreOp::CreateSuite => "create_suite",
            StoreOp::GetSuite => "get_suite",
            StoreOp::UpdateSuite => "update_suite",
            StoreOp::ListSuites => "list_suites",
            StoreOp::DeleteSuite => "delete_suite",
            StoreOp::PruneSuites => "prune_suites",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_error_reports_inner_code() {
        let inner = Error::store(
            StoreOp::SaveDialogsResult,
            "1/a-2/a-460/350",
            Error::Internal("disk full".to_string()),
        );
        let err = Error::Suite {
            suite_id: "s1".to_string(),
            source: Box::new(inner),
        };
        assert_eq!(err.code(), "E_STORE_SAVE_DIALOGS_RESULT");
        assert!(err.to_string().contains("save_dialogs_result"));
    }

    #[test]
    fn test_dialog_error_carries_code_and_args() {
        let err = Error::from(RenderError::Timeout {
            what: "selector #missing".to_string(),
            timeout_ms: 100,
        });
        let record = err.to_dialog_error(serde_json::json!({ "id": "a" }));
        assert_eq!(record.code, "E_CAPTURE_TIMEOUT");
        assert_eq!(record.args["id"], "a");
        assert!(record.stack.is_some());
    }
}

//! Progress events of a suite run

use tokio::sync::broadcast;

use dialog_differ_common::{Dialog, DialogError, DialogSide, DialogsResult, SuiteResult};

/// Events emitted while a suite runs, in lifecycle order.
#[derive(Debug, Clone, PartialEq)]
pub enum SuiteEvent {
    /// Validation passed and the suite record exists.
    Start { suite_id: String },
    SnapStart { suite_id: String },
    /// One dialog finished capture or was restored from the store.
    Snap(SnapProgress),
    SnapEnd { suite_id: String },
    DiffStart { suite_id: String },
    /// One dialog pair was compared or served from the cache.
    Diff(Box<DialogsResult>),
    DiffEnd { suite_id: String },
    /// Terminal event, sent on success and on failure.
    End {
        /// Last persisted state of the suite record, if one was created
        suite: Option<Box<SuiteResult>>,
        error_code: Option<String>,
    },
}

/// Outcome of capturing one dialog
#[derive(Debug, Clone, PartialEq)]
pub struct SnapProgress {
    pub dialog: Box<Dialog>,
    pub error: Option<DialogError>,
    /// Screenshots came from the store without rendering
    pub is_database: bool,
    pub is_original: bool,
    pub is_current: bool,
}

impl SnapProgress {
    pub fn new(dialog: &Dialog, side: Option<DialogSide>, is_database: bool) -> Self {
        Self {
            dialog: Box::new(dialog.clone()),
            error: dialog.error.clone(),
            is_database,
            is_original: side == Some(DialogSide::Original),
            is_current: side == Some(DialogSide::Current),
        }
    }
}

/// Sending half of the event channel. Sending never fails; events without
/// subscribers are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SuiteEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SuiteEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SuiteEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

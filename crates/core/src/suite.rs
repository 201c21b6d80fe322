//! Suite controller
//!
//! Runs a suite end to end: validate, create or resume the suite record,
//! capture both dialog sets, compare them. Progress is published as
//! [`SuiteEvent`]s to every subscriber.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, info_span, warn, Instrument};

use dialog_differ_common::validate::{parse_suite, validate_suite};
use dialog_differ_common::{
    DialogSide, DifferConfig, Error, Result, Store, Suite, SuiteResult, SuiteStatus,
};

use crate::comparator::ImageComparator;
use crate::differ::{DiffSettings, Differ};
use crate::events::{EventSink, SuiteEvent};
use crate::renderer::Renderer;
use crate::snap::{SnapSettings, Snapper};

pub struct SuiteController {
    snapper: Snapper,
    differ: Differ,
    store: Arc<dyn Store>,
    events: EventSink,
}

impl SuiteController {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        comparator: Arc<dyn ImageComparator>,
        store: Arc<dyn Store>,
        config: &DifferConfig,
    ) -> Result<Self> {
        Ok(Self::with_settings(
            renderer,
            comparator,
            store,
            SnapSettings::from_config(config),
            DiffSettings::from_config(config)?,
        ))
    }

    pub fn with_settings(
        renderer: Arc<dyn Renderer>,
        comparator: Arc<dyn ImageComparator>,
        store: Arc<dyn Store>,
        snap: SnapSettings,
        diff: DiffSettings,
    ) -> Self {
        let events = EventSink::default();
        Self {
            snapper: Snapper::new(renderer, store.clone(), snap, events.clone()),
            differ: Differ::new(comparator, store.clone(), diff, events.clone()),
            store,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SuiteEvent> {
        self.events.subscribe()
    }

    pub fn snapper(&self) -> &Snapper {
        &self.snapper
    }

    pub fn differ(&self) -> &Differ {
        &self.differ
    }

    /// Parse a raw suite document, then run it
    pub async fn run_document(&self, doc: &Value) -> Result<SuiteResult> {
        match parse_suite(doc) {
            Ok(suite) => self.run(suite).await,
            Err(e) => Err(self.rejected(e.into())),
        }
    }

    /// Run a suite to completion.
    ///
    /// A suite failing validation is rejected before any record exists.
    /// Any later failure marks the record as `error` and is returned
    /// wrapped in [`Error::Suite`].
    pub async fn run(&self, suite: Suite) -> Result<SuiteResult> {
        if let Err(e) = validate_suite(&suite) {
            return Err(self.rejected(e.into()));
        }

        let record = match self.start(&suite).await {
            Ok(record) => record,
            Err(e) => {
                let suite_id = suite.id.clone().unwrap_or_default();
                self.events.emit(SuiteEvent::End {
                    suite: None,
                    error_code: Some(e.code().to_string()),
                });
                return Err(Error::Suite {
                    suite_id,
                    source: Box::new(e),
                });
            }
        };

        let suite_id = record.id.clone();
        let span = info_span!("suite", id = %suite_id);

        match self.execute(&suite_id, suite).instrument(span).await {
            Ok(result) => {
                self.events.emit(SuiteEvent::End {
                    suite: Some(Box::new(result.clone())),
                    error_code: None,
                });
                Ok(result)
            }
            Err(e) => {
                warn!("Suite {} failed: {}", suite_id, e);
                let last = self.record_failure(&suite_id, &e).await;
                self.events.emit(SuiteEvent::End {
                    suite: last.map(Box::new),
                    error_code: Some(e.code().to_string()),
                });
                Err(Error::Suite {
                    suite_id,
                    source: Box::new(e),
                })
            }
        }
    }

    async fn execute(&self, suite_id: &str, suite: Suite) -> Result<SuiteResult> {
        let Suite {
            options,
            original,
            current,
            ..
        } = suite;

        info!(
            "Starting suite: {} original / {} current dialog(s) at {} size(s)",
            original.len(),
            current.len(),
            options.sizes.len()
        );
        self.events.emit(SuiteEvent::Start {
            suite_id: suite_id.to_string(),
        });

        self.events.emit(SuiteEvent::SnapStart {
            suite_id: suite_id.to_string(),
        });
        let original = self
            .snapper
            .snap_suite_dialogs(&options, original, DialogSide::Original)
            .await?;
        let current = self
            .snapper
            .snap_suite_dialogs(&options, current, DialogSide::Current)
            .await?;
        self.events.emit(SuiteEvent::SnapEnd {
            suite_id: suite_id.to_string(),
        });

        self.events.emit(SuiteEvent::DiffStart {
            suite_id: suite_id.to_string(),
        });
        let result = self
            .differ
            .differ_suite(Some(suite_id), &options, &original, &current)
            .await?;
        self.events.emit(SuiteEvent::DiffEnd {
            suite_id: suite_id.to_string(),
        });

        Ok(result)
    }

    /// Create the suite record, or reset an existing one to a fresh run
    async fn start(&self, suite: &Suite) -> Result<SuiteResult> {
        let Some(id) = &suite.id else {
            let record = SuiteResult::new(suite.options.clone());
            self.store.create_suite(&record).await?;
            return Ok(record);
        };

        let record = SuiteResult::with_id(id.clone(), suite.options.clone());
        if self.store.get_suite(id).await?.is_some() {
            info!("Resuming suite {}", id);
            self.store.update_suite(&record).await?;
        } else {
            self.store.create_suite(&record).await?;
        }
        Ok(record)
    }

    /// Best effort: mark the record failed and return its last persisted state
    async fn record_failure(&self, suite_id: &str, error: &Error) -> Option<SuiteResult> {
        let mut record = match self.store.get_suite(suite_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not load suite {} to record failure: {}", suite_id, e);
                return None;
            }
        };

        let mut failed = record.clone();
        if failed.transition(SuiteStatus::Error).is_err() {
            // Already terminal
            return Some(record);
        }
        failed.error_code = Some(error.code().to_string());
        failed.stats.duration = failed.elapsed_ms();

        match self.store.update_suite(&failed).await {
            Ok(()) => record = failed,
            Err(e) => warn!("Could not record failure of suite {}: {}", suite_id, e),
        }
        Some(record)
    }

    fn rejected(&self, error: Error) -> Error {
        warn!("Suite rejected: {}", error);
        self.events.emit(SuiteEvent::End {
            suite: None,
            error_code: Some(error.code().to_string()),
        });
        error
    }
}

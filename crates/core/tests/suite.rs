//! End-to-end suite runs against the scripted renderer

mod common;

use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

use common::{
    controller, options, snap_settings, stable, versioned, BrokenResultStore, CountingComparator,
    FailingComparator, MockRenderer,
};
use dialog_differ_common::{
    DiffOutcome, Error, MemoryStore, Store, Suite, SuiteStatus, ValidationError,
};
use dialog_differ_core::{DiffSettings, SuiteController, SuiteEvent};

fn label(event: &SuiteEvent) -> &'static str {
    match event {
        SuiteEvent::Start { .. } => "start",
        SuiteEvent::SnapStart { .. } => "snap-start",
        SuiteEvent::Snap(_) => "snap",
        SuiteEvent::SnapEnd { .. } => "snap-end",
        SuiteEvent::DiffStart { .. } => "diff-start",
        SuiteEvent::Diff(_) => "diff",
        SuiteEvent::DiffEnd { .. } => "diff-end",
        SuiteEvent::End { .. } => "end",
    }
}

fn drain(rx: &mut broadcast::Receiver<SuiteEvent>) -> Vec<SuiteEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn two_dialog_suite() -> Suite {
    Suite::new(
        options(),
        vec![versioned("1", "a"), stable("1", "b")],
        vec![versioned("2", "a"), stable("2", "b")],
    )
}

#[tokio::test]
async fn events_follow_the_suite_phases() {
    let renderer = Arc::new(MockRenderer::new());
    let controller = controller(
        renderer,
        Arc::new(CountingComparator::default()),
        Arc::new(MemoryStore::new()),
    );
    let mut rx = controller.subscribe();

    let result = controller.run(two_dialog_suite()).await.unwrap();
    assert_eq!(result.status, SuiteStatus::Finished);

    let events = drain(&mut rx);
    let labels: Vec<&str> = events.iter().map(label).collect();
    assert_eq!(
        labels,
        vec![
            "start",
            "snap-start",
            "snap",
            "snap",
            "snap",
            "snap",
            "snap-end",
            "diff-start",
            "diff",
            "diff",
            "diff-end",
            "end",
        ]
    );

    match events.last() {
        Some(SuiteEvent::End { suite: Some(suite), error_code: None }) => {
            assert_eq!(suite.id, result.id);
            assert_eq!(suite.stats.changed, 1);
            assert_eq!(suite.stats.identical, 1);
        }
        other => panic!("unexpected final event {:?}", other),
    }
}

#[tokio::test]
async fn invalid_size_is_rejected_before_any_work() {
    let renderer = Arc::new(MockRenderer::new());
    let store = Arc::new(MemoryStore::new());
    let controller = controller(
        renderer.clone(),
        Arc::new(CountingComparator::default()),
        store.clone(),
    );
    let mut rx = controller.subscribe();

    let doc = json!({
        "options": {
            "sizes": [{ "width": 1 }],
            "originalVersion": "1",
            "currentVersion": "2"
        },
        "original": [{ "version": "1", "id": "a", "url": "http://localhost/a" }],
        "current": [{ "version": "2", "id": "a", "url": "http://localhost/a" }]
    });

    let err = controller.run_document(&doc).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidSize { index: 0, .. })
    ));
    assert_eq!(err.code(), "E_VALIDATION_SIZE");

    assert_eq!(renderer.call_count(), 0);
    assert!(store.list_suites().await.unwrap().is_empty());

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        SuiteEvent::End { suite: None, error_code: Some(code) } if code == "E_VALIDATION_SIZE"
    ));
}

#[tokio::test]
async fn capture_failure_stays_on_its_dialog() {
    let renderer = Arc::new(MockRenderer::new().with_failing_url("http://localhost/v2/a"));
    let controller = controller(
        renderer.clone(),
        Arc::new(CountingComparator::default()),
        Arc::new(MemoryStore::new()),
    );

    let result = controller.run(two_dialog_suite()).await.unwrap();

    assert_eq!(result.status, SuiteStatus::Finished);
    let outcomes: Vec<(&str, DiffOutcome)> = result
        .results
        .iter()
        .map(|r| (r.dialog_id.as_str(), r.result))
        .collect();
    assert_eq!(outcomes, vec![("a", DiffOutcome::Error), ("b", DiffOutcome::Identical)]);

    let failed = result.results[0].current.as_ref().unwrap();
    assert_eq!(failed.error.as_ref().unwrap().code, "E_CAPTURE_NAVIGATION");
    assert_eq!(result.stats.error, 1);
    assert_eq!(renderer.open_handles(), 0);
}

#[tokio::test]
async fn store_failure_marks_the_suite_as_failed() {
    let store = Arc::new(BrokenResultStore::default());
    let controller = controller(
        Arc::new(MockRenderer::new()),
        Arc::new(CountingComparator::default()),
        store.clone(),
    );
    let mut rx = controller.subscribe();

    let err = controller.run(two_dialog_suite()).await.unwrap_err();
    let suite_id = match &err {
        Error::Suite { suite_id, .. } => suite_id.clone(),
        other => panic!("expected a suite error, got {:?}", other),
    };
    assert_eq!(err.code(), "E_STORE_SAVE_DIALOGS_RESULT");

    let record = store.get_suite(&suite_id).await.unwrap().unwrap();
    assert_eq!(record.status, SuiteStatus::Error);
    assert_eq!(record.error_code.as_deref(), Some("E_STORE_SAVE_DIALOGS_RESULT"));

    match drain(&mut rx).pop() {
        Some(SuiteEvent::End { suite: Some(suite), error_code: Some(code) }) => {
            assert_eq!(*suite, record);
            assert_eq!(code, "E_STORE_SAVE_DIALOGS_RESULT");
        }
        other => panic!("unexpected final event {:?}", other),
    }
}

#[tokio::test]
async fn comparison_failure_marks_the_suite_as_failed() {
    let store = Arc::new(MemoryStore::new());
    let controller = SuiteController::with_settings(
        Arc::new(MockRenderer::new()),
        Arc::new(FailingComparator),
        store.clone(),
        snap_settings(),
        DiffSettings::default(),
    );
    let mut rx = controller.subscribe();

    let err = controller.run(two_dialog_suite()).await.unwrap_err();
    let suite_id = match &err {
        Error::Suite { suite_id, .. } => suite_id.clone(),
        other => panic!("expected a suite error, got {:?}", other),
    };
    assert_eq!(err.code(), "E_COMPARISON");

    let record = store.get_suite(&suite_id).await.unwrap().unwrap();
    assert_eq!(record.status, SuiteStatus::Error);
    assert_eq!(record.error_code.as_deref(), Some("E_COMPARISON"));

    match drain(&mut rx).pop() {
        Some(SuiteEvent::End { suite: Some(suite), error_code: Some(code) }) => {
            assert_eq!(*suite, record);
            assert_eq!(code, "E_COMPARISON");
        }
        other => panic!("unexpected final event {:?}", other),
    }
}

#[tokio::test]
async fn rerun_with_the_same_id_reuses_everything() {
    let renderer = Arc::new(MockRenderer::new());
    let comparator = Arc::new(CountingComparator::default());
    let store = Arc::new(MemoryStore::new());
    let controller = controller(renderer.clone(), comparator.clone(), store.clone());

    let mut suite = two_dialog_suite();
    suite.id = Some("nightly".to_string());

    let first = controller.run(suite.clone()).await.unwrap();
    let calls = renderer.call_count();
    let compares = comparator.compares();

    let second = controller.run(suite).await.unwrap();

    assert_eq!(renderer.call_count(), calls, "screenshots restored from the store");
    assert_eq!(comparator.compares(), compares, "comparisons restored from the store");
    assert_eq!(second.id, "nightly");
    assert_eq!(second.status, SuiteStatus::Finished);
    assert_eq!(second.stats.changed, first.stats.changed);
    assert_eq!(second.stats.identical, first.stats.identical);
    assert_eq!(store.list_suites().await.unwrap().len(), 1);
}

#[tokio::test]
async fn latest_suite_is_the_most_recent_run() {
    let store = Arc::new(MemoryStore::new());
    let controller = controller(
        Arc::new(MockRenderer::new()),
        Arc::new(CountingComparator::default()),
        store.clone(),
    );

    controller.run(two_dialog_suite()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = controller.run(two_dialog_suite()).await.unwrap();

    let latest = store.latest_suite().await.unwrap().unwrap();
    assert_eq!(latest.id, second.id);
    assert_eq!(store.prune_suites(1).await.unwrap(), 1);
}

//! Comparison orchestration over real pixel comparison

mod common;

use std::sync::Arc;

use common::{options, snap_settings, stable, versioned, CountingComparator, MockRenderer};
use dialog_differ_common::{
    Dialog, DialogError, DiffOutcome, MemoryStore, SqliteStore, Store, SuiteOptions, SuiteStatus,
};
use dialog_differ_core::{DiffSettings, Differ, EventSink, Snapper};

struct Harness {
    snapper: Snapper,
    differ: Differ,
    comparator: Arc<CountingComparator>,
    store: Arc<dyn Store>,
}

fn harness(store: Arc<dyn Store>) -> Harness {
    let renderer = Arc::new(MockRenderer::new());
    let comparator = Arc::new(CountingComparator::default());
    let events = EventSink::default();
    Harness {
        snapper: Snapper::new(renderer, store.clone(), snap_settings(), events.clone()),
        differ: Differ::new(comparator.clone(), store.clone(), DiffSettings::default(), events),
        comparator,
        store,
    }
}

impl Harness {
    async fn snap(&self, options: &SuiteOptions, dialog: Dialog) -> Dialog {
        self.snapper.snap_dialog(options, dialog).await.unwrap()
    }
}

#[tokio::test]
async fn changed_dialog_at_two_sizes_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(dir.path().join("differ.db")).unwrap());
    let h = harness(store);
    let options = options();

    let original = h.snap(&options, versioned("1", "1")).await;
    let current = h.snap(&options, versioned("2", "1")).await;

    let result = h
        .differ
        .differ_dialog(&options, Some(&original), Some(&current))
        .await
        .unwrap();

    assert_eq!(result.result, DiffOutcome::Changed);
    assert_eq!(result.differ.len(), 2);
    for (index, entry) in result.differ.iter().enumerate() {
        assert_eq!(entry.index, index);
        assert_eq!(entry.result, DiffOutcome::Changed);
        assert!(entry.base64.is_some());
    }

    let stored = h
        .store
        .get_dialogs_result(&options, &original, &current)
        .await
        .unwrap();
    assert_eq!(stored, Some(result));
}

#[tokio::test]
async fn identical_rendering_has_no_diff_images() {
    let h = harness(Arc::new(MemoryStore::new()));
    let options = options();

    let original = h.snap(&options, stable("1", "a")).await;
    let current = h.snap(&options, stable("2", "a")).await;

    let result = h
        .differ
        .differ_dialog(&options, Some(&original), Some(&current))
        .await
        .unwrap();

    assert_eq!(result.result, DiffOutcome::Identical);
    assert!(result
        .differ
        .iter()
        .all(|e| e.result == DiffOutcome::Identical && e.base64.is_none()));
}

#[tokio::test]
async fn stored_comparison_is_reused_until_forced() {
    let h = harness(Arc::new(MemoryStore::new()));
    let options = options();
    let original = h.snap(&options, versioned("1", "a")).await;
    let current = h.snap(&options, versioned("2", "a")).await;

    let first = h
        .differ
        .differ_dialog(&options, Some(&original), Some(&current))
        .await
        .unwrap();
    assert_eq!(h.comparator.compares(), 2);

    let cached = h
        .differ
        .differ_dialog(&options, Some(&original), Some(&current))
        .await
        .unwrap();
    assert_eq!(h.comparator.compares(), 2, "no comparator call on a cache hit");
    assert_eq!(cached.result, first.result);
    assert_eq!(cached.differ, first.differ);

    let forced = options.clone().force_diff(true);
    h.differ
        .differ_dialog(&forced, Some(&original), Some(&current))
        .await
        .unwrap();
    assert_eq!(h.comparator.compares(), 4);
}

#[tokio::test]
async fn errors_win_over_screenshots() {
    let h = harness(Arc::new(MemoryStore::new()));
    let options = options();
    let mut original = h.snap(&options, versioned("1", "a")).await;
    original.error = Some(DialogError::new("E_CAPTURE_TIMEOUT", "selector #ready"));
    let current = h.snap(&options, versioned("2", "a")).await;

    let result = h
        .differ
        .differ_dialog(&options, Some(&original), Some(&current))
        .await
        .unwrap();

    assert_eq!(result.result, DiffOutcome::Error);
    assert!(result.differ.is_empty());
    assert_eq!(h.comparator.compares(), 0);
}

#[tokio::test]
async fn suite_results_cover_the_union_of_ids() {
    let h = harness(Arc::new(MemoryStore::new()));
    let options = options();

    let mut original = Vec::new();
    for dialog in [versioned("1", "a"), stable("1", "b"), versioned("1", "c")] {
        original.push(h.snap(&options, dialog).await);
    }
    let mut current = Vec::new();
    for dialog in [versioned("2", "d"), versioned("2", "c"), stable("2", "b")] {
        current.push(h.snap(&options, dialog).await);
    }

    let suite = h
        .differ
        .differ_suite(Some("union"), &options, &original, &current)
        .await
        .unwrap();

    let outcomes: Vec<(&str, DiffOutcome)> = suite
        .results
        .iter()
        .map(|r| (r.dialog_id.as_str(), r.result))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("a", DiffOutcome::Deleted),
            ("b", DiffOutcome::Identical),
            ("c", DiffOutcome::Changed),
            ("d", DiffOutcome::Added),
        ]
    );

    let stats = &suite.stats;
    assert_eq!((stats.identical, stats.changed, stats.added, stats.deleted, stats.error), (1, 1, 1, 1, 0));
    assert_eq!(stats.total(), suite.results.len());
    assert_eq!(stats.dialogs, 4);
    assert_eq!(suite.status, SuiteStatus::Finished);

    let stored = h.store.get_suite("union").await.unwrap().unwrap();
    assert_eq!(stored, suite);
}

#[tokio::test]
async fn empty_suite_finishes_with_zero_stats() {
    let h = harness(Arc::new(MemoryStore::new()));

    let suite = h
        .differ
        .differ_suite(None, &options(), &[], &[])
        .await
        .unwrap();

    assert_eq!(suite.status, SuiteStatus::Finished);
    assert!(suite.results.is_empty());
    let stats = &suite.stats;
    assert_eq!((stats.identical, stats.changed, stats.added, stats.deleted, stats.error), (0, 0, 0, 0, 0));
    assert!(h.store.get_suite(&suite.id).await.unwrap().is_some());
}

#[tokio::test]
async fn finished_suite_id_is_compared_again() {
    let h = harness(Arc::new(MemoryStore::new()));
    let options = options();
    let original = vec![h.snap(&options, versioned("1", "a")).await];
    let current = vec![h.snap(&options, versioned("2", "a")).await];

    let first = h
        .differ
        .differ_suite(Some("s"), &options, &original, &current)
        .await
        .unwrap();
    assert_eq!(first.status, SuiteStatus::Finished);

    let second = h
        .differ
        .differ_suite(Some("s"), &options, &original, &current)
        .await
        .unwrap();
    assert_eq!(second.status, SuiteStatus::Finished);
    assert_eq!(second.stats.changed, 1);
    assert_eq!(h.comparator.compares(), 2, "second pass served from the cache");

    let stored = h.store.get_suite("s").await.unwrap().unwrap();
    assert_eq!(stored, second);
    assert_eq!(h.store.list_suites().await.unwrap().len(), 1);
}

#[tokio::test]
async fn cache_is_keyed_by_the_compared_dialog_versions() {
    let h = harness(Arc::new(MemoryStore::new()));
    let options = options();
    let original = h.snap(&options, versioned("3", "a")).await;
    let current = h.snap(&options, versioned("4", "a")).await;

    let first = h
        .differ
        .differ_dialog(&options, Some(&original), Some(&current))
        .await
        .unwrap();
    assert_eq!(
        (first.original_version.as_str(), first.current_version.as_str()),
        ("3", "4")
    );

    h.differ
        .differ_dialog(&options, Some(&original), Some(&current))
        .await
        .unwrap();
    assert_eq!(h.comparator.compares(), 2, "stored result found on the second call");
}

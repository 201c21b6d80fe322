use std::process::Command;
use std::sync::Arc;

use dialog_differ_common::{Dialog, MemoryStore, Size, SuiteOptions};
use dialog_differ_core::{EventSink, PlaywrightConfig, PlaywrightRenderer, SnapSettings, Snapper};

fn in_path(bin: &str) -> bool {
    Command::new("sh")
        .arg("-lc")
        .arg(format!("command -v {bin} >/dev/null 2>&1"))
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Playwright Capture Smoke Test
///
/// Captures an inline page through the node bridge, cropped to one element.
///
/// Marked ignored because it requires node with the playwright package and
/// an installed chromium.
#[tokio::test]
#[ignore]
async fn captures_an_inline_page_through_the_bridge() {
    if !in_path("node") {
        eprintln!("Skipping: node not available in PATH");
        return;
    }

    let renderer = PlaywrightRenderer::spawn(PlaywrightConfig::default())
        .await
        .expect("spawn playwright bridge");
    let renderer = Arc::new(renderer);
    let snapper = Snapper::new(
        renderer.clone(),
        Arc::new(MemoryStore::new()),
        SnapSettings::default(),
        EventSink::default(),
    );

    let html = r#"data:text/html,<div id="box" style="width:120px;height:40px;background:red"></div>"#;
    let dialog = Dialog::new("1", "box", html).with_crop("#box");
    let options = SuiteOptions::new(vec![Size::new(320, 200)], "1", "2");

    let snapped = snapper.snap_dialog(&options, dialog).await.expect("snap dialog");
    renderer.shutdown().await;

    assert!(snapped.error.is_none(), "capture failed: {:?}", snapped.error);
    assert_eq!(snapped.screenshots.len(), 1);
    assert!(!snapped.screenshots[0].base64.is_empty());
}

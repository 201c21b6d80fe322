//! Shared fixtures for dialog-differ integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dialog_differ_common::{
    Dialog, DialogsResult, Error, MemoryStore, RenderError, Screenshot, Size, Store, StoreOp,
    SuiteOptions, SuiteResult,
};
use dialog_differ_core::comparator::{CompareError, CompareOptions, CompareResult, DiffOptions};
use dialog_differ_core::renderer::{scripts, RenderResult};
use dialog_differ_core::{
    BrowserId, ClipRegion, DiffSettings, ImageComparator, PageId, PixelComparator, Renderer,
    SnapSettings, SuiteController,
};

#[derive(Debug, Clone, Default)]
struct PageState {
    browser: u64,
    url: String,
    hash: String,
    viewport: Option<Size>,
}

#[derive(Debug, Default)]
struct MockState {
    next_handle: u64,
    browsers: HashSet<u64>,
    pages: HashMap<u64, PageState>,
    calls: Vec<String>,
}

/// Scripted renderer. Every page renders a solid colour derived from its
/// url and hash, at the current viewport size.
#[derive(Debug, Default)]
pub struct MockRenderer {
    state: Mutex<MockState>,
    missing_selectors: HashSet<String>,
    failing_urls: HashSet<String>,
    fail_launch: bool,
    fail_new_page_after: Option<usize>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `wait_for_selector` on this selector times out
    pub fn with_missing_selector(mut self, selector: &str) -> Self {
        self.missing_selectors.insert(selector.to_string());
        self
    }

    /// `goto` to this url fails
    pub fn with_failing_url(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }

    pub fn with_failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// Only the first `n` pages can be opened
    pub fn with_page_limit(mut self, n: usize) -> Self {
        self.fail_new_page_after = Some(n);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Calls equal to `prefix` or starting with `prefix` followed by a space
    pub fn count(&self, prefix: &str) -> usize {
        let spaced = format!("{} ", prefix);
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.as_str() == prefix || c.starts_with(&spaced))
            .count()
    }

    /// Browsers and pages not closed yet
    pub fn open_handles(&self) -> usize {
        let state = self.state.lock();
        state.browsers.len() + state.pages.len()
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn page(&self, page: PageId) -> RenderResult<PageState> {
        self.state
            .lock()
            .pages
            .get(&page.0)
            .cloned()
            .ok_or_else(|| RenderError::Protocol(format!("unknown page {}", page)))
    }

    fn update_page(&self, page: PageId, update: impl FnOnce(&mut PageState)) -> RenderResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .pages
            .get_mut(&page.0)
            .ok_or_else(|| RenderError::Protocol(format!("unknown page {}", page)))?;
        update(entry);
        Ok(())
    }
}

fn colour_of(url: &str, hash: &str) -> Rgba<u8> {
    let digest = Sha256::digest(format!("{}{}", url, hash).as_bytes());
    Rgba([digest[0], digest[1], digest[2], 255])
}

pub fn solid_png(width: u32, height: u32, colour: Rgba<u8>) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, colour))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn launch(&self, timeout_ms: u64, _options: &Value) -> RenderResult<BrowserId> {
        self.record(format!("launch {}", timeout_ms));
        if self.fail_launch {
            return Err(RenderError::Launch("no browser installed".to_string()));
        }
        let mut state = self.state.lock();
        state.next_handle += 1;
        let id = state.next_handle;
        state.browsers.insert(id);
        Ok(BrowserId(id))
    }

    async fn new_page(&self, browser: BrowserId) -> RenderResult<PageId> {
        self.record(format!("new_page {}", browser));
        let opened = self.count("new_page");
        if matches!(self.fail_new_page_after, Some(limit) if opened > limit) {
            return Err(RenderError::Protocol("page limit reached".to_string()));
        }
        let mut state = self.state.lock();
        if !state.browsers.contains(&browser.0) {
            return Err(RenderError::Protocol(format!("unknown browser {}", browser)));
        }
        state.next_handle += 1;
        let id = state.next_handle;
        state.pages.insert(
            id,
            PageState {
                browser: browser.0,
                ..Default::default()
            },
        );
        Ok(PageId(id))
    }

    async fn goto(&self, page: PageId, url: &str, _timeout_ms: u64) -> RenderResult<()> {
        self.record(format!("goto {}", url));
        if self.failing_urls.contains(url) {
            return Err(RenderError::Navigation {
                url: url.to_string(),
                message: "net::ERR_CONNECTION_REFUSED".to_string(),
            });
        }
        self.update_page(page, |p| {
            p.url = url.to_string();
            p.hash.clear();
        })
    }

    async fn evaluate(&self, page: PageId, script: &str, args: Vec<Value>) -> RenderResult<Value> {
        let current = self.page(page)?;
        if script == scripts::FREEZE_ANIMATIONS {
            self.record("evaluate freeze".to_string());
            Ok(json!(true))
        } else if script == scripts::REDIRECT_HASH {
            let hash = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
            self.record(format!("evaluate hash {}", hash));
            self.update_page(page, |p| p.hash = hash)?;
            Ok(json!(current.url))
        } else if script == scripts::MEASURE_CLIP {
            self.record("evaluate clip".to_string());
            let selector = args.first().and_then(Value::as_str).unwrap_or_default();
            if self.missing_selectors.contains(selector) {
                return Ok(Value::Null);
            }
            let viewport = current.viewport.unwrap_or(Size::new(10, 10));
            Ok(json!({ "x": 0, "y": 0, "width": viewport.width / 2, "height": viewport.height / 2 }))
        } else {
            // Caller-supplied resize: keep the requested size
            self.record("evaluate resize".to_string());
            Ok(json!({ "width": args[0], "height": args[1] }))
        }
    }

    async fn set_viewport(&self, page: PageId, size: Size) -> RenderResult<()> {
        self.record(format!("set_viewport {}", size));
        self.update_page(page, |p| p.viewport = Some(size))
    }

    async fn wait_for_selector(&self, page: PageId, selector: &str, timeout_ms: u64) -> RenderResult<()> {
        self.record(format!("wait_for_selector {}", selector));
        self.page(page)?;
        if self.missing_selectors.contains(selector) {
            return Err(RenderError::Timeout {
                what: format!("selector {}", selector),
                timeout_ms,
            });
        }
        Ok(())
    }

    async fn screenshot(&self, page: PageId, clip: Option<ClipRegion>) -> RenderResult<Vec<u8>> {
        self.record("screenshot".to_string());
        let current = self.page(page)?;
        let viewport = current
            .viewport
            .ok_or_else(|| RenderError::Screenshot("viewport not set".to_string()))?;
        let (width, height) = match clip {
            Some(c) => (c.width as u32, c.height as u32),
            None => (viewport.width, viewport.height),
        };
        Ok(solid_png(width.max(1), height.max(1), colour_of(&current.url, &current.hash)))
    }

    async fn close_page(&self, page: PageId) -> RenderResult<()> {
        self.record(format!("close_page {}", page));
        self.state.lock().pages.remove(&page.0);
        Ok(())
    }

    async fn close_browser(&self, browser: BrowserId) -> RenderResult<()> {
        self.record(format!("close_browser {}", browser));
        let mut state = self.state.lock();
        state.browsers.remove(&browser.0);
        state.pages.retain(|_, p| p.browser != browser.0);
        Ok(())
    }
}

/// Pixel comparator that counts its calls
#[derive(Debug, Default)]
pub struct CountingComparator {
    inner: PixelComparator,
    pub compares: AtomicUsize,
    pub diffs: AtomicUsize,
}

impl CountingComparator {
    pub fn compares(&self) -> usize {
        self.compares.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageComparator for CountingComparator {
    async fn compare(&self, a: &Path, b: &Path, options: CompareOptions) -> CompareResult<bool> {
        self.compares.fetch_add(1, Ordering::SeqCst);
        self.inner.compare(a, b, options).await
    }

    async fn create_diff(&self, a: &Path, b: &Path, options: DiffOptions) -> CompareResult<Vec<u8>> {
        self.diffs.fetch_add(1, Ordering::SeqCst);
        self.inner.create_diff(a, b, options).await
    }
}

/// Comparator whose decoder always crashes
#[derive(Debug, Default)]
pub struct FailingComparator;

#[async_trait]
impl ImageComparator for FailingComparator {
    async fn compare(&self, _a: &Path, _b: &Path, _options: CompareOptions) -> CompareResult<bool> {
        Err(CompareError::Task("decoder crashed".to_string()))
    }

    async fn create_diff(&self, _a: &Path, _b: &Path, _options: DiffOptions) -> CompareResult<Vec<u8>> {
        Err(CompareError::Task("decoder crashed".to_string()))
    }
}

/// Memory store whose comparison writes fail
#[derive(Debug, Default)]
pub struct BrokenResultStore {
    inner: MemoryStore,
}

#[async_trait]
impl Store for BrokenResultStore {
    async fn get_screenshots(&self, dialog: &Dialog, sizes: &[Size]) -> dialog_differ_common::Result<Vec<Screenshot>> {
        self.inner.get_screenshots(dialog, sizes).await
    }

    async fn save_screenshot(&self, dialog: &Dialog, screenshot: &Screenshot) -> dialog_differ_common::Result<()> {
        self.inner.save_screenshot(dialog, screenshot).await
    }

    async fn get_dialogs_result(
        &self,
        options: &SuiteOptions,
        original: &Dialog,
        current: &Dialog,
    ) -> dialog_differ_common::Result<Option<DialogsResult>> {
        self.inner.get_dialogs_result(options, original, current).await
    }

    async fn save_dialogs_result(&self, _options: &SuiteOptions, result: &DialogsResult) -> dialog_differ_common::Result<()> {
        Err(Error::store(
            StoreOp::SaveDialogsResult,
            result.dialog_id.clone(),
            Error::Internal("disk full".to_string()),
        ))
    }

    async fn create_suite(&self, suite: &SuiteResult) -> dialog_differ_common::Result<()> {
        self.inner.create_suite(suite).await
    }

    async fn get_suite(&self, id: &str) -> dialog_differ_common::Result<Option<SuiteResult>> {
        self.inner.get_suite(id).await
    }

    async fn update_suite(&self, suite: &SuiteResult) -> dialog_differ_common::Result<()> {
        self.inner.update_suite(suite).await
    }

    async fn list_suites(&self) -> dialog_differ_common::Result<Vec<SuiteResult>> {
        self.inner.list_suites().await
    }

    async fn delete_suite(&self, id: &str) -> dialog_differ_common::Result<bool> {
        self.inner.delete_suite(id).await
    }

    async fn prune_suites(&self, keep: usize) -> dialog_differ_common::Result<usize> {
        self.inner.prune_suites(keep).await
    }
}

/// Capture settings with no waiting and small batches
pub fn snap_settings() -> SnapSettings {
    SnapSettings {
        browser_timeout: 500,
        browser_options: json!({ "headless": true }),
        hash_batch_size: 2,
        hash_concurrency: 2,
    }
}

pub fn controller(
    renderer: Arc<MockRenderer>,
    comparator: Arc<CountingComparator>,
    store: Arc<dyn Store>,
) -> SuiteController {
    SuiteController::with_settings(renderer, comparator, store, snap_settings(), DiffSettings::default())
}

pub fn sizes() -> Vec<Size> {
    vec![Size::new(460, 350), Size::new(320, 150)]
}

pub fn options() -> SuiteOptions {
    SuiteOptions::new(sizes(), "1", "2")
}

/// Dialog whose rendering differs between versions
pub fn versioned(version: &str, id: &str) -> Dialog {
    Dialog::new(version, id, format!("http://localhost/v{}/{}", version, id))
}

/// Dialog rendering the same content in every version
pub fn stable(version: &str, id: &str) -> Dialog {
    Dialog::new(version, id, format!("http://localhost/stable/{}", id))
}

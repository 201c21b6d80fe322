//! Capture orchestration
//!
//! Renders dialogs at every requested size and persists the screenshots.
//! Screenshots already in the store are reused unless the suite forces a
//! fresh capture. Renderer failures are recorded on the failing dialog and
//! never abort sibling dialogs; only store failures propagate.
//!
//! A suite's dialogs are split into [`CaptureBucket`]s by [`partition`]:
//!
//! ```text
//! snapped   + hash    -> RestoreGroup (by url)   no renderer call
//! snapped   + no hash -> Restore                  no renderer call
//! unsnapped + hash    -> HashGroup (by url, chunked)  one page per chunk,
//!                                                 navigate once, then
//!                                                 redirect the hash
//! unsnapped + no hash -> Sequential              one reused page
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::{stream, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use dialog_differ_common::identity::{dialog_identity, is_snapped};
use dialog_differ_common::{
    Dialog, DialogSide, DifferConfig, Error, RenderError, Result, Screenshot, Size, Store,
    SuiteOptions,
};

use crate::events::{EventSink, SnapProgress, SuiteEvent};
use crate::renderer::{scripts, BrowserId, ClipRegion, PageId, Renderer};

/// Capture tuning taken from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SnapSettings {
    pub browser_timeout: u64,
    pub browser_options: Value,
    pub hash_batch_size: usize,
    pub hash_concurrency: usize,
}

impl SnapSettings {
    pub fn from_config(config: &DifferConfig) -> Self {
        Self {
            browser_timeout: config.browser_timeout,
            browser_options: config.browser_options.clone(),
            hash_batch_size: config.snap_hash_batch_size,
            hash_concurrency: config.snap_hash_concurrency,
        }
    }
}

impl Default for SnapSettings {
    fn default() -> Self {
        Self::from_config(&DifferConfig::default())
    }
}

/// A dialog with its cache state resolved
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDialog {
    pub dialog: Dialog,
    /// Screenshots for every effective size are already on `dialog`
    pub snapped: bool,
}

/// Unit of capture work
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureBucket {
    RestoreGroup { url: String, dialogs: Vec<Dialog> },
    Restore(Dialog),
    HashGroup { url: String, dialogs: Vec<Dialog> },
    Sequential(Vec<Dialog>),
}

/// Split planned dialogs into capture buckets.
///
/// Groups keep the order in which their url first appears; hash groups
/// hold at most `batch_size` dialogs each.
pub fn partition(planned: Vec<PlannedDialog>, batch_size: usize) -> Vec<CaptureBucket> {
    let batch_size = batch_size.max(1);
    let mut restore_groups: Vec<(String, Vec<Dialog>)> = Vec::new();
    let mut restores = Vec::new();
    let mut hash_groups: Vec<(String, Vec<Dialog>)> = Vec::new();
    let mut sequential = Vec::new();

    for PlannedDialog { dialog, snapped } in planned {
        match (snapped, dialog.hash.is_some()) {
            (true, true) => push_grouped(&mut restore_groups, dialog),
            (true, false) => restores.push(dialog),
            (false, true) => push_grouped(&mut hash_groups, dialog),
            (false, false) => sequential.push(dialog),
        }
    }

    let mut buckets: Vec<CaptureBucket> = restore_groups
        .into_iter()
        .map(|(url, dialogs)| CaptureBucket::RestoreGroup { url, dialogs })
        .collect();
    buckets.extend(restores.into_iter().map(CaptureBucket::Restore));
    for (url, dialogs) in hash_groups {
        for chunk in dialogs.chunks(batch_size) {
            buckets.push(CaptureBucket::HashGroup {
                url: url.clone(),
                dialogs: chunk.to_vec(),
            });
        }
    }
    if !sequential.is_empty() {
        buckets.push(CaptureBucket::Sequential(sequential));
    }

    buckets
}

fn push_grouped(groups: &mut Vec<(String, Vec<Dialog>)>, dialog: Dialog) {
    match groups.iter_mut().find(|(url, _)| *url == dialog.url) {
        Some((_, dialogs)) => dialogs.push(dialog),
        None => groups.push((dialog.url.clone(), vec![dialog])),
    }
}

/// Why capturing one dialog stopped
enum CaptureFailure {
    Render(RenderError),
    Store(Error),
}

impl From<RenderError> for CaptureFailure {
    fn from(e: RenderError) -> Self {
        CaptureFailure::Render(e)
    }
}

impl From<Error> for CaptureFailure {
    fn from(e: Error) -> Self {
        CaptureFailure::Store(e)
    }
}

/// Capture orchestrator
#[derive(Clone)]
pub struct Snapper {
    renderer: Arc<dyn Renderer>,
    store: Arc<dyn Store>,
    settings: SnapSettings,
    events: EventSink,
}

impl Snapper {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        store: Arc<dyn Store>,
        settings: SnapSettings,
        events: EventSink,
    ) -> Self {
        Self {
            renderer,
            store,
            settings,
            events,
        }
    }

    /// Capture one dialog, reusing stored screenshots when possible.
    ///
    /// Renderer failures end up in `dialog.error`; the returned error is
    /// always a store failure.
    pub async fn snap_dialog(&self, options: &SuiteOptions, dialog: Dialog) -> Result<Dialog> {
        let planned = self.plan(options, dialog).await?;
        if planned.snapped {
            self.emit_snap(&planned.dialog, None, true);
            return Ok(planned.dialog);
        }

        let mut dialog = planned.dialog;
        let sizes = dialog.effective_sizes(options);

        let browser = match self.renderer.launch(self.settings.browser_timeout, &self.settings.browser_options).await {
            Ok(browser) => browser,
            Err(e) => {
                record_error(&mut dialog, e);
                self.emit_snap(&dialog, None, false);
                return Ok(dialog);
            }
        };
        let page = match self.renderer.new_page(browser).await {
            Ok(page) => page,
            Err(e) => {
                self.release(None, browser).await;
                record_error(&mut dialog, e);
                self.emit_snap(&dialog, None, false);
                return Ok(dialog);
            }
        };

        let outcome = self.capture(page, &mut dialog, &sizes, true).await;
        self.release(Some(page), browser).await;

        match outcome {
            Ok(()) => {}
            Err(CaptureFailure::Render(e)) => record_error(&mut dialog, e),
            Err(CaptureFailure::Store(e)) => return Err(e),
        }

        self.emit_snap(&dialog, None, false);
        Ok(dialog)
    }

    /// Capture every dialog of one suite side.
    ///
    /// The returned dialogs are not in input order.
    pub async fn snap_suite_dialogs(
        &self,
        options: &SuiteOptions,
        dialogs: Vec<Dialog>,
        side: DialogSide,
    ) -> Result<Vec<Dialog>> {
        let total = dialogs.len();
        let planned = futures::future::try_join_all(
            dialogs.into_iter().map(|dialog| self.plan(options, dialog)),
        )
        .await?;

        let mut restored = Vec::new();
        let mut hash_groups = Vec::new();
        let mut sequential = Vec::new();
        for bucket in partition(planned, self.settings.hash_batch_size) {
            match bucket {
                CaptureBucket::RestoreGroup { dialogs, .. } => restored.extend(dialogs),
                CaptureBucket::Restore(dialog) => restored.push(dialog),
                CaptureBucket::HashGroup { url, dialogs } => hash_groups.push((url, dialogs)),
                CaptureBucket::Sequential(dialogs) => sequential = dialogs,
            }
        }

        info!(
            "Capturing {} {} dialog(s): {} restored, {} hash group(s), {} sequential",
            total,
            side,
            restored.len(),
            hash_groups.len(),
            sequential.len()
        );

        for dialog in &restored {
            self.emit_snap(dialog, Some(side), true);
        }

        let hashed = stream::iter(hash_groups)
            .map(|(url, dialogs)| self.capture_hash_group(options, url, dialogs, side))
            .buffer_unordered(self.settings.hash_concurrency.max(1))
            .try_collect::<Vec<Vec<Dialog>>>();
        let sequenced = self.capture_sequential(options, sequential, side);

        let (hashed, sequenced) = futures::try_join!(hashed, sequenced)?;

        let mut out = restored;
        out.extend(hashed.into_iter().flatten());
        out.extend(sequenced);
        Ok(out)
    }

    /// Resolve whether stored screenshots cover the dialog
    async fn plan(&self, options: &SuiteOptions, mut dialog: Dialog) -> Result<PlannedDialog> {
        if options.is_force_snap {
            return Ok(PlannedDialog {
                dialog,
                snapped: false,
            });
        }

        let sizes = dialog.effective_sizes(options);
        let stored = self.store.get_screenshots(&dialog, &sizes).await?;
        if is_snapped(&stored, &sizes) {
            debug!("Reusing stored screenshots of {}", dialog_identity(&dialog));
            dialog.screenshots = stored;
            return Ok(PlannedDialog {
                dialog,
                snapped: true,
            });
        }

        Ok(PlannedDialog {
            dialog,
            snapped: false,
        })
    }

    /// Same-url hash dialogs on one page: navigate once, then only change the hash
    async fn capture_hash_group(
        &self,
        options: &SuiteOptions,
        url: String,
        dialogs: Vec<Dialog>,
        side: DialogSide,
    ) -> Result<Vec<Dialog>> {
        debug!("Capturing {} hash dialog(s) of {}", dialogs.len(), url);

        let (browser, page) = match self.open().await {
            Ok(handles) => handles,
            Err(e) => return Ok(self.fail_group(dialogs, &e, side)),
        };

        let mut out = Vec::with_capacity(dialogs.len());
        let mut navigate = true;
        let mut failure = None;

        for mut dialog in dialogs {
            let sizes = dialog.effective_sizes(options);
            match self.capture(page, &mut dialog, &sizes, navigate).await {
                Ok(()) => navigate = false,
                Err(CaptureFailure::Render(e)) => {
                    record_error(&mut dialog, e);
                    // The page may be anywhere now
                    navigate = true;
                }
                Err(CaptureFailure::Store(e)) => {
                    failure = Some(e);
                    break;
                }
            }
            self.emit_snap(&dialog, Some(side), false);
            out.push(dialog);
        }

        self.release(Some(page), browser).await;

        match failure {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    /// Non-hash dialogs one after another on a single page. A failed dialog
    /// discards the page and the next dialog gets a fresh one.
    async fn capture_sequential(
        &self,
        options: &SuiteOptions,
        dialogs: Vec<Dialog>,
        side: DialogSide,
    ) -> Result<Vec<Dialog>> {
        if dialogs.is_empty() {
            return Ok(Vec::new());
        }

        let (browser, first_page) = match self.open().await {
            Ok(handles) => handles,
            Err(e) => return Ok(self.fail_group(dialogs, &e, side)),
        };

        let mut out = Vec::with_capacity(dialogs.len());
        let mut page = Some(first_page);
        let mut failure = None;
        let mut queue = dialogs.into_iter();

        while let Some(mut dialog) = queue.next() {
            let current = match page {
                Some(current) => current,
                None => match self.renderer.new_page(browser).await {
                    Ok(fresh) => {
                        page = Some(fresh);
                        fresh
                    }
                    Err(e) => {
                        let remaining = std::iter::once(dialog).chain(queue.by_ref()).collect();
                        out.extend(self.fail_group(remaining, &e, side));
                        break;
                    }
                },
            };

            let sizes = dialog.effective_sizes(options);
            match self.capture(current, &mut dialog, &sizes, true).await {
                Ok(()) => {}
                Err(CaptureFailure::Render(e)) => {
                    record_error(&mut dialog, e);
                    if let Err(e) = self.renderer.close_page(current).await {
                        warn!("Failed to close page {}: {}", current, e);
                    }
                    page = None;
                }
                Err(CaptureFailure::Store(e)) => {
                    failure = Some(e);
                    break;
                }
            }
            self.emit_snap(&dialog, Some(side), false);
            out.push(dialog);
        }

        self.release(page, browser).await;

        match failure {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    /// Render one dialog on an open page
    async fn capture(
        &self,
        page: PageId,
        dialog: &mut Dialog,
        sizes: &[Size],
        navigate: bool,
    ) -> std::result::Result<(), CaptureFailure> {
        let timeout = self.settings.browser_timeout;
        dialog.screenshots.clear();
        dialog.error = None;

        if navigate {
            self.renderer.goto(page, &dialog.url, timeout).await?;
            self.renderer
                .evaluate(page, scripts::FREEZE_ANIMATIONS, Vec::new())
                .await?;
        }
        if let Some(hash) = &dialog.hash {
            self.renderer
                .evaluate(page, scripts::REDIRECT_HASH, vec![json!(hash)])
                .await?;
        }
        if let Some(selector) = &dialog.wait_for_selector {
            self.renderer.wait_for_selector(page, selector, timeout).await?;
        }

        for size in sizes {
            self.renderer.set_viewport(page, *size).await?;
            if let Some(delay) = dialog.timeout {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            if let Some(resize) = &dialog.resize {
                // Layout can settle differently after the first adjustment
                for _ in 0..2 {
                    let value = self
                        .renderer
                        .evaluate(page, resize, vec![json!(size.width), json!(size.height)])
                        .await?;
                    let adjusted: Size = serde_json::from_value(value).map_err(|e| {
                        RenderError::Evaluation(format!("resize must return {{ width, height }}: {}", e))
                    })?;
                    self.renderer.set_viewport(page, adjusted).await?;
                }
            }

            let clip = match &dialog.crop {
                Some(selector) => Some(self.measure_clip(page, selector).await?),
                None => None,
            };

            let png = self.renderer.screenshot(page, clip).await?;
            let screenshot = Screenshot::new(*size, BASE64.encode(png));
            self.store.save_screenshot(dialog, &screenshot).await?;
            dialog.screenshots.push(screenshot);
        }

        debug!(
            "Captured {} at {} size(s)",
            dialog_identity(dialog),
            dialog.screenshots.len()
        );
        Ok(())
    }

    async fn measure_clip(&self, page: PageId, selector: &str) -> std::result::Result<ClipRegion, RenderError> {
        let value = self
            .renderer
            .evaluate(page, scripts::MEASURE_CLIP, vec![json!(selector)])
            .await?;
        if value.is_null() {
            return Err(RenderError::Evaluation(format!(
                "crop selector {} matched no element",
                selector
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| RenderError::Evaluation(format!("invalid crop rectangle: {}", e)))
    }

    async fn open(&self) -> std::result::Result<(BrowserId, PageId), RenderError> {
        let browser = self
            .renderer
            .launch(self.settings.browser_timeout, &self.settings.browser_options)
            .await?;
        match self.renderer.new_page(browser).await {
            Ok(page) => Ok((browser, page)),
            Err(e) => {
                self.release(None, browser).await;
                Err(e)
            }
        }
    }

    /// Close the page, then the browser
    async fn release(&self, page: Option<PageId>, browser: BrowserId) {
        if let Some(page) = page {
            if let Err(e) = self.renderer.close_page(page).await {
                warn!("Failed to close page {}: {}", page, e);
            }
        }
        if let Err(e) = self.renderer.close_browser(browser).await {
            warn!("Failed to close browser {}: {}", browser, e);
        }
    }

    /// Mark every dialog without screenshots with a group setup failure
    fn fail_group(&self, mut dialogs: Vec<Dialog>, error: &RenderError, side: DialogSide) -> Vec<Dialog> {
        warn!("Capture group setup failed for {} dialog(s): {}", dialogs.len(), error);
        for dialog in &mut dialogs {
            if dialog.screenshots.is_empty() {
                record_error(dialog, error.clone());
            }
            self.emit_snap(dialog, Some(side), false);
        }
        dialogs
    }

    fn emit_snap(&self, dialog: &Dialog, side: Option<DialogSide>, is_database: bool) {
        self.events
            .emit(SuiteEvent::Snap(SnapProgress::new(dialog, side, is_database)));
    }
}

fn record_error(dialog: &mut Dialog, error: RenderError) {
    warn!("Capture of {} failed: {}", dialog_identity(dialog), error);
    let args = json!({
        "id": dialog.id,
        "version": dialog.version,
        "url": dialog.url,
        "hash": dialog.hash,
    });
    dialog.error = Some(Error::from(error).to_dialog_error(args));
}

//! Browser rendering capability
//!
//! The orchestrators drive a browser only through [`Renderer`]. Browsers and
//! pages are opaque handles owned by the implementation, so one renderer can
//! serve many concurrent capture batches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dialog_differ_common::{RenderError, Size};

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Handle to a launched browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrowserId(pub u64);

/// Handle to a page inside a browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl std::fmt::Display for BrowserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "browser-{}", self.0)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

/// Rectangle of the page to capture, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn launch(&self, timeout_ms: u64, options: &Value) -> RenderResult<BrowserId>;

    async fn new_page(&self, browser: BrowserId) -> RenderResult<PageId>;

    async fn goto(&self, page: PageId, url: &str, timeout_ms: u64) -> RenderResult<()>;

    /// Call the JavaScript function source `script` in the page with `args`
    async fn evaluate(&self, page: PageId, script: &str, args: Vec<Value>) -> RenderResult<Value>;

    async fn set_viewport(&self, page: PageId, size: Size) -> RenderResult<()>;

    async fn wait_for_selector(&self, page: PageId, selector: &str, timeout_ms: u64) -> RenderResult<()>;

    /// PNG bytes of the viewport, or of `clip` when given
    async fn screenshot(&self, page: PageId, clip: Option<ClipRegion>) -> RenderResult<Vec<u8>>;

    async fn close_page(&self, page: PageId) -> RenderResult<()>;

    async fn close_browser(&self, browser: BrowserId) -> RenderResult<()>;
}

/// In-page scripts evaluated during capture
pub mod scripts {
    /// Stops transitions, animations and the text caret so repeated captures match
    pub const FREEZE_ANIMATIONS: &str = r#"() => {
  const style = document.createElement('style');
  style.setAttribute('data-dialog-differ', 'freeze');
  style.textContent = '*, *::before, *::after { transition: none !important; animation: none !important; caret-color: transparent !important; }';
  document.head.appendChild(style);
  return true;
}"#;

    /// Client-side route change without reloading the page
    pub const REDIRECT_HASH: &str = r#"(hash) => {
  window.location.hash = hash;
  return window.location.href;
}"#;

    /// Bounding rectangle of the first element matching a selector, or null
    pub const MEASURE_CLIP: &str = r#"(selector) => {
  const element = document.querySelector(selector);
  if (!element) {
    return null;
  }
  const rect = element.getBoundingClientRect();
  return { x: rect.left, y: rect.top, width: rect.width, height: rect.height };
}"#;
}

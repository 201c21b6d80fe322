//! Deterministic cache keys for dialogs, screenshots, options and results.
//!
//! Every key here is used by the store and the orchestrators for cache
//! lookups, so the format must not change between runs.

use crate::types::{Dialog, DialogsResult, Screenshot, Size, SuiteOptions};

/// `"{version}/{id}"`
pub fn dialog_identity(dialog: &Dialog) -> String {
    format!("{}/{}", dialog.version, dialog.id)
}

/// `"{version}/{id}/{width}/{height}"`
pub fn screenshot_identity(dialog: &Dialog, screenshot: &Screenshot) -> String {
    format!(
        "{}/{}/{}",
        dialog_identity(dialog),
        screenshot.width,
        screenshot.height
    )
}

/// Sort sizes by width, then height.
///
/// Widths alone decide the order whenever they differ; the height only
/// breaks ties between equal widths.
pub fn sorted_sizes(sizes: &[Size]) -> Vec<Size> {
    let mut sorted = sizes.to_vec();
    sorted.sort_by_key(|s| (s.width, s.height));
    sorted
}

/// Size list as `"{w}/{h}/{w}/{h}..."`, independent of input order
pub fn sizes_identity(sizes: &[Size]) -> String {
    sorted_sizes(sizes)
        .iter()
        .map(|s| format!("{}/{}", s.width, s.height))
        .collect::<Vec<_>>()
        .join("/")
}

pub fn options_identity(options: &SuiteOptions) -> String {
    sizes_identity(&options.sizes)
}

/// `"{dialogIdentity(original)}-{dialogIdentity(current)}-{optionsIdentity}"`
pub fn result_identity(options: &SuiteOptions, original: &Dialog, current: &Dialog) -> String {
    format!(
        "{}-{}-{}",
        dialog_identity(original),
        dialog_identity(current),
        options_identity(options)
    )
}

/// Same key as [`result_identity`], built from a stored result's fields
pub fn dialogs_result_identity(options: &SuiteOptions, result: &DialogsResult) -> String {
    format!(
        "{}/{}-{}/{}-{}",
        result.original_version,
        result.dialog_id,
        result.current_version,
        result.dialog_id,
        options_identity(options)
    )
}

/// True when a stored screenshot set covers exactly the requested sizes
pub fn is_snapped(stored: &[Screenshot], sizes: &[Size]) -> bool {
    if stored.is_empty() || stored.len() != sizes.len() {
        return false;
    }

    let stored_sizes: Vec<Size> = stored.iter().map(Screenshot::size).collect();
    sorted_sizes(&stored_sizes) == sorted_sizes(sizes)
}

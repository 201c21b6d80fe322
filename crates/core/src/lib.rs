//! dialog-differ core
//!
//! Captures versioned UI dialogs at several viewport sizes, compares the
//! screenshots of two versions and records the outcome of every dialog.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SuiteController                        │
//! │   validate -> create/resume record -> snap -> diff          │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  Snapper                     │  Differ                      │
//! │    partition() -> buckets    │    differ_dialog()           │
//! │    restore | hash | seq      │    differ_suite()            │
//! ├──────────────────────────────┼──────────────────────────────┤
//! │  Renderer (Playwright)       │  ImageComparator (pixels)    │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │  Store (SQLite | memory)          EventSink (broadcast)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod comparator;
pub mod differ;
pub mod events;
pub mod playwright;
pub mod renderer;
pub mod snap;
pub mod suite;

pub use comparator::{CompareError, ImageComparator, PixelComparator};
pub use differ::{DiffSettings, Differ};
pub use events::{EventSink, SnapProgress, SuiteEvent};
pub use playwright::{PlaywrightConfig, PlaywrightRenderer};
pub use renderer::{BrowserId, ClipRegion, PageId, Renderer};
pub use snap::{partition, CaptureBucket, PlannedDialog, SnapSettings, Snapper};
pub use suite::SuiteController;

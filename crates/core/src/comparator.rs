//! Pixel comparison of captured screenshots

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Pixel, Rgba, RgbaImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode diff image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("comparison task failed: {0}")]
    Task(String),
}

pub type CompareResult<T> = std::result::Result<T, CompareError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareOptions {
    /// Largest per-channel difference still counted as equal
    pub tolerance: u8,
    /// Any difference at all counts
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    pub highlight_color: [u8; 3],
    pub tolerance: u8,
    pub strict: bool,
}

impl DiffOptions {
    fn compare_options(&self) -> CompareOptions {
        CompareOptions {
            tolerance: self.tolerance,
            strict: self.strict,
        }
    }
}

#[async_trait]
pub trait ImageComparator: Send + Sync {
    async fn compare(&self, a: &Path, b: &Path, options: CompareOptions) -> CompareResult<bool>;

    /// PNG visualising where `a` and `b` differ
    async fn create_diff(&self, a: &Path, b: &Path, options: DiffOptions) -> CompareResult<Vec<u8>>;
}

/// [`ImageComparator`] working on decoded RGBA pixels
#[derive(Debug, Default, Clone, Copy)]
pub struct PixelComparator;

impl PixelComparator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageComparator for PixelComparator {
    async fn compare(&self, a: &Path, b: &Path, options: CompareOptions) -> CompareResult<bool> {
        let a_bytes = tokio::fs::read(a).await?;
        let b_bytes = tokio::fs::read(b).await?;

        // Quick hash comparison
        if hash_bytes(&a_bytes) == hash_bytes(&b_bytes) {
            debug!("Screenshots match exactly (same hash)");
            return Ok(true);
        }

        let (a_path, b_path) = (a.to_path_buf(), b.to_path_buf());
        tokio::task::spawn_blocking(move || {
            let actual = decode(&a_path, &a_bytes)?;
            let baseline = decode(&b_path, &b_bytes)?;

            if actual.dimensions() != baseline.dimensions() {
                debug!(
                    "Screenshot dimensions differ: {:?} vs {:?}",
                    actual.dimensions(),
                    baseline.dimensions()
                );
                return Ok(false);
            }

            Ok(actual
                .pixels()
                .zip(baseline.pixels())
                .all(|(x, y)| !pixels_differ(x, y, options)))
        })
        .await
        .map_err(|e| CompareError::Task(e.to_string()))?
    }

    async fn create_diff(&self, a: &Path, b: &Path, options: DiffOptions) -> CompareResult<Vec<u8>> {
        let a_bytes = tokio::fs::read(a).await?;
        let b_bytes = tokio::fs::read(b).await?;

        let (a_path, b_path) = (a.to_path_buf(), b.to_path_buf());
        tokio::task::spawn_blocking(move || {
            let actual = decode(&a_path, &a_bytes)?;
            let baseline = decode(&b_path, &b_bytes)?;
            encode_png(render_diff(&actual, &baseline, options))
        })
        .await
        .map_err(|e| CompareError::Task(e.to_string()))?
    }
}

fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn decode(path: &Path, bytes: &[u8]) -> CompareResult<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|source| CompareError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

fn encode_png(img: RgbaImage) -> CompareResult<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(CompareError::Encode)?;
    Ok(buf)
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>, options: CompareOptions) -> bool {
    let tolerance = if options.strict { 0 } else { options.tolerance };

    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| x.abs_diff(*y) > tolerance)
}

/// Differing pixels in the highlight colour over a dimmed copy of `actual`.
/// Area covered by only one of the images counts as changed.
fn render_diff(actual: &RgbaImage, baseline: &RgbaImage, options: DiffOptions) -> RgbaImage {
    let width = actual.width().max(baseline.width());
    let height = actual.height().max(baseline.height());
    let [r, g, b] = options.highlight_color;
    let highlight = Rgba([r, g, b, 255]);

    let mut diff = RgbaImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let pixel = match (actual.get_pixel_checked(x, y), baseline.get_pixel_checked(x, y)) {
                (Some(a), Some(b)) if !pixels_differ(a, b, options.compare_options()) => {
                    let c = a.channels();
                    Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128])
                }
                _ => highlight,
            };
            diff.put_pixel(x, y, pixel);
        }
    }

    diff
}

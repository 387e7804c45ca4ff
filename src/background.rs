//! Blurred, aspect-preserving background frames.

use crate::error::{BotError, Result};
use crate::session::Orientation;
use image::DynamicImage;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Output size for a `width` x `height` source. The base dimension pins the
/// height for vertical videos and the width for horizontal ones.
pub fn target_dimensions(width: u32, height: u32, base: u32, orientation: Orientation) -> (u32, u32) {
    let scaled = |num: u32, den: u32| -> u32 {
        ((base as f64 * num as f64 / den as f64).round() as u32).max(1)
    };
    match orientation {
        Orientation::Vertical => (scaled(width, height), base),
        Orientation::Horizontal => (base, scaled(height, width)),
    }
}

pub fn prepare_blocking(
    source: &Path,
    dest_dir: &Path,
    base: u32,
    blur_sigma: f32,
    orientation: Orientation,
) -> Result<PreparedImage> {
    let img = image::open(source).map_err(|e| BotError::ImageDecode {
        path: source.to_path_buf(),
        source: e,
    })?;

    let (width, height) = target_dimensions(img.width(), img.height(), base, orientation);
    debug!(
        "Resizing {} from {}x{} to {}x{}",
        source.display(),
        img.width(),
        img.height(),
        width,
        height
    );
    let blurred = img
        .resize_exact(width, height, FilterType::Lanczos3)
        .blur(blur_sigma);

    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());
    let path = dest_dir.join(format!("blurred_{}", file_name));

    let is_jpeg = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false);
    // The JPEG encoder rejects alpha channels.
    let output = if is_jpeg {
        DynamicImage::ImageRgb8(blurred.to_rgb8())
    } else {
        blurred
    };
    output.save(&path).map_err(|e| BotError::Write {
        path: path.clone(),
        message: e.to_string(),
    })?;

    Ok(PreparedImage { path, width, height })
}

pub async fn prepare(
    source: &Path,
    dest_dir: &Path,
    base: u32,
    blur_sigma: f32,
    orientation: Orientation,
) -> Result<PreparedImage> {
    let source = source.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        prepare_blocking(&source, &dest_dir, base, blur_sigma, orientation)
    })
    .await
    .map_err(|e| BotError::Io(std::io::Error::other(e)))?
}

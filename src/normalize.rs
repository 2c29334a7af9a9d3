use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::domain::StageStatus;
use crate::error::IngestError;
use crate::fs_util;

pub const DEFAULT_LIMIT: usize = 10;
const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    Contain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 3]);

impl FromStr for Color {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        static HEX: OnceLock<Regex> = OnceLock::new();
        let normalized = value.trim().to_ascii_lowercase();
        let named = match normalized.as_str() {
            "white" => Some([255, 255, 255]),
            "black" => Some([0, 0, 0]),
            "gray" | "grey" => Some([128, 128, 128]),
            "red" => Some([255, 0, 0]),
            "green" => Some([0, 128, 0]),
            "blue" => Some([0, 0, 255]),
            _ => None,
        };
        if let Some(rgb) = named {
            return Ok(Self(rgb));
        }

        let hex = HEX.get_or_init(|| {
            Regex::new(r"^#([0-9a-f]{2})([0-9a-f]{2})([0-9a-f]{2})$").expect("valid color regex")
        });
        let captures = hex
            .captures(&normalized)
            .ok_or_else(|| IngestError::InvalidColor(value.to_string()))?;
        let mut rgb = [0u8; 3];
        for (slot, group) in rgb.iter_mut().zip(1..=3) {
            *slot = u8::from_str_radix(&captures[group], 16)
                .map_err(|_| IngestError::InvalidColor(value.to_string()))?;
        }
        Ok(Self(rgb))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub mode: String,
    pub width: u32,
    pub height: u32,
    pub background: Color,
    pub fit: FitMode,
    pub quality: u8,
    pub progressive: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            mode: "instagram_portrait".to_string(),
            width: 1080,
            height: 1350,
            background: Color([255, 255, 255]),
            fit: FitMode::Contain,
            quality: 85,
            progressive: true,
        }
    }
}

/// Largest size with the source aspect ratio that fits inside `bounds`.
///
/// One side always equals its bound; neither side drops below 1.
pub fn contain_dimensions(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = (u64::from(source.0.max(1)), u64::from(source.1.max(1)));
    let (bw, bh) = (u64::from(bounds.0), u64::from(bounds.1));
    let (w, h) = if sw * bh >= sh * bw {
        // width-limited
        (bw, (sh * bw + sw / 2) / sw)
    } else {
        ((sw * bh + sh / 2) / sh, bh)
    };
    let w = w.clamp(1, bw.max(1));
    let h = h.clamp(1, bh.max(1));
    (w as u32, h as u32)
}

pub fn fit_on_canvas(source: &RgbImage, profile: &Profile) -> RgbImage {
    let (width, height) = contain_dimensions(source.dimensions(), (profile.width, profile.height));
    let scaled = if source.dimensions() == (width, height) {
        source.clone()
    } else {
        imageops::resize(source, width, height, FilterType::Lanczos3)
    };
    let mut canvas = RgbImage::from_pixel(profile.width, profile.height, Rgb(profile.background.0));
    // contain_dimensions never returns 0, so a degenerate canvas can be narrower than the image.
    let x = profile.width.saturating_sub(width) / 2;
    let y = profile.height.saturating_sub(height) / 2;
    imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
    canvas
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOutcome {
    pub status: StageStatus,
    pub processed_count: usize,
    pub candidates: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ImageNormalizer {
    profile: Profile,
}

impl ImageNormalizer {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }

    // raw_dir is removed whatever the outcome.
    pub fn process(&self, raw_dir: &Path, processed_dir: &Path, limit: usize) -> NormalizeOutcome {
        let outcome = self.normalize(raw_dir, processed_dir, limit);
        if raw_dir.exists() {
            match fs::remove_dir_all(raw_dir) {
                Ok(()) => debug!(dir = %raw_dir.display(), "raw directory removed"),
                Err(err) => warn!(dir = %raw_dir.display(), error = %err, "failed to remove raw directory"),
            }
        }
        outcome
    }

    fn normalize(&self, raw_dir: &Path, processed_dir: &Path, limit: usize) -> NormalizeOutcome {
        let candidates = fs_util::find_exts(raw_dir, IMAGE_EXTS);
        if candidates.is_empty() {
            error!(dir = %raw_dir.display(), "no images found");
            return NormalizeOutcome {
                status: StageStatus::Failed,
                processed_count: 0,
                candidates: 0,
            };
        }
        if let Err(err) = fs::create_dir_all(processed_dir) {
            error!(dir = %processed_dir.display(), error = %err, "cannot create processed directory");
            return NormalizeOutcome {
                status: StageStatus::Failed,
                processed_count: 0,
                candidates: candidates.len(),
            };
        }
        if self.profile.progressive {
            debug!("progressive encoding requested, writing baseline JPEG");
        }

        let mut processed_count = 0;
        for source in candidates.iter().take(limit) {
            match self.normalize_one(source, processed_dir) {
                Ok(target) => {
                    debug!(source = %source.display(), target = %target.display(), "image normalized");
                    processed_count += 1;
                }
                Err(err) => warn!(source = %source.display(), error = %err, "skipping image"),
            }
        }

        let status = if processed_count > 0 {
            StageStatus::Processed
        } else {
            StageStatus::Failed
        };
        info!(processed = processed_count, found = candidates.len(), "normalization finished");
        NormalizeOutcome {
            status,
            processed_count,
            candidates: candidates.len(),
        }
    }

    fn normalize_one(&self, source: &Path, processed_dir: &Path) -> Result<PathBuf, IngestError> {
        let image = image::open(source)
            .map_err(|err| IngestError::Image(format!("{}: {err}", source.display())))?
            .to_rgb8();
        let canvas = fit_on_canvas(&image, &self.profile);

        let stem = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("image");
        let target = processed_dir.join(format!("{stem}_processed.jpg"));
        let file = File::create(&target)
            .map_err(|err| IngestError::Filesystem(format!("create {}: {err}", target.display())))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.profile.quality.clamp(1, 100))
            .encode_image(&canvas)
            .map_err(|err| IngestError::Image(format!("encode {}: {err}", target.display())))?;
        writer
            .flush()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(target)
    }
}

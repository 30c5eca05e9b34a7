//! Screenshot capture: offscreen rendering seam, random view rotations and
//! image encoding.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::gpu::ContextGuard;
use crate::render::RenderFrame;

/// Bounds of the random rotation angle, in degrees.
pub const ROTATION_RANGE: f32 = 360.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

/// A batch of screenshots taken from random viewpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotRequest {
    pub count: usize,
    /// Encoder quality, 1 to 100. Only JPEG uses it.
    pub quality: u8,
    pub format: ImageFormat,
    pub directory: PathBuf,
}

impl Default for ScreenshotRequest {
    fn default() -> Self {
        Self {
            count: 1,
            quality: 100,
            format: ImageFormat::Jpeg,
            directory: PathBuf::from("screenshots"),
        }
    }
}

/// Something that can render a frame away from the window and read it back.
pub trait OffscreenTarget {
    fn size(&self) -> (u32, u32);

    fn render_to_image(&mut self, ctx: &ContextGuard<'_>, frame: &RenderFrame) -> Result<RgbaImage>;
}

/// Receives progress of a screenshot batch.
pub trait ProgressSink {
    fn report(&mut self, completed: usize, total: usize, path: &Path);
}

impl<F: FnMut(usize, usize, &Path)> ProgressSink for F {
    fn report(&mut self, completed: usize, total: usize, path: &Path) {
        self(completed, total, path)
    }
}

/// Progress reported through the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, completed: usize, total: usize, path: &Path) {
        info!("screenshot {completed}/{total}: {}", path.display());
    }
}

/// Draws a rotation of up to a full turn either way about a random 0/1 axis.
///
/// An all-zero axis yields the identity.
pub fn random_rotation<R: Rng + ?Sized>(rng: &mut R) -> Mat4 {
    let degrees = rng.random_range(-ROTATION_RANGE..=ROTATION_RANGE);
    let axis = Vec3::new(
        rng.random_range(0..=1u8) as f32,
        rng.random_range(0..=1u8) as f32,
        rng.random_range(0..=1u8) as f32,
    );
    info!(
        "random rotation: {degrees:.2} degrees about ({}, {}, {})",
        axis.x, axis.y, axis.z
    );
    match axis.try_normalize() {
        Some(axis) => Mat4::from_axis_angle(axis, degrees.to_radians()),
        None => Mat4::IDENTITY,
    }
}

/// Timestamped file name inside `directory`.
pub fn screenshot_path(directory: &Path, format: ImageFormat, index: usize) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    directory.join(format!("{stamp}-{index}.{}", format.extension()))
}

/// Scales both dimensions by `factor` with smooth filtering.
pub fn upscale(image: &RgbaImage, factor: u32) -> RgbaImage {
    image::imageops::resize(
        image,
        image.width() * factor,
        image.height() * factor,
        FilterType::Triangle,
    )
}

pub fn encode_image<W: Write>(
    image: &RgbaImage,
    format: ImageFormat,
    quality: u8,
    writer: W,
) -> Result<()> {
    match format {
        ImageFormat::Png => PngEncoder::new(writer)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )
            .context("failed to encode PNG")?,
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(writer, quality.clamp(1, 100))
                .write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    ExtendedColorType::Rgb8,
                )
                .context("failed to encode JPEG")?
        }
    }
    Ok(())
}

/// Encodes `image` into `path`, creating the parent directory when needed.
pub fn save_image(image: &RgbaImage, path: &Path, format: ImageFormat, quality: u8) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    encode_image(image, format, quality, &mut writer)?;
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("screenshot saved: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn checker() -> RgbaImage {
        RgbaImage::from_fn(4, 2, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([0, 255, 0, 255])
            }
        })
    }

    #[test]
    fn random_rotations_are_rigid() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let rotation = random_rotation(&mut rng);
            let moved = rotation.transform_vector3(Vec3::new(0.3, -0.4, 1.2));
            assert!((moved.length() - Vec3::new(0.3, -0.4, 1.2).length()).abs() < 1e-4);
            assert!((rotation.determinant() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn upscale_doubles_dimensions() {
        let big = upscale(&checker(), 2);
        assert_eq!(big.dimensions(), (8, 4));
    }

    #[test]
    fn png_round_trips_pixels() {
        let mut bytes = Vec::new();
        encode_image(&checker(), ImageFormat::Png, 100, &mut bytes).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded, checker());
    }

    #[test]
    fn jpeg_is_written_to_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = screenshot_path(&dir.path().join("shots"), ImageFormat::Jpeg, 3);
        assert!(path.to_string_lossy().ends_with("-3.jpg"));
        save_image(&checker(), &path, ImageFormat::Jpeg, 100).unwrap();
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 2));
    }

    #[test]
    fn format_names_parse_from_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: ImageFormat,
        }
        let parsed: Wrapper = toml::from_str("format = \"png\"").unwrap();
        assert_eq!(parsed.format, ImageFormat::Png);
    }
}

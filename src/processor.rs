//! Photo processing pipeline: crop, color space, resize, enhance.
//!
//! Palette reduction and dithering are left to the display driver, which
//! knows the panel's six inks. This module only prepares a clean sRGB image
//! at the panel's native resolution.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageError, ImageFormat, Rgb, RgbImage};
use thiserror::Error;

use crate::config::{PortraitBias, ProcessingConfig};
use crate::constants::PORTRAIT_RATIO;
use crate::loader::{LoadedImage, load_image};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to decode {path}: {source}")]
    Decode { path: PathBuf, source: ImageError },

    #[error("{path} has no pixels")]
    Empty { path: PathBuf },

    #[error("failed to save {path}: {source}")]
    Save { path: PathBuf, source: ImageError },
}

/// 3x3 smoothing kernel, normalized by `filter3x3`.
const SMOOTH: [f32; 9] = [1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0];

#[derive(Debug, Clone)]
pub struct PhotoProcessor {
    width: u32,
    height: u32,
    saturation: f32,
    contrast: f32,
    sharpness: f32,
    portrait_bias: PortraitBias,
}

impl PhotoProcessor {
    pub fn new(width: u32, height: u32, config: &ProcessingConfig) -> Self {
        Self {
            width,
            height,
            saturation: config.saturation,
            contrast: config.contrast,
            sharpness: config.sharpness,
            portrait_bias: config.portrait_bias,
        }
    }

    /// Runs the full pipeline. The result always has the target size.
    pub fn process(&self, loaded: LoadedImage) -> RgbImage {
        // Step 1: Crop to the panel's aspect ratio
        let cropped = crop_to_aspect(&loaded.image, self.width, self.height, self.portrait_bias);

        // Step 2: Bring wide-gamut photos (iPhone Display P3) into sRGB
        let srgb = normalize_color(cropped, loaded.icc_profile.as_deref());

        // Step 3: Resize with high-quality resampling
        log::debug!("Resizing {}x{} to {}x{}", srgb.width(), srgb.height(), self.width, self.height);
        let resized = imageops::resize(&srgb, self.width, self.height, FilterType::Lanczos3);

        // Step 4: E-paper has less punch than an LCD, boost before the driver quantizes
        enhance(&resized, self.saturation, self.contrast, self.sharpness)
    }

    pub fn process_file(&self, path: &Path) -> Result<RgbImage, ProcessError> {
        let loaded = load_image(path)?;
        if loaded.image.width() == 0 || loaded.image.height() == 0 {
            return Err(ProcessError::Empty { path: path.to_path_buf() });
        }
        Ok(self.process(loaded))
    }

    /// Processes `input` and writes the result as PNG, for checking the
    /// pipeline without a panel.
    pub fn process_and_save(&self, input: &Path, output: &Path) -> Result<(), ProcessError> {
        let image = self.process_file(input)?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ProcessError::Save {
                path: output.to_path_buf(),
                source: ImageError::IoError(e),
            })?;
        }
        image
            .save_with_format(output, ImageFormat::Png)
            .map_err(|source| ProcessError::Save { path: output.to_path_buf(), source })?;
        log::info!("Saved processed image to {}", output.display());
        Ok(())
    }
}

/// Crops `image` to `target_w:target_h`.
///
/// Wider images lose their sides evenly. Taller images lose the bottom when
/// they are portraits and `bias` is `Top` (faces sit near the top), and are
/// cropped around the center otherwise.
pub fn crop_to_aspect(image: &DynamicImage, target_w: u32, target_h: u32, bias: PortraitBias) -> DynamicImage {
    let (w, h) = image.dimensions();
    let (tw, th) = (target_w as u64, target_h as u64);
    // Compare w/h against tw/th without floating point
    let source_side = w as u64 * th;
    let target_side = h as u64 * tw;

    if source_side > target_side {
        let new_w = ((h as u64 * tw + th / 2) / th).clamp(1, w as u64) as u32;
        let left = (w - new_w) / 2;
        image.crop_imm(left, 0, new_w, h)
    } else if source_side < target_side {
        let new_h = ((w as u64 * th + tw / 2) / tw).clamp(1, h as u64) as u32;
        let portrait = (w as f32 / h as f32) < PORTRAIT_RATIO;
        let top = match bias {
            PortraitBias::Top if portrait => 0,
            _ => (h - new_h) / 2,
        };
        image.crop_imm(0, top, w, new_h)
    } else {
        image.clone()
    }
}

/// Converts pixels from the embedded ICC profile to sRGB. Images without a
/// profile are assumed to be sRGB already.
pub fn normalize_color(image: DynamicImage, icc_profile: Option<&[u8]>) -> RgbImage {
    let mut rgb = image.into_rgb8();
    let Some(icc) = icc_profile else {
        return rgb;
    };

    match srgb_transform(icc) {
        Some(transform) => {
            let pixels: &mut [u8] = &mut rgb;
            transform.apply(pixels);
            log::debug!("Converted embedded color profile to sRGB");
        }
        None => log::debug!("Unsupported color profile ({} bytes), using pixels as-is", icc.len()),
    }
    rgb
}

fn srgb_transform(icc: &[u8]) -> Option<qcms::Transform> {
    let input = qcms::Profile::new_from_slice(icc, false)?;
    let mut output = qcms::Profile::new_sRGB();
    output.precache_output_transform();
    qcms::Transform::new(&input, &output, qcms::DataType::RGB8, qcms::Intent::Perceptual)
}

/// Applies saturation, contrast and sharpness factors. A factor of 1.0 leaves
/// the image unchanged, 0.0 gives the fully degenerate image (gray, flat,
/// blurred respectively).
pub fn enhance(image: &RgbImage, saturation: f32, contrast: f32, sharpness: f32) -> RgbImage {
    let mut out = image.clone();

    if saturation != 1.0 {
        let gray = RgbImage::from_fn(out.width(), out.height(), |x, y| {
            let l = luma(out.get_pixel(x, y)).round() as u8;
            Rgb([l, l, l])
        });
        out = blend(&gray, &out, saturation);
    }

    if contrast != 1.0 {
        let mean = mean_luma(&out).round() as u8;
        let flat = RgbImage::from_pixel(out.width(), out.height(), Rgb([mean, mean, mean]));
        out = blend(&flat, &out, contrast);
    }

    if sharpness != 1.0 {
        let mut smooth: RgbImage = imageops::filter3x3(&out, &SMOOTH);
        // filter3x3 leaves the one pixel border black; keep the original there
        let (w, h) = out.dimensions();
        for (x, y, p) in smooth.enumerate_pixels_mut() {
            if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                *p = *out.get_pixel(x, y);
            }
        }
        out = blend(&smooth, &out, sharpness);
    }

    out
}

/// `base + factor * (image - base)` per channel, clamped.
fn blend(base: &RgbImage, image: &RgbImage, factor: f32) -> RgbImage {
    let mut out = image.clone();
    for (o, (b, i)) in out.pixels_mut().zip(base.pixels().zip(image.pixels())) {
        for c in 0..3 {
            let v = b.0[c] as f32 + factor * (i.0[c] as f32 - b.0[c] as f32);
            o.0[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

// ITU-R 601-2 luma
fn luma(p: &Rgb<u8>) -> f32 {
    let [r, g, b] = p.0;
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

fn mean_luma(image: &RgbImage) -> f32 {
    let count = (image.width() as u64 * image.height() as u64).max(1);
    let sum: f64 = image.pixels().map(|p| luma(p) as f64).sum();
    (sum / count as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(color)))
    }

    fn processor() -> PhotoProcessor {
        PhotoProcessor::new(160, 120, &ProcessingConfig::default())
    }

    fn assert_aspect(cropped: &DynamicImage, tw: u32, th: u32) {
        let (cw, ch) = cropped.dimensions();
        let error = (cw as i64 * th as i64 - ch as i64 * tw as i64).abs();
        // One pixel of rounding in either dimension
        assert!(
            error <= tw.max(th) as i64,
            "{}x{} is not {}:{} (error {})",
            cw, ch, tw, th, error
        );
    }

    #[test]
    fn test_crop_yields_display_aspect_for_any_orientation() {
        let sizes = [(4032, 3024), (3024, 4032), (1000, 1000), (1920, 1080), (1080, 1920), (7, 3), (3, 7), (1600, 1200)];
        for (w, h) in sizes {
            for bias in [PortraitBias::Top, PortraitBias::Center] {
                let cropped = crop_to_aspect(&solid(w, h, [0, 0, 0]), 1600, 1200, bias);
                assert_aspect(&cropped, 1600, 1200);
                assert!(cropped.width() <= w && cropped.height() <= h);
            }
        }
    }

    #[test]
    fn test_crop_keeps_top_of_portraits() {
        let mut img = RgbImage::from_pixel(300, 800, Rgb([0, 0, 0]));
        for x in 0..300 {
            img.put_pixel(x, 0, Rgb([255, 0, 0]));
        }
        let img = DynamicImage::ImageRgb8(img);

        let top = crop_to_aspect(&img, 4, 3, PortraitBias::Top).to_rgb8();
        assert_eq!(top.dimensions(), (300, 225));
        assert_eq!(top.get_pixel(150, 0), &Rgb([255, 0, 0]));

        let center = crop_to_aspect(&img, 4, 3, PortraitBias::Center).to_rgb8();
        assert_eq!(center.get_pixel(150, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_crop_centers_slightly_tall_images() {
        // 1:1 is taller than 4:3 but not a portrait, so it stays centered
        let mut img = RgbImage::from_pixel(400, 400, Rgb([0, 0, 0]));
        img.put_pixel(200, 0, Rgb([255, 255, 255]));
        let cropped = crop_to_aspect(&DynamicImage::ImageRgb8(img), 4, 3, PortraitBias::Top).to_rgb8();
        assert_eq!(cropped.dimensions(), (400, 300));
        assert!(cropped.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_crop_centers_landscape() {
        let mut img = RgbImage::from_pixel(1000, 300, Rgb([0, 0, 0]));
        img.put_pixel(500, 150, Rgb([9, 9, 9]));
        let cropped = crop_to_aspect(&DynamicImage::ImageRgb8(img), 4, 3, PortraitBias::Top).to_rgb8();
        assert_eq!(cropped.dimensions(), (400, 300));
        assert_eq!(cropped.get_pixel(200, 150), &Rgb([9, 9, 9]));
    }

    #[test]
    fn test_process_outputs_native_resolution() {
        let p = processor();
        for (w, h) in [(640, 480), (480, 640), (50, 50), (3000, 200)] {
            let out = p.process(LoadedImage { image: solid(w, h, [120, 60, 30]), icc_profile: None });
            assert_eq!(out.dimensions(), (160, 120));
        }
    }

    #[test]
    fn test_unit_factors_leave_image_unchanged() {
        let mut img = RgbImage::new(6, 4);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 40) as u8, (y * 60) as u8, 100]);
        }
        assert_eq!(enhance(&img, 1.0, 1.0, 1.0), img);
    }

    #[test]
    fn test_saturation_boost_spreads_channels() {
        let img = RgbImage::from_pixel(2, 2, Rgb([150, 100, 100]));
        let boosted = enhance(&img, 1.5, 1.0, 1.0);
        let [r, g, b] = boosted.get_pixel(0, 0).0;
        assert!(r > 150);
        assert!(g < 100 && b < 100);

        let gray = RgbImage::from_pixel(2, 2, Rgb([90, 90, 90]));
        assert_eq!(enhance(&gray, 2.0, 1.0, 1.0), gray);
    }

    #[test]
    fn test_zero_saturation_is_grayscale() {
        let img = RgbImage::from_pixel(1, 1, Rgb([200, 40, 10]));
        let [r, g, b] = enhance(&img, 0.0, 1.0, 1.0).get_pixel(0, 0).0;
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn test_contrast_moves_away_from_mean() {
        let mut img = RgbImage::from_pixel(2, 1, Rgb([100, 100, 100]));
        img.put_pixel(1, 0, Rgb([200, 200, 200]));
        let out = enhance(&img, 1.0, 1.2, 1.0);
        assert!(out.get_pixel(0, 0).0[0] < 100);
        assert!(out.get_pixel(1, 0).0[0] > 200);
    }

    #[test]
    fn test_sharpness_keeps_flat_areas_and_borders() {
        let flat = RgbImage::from_pixel(5, 5, Rgb([70, 140, 210]));
        assert_eq!(enhance(&flat, 1.0, 1.0, 1.2), flat);
    }

    #[test]
    fn test_garbage_profile_is_ignored() {
        let img = solid(3, 3, [10, 200, 30]);
        let out = normalize_color(img, Some(b"not an icc profile"));
        assert_eq!(out.get_pixel(1, 1), &Rgb([10, 200, 30]));
    }

    #[test]
    fn test_process_and_save_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out").join("frame.png");
        RgbImage::from_pixel(300, 500, Rgb([5, 80, 200])).save(&input).unwrap();

        processor().process_and_save(&input, &output).unwrap();
        let saved = image::open(&output).unwrap();
        assert_eq!(saved.dimensions(), (160, 120));
    }
}

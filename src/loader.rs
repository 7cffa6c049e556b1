use std::fs;
use std::io::Cursor;
use std::path::Path;

use exif::{In, Reader, Tag, Value};
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb, RgbImage};

use crate::processor::ProcessError;

/// A decoded photo, upright, with its embedded color profile if any.
pub struct LoadedImage {
    pub image: DynamicImage,
    pub icc_profile: Option<Vec<u8>>,
}

// --- Load Image, Apply EXIF Rotation ---
pub fn load_image(image_path: &Path) -> Result<LoadedImage, ProcessError> {
    let file_bytes = fs::read(image_path).map_err(|source| ProcessError::Read {
        path: image_path.to_path_buf(),
        source,
    })?;

    #[cfg(feature = "heif")]
    if crate::constants::is_heif(image_path) {
        return load_heif(image_path, &file_bytes);
    }

    let orientation = read_orientation(image_path, &file_bytes);

    let decode_err = |source| ProcessError::Decode { path: image_path.to_path_buf(), source };
    let mut decoder = ImageReader::new(Cursor::new(&file_bytes))
        .with_guessed_format()
        .map_err(|source| ProcessError::Read { path: image_path.to_path_buf(), source })?
        .into_decoder()
        .map_err(decode_err)?;

    // Not every format can carry a profile; missing is fine
    let icc_profile = decoder.icc_profile().ok().flatten();
    let image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;

    log::debug!(
        "Loaded {} ({}x{}, orientation {}, icc {})",
        image_path.display(),
        image.width(),
        image.height(),
        orientation,
        if icc_profile.is_some() { "yes" } else { "no" },
    );

    let image = flatten_alpha(apply_orientation(image, orientation));
    Ok(LoadedImage { image, icc_profile })
}

// --- HEIF (iPhone photos) ---
#[cfg(feature = "heif")]
fn load_heif(image_path: &Path, file_bytes: &[u8]) -> Result<LoadedImage, ProcessError> {
    use image::ImageError;
    use image::error::{DecodingError, ImageFormatHint};
    use libheif_rs::{ColorSpace, HeifContext, HeifError, LibHeif, RgbChroma};

    let heif_err = |e: HeifError| ProcessError::Decode {
        path: image_path.to_path_buf(),
        source: ImageError::Decoding(DecodingError::new(ImageFormatHint::Name("HEIF".to_string()), e.to_string())),
    };
    let empty = || ProcessError::Empty { path: image_path.to_path_buf() };

    let lib_heif = LibHeif::new();
    let context = HeifContext::read_from_bytes(file_bytes).map_err(heif_err)?;
    let handle = context.primary_image_handle().map_err(heif_err)?;
    // libheif applies the container's rotation and mirroring itself, EXIF is not consulted
    let decoded = lib_heif.decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None).map_err(heif_err)?;

    let plane = decoded.planes().interleaved.ok_or_else(empty)?;
    let row = plane.width as usize * 3;
    let mut pixels = Vec::with_capacity(row * plane.height as usize);
    for y in 0..plane.height as usize {
        let start = y * plane.stride;
        pixels.extend_from_slice(plane.data.get(start..start + row).ok_or_else(empty)?);
    }
    let image = RgbImage::from_raw(plane.width, plane.height, pixels).ok_or_else(empty)?;
    let icc_profile = handle.color_profile_raw().map(|profile| profile.data);

    log::debug!("Loaded HEIF {} ({}x{})", image_path.display(), image.width(), image.height());
    Ok(LoadedImage { image: DynamicImage::ImageRgb8(image), icc_profile })
}

/// EXIF orientation tag (1 when absent or unreadable).
fn read_orientation(image_path: &Path, file_bytes: &[u8]) -> u16 {
    match Reader::new().read_from_container(&mut Cursor::new(file_bytes)) {
        Ok(exif) => {
            if let Some(field) = exif.get_field(Tag::Orientation, In::PRIMARY) {
                if let Value::Short(values) = &field.value {
                    if let Some(&orientation) = values.first() {
                        return orientation;
                    }
                }
            }
            1
        }
        Err(e) => {
            // Most PNGs and screenshots have no EXIF at all
            log::debug!("No EXIF orientation for {}: {}", image_path.display(), e);
            1
        }
    }
}

// 1 = Top-left (Normal)
// 2 = Mirrored horizontally
// 3 = Bottom-right (180 deg)
// 4 = Mirrored vertically
// 5 = Transposed (mirror + 90 deg clockwise)
// 6 = Top-right (90 deg clockwise)
// 7 = Transversed (mirror + 270 deg clockwise)
// 8 = Bottom-left (270 deg clockwise / 90 deg counter-clockwise)
pub fn apply_orientation(image: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Composites transparent pixels over white; opaque images pass through.
pub fn flatten_alpha(image: DynamicImage) -> DynamicImage {
    if !image.color().has_alpha() {
        return image;
    }

    let rgba = image.to_rgba8();
    let flattened = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u16;
        let over_white = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([over_white(r), over_white(g), over_white(b)])
    });
    DynamicImage::ImageRgb8(flattened)
}

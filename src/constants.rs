pub const DISPLAY_WIDTH: u32 = 1600;            // Native width of the Inky Impression 13.3"
pub const DISPLAY_HEIGHT: u32 = 1200;           // Native height
pub const REFRESH_INTERVAL: u64 = 3600;         // Seconds between photos
pub const FULL_REFRESH_EVERY: u64 = 10;         // Photos between ghost-clearing refreshes
pub const DISPLAY_SATURATION: f32 = 0.5;        // Driver palette blend (0.0 muted .. 1.0 saturated)

pub const RETRY_ATTEMPTS: u32 = 3;              // Tries per hardware operation
pub const RETRY_BASE_DELAY: f64 = 1.0;          // Seconds, doubled after each failure
pub const MAX_REFRESH_INTERVAL: u64 = 31_536_000; // One year
pub const MAX_RETRY_BASE_DELAY: f64 = 3600.0;   // One hour

pub const PROCESS_SATURATION: f32 = 1.3;        // Pre-driver saturation boost
pub const PROCESS_CONTRAST: f32 = 1.2;          // Pre-driver contrast boost
pub const PROCESS_SHARPNESS: f32 = 1.2;         // Compensates for upscaling softness
pub const PORTRAIT_RATIO: f32 = 0.8;            // Below this width/height a photo counts as portrait

pub const WAIT_POLL_INTERVAL_MS: u64 = 500;     // Stop-flag polling granularity while sleeping

pub const APP_DIR: &str = "inky-photo-frame";
pub const CONFIG_FILE: &str = "config.toml";

pub const SUPPORTED_EXTENSIONS: [&str; 8] = [
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff",
];
pub const HEIF_EXTENSIONS: [&str; 2] = ["heic", "heif"]; // Decoded only with the `heif` feature

fn has_extension(path: &std::path::Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| extensions.iter().any(|s| s.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Returns true when `path` has one of the [`SUPPORTED_EXTENSIONS`] (any case),
/// or a [`HEIF_EXTENSIONS`] one when HEIF decoding is compiled in.
pub fn is_supported_image(path: &std::path::Path) -> bool {
    has_extension(path, &SUPPORTED_EXTENSIONS) || (cfg!(feature = "heif") && is_heif(path))
}

pub fn is_heif(path: &std::path::Path) -> bool {
    has_extension(path, &HEIF_EXTENSIONS)
}

use std::fs;
use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::{ImageError, ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display driver `{program}` is unavailable: {message}")]
    Unavailable { program: String, message: String },

    #[error("display {op} failed: {message}")]
    Driver { op: &'static str, message: String },

    #[error("display {op} I/O error: {source}")]
    Io { op: &'static str, source: std::io::Error },

    #[error("display {op} was killed by a signal")]
    Killed { op: &'static str },

    #[error("image is {actual:?}, display expects {expected:?}")]
    ResolutionMismatch { expected: (u32, u32), actual: (u32, u32) },

    #[error("failed to encode frame: {0}")]
    Encode(#[from] ImageError),

    #[error("no image has been set")]
    NoImage,
}

impl DisplayError {
    /// Errors worth retrying: the hardware or its driver hiccuped. Setup and
    /// input problems fail the same way every time, and a driver killed by a
    /// signal means someone is shutting us down.
    pub fn is_transient(&self) -> bool {
        matches!(self, DisplayError::Driver { .. } | DisplayError::Io { .. })
    }
}

/// How the panel redraws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshMode {
    /// Ghost-clearing cycle, the panel flashes through its colors first
    #[default]
    Full,
    Normal,
}

impl RefreshMode {
    pub fn name(&self) -> &'static str {
        match self {
            RefreshMode::Full => "full",
            RefreshMode::Normal => "normal",
        }
    }
}

/// The hardware (or something standing in for it). Palette mapping and
/// dithering happen behind this trait.
pub trait DisplayDriver {
    fn name(&self) -> &str;

    /// Native panel resolution.
    fn resolution(&mut self) -> Result<(u32, u32), DisplayError>;

    /// Stages a frame. Nothing reaches the panel until [`DisplayDriver::show`].
    fn set_image(&mut self, image: &RgbImage, saturation: f32) -> Result<(), DisplayError>;

    /// Pushes the staged frame to the panel and blocks until the refresh ends.
    fn show(&mut self, mode: RefreshMode) -> Result<(), DisplayError>;
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

// --- External driver program ---

/// Runs a vendor driver program per operation:
///
/// * `<command> info` prints `WIDTHxHEIGHT`
/// * `<command> show --saturation S [--full-refresh]` reads a PNG on stdin
pub struct CommandDriver {
    program: String,
    args: Vec<String>,
    staged: Option<(Vec<u8>, f32)>,
}

impl CommandDriver {
    /// `command` may carry leading arguments, e.g. `python3 /opt/inky/show.py`.
    pub fn new(command: &str) -> Result<Self, DisplayError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| DisplayError::Unavailable {
            program: String::new(),
            message: "empty driver command".to_string(),
        })?;
        Ok(Self { program, args: parts.collect(), staged: None })
    }

    fn command(&self, op: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(op);
        // Own process group: a terminal Ctrl+C must not kill the panel mid-refresh
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
        cmd
    }

    fn spawn_error(&self, op: &'static str, e: std::io::Error) -> DisplayError {
        if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) {
            DisplayError::Unavailable { program: self.program.clone(), message: e.to_string() }
        } else {
            DisplayError::Io { op, source: e }
        }
    }
}

impl DisplayDriver for CommandDriver {
    fn name(&self) -> &str {
        &self.program
    }

    fn resolution(&mut self) -> Result<(u32, u32), DisplayError> {
        let output = self.command("info").stdin(Stdio::null()).output().map_err(|e| self.spawn_error("info", e))?;
        if !output.status.success() {
            return Err(exit_error("info", output.status.code(), &output.stderr));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_resolution(&stdout).ok_or_else(|| DisplayError::Driver {
            op: "info",
            message: format!("unexpected output {:?}", stdout.trim()),
        })
    }

    fn set_image(&mut self, image: &RgbImage, saturation: f32) -> Result<(), DisplayError> {
        self.staged = Some((encode_png(image)?, saturation));
        Ok(())
    }

    fn show(&mut self, mode: RefreshMode) -> Result<(), DisplayError> {
        let Some((png, saturation)) = self.staged.as_ref() else {
            return Err(DisplayError::NoImage);
        };

        let mut cmd = self.command("show");
        cmd.args(["--saturation", &format!("{:.2}", saturation)]);
        if mode == RefreshMode::Full {
            cmd.arg("--full-refresh");
        }

        let mut process = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error("show", e))?;

        // Dropping stdin closes the pipe so the driver sees EOF
        if let Some(mut stdin) = process.stdin.take() {
            if let Err(source) = stdin.write_all(png) {
                drop(stdin);
                // Reap the driver so failed retries leave no zombies behind
                let _ = process.kill();
                let _ = process.wait();
                return Err(DisplayError::Io { op: "show", source });
            }
        }

        let output = process.wait_with_output().map_err(|source| DisplayError::Io { op: "show", source })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(exit_error("show", output.status.code(), &output.stderr))
        }
    }
}

/// Maps a failed driver run to an error. No exit code means a signal ended it.
fn exit_error(op: &'static str, code: Option<i32>, stderr: &[u8]) -> DisplayError {
    let stderr = String::from_utf8_lossy(stderr);
    match code {
        Some(code) => DisplayError::Driver { op, message: format!("exited with status {}: {}", code, stderr.trim()) },
        None => DisplayError::Killed { op },
    }
}

/// Parses `1600x1200`.
pub fn parse_resolution(text: &str) -> Option<(u32, u32)> {
    let (w, h) = text.trim().split_once(['x', 'X'])?;
    let (w, h) = (w.trim().parse().ok()?, h.trim().parse().ok()?);
    (w > 0 && h > 0).then_some((w, h))
}

// --- Preview file ---

/// Writes each shown frame to a PNG file instead of a panel.
pub struct PreviewDriver {
    path: PathBuf,
    width: u32,
    height: u32,
    staged: Option<RgbImage>,
}

impl PreviewDriver {
    pub fn new(path: &Path, width: u32, height: u32) -> Self {
        Self { path: path.to_path_buf(), width, height, staged: None }
    }
}

impl DisplayDriver for PreviewDriver {
    fn name(&self) -> &str {
        "preview"
    }

    fn resolution(&mut self) -> Result<(u32, u32), DisplayError> {
        Ok((self.width, self.height))
    }

    fn set_image(&mut self, image: &RgbImage, _saturation: f32) -> Result<(), DisplayError> {
        self.staged = Some(image.clone());
        Ok(())
    }

    fn show(&mut self, mode: RefreshMode) -> Result<(), DisplayError> {
        let image = self.staged.as_ref().ok_or(DisplayError::NoImage)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| DisplayError::Io { op: "show", source })?;
        }

        // Write then rename so viewers never catch a half-written file
        let partial = self.path.with_extension("part");
        fs::write(&partial, encode_png(image)?).map_err(|source| DisplayError::Io { op: "show", source })?;
        fs::rename(&partial, &self.path).map_err(|source| DisplayError::Io { op: "show", source })?;

        log::info!("Preview ({} refresh) written to {}", mode.name(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};

    #[cfg(unix)]
    fn script_driver(script: &str) -> CommandDriver {
        // Built directly, the quoted script would not survive split_whitespace
        CommandDriver {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "driver".to_string()],
            staged: None,
        }
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("1600x1200\n"), Some((1600, 1200)));
        assert_eq!(parse_resolution(" 800 X 480 "), Some((800, 480)));
        assert_eq!(parse_resolution("0x480"), None);
        assert_eq!(parse_resolution("inky"), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(DisplayError::Driver { op: "show", message: "busy".into() }.is_transient());
        assert!(!DisplayError::ResolutionMismatch { expected: (1, 1), actual: (2, 2) }.is_transient());
        assert!(!DisplayError::Unavailable { program: "x".into(), message: "missing".into() }.is_transient());
        assert!(!DisplayError::NoImage.is_transient());
        assert!(!DisplayError::Killed { op: "show" }.is_transient());
        assert!(matches!(exit_error("show", None, b""), DisplayError::Killed { op: "show" }));
    }

    #[test]
    fn test_preview_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("preview.png");
        let mut driver = PreviewDriver::new(&path, 4, 3);

        assert!(matches!(driver.show(RefreshMode::Full), Err(DisplayError::NoImage)));

        driver.set_image(&RgbImage::from_pixel(4, 3, Rgb([9, 8, 7])), 0.5).unwrap();
        driver.show(RefreshMode::Normal).unwrap();

        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (4, 3));
        assert_eq!(written.get_pixel(0, 0), &Rgb([9, 8, 7]));
    }

    #[test]
    fn test_command_driver_missing_program_is_not_transient() {
        let mut driver = CommandDriver::new("inky-frame-no-such-driver --flag").unwrap();
        let err = driver.resolution().unwrap_err();
        assert!(matches!(err, DisplayError::Unavailable { .. }));
        assert!(!err.is_transient());
        assert!(CommandDriver::new("   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_driver_pipes_png() {
        let dir = tempfile::tempdir().unwrap();
        let received = dir.path().join("received.png");
        let script = format!(
            "case \"$1\" in info) echo 8x6 ;; show) cat > '{}'; [ \"$4\" = --full-refresh ] ;; esac",
            received.display()
        );
        let mut driver = script_driver(&script);

        assert_eq!(driver.resolution().unwrap(), (8, 6));
        driver.set_image(&RgbImage::new(8, 6), 0.5).unwrap();
        driver.show(RefreshMode::Full).unwrap();
        assert_eq!(image::open(&received).unwrap().dimensions(), (8, 6));

        // Without --full-refresh the script exits non-zero
        let err = driver.show(RefreshMode::Normal).unwrap_err();
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[test]
    fn test_killed_driver_is_not_retried() {
        let mut driver = script_driver("case \"$1\" in info) echo 8x6 ;; show) cat > /dev/null; kill -KILL $$ ;; esac");
        driver.set_image(&RgbImage::new(8, 6), 0.5).unwrap();
        let err = driver.show(RefreshMode::Full).unwrap_err();
        assert!(matches!(err, DisplayError::Killed { op: "show" }));
        assert!(!err.is_transient());
    }

    #[cfg(unix)]
    #[test]
    fn test_closed_stdin_is_io_error() {
        // Closes stdin without reading, the frame is too big for the pipe buffer
        let mut driver = script_driver("exec 0<&-; sleep 1");
        let mut seed: u32 = 1;
        let noise = RgbImage::from_fn(400, 400, |_, _| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let [r, g, b, _] = seed.to_le_bytes();
            Rgb([r, g, b])
        });
        driver.set_image(&noise, 0.5).unwrap();

        let err = driver.show(RefreshMode::Full).unwrap_err();
        assert!(matches!(err, DisplayError::Io { op: "show", .. }));
        assert!(err.is_transient());
    }
}

//! The e-paper panel: staging frames, refresh cadence and retries.

pub mod driver;
pub mod placeholder;
pub mod retry;

use std::path::Path;

use image::{Rgb, RgbImage};

use crate::config::{DisplayConfig, DriverKind};
use crate::constants::DISPLAY_SATURATION;

pub use driver::{CommandDriver, DisplayDriver, DisplayError, PreviewDriver, RefreshMode};
pub use retry::RetryPolicy;

/// Sole owner of the panel. Every frame goes through here.
pub struct Display {
    driver: Box<dyn DisplayDriver>,
    width: u32,
    height: u32,
    saturation: f32,
    full_refresh_every: u64,
    /// Frames shown since start, never reset
    shown: u64,
    retry: RetryPolicy,
}

impl Display {
    /// Opens the driver named in the config, or a preview file when
    /// `preview` is given.
    pub fn open(config: &DisplayConfig, preview: Option<&Path>) -> Result<Self, DisplayError> {
        let driver: Box<dyn DisplayDriver> = match (preview, config.driver) {
            (Some(path), _) => Box::new(PreviewDriver::new(path, config.width, config.height)),
            (None, DriverKind::Preview) => Box::new(PreviewDriver::new(&config.preview_path(), config.width, config.height)),
            (None, DriverKind::Command) => Box::new(CommandDriver::new(&config.driver_command)?),
        };
        let retry = RetryPolicy::new(config.retry_attempts, config.retry_base_delay());
        Self::new(driver, config, retry)
    }

    /// Initializes `driver` and reads the panel resolution from it.
    pub fn new(mut driver: Box<dyn DisplayDriver>, config: &DisplayConfig, retry: RetryPolicy) -> Result<Self, DisplayError> {
        let (width, height) = retry.run("init", || driver.resolution())?;
        if (width, height) != (config.width, config.height) {
            log::warn!(
                "Panel reports {}x{}, config says {}x{}; using the panel resolution",
                width,
                height,
                config.width,
                config.height
            );
        }
        log::info!("Display {} ready ({}x{})", driver.name(), width, height);

        let mut display = Self {
            driver,
            width,
            height,
            saturation: DISPLAY_SATURATION,
            full_refresh_every: config.full_refresh_every.max(1),
            shown: 0,
            retry,
        };
        display.set_saturation(config.saturation);
        Ok(display)
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn saturation(&self) -> f32 {
        self.saturation
    }

    /// Palette saturation handed to the driver, clamped to 0.0..=1.0.
    pub fn set_saturation(&mut self, saturation: f32) {
        self.saturation = saturation.clamp(0.0, 1.0);
    }

    pub fn shown_count(&self) -> u64 {
        self.shown
    }

    /// Refresh mode the next [`Display::show`] will use.
    pub fn next_refresh_mode(&self) -> RefreshMode {
        if self.shown % self.full_refresh_every == 0 {
            RefreshMode::Full
        } else {
            RefreshMode::Normal
        }
    }

    /// Stages `image`, which must already be at panel resolution.
    pub fn set_image(&mut self, image: &RgbImage) -> Result<(), DisplayError> {
        if image.dimensions() != (self.width, self.height) {
            return Err(DisplayError::ResolutionMismatch {
                expected: (self.width, self.height),
                actual: image.dimensions(),
            });
        }
        let saturation = self.saturation;
        let driver = &mut self.driver;
        self.retry.run("set_image", || driver.set_image(image, saturation))
    }

    /// Refreshes the panel with the staged image. Blocks for the whole
    /// refresh. The counter only advances when the refresh went through, so a
    /// due full refresh is not skipped by a failure.
    pub fn show(&mut self) -> Result<RefreshMode, DisplayError> {
        let mode = self.next_refresh_mode();
        self.show_with(mode)?;
        self.shown += 1;
        Ok(mode)
    }

    fn show_with(&mut self, mode: RefreshMode) -> Result<(), DisplayError> {
        log::debug!("Display refresh ({})", mode.name());
        let driver = &mut self.driver;
        self.retry.run("show", || driver.show(mode))
    }

    /// Stages and shows `image`.
    pub fn update(&mut self, image: &RgbImage) -> Result<RefreshMode, DisplayError> {
        self.set_image(image)?;
        self.show()
    }

    /// Stages and shows `image` with a full refresh regardless of the counter.
    pub fn update_full(&mut self, image: &RgbImage) -> Result<(), DisplayError> {
        self.set_image(image)?;
        self.show_with(RefreshMode::Full)?;
        self.shown += 1;
        Ok(())
    }

    /// Blanks the panel to white.
    pub fn clear(&mut self) -> Result<(), DisplayError> {
        let white = RgbImage::from_pixel(self.width, self.height, Rgb([255, 255, 255]));
        self.set_image(&white)?;
        self.show_with(RefreshMode::Full)
    }

    /// Shows the "No Photos Found" screen with `hint` below the title.
    pub fn show_placeholder(&mut self, hint: &str) -> Result<(), DisplayError> {
        let image = placeholder::render(self.width, self.height, hint);
        self.update_full(&image)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    /// Shared record of what reached the fake panel.
    #[derive(Default)]
    pub struct Panel {
        pub refreshes: Vec<RefreshMode>,
        pub last_image: Option<RgbImage>,
        pub show_calls: usize,
    }

    /// Driver that fails its first `failures` show calls and then behaves.
    pub struct FlakyDriver {
        pub panel: Rc<RefCell<Panel>>,
        pub failures: usize,
        pub size: (u32, u32),
        staged: Option<RgbImage>,
    }

    impl FlakyDriver {
        pub fn new(size: (u32, u32), failures: usize) -> (Self, Rc<RefCell<Panel>>) {
            let panel = Rc::new(RefCell::new(Panel::default()));
            (Self { panel: Rc::clone(&panel), failures, size, staged: None }, panel)
        }
    }

    impl DisplayDriver for FlakyDriver {
        fn name(&self) -> &str {
            "flaky"
        }

        fn resolution(&mut self) -> Result<(u32, u32), DisplayError> {
            Ok(self.size)
        }

        fn set_image(&mut self, image: &RgbImage, _saturation: f32) -> Result<(), DisplayError> {
            self.staged = Some(image.clone());
            Ok(())
        }

        fn show(&mut self, mode: RefreshMode) -> Result<(), DisplayError> {
            let mut panel = self.panel.borrow_mut();
            panel.show_calls += 1;
            if self.failures > 0 {
                self.failures -= 1;
                return Err(DisplayError::Driver { op: "show", message: "busy".to_string() });
            }
            panel.refreshes.push(mode);
            panel.last_image = self.staged.clone();
            Ok(())
        }
    }

    pub fn test_config(width: u32, height: u32, full_refresh_every: u64) -> DisplayConfig {
        DisplayConfig { width, height, full_refresh_every, ..DisplayConfig::default() }
    }

    pub fn no_delay() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    fn display(failures: usize, every: u64) -> (Display, Rc<RefCell<Panel>>) {
        let (driver, panel) = FlakyDriver::new((8, 6), failures);
        let display = Display::new(Box::new(driver), &test_config(8, 6, every), no_delay()).unwrap();
        (display, panel)
    }

    #[test]
    fn test_full_refresh_every_n() {
        let (mut display, panel) = display(0, 3);
        let frame = RgbImage::new(8, 6);
        let modes: Vec<RefreshMode> = (0..7).map(|_| display.update(&frame).unwrap()).collect();

        use RefreshMode::{Full, Normal};
        assert_eq!(modes, [Full, Normal, Normal, Full, Normal, Normal, Full]);
        assert_eq!(panel.borrow().refreshes, modes);
        assert_eq!(display.shown_count(), 7);
    }

    #[test]
    fn test_two_failures_then_success() {
        let (mut display, panel) = display(2, 10);
        let frame = RgbImage::from_pixel(8, 6, Rgb([1, 2, 3]));
        assert_eq!(display.update(&frame).unwrap(), RefreshMode::Full);
        assert_eq!(panel.borrow().show_calls, 3);
        assert_eq!(panel.borrow().last_image.as_ref(), Some(&frame));
    }

    #[test]
    fn test_retry_exhaustion_surfaces_and_keeps_full_due() {
        let (mut display, panel) = display(3, 10);
        let frame = RgbImage::new(8, 6);
        assert!(display.update(&frame).is_err());
        assert_eq!(display.shown_count(), 0);

        // The failed full refresh is still owed
        assert_eq!(display.update(&frame).unwrap(), RefreshMode::Full);
        assert_eq!(panel.borrow().show_calls, 4);
    }

    #[test]
    fn test_wrong_size_rejected_without_retry() {
        let (mut display, panel) = display(0, 10);
        let err = display.update(&RgbImage::new(4, 4)).unwrap_err();
        assert!(matches!(err, DisplayError::ResolutionMismatch { .. }));
        assert_eq!(panel.borrow().show_calls, 0);
    }

    #[test]
    fn test_saturation_clamped() {
        let mut config = test_config(8, 6, 10);
        config.saturation = 3.0;
        let (driver, _) = FlakyDriver::new((8, 6), 0);
        let configured = Display::new(Box::new(driver), &config, no_delay()).unwrap();
        assert_eq!(configured.saturation(), 1.0);

        let (mut display, _) = display(0, 10);
        display.set_saturation(1.7);
        assert_eq!(display.saturation(), 1.0);
        display.set_saturation(-0.2);
        assert_eq!(display.saturation(), 0.0);
    }

    #[test]
    fn test_placeholder_and_clear_use_full_refresh() {
        let (mut display, panel) = display(0, 10);
        display.update(&RgbImage::new(8, 6)).unwrap();
        display.show_placeholder("Add photos").unwrap();
        display.clear().unwrap();

        let refreshes = panel.borrow().refreshes.clone();
        assert_eq!(refreshes, [RefreshMode::Full, RefreshMode::Full, RefreshMode::Full]);
        let white = RgbImage::from_pixel(8, 6, Rgb([255, 255, 255]));
        assert_eq!(panel.borrow().last_image.as_ref(), Some(&white));
    }

    #[test]
    fn test_panel_resolution_wins_over_config() {
        let (driver, _) = FlakyDriver::new((16, 12), 0);
        let display = Display::new(Box::new(driver), &test_config(8, 6, 10), no_delay()).unwrap();
        assert_eq!(display.resolution(), (16, 12));
    }

    #[test]
    fn test_open_preview_driver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let mut config = test_config(8, 6, 10);
        config.retry_base_delay = 0.0;
        let mut display = Display::open(&config, Some(&path)).unwrap();
        display.update(&RgbImage::new(8, 6)).unwrap();
        assert!(path.is_file());
    }
}

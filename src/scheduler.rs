//! The frame's control loop: pick, fetch, process, show, wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;

use crate::constants::WAIT_POLL_INTERVAL_MS;
use crate::display::{Display, DisplayError, RefreshMode};
use crate::photo::PhotoKey;
use crate::processor::{PhotoProcessor, ProcessError};
use crate::selection::Selector;
use crate::source::{Catalog, SourceError};
use crate::state::FrameState;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Display(#[from] DisplayError),
}

/// What one pass of the loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Shown { key: PhotoKey, mode: RefreshMode },
    Placeholder,
    /// Index still empty and the placeholder is already up
    Idle,
}

pub struct Frame {
    catalog: Catalog,
    selector: Selector,
    processor: PhotoProcessor,
    display: Display,
    interval: Duration,
    state: FrameState,
    /// Shown under the placeholder title
    hint: String,
}

impl Frame {
    pub fn new(
        catalog: Catalog,
        selector: Selector,
        processor: PhotoProcessor,
        display: Display,
        interval: Duration,
        hint: String,
    ) -> Self {
        Self { catalog, selector, processor, display, interval, state: FrameState::Starting, hint }
    }

    #[cfg(test)]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[cfg(test)]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[cfg(test)]
    pub fn display(&self) -> &Display {
        &self.display
    }

    /// One pass of the loop. Errors leave the index untouched; the photo that
    /// failed stays in rotation.
    pub fn tick(&mut self) -> Result<TickOutcome, FrameError> {
        // Step 1: Pick up new and removed photos
        self.catalog.refresh();

        // Step 2: Nothing to show, put up the placeholder once
        if self.catalog.is_empty() {
            if self.state == FrameState::Placeholder {
                return Ok(TickOutcome::Idle);
            }
            log::warn!("No photos found, showing placeholder");
            self.display.show_placeholder(&self.hint)?;
            self.state = FrameState::Placeholder;
            return Ok(TickOutcome::Placeholder);
        }

        // Step 3: Select
        let Some(index) = self.selector.select(self.catalog.photos()) else {
            return Ok(TickOutcome::Idle);
        };
        let photo = &self.catalog.photos()[index];
        let key = photo.key();
        log::info!("Next photo: {} ({} of {})", photo.name, index + 1, self.catalog.len());

        // Step 4: Get a local file, downloading if needed
        let path = self.catalog.fetch(index)?;

        // Step 5: Process to panel resolution
        let started = Instant::now();
        let image = self.processor.process_file(&path)?;
        log::debug!("Processed {} in {:.1}s", path.display(), started.elapsed().as_secs_f32());

        // Step 6: Show, blocking for the whole refresh
        let started = Instant::now();
        let mode = self.display.update(&image)?;
        log::info!("Displayed {} ({} refresh, {:.0}s)", key, mode.name(), started.elapsed().as_secs_f32());

        self.catalog.mark_shown(&key, Utc::now());
        self.state = FrameState::ShowingPhotos;
        Ok(TickOutcome::Shown { key, mode })
    }

    /// Runs until `stop` is set, or for `limit` passes. A failed pass is
    /// logged and the loop moves on to the next interval. Returns the number
    /// of passes made.
    pub fn run(&mut self, stop: &AtomicBool, limit: Option<usize>) -> usize {
        log::info!(
            "Photo frame running: {} photos, {} selection, one every {}s",
            self.catalog.len(),
            self.selector.mode().name(),
            self.interval.as_secs()
        );

        let mut passes = 0;
        while !stop.load(Ordering::SeqCst) {
            if let Err(e) = self.tick() {
                log::error!("Skipping this cycle: {}", e);
            }
            passes += 1;

            if limit.is_some_and(|limit| passes >= limit) {
                break;
            }
            self.wait(stop);
        }

        log::info!(
            "Photo frame stopped after {} cycles, {} refreshes ({})",
            passes,
            self.display.shown_count(),
            self.state.name()
        );
        passes
    }

    /// Sleeps for the interval, waking early when `stop` is set. A refresh in
    /// progress is never interrupted since this only runs between passes.
    fn wait(&self, stop: &AtomicBool) {
        // An interval past what Instant can represent just waits for `stop`
        let deadline = Instant::now().checked_add(self.interval);
        let poll = Duration::from_millis(WAIT_POLL_INTERVAL_MS);
        while !stop.load(Ordering::SeqCst) {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => poll,
            };
            if remaining.is_zero() {
                break;
            }
            thread::sleep(poll.min(remaining));
        }
    }
}

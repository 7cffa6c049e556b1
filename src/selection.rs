//! Picks the next photo to show.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SelectionMode;
use crate::photo::{Photo, PhotoKey};

pub struct Selector {
    mode: SelectionMode,
    rng: StdRng,
    last: Option<PhotoKey>,
}

impl Selector {
    pub fn new(mode: SelectionMode) -> Self {
        Self::with_rng(mode, StdRng::from_os_rng())
    }

    #[cfg(test)]
    pub fn with_seed(mode: SelectionMode, seed: u64) -> Self {
        Self::with_rng(mode, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mode: SelectionMode, rng: StdRng) -> Self {
        Self { mode, rng, last: None }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Returns the index into `photos` of the next photo, or `None` when the
    /// index is empty. `photos` must be sorted by key.
    ///
    /// Sequential mode continues after the previously selected photo and
    /// wraps at the end, so every photo is visited once per cycle in index
    /// order. Random mode picks uniformly among every photo except the
    /// previous one.
    pub fn select(&mut self, photos: &[Photo]) -> Option<usize> {
        if photos.is_empty() {
            return None;
        }

        let previous = self
            .last
            .as_ref()
            .and_then(|key| photos.iter().position(|p| p.source == key.source && p.id == key.id));

        let index = match self.mode {
            SelectionMode::Sequential => match (previous, &self.last) {
                (Some(prev), _) => (prev + 1) % photos.len(),
                // The last photo left the index: resume with the one sorted after it
                (None, Some(last)) => photos.iter().position(|p| p.key() > *last).unwrap_or(0),
                (None, None) => 0,
            },
            SelectionMode::Random => match previous {
                Some(prev) if photos.len() > 1 => {
                    // Draw from the other len - 1 photos, skipping over prev
                    let pick = self.rng.random_range(0..photos.len() - 1);
                    if pick >= prev { pick + 1 } else { pick }
                }
                _ => self.rng.random_range(0..photos.len()),
            },
        };

        self.last = Some(photos[index].key());
        Some(index)
    }
}

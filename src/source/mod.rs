//! Photo sources and the catalog that merges them.

pub mod icloud;
pub mod local;

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::photo::{Photo, PhotoKey, SourceKind};

pub use icloud::{HelperClient, IcloudSource};
pub use local::LocalSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("photo {id} is no longer available")]
    NotFound { id: String },

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("failed to scan {path}: {source}")]
    Scan { path: PathBuf, source: walkdir::Error },

    #[error("failed to watch folder: {0}")]
    Watch(#[from] notify::Error),

    #[error("iCloud session expired or missing, re-authentication required")]
    NotAuthenticated,

    #[error("iCloud authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error(
        "iCloud account has Advanced Data Protection enabled; \
         disable it (and allow web access) to use iCloud Photos"
    )]
    AdvancedDataProtection,

    #[error("iCloud helper `{program}` failed: {message}")]
    Helper { program: String, message: String },

    #[error("no {0} source is configured")]
    MissingSource(SourceKind),
}

/// Something that can list photos and hand out a local file for one of them.
pub trait PhotoSource {
    fn kind(&self) -> SourceKind;

    /// Re-lists the available photos.
    fn refresh(&mut self) -> Result<(), SourceError>;

    /// Photos currently known to this source, sorted by id.
    fn photos(&self) -> Vec<Photo>;

    /// Returns a local, decodable file for the photo, downloading it first
    /// when needed.
    fn fetch(&mut self, id: &str) -> Result<PathBuf, SourceError>;
}

/// All enabled sources behind one sorted index.
pub struct Catalog {
    sources: Vec<Box<dyn PhotoSource>>,
    photos: Vec<Photo>,
}

impl Catalog {
    pub fn new(sources: Vec<Box<dyn PhotoSource>>) -> Self {
        let mut catalog = Self { sources, photos: Vec::new() };
        catalog.rebuild();
        catalog
    }

    /// Refreshes every source and rebuilds the index. A source that fails
    /// keeps contributing what it listed last time.
    pub fn refresh(&mut self) {
        for source in self.sources.iter_mut() {
            if let Err(e) = source.refresh() {
                log::warn!("Failed to refresh {} photos: {}", source.kind(), e);
            }
        }
        self.rebuild();
    }

    /// Re-reads the sources' listings without asking them to refresh.
    pub fn rebuild(&mut self) {
        let previous: HashMap<PhotoKey, Photo> = self.photos.drain(..).map(|p| (p.key(), p)).collect();

        let mut photos: Vec<Photo> = self
            .sources
            .iter()
            .flat_map(|source| source.photos())
            .map(|mut photo| {
                if let Some(old) = previous.get(&photo.key()) {
                    photo.last_shown = old.last_shown;
                    if photo.cached_path.is_none() {
                        photo.cached_path = old.cached_path.clone();
                    }
                }
                photo
            })
            .collect();
        photos.sort_by_key(|p| p.key());
        photos.dedup_by(|a, b| a.source == b.source && a.id == b.id);

        if photos.len() != previous.len() {
            log::info!("Photo index: {} photos", photos.len());
        }
        self.photos = photos;
    }

    pub fn photos(&self) -> &[Photo] {
        &self.photos
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    /// Resolves the photo at `index` to a local file through its source.
    pub fn fetch(&mut self, index: usize) -> Result<PathBuf, SourceError> {
        let Some(photo) = self.photos.get(index) else {
            return Err(SourceError::NotFound { id: index.to_string() });
        };
        let kind = photo.source;
        let id = photo.id.clone();

        let source = self
            .sources
            .iter_mut()
            .find(|s| s.kind() == kind)
            .ok_or(SourceError::MissingSource(kind))?;
        let path = source.fetch(&id)?;

        if let Some(photo) = self.photos.get_mut(index) {
            photo.cached_path = Some(path.clone());
        }
        Ok(path)
    }

    pub fn mark_shown(&mut self, key: &PhotoKey, at: DateTime<Utc>) {
        if let Some(photo) = self.photos.iter_mut().find(|p| p.source == key.source && p.id == key.id) {
            photo.last_shown = Some(at);
        }
    }
}

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use walkdir::WalkDir;

use super::{PhotoSource, SourceError};
use crate::constants::is_supported_image;
use crate::photo::{Photo, SourceKind};

type Index = Arc<Mutex<BTreeSet<PathBuf>>>;

/// Photos in a folder on disk, kept current by a file watcher.
pub struct LocalSource {
    root: PathBuf,
    recursive: bool,
    index: Index,
    watcher: Option<RecommendedWatcher>,
}

impl LocalSource {
    /// Creates the folder if needed and indexes it. Call [`LocalSource::watch`]
    /// to pick up changes between refreshes.
    pub fn new(root: &Path, recursive: bool) -> Result<Self, SourceError> {
        fs::create_dir_all(root).map_err(|source| SourceError::Io { path: root.to_path_buf(), source })?;
        // Watcher events carry absolute paths, the index must match them
        let root = fs::canonicalize(root).map_err(|source| SourceError::Io { path: root.to_path_buf(), source })?;

        let files = scan_directory(&root, recursive)?;
        log::info!("Indexed {} photos in {}", files.len(), root.display());

        Ok(Self { root, recursive, index: Arc::new(Mutex::new(files)), watcher: None })
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[cfg(test)]
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Starts watching the folder. New photos show up in [`PhotoSource::photos`]
    /// as soon as the watcher reports them.
    pub fn watch(&mut self) -> Result<(), SourceError> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let index = Arc::clone(&self.index);
        let mut watcher: RecommendedWatcher = Watcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => handle_event(&index, &event),
                Err(e) => log::warn!("Folder watch error: {}", e),
            },
            notify::Config::default(),
        )?;

        let mode = if self.recursive { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
        watcher.watch(&self.root, mode)?;
        log::info!("Watching {} for new photos", self.root.display());

        self.watcher = Some(watcher);
        Ok(())
    }
}

impl PhotoSource for LocalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    fn refresh(&mut self) -> Result<(), SourceError> {
        let files = scan_directory(&self.root, self.recursive)?;
        *lock(&self.index) = files;
        Ok(())
    }

    fn photos(&self) -> Vec<Photo> {
        lock(&self.index).iter().cloned().map(Photo::local).collect()
    }

    fn fetch(&mut self, id: &str) -> Result<PathBuf, SourceError> {
        let path = PathBuf::from(id);
        if path.is_file() {
            Ok(path)
        } else {
            lock(&self.index).remove(&path);
            Err(SourceError::NotFound { id: id.to_string() })
        }
    }
}

fn lock(index: &Index) -> MutexGuard<'_, BTreeSet<PathBuf>> {
    // A panic in the watcher thread leaves the set itself intact
    index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Every supported image under `root`, sorted by path.
pub fn scan_directory(root: &Path, recursive: bool) -> Result<BTreeSet<PathBuf>, SourceError> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = BTreeSet::new();

    for entry in WalkDir::new(root).follow_links(true).max_depth(max_depth) {
        let entry = match entry {
            Ok(entry) => entry,
            // The root itself going missing is a real failure, a single unreadable entry is not
            Err(e) if e.depth() == 0 => {
                return Err(SourceError::Scan { path: root.to_path_buf(), source: e });
            }
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if entry.file_type().is_file() && is_indexable(entry.path()) {
            files.insert(entry.into_path());
        }
    }
    Ok(files)
}

/// Supported images whose path is valid UTF-8. Photo ids are strings, so a
/// path that cannot round-trip through one could never be fetched.
fn is_indexable(path: &Path) -> bool {
    if !is_supported_image(path) {
        return false;
    }
    if path.to_str().is_none() {
        log::warn!("Skipping {}: file name is not valid UTF-8", path.display());
        return false;
    }
    true
}

/// Applies one watcher event to the index.
pub fn handle_event(index: &Index, event: &Event) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
            let mut files = lock(index);
            for path in &event.paths {
                reconcile(&mut files, path);
            }
        }
        _ => {}
    }
}

/// Brings the index in line with what is on disk at `path`.
fn reconcile(files: &mut BTreeSet<PathBuf>, path: &Path) {
    if path.is_file() {
        if is_indexable(path) && files.insert(path.to_path_buf()) {
            log::info!("New photo: {}", path.display());
        }
    } else if !path.exists() {
        // Covers a removed file as well as a removed or renamed subfolder
        let before = files.len();
        files.retain(|p| !p.starts_with(path));
        if files.len() != before {
            log::info!("Photo removed: {}", path.display());
        }
    }
}

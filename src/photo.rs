use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Where a photo comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    Local,
    Icloud,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::Icloud => "icloud",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of a photo across refreshes: the source plus its id there
/// (a path for local photos, the remote asset id for iCloud).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhotoKey {
    pub source: SourceKind,
    pub id: String,
}

impl fmt::Display for PhotoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: String,
    pub source: SourceKind,
    /// Human readable name for logs.
    pub name: String,
    /// Local file holding the photo, once known (always set for local photos,
    /// set after download for remote ones).
    pub cached_path: Option<PathBuf>,
    pub last_shown: Option<DateTime<Utc>>,
}

impl Photo {
    pub fn local(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            id: path.to_string_lossy().into_owned(),
            source: SourceKind::Local,
            name,
            cached_path: Some(path),
            last_shown: None,
        }
    }

    pub fn remote(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: SourceKind::Icloud,
            name: name.into(),
            cached_path: None,
            last_shown: None,
        }
    }

    pub fn key(&self) -> PhotoKey {
        PhotoKey { source: self.source, id: self.id.clone() }
    }
}

//! iCloud Photos through an external helper program.
//!
//! The helper owns the iCloud protocol and the session cookies. It is called as
//!
//! ```text
//! <helper> auth     --apple-id ID --session-dir DIR
//! <helper> list     --apple-id ID --session-dir DIR
//! <helper> download --apple-id ID --session-dir DIR --id ASSET --output PATH
//! ```
//!
//! `list` prints one `id<TAB>filename` line per photo. Exit status 2 means the
//! session is missing or was rejected, 3 means the account has Advanced Data
//! Protection enabled.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use super::{PhotoSource, SourceError};
use crate::photo::{Photo, SourceKind};

const EXIT_AUTH_REQUIRED: i32 = 2;
const EXIT_ADVANCED_DATA_PROTECTION: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePhoto {
    pub id: String,
    pub filename: String,
}

/// The remote photo library.
pub trait IcloudClient {
    /// Whether a saved session exists that may still be valid.
    fn has_session(&self) -> bool;

    /// Establishes a session, prompting for two-factor codes when needed.
    fn authenticate(&mut self) -> Result<(), SourceError>;

    fn list(&mut self) -> Result<Vec<RemotePhoto>, SourceError>;

    fn download(&mut self, id: &str, dest: &Path) -> Result<(), SourceError>;
}

// --- Helper process ---

pub struct HelperClient {
    program: String,
    apple_id: String,
    session_dir: PathBuf,
}

impl HelperClient {
    pub fn new(program: &str, apple_id: &str, session_dir: &Path) -> Self {
        Self { program: program.to_string(), apple_id: apple_id.to_string(), session_dir: session_dir.to_path_buf() }
    }

    fn command(&self, action: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(action).arg("--apple-id").arg(&self.apple_id).arg("--session-dir").arg(&self.session_dir);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> SourceError {
        let message = if e.kind() == ErrorKind::NotFound {
            "program not found, is it installed and on PATH?".to_string()
        } else {
            e.to_string()
        };
        SourceError::Helper { program: self.program.clone(), message }
    }

    fn run(&self, mut cmd: Command) -> Result<Output, SourceError> {
        let output = cmd.stdin(Stdio::null()).output().map_err(|e| self.spawn_error(e))?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(&self.program, output.status.code(), &stderr))
        }
    }
}

impl IcloudClient for HelperClient {
    fn has_session(&self) -> bool {
        fs::read_dir(&self.session_dir).map(|mut entries| entries.next().is_some()).unwrap_or(false)
    }

    fn authenticate(&mut self) -> Result<(), SourceError> {
        fs::create_dir_all(&self.session_dir)
            .map_err(|source| SourceError::Io { path: self.session_dir.clone(), source })?;

        if !self.has_session() {
            log::info!("First iCloud login for {}: answer the two-factor prompt below", self.apple_id);
        }

        // Inherited stdio so the helper can talk to the user directly
        let status = self.command("auth").status().map_err(|e| self.spawn_error(e))?;
        if status.success() {
            log::info!("iCloud session ready for {}", self.apple_id);
            Ok(())
        } else {
            Err(classify_failure(&self.program, status.code(), ""))
        }
    }

    fn list(&mut self) -> Result<Vec<RemotePhoto>, SourceError> {
        let output = self.run(self.command("list"))?;
        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    fn download(&mut self, id: &str, dest: &Path) -> Result<(), SourceError> {
        let mut cmd = self.command("download");
        cmd.arg("--id").arg(id).arg("--output").arg(dest);
        self.run(cmd)?;
        Ok(())
    }
}

/// Parses `id<TAB>filename` lines, skipping blank and malformed ones.
pub fn parse_listing(stdout: &str) -> Vec<RemotePhoto> {
    stdout
        .lines()
        .filter_map(|line| {
            let (id, filename) = line.trim_end_matches('\r').split_once('\t')?;
            let id = id.trim();
            if id.is_empty() {
                return None;
            }
            Some(RemotePhoto { id: id.to_string(), filename: filename.trim().to_string() })
        })
        .collect()
}

/// Maps a failed helper run to an error.
pub fn classify_failure(program: &str, code: Option<i32>, stderr: &str) -> SourceError {
    if code == Some(EXIT_ADVANCED_DATA_PROTECTION) || stderr.contains("Advanced Data Protection") {
        return SourceError::AdvancedDataProtection;
    }
    if code == Some(EXIT_AUTH_REQUIRED) {
        let reason = stderr.trim();
        return if reason.is_empty() {
            SourceError::NotAuthenticated
        } else {
            SourceError::AuthenticationFailed(reason.to_string())
        };
    }

    let message = match (code, stderr.trim()) {
        (Some(code), "") => format!("exited with status {}", code),
        (Some(code), reason) => format!("exited with status {}: {}", code, reason),
        (None, _) => "terminated by signal".to_string(),
    };
    SourceError::Helper { program: program.to_string(), message }
}

// --- Source ---

/// Remote photos, downloaded on demand into a local cache.
pub struct IcloudSource<C: IcloudClient> {
    client: C,
    cache_dir: PathBuf,
    authenticated: bool,
    photos: Vec<Photo>,
}

impl<C: IcloudClient> IcloudSource<C> {
    /// Creates the cache folder and tries to authenticate. A failed login is
    /// logged and retried on the next refresh.
    pub fn new(client: C, cache_dir: &Path) -> Result<Self, SourceError> {
        fs::create_dir_all(cache_dir).map_err(|source| SourceError::Io { path: cache_dir.to_path_buf(), source })?;

        let mut source = Self { client, cache_dir: cache_dir.to_path_buf(), authenticated: false, photos: Vec::new() };
        if let Err(e) = source.ensure_authenticated() {
            log::error!("iCloud login failed: {}", e);
        }
        Ok(source)
    }

    #[cfg(test)]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn cached_path(&self, id: &str) -> PathBuf {
        self.cache_dir.join(cache_file_name(id))
    }

    fn ensure_authenticated(&mut self) -> Result<(), SourceError> {
        if !self.authenticated {
            self.client.authenticate()?;
            self.authenticated = true;
        }
        Ok(())
    }

    /// Drops the session flag when the remote side rejected it.
    fn note_failure(&mut self, e: &SourceError) {
        if matches!(e, SourceError::NotAuthenticated | SourceError::AuthenticationFailed(_)) {
            self.authenticated = false;
        }
    }
}

impl<C: IcloudClient> PhotoSource for IcloudSource<C> {
    fn kind(&self) -> SourceKind {
        SourceKind::Icloud
    }

    fn refresh(&mut self) -> Result<(), SourceError> {
        self.ensure_authenticated()?;

        let listing = self.client.list().inspect_err(|e| self.note_failure(e))?;
        let mut photos: Vec<Photo> = listing.into_iter().map(|r| Photo::remote(r.id, r.filename)).collect();
        photos.sort_by(|a, b| a.id.cmp(&b.id));
        for photo in photos.iter_mut() {
            let cached = self.cached_path(&photo.id);
            if cached.is_file() {
                photo.cached_path = Some(cached);
            }
        }

        log::debug!("iCloud listing: {} photos", photos.len());
        self.photos = photos;
        Ok(())
    }

    fn photos(&self) -> Vec<Photo> {
        self.photos.clone()
    }

    fn fetch(&mut self, id: &str) -> Result<PathBuf, SourceError> {
        let dest = self.cached_path(id);
        if dest.is_file() {
            log::debug!("Using cached iCloud photo {}", dest.display());
            return Ok(dest);
        }
        if !self.photos.iter().any(|p| p.id == id) {
            return Err(SourceError::NotFound { id: id.to_string() });
        }

        self.ensure_authenticated()?;

        // The service throttles downloads heavily; this blocks until the helper is done
        log::info!("Downloading iCloud photo {}", id);
        let partial = self.cache_dir.join(format!(".{}.part", cache_file_name(id)));
        if let Err(e) = self.client.download(id, &partial) {
            self.note_failure(&e);
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        fs::rename(&partial, &dest).map_err(|source| SourceError::Io { path: dest.clone(), source })?;

        if let Some(photo) = self.photos.iter_mut().find(|p| p.id == id) {
            photo.cached_path = Some(dest.clone());
        }
        Ok(dest)
    }
}

/// Deletes every file in the cache folder, returning how many were removed.
pub fn clear_cache(cache_dir: &Path) -> Result<usize, SourceError> {
    let entries = match fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(source) => return Err(SourceError::Io { path: cache_dir.to_path_buf(), source }),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry.map_err(|source| SourceError::Io { path: cache_dir.to_path_buf(), source })?.path();
        if path.is_file() {
            fs::remove_file(&path).map_err(|source| SourceError::Io { path: path.clone(), source })?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Remote ids may contain characters that are unsafe in file names. Anything
/// but ASCII letters, digits and `-` becomes `_xx` per byte, so distinct ids
/// never share a file.
fn cache_file_name(id: &str) -> String {
    let mut name = String::with_capacity(id.len() + 4);
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("_{:02x}", byte));
        }
    }
    name.push_str(".jpg");
    name
}

use crate::error::LedgerError;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

pub const DEFAULT_LEDGER_FILE: &str = "downloads_db.json";

/// Insertion-ordered, duplicate-free list of downloaded file paths, mirrored
/// to a JSON array on disk after every new entry.
///
/// The lock covers both the in-memory list and the file rewrite, so concurrent
/// `record` calls never interleave their writes.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: RwLock<Vec<String>>,
}

impl Ledger {
    /// Loads the ledger stored at `path`. A missing file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        let entries = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<Option<Vec<String>>>(&content)
                .map_err(|source| LedgerError::Parse {
                    path: path.clone(),
                    source,
                })?
                .unwrap_or_default(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(LedgerError::Read { path, source }),
        };

        info!(path = %path.display(), entries = entries.len(), "loaded download ledger");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Appends `path` unless it is already present, then rewrites the file.
    ///
    /// Returns `Ok(false)` for a duplicate, in which case nothing is written.
    /// A failed write leaves the entry in memory; the file catches up on the
    /// next successful record.
    pub fn record(&self, path: &str) -> Result<bool, LedgerError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if entries.iter().any(|existing| existing == path) {
            debug!(path, "already in ledger");
            return Ok(false);
        }

        entries.push(path.to_string());
        self.save(&entries)?;

        Ok(true)
    }

    /// Copy of the current entries, in the order they were recorded.
    pub fn list(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(self.path.file_name().unwrap_or(DEFAULT_LEDGER_FILE.as_ref()));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn save(&self, entries: &[String]) -> Result<(), LedgerError> {
        let content = serde_json::to_string_pretty(entries).map_err(LedgerError::Serialize)?;

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| LedgerError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        // Staged beside the ledger and renamed over it; the file is never partial.
        let staging = self.staging_path();
        fs::write(&staging, content)
            .and_then(|()| fs::rename(&staging, &self.path))
            .map_err(|source| {
                let _ = fs::remove_file(&staging);
                LedgerError::Write {
                    path: self.path.clone(),
                    source,
                }
            })?;

        Ok(())
    }
}

//! File-backed work-item store.
//!
//! The store is a root directory holding one subdirectory per [`Scope`]:
//! - `Emails_Received/`: received emails ([`WorkItem`])
//! - `Emails_To_Send/`: generated replies waiting to be sent ([`ResponseItem`])
//! - `Emails_To_Send/Sent/`: the archive of dispatched replies
//!
//! Directory contents are the only record of progress. Nothing is cached
//! between scans; callers recompute [`Store::derive_known_ids`] each time.

pub mod documents;
pub mod naming;

use std::collections::HashSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::StoreError;

pub use documents::{Document, OriginalEmail, ResponseItem, WorkItem};

/// A directory acting as one stage's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Received,
    Pending,
    Archive,
}

impl Scope {
    /// Path of the scope directory relative to the store root.
    pub fn relative_path(self) -> &'static str {
        match self {
            Self::Received => "Emails_Received",
            Self::Pending => "Emails_To_Send",
            Self::Archive => "Emails_To_Send/Sent",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.relative_path())
    }
}

/// A document loaded from disk together with its location.
#[derive(Debug, Clone)]
pub struct Stored<D> {
    pub path: PathBuf,
    pub document: D,
}

/// Outcome of purging one scope.
#[derive(Debug, Default)]
pub struct PurgeReport {
    pub deleted: usize,
    pub failures: Vec<(PathBuf, String)>,
}

/// Filesystem queue rooted at one directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute directory of a scope.
    pub fn dir(&self, scope: Scope) -> PathBuf {
        self.root.join(scope.relative_path())
    }

    /// Create every scope directory if missing.
    pub async fn ensure_dirs(&self) -> Result<(), StoreError> {
        for scope in [Scope::Received, Scope::Pending, Scope::Archive] {
            let dir = self.dir(scope);
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Names of the work-item documents in a scope, sorted (oldest first).
    ///
    /// A missing directory is an empty scope.
    pub async fn document_names(&self, scope: Scope) -> Result<Vec<String>, StoreError> {
        let dir = self.dir(scope);
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !naming::is_document_name(&name) {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StoreError::io(entry.path(), e))?;
            if file_type.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Ids present in a scope, derived from filenames only.
    pub async fn derive_known_ids(&self, scope: Scope) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .document_names(scope)
            .await?
            .iter()
            .filter_map(|name| naming::decode_id(name))
            .map(str::to_string)
            .collect())
    }

    /// Whether a document with this id is present in the scope.
    pub async fn exists(&self, scope: Scope, id: &str) -> Result<bool, StoreError> {
        Ok(self.derive_known_ids(scope).await?.contains(id))
    }

    /// Load every document whose id is not in `known_ids`.
    ///
    /// Unreadable or unparsable files are logged and skipped. They are not
    /// added to any known set, so the next scan picks them up again.
    pub async fn list_new<D: Document>(
        &self,
        scope: Scope,
        known_ids: &HashSet<String>,
    ) -> Result<Vec<Stored<D>>, StoreError> {
        let dir = self.dir(scope);
        let mut loaded = Vec::new();

        for name in self.document_names(scope).await? {
            let Some(id) = naming::decode_id(&name) else {
                continue;
            };
            if known_ids.contains(id) {
                continue;
            }

            let path = dir.join(&name);
            match read_document::<D>(&path).await {
                Ok(document) => loaded.push(Stored { path, document }),
                Err(e) => warn!(scope = %scope, file = %name, error = %e, "Skipping unreadable work item"),
            }
        }

        debug!(scope = %scope, count = loaded.len(), "Loaded new work items");
        Ok(loaded)
    }

    /// Persist a document as `{timestamp}_{tag}_{id}.json`.
    ///
    /// Refuses to write a second document for an id already in the scope.
    /// The file appears atomically (write to a hidden temp file, then rename).
    pub async fn put<D: Document>(
        &self,
        scope: Scope,
        tag: Option<&str>,
        document: &D,
    ) -> Result<PathBuf, StoreError> {
        let id = document.document_id();
        let name = naming::encode_file_name(&naming::timestamp_now(), tag, id)?;

        if self.exists(scope, id).await? {
            return Err(StoreError::Duplicate {
                id: id.to_string(),
                scope: scope.to_string(),
            });
        }

        let dir = self.dir(scope);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let path = dir.join(&name);
        write_atomically(&path, document).await?;
        debug!(scope = %scope, id = %id, path = %path.display(), "Stored work item");
        Ok(path)
    }

    /// Overwrite an existing document in place.
    pub async fn rewrite<D: Document>(&self, path: &Path, document: &D) -> Result<(), StoreError> {
        write_atomically(path, document).await
    }

    /// Move a document file into another scope, keeping its filename.
    pub async fn relocate(&self, path: &Path, scope: Scope) -> Result<PathBuf, StoreError> {
        let Some(name) = path.file_name() else {
            return Err(StoreError::io(
                path,
                std::io::Error::new(ErrorKind::InvalidInput, "path has no file name"),
            ));
        };

        let dir = self.dir(scope);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let target = dir.join(name);
        fs::rename(path, &target)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        debug!(from = %path.display(), to = %target.display(), "Relocated work item");
        Ok(target)
    }

    /// Delete every regular file in a scope directory (subdirectories are
    /// left alone). Failures are collected, not fatal.
    pub async fn delete_all(&self, scope: Scope) -> PurgeReport {
        let dir = self.dir(scope);
        let mut report = PurgeReport::default();

        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return report,
            Err(e) => {
                report.failures.push((dir, e.to_string()));
                return report;
            }
        };

        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report.failures.push((dir.clone(), e.to_string()));
                    break;
                }
            };

            let path = entry.path();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => continue,
                Ok(_) => {}
                Err(e) => {
                    report.failures.push((path, e.to_string()));
                    continue;
                }
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(scope = %scope, file = %path.display(), "Deleted work item");
                    report.deleted += 1;
                }
                Err(e) => report.failures.push((path, e.to_string())),
            }
        }

        report
    }

    /// Take the advisory claim on `id` within `scope`.
    ///
    /// The claim is an exclusively created hidden sentinel file, released
    /// when the returned guard drops.
    pub async fn claim(&self, scope: Scope, id: &str) -> Result<ClaimGuard, StoreError> {
        naming::validate_id(id)?;
        let dir = self.dir(scope);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let path = dir.join(naming::claim_file_name(id));
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(ClaimGuard { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::AlreadyClaimed {
                id: id.to_string(),
                scope: scope.to_string(),
            }),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

/// Held claim on one work item. Dropping it releases the claim (a
/// synchronous remove, since `Drop` cannot await).
#[derive(Debug)]
pub struct ClaimGuard {
    path: PathBuf,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release claim");
        }
    }
}

async fn read_document<D: Document>(path: &Path) -> Result<D, StoreError> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_atomically<D: Document>(path: &Path, document: &D) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(document).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    fs::write(&tmp, json.as_bytes())
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

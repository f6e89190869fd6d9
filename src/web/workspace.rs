//! Working directory management
//!
//! Uploads and converter output share one directory tree. Two layouts exist:
//!
//! - [`Layout::Shared`]: every request reads and writes directly in the root.
//!   Output links look like `/files/<name>.xlsx`.
//! - [`Layout::Isolated`]: each request gets its own `<root>/<uuid>/`
//!   subdirectory. Output links look like `/files/<uuid>/<name>.xlsx`.
//!
//! Client-supplied names are joined onto the directory unchanged. Names that
//! would leave the directory are classified so callers can log them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Extension of converter output
pub const OUTPUT_EXTENSION: &str = "xlsx";

/// URL prefix under which artifacts are served
pub const FILES_ROUTE_PREFIX: &str = "/files";

/// Working directory layout
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One flat directory for all requests
    #[default]
    Shared,
    /// One subdirectory per request
    Isolated,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Shared => write!(f, "shared"),
            Layout::Isolated => write!(f, "isolated"),
        }
    }
}

/// Workspace error type
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Shape of a client-supplied file or output name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// Single path component
    Plain,
    /// Empty string
    Empty,
    /// Absolute path; joining replaces the working directory entirely
    Absolute,
    /// Contains `..`
    Traversal,
    /// Contains separators but stays below the directory
    Nested,
}

impl NameKind {
    pub fn is_suspicious(self) -> bool {
        self != NameKind::Plain
    }
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NameKind::Plain => "plain",
            NameKind::Empty => "empty",
            NameKind::Absolute => "absolute",
            NameKind::Traversal => "traversal",
            NameKind::Nested => "nested",
        };
        f.write_str(s)
    }
}

/// Classify a client-supplied name
pub fn classify_name(name: &str) -> NameKind {
    if name.is_empty() {
        return NameKind::Empty;
    }
    if name.starts_with('/') || name.starts_with('\\') || Path::new(name).is_absolute() {
        return NameKind::Absolute;
    }
    // Backslashes are not separators on unix but are on the client side
    if name.split(['/', '\\']).any(|part| part == "..")
        || Path::new(name)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return NameKind::Traversal;
    }
    if name.contains('/') || name.contains('\\') {
        return NameKind::Nested;
    }
    NameKind::Plain
}

/// Everything one conversion reads or writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPaths {
    /// Identifier of the request
    pub request_id: Uuid,
    /// Directory the converter runs in
    pub dir: PathBuf,
    /// Where the upload is written
    pub input: PathBuf,
    /// Where the converter is expected to write
    pub output: PathBuf,
    /// Custom name as submitted
    pub custom_name: String,
    /// `<custom_name>.xlsx`
    pub output_name: String,
    /// Relative URL the artifact is served from
    pub download_url: String,
}

/// Async per-path locks
///
/// Requests touching the same input or output path run one after another;
/// everything else runs concurrently.
#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    inner: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every given path
    ///
    /// Paths are sorted and deduplicated first so two requests never wait on
    /// each other in opposite order.
    pub async fn acquire<I>(&self, paths: I) -> PathGuard
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut keys: Vec<PathBuf> = paths.into_iter().collect();
        keys.sort();
        keys.dedup();

        // Owns every lock taken so far, so a cancelled wait still cleans up
        let mut held = PathGuard {
            locks: self.clone(),
            guards: Vec::with_capacity(keys.len()),
            pending: None,
        };
        for key in keys {
            let mutex = self.inner.entry(key.clone()).or_default().value().clone();
            held.pending = Some(key.clone());
            let guard = mutex.lock_owned().await;
            held.pending = None;
            held.guards.push((key, guard));
        }
        held
    }

    /// Number of paths currently tracked
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Held locks; released on drop
pub struct PathGuard {
    locks: PathLocks,
    guards: Vec<(PathBuf, OwnedMutexGuard<()>)>,
    /// Key whose lock was being awaited when the future was dropped
    pending: Option<PathBuf>,
}

impl PathLocks {
    /// Forget `key` once only the map references its lock
    fn release(&self, key: &Path) {
        self.inner
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        for (key, guard) in self.guards.drain(..) {
            drop(guard);
            self.locks.release(&key);
        }
        if let Some(key) = self.pending.take() {
            self.locks.release(&key);
        }
    }
}

/// The working directory shared by all requests
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    layout: Layout,
    locks: PathLocks,
}

impl Workspace {
    /// Create the root directory if needed and resolve it to an absolute path
    pub fn open(root: impl Into<PathBuf>, layout: Layout) -> Result<Self, WorkspaceError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| WorkspaceError::CreateDir {
            path: root.clone(),
            source,
        })?;
        let root = std::fs::canonicalize(&root).map_err(|source| WorkspaceError::CreateDir {
            path: root.clone(),
            source,
        })?;

        Ok(Self {
            root,
            layout,
            locks: PathLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Decide where an upload and its output live
    pub fn plan(&self, filename: &str, custom_name: &str) -> ConversionPaths {
        let request_id = Uuid::new_v4();
        let dir = match self.layout {
            Layout::Shared => self.root.clone(),
            Layout::Isolated => self.root.join(request_id.to_string()),
        };
        let output_name = format!("{}.{}", custom_name, OUTPUT_EXTENSION);
        let download_url = match self.layout {
            Layout::Shared => format!("{}/{}", FILES_ROUTE_PREFIX, output_name),
            Layout::Isolated => format!("{}/{}/{}", FILES_ROUTE_PREFIX, request_id, output_name),
        };

        ConversionPaths {
            request_id,
            input: dir.join(filename),
            output: dir.join(&output_name),
            dir,
            custom_name: custom_name.to_string(),
            output_name,
            download_url,
        }
    }

    /// Write the uploaded bytes, replacing any existing file
    pub async fn store_upload(
        &self,
        paths: &ConversionPaths,
        data: &[u8],
    ) -> Result<(), WorkspaceError> {
        if self.layout == Layout::Isolated {
            tokio::fs::create_dir_all(&paths.dir)
                .await
                .map_err(|source| WorkspaceError::CreateDir {
                    path: paths.dir.clone(),
                    source,
                })?;
        }

        tokio::fs::write(&paths.input, data)
            .await
            .map_err(|source| WorkspaceError::Write {
                path: paths.input.clone(),
                source,
            })
    }

    /// Lock the input and output paths of a conversion
    pub async fn lock(&self, paths: &ConversionPaths) -> PathGuard {
        self.locks
            .acquire([paths.input.clone(), paths.output.clone()])
            .await
    }

    /// Location of a top-level artifact
    pub fn artifact_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Location of an artifact inside a request directory
    pub fn request_artifact_path(&self, request_id: Uuid, filename: &str) -> PathBuf {
        self.root.join(request_id.to_string()).join(filename)
    }
}

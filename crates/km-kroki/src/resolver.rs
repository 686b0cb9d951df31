//! Content resolution for kroki blocks.
//!
//! A block's raw text is either the diagram source itself or a path, relative
//! to the workspace root, of a file holding it. Resolution decides which and
//! returns the actual source.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Error resolving a block's content.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// The referenced file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Resolution did not finish within the allowed time.
    #[error("resolution timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The resolution task was cancelled or panicked.
    #[error("resolution aborted: {0}")]
    Aborted(String),
}

/// Asynchronous filesystem access used by the resolver.
pub trait FileSystem: Send + Sync + 'static {
    /// Whether `path` names an existing regular file.
    fn is_file(&self, path: &Path) -> impl Future<Output = bool> + Send;

    /// Read `path` as UTF-8 text.
    fn read_to_string(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send;
}

impl<T: FileSystem> FileSystem for Arc<T> {
    fn is_file(&self, path: &Path) -> impl Future<Output = bool> + Send {
        (**self).is_file(path)
    }

    fn read_to_string(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send {
        (**self).read_to_string(path)
    }
}

/// Filesystem backed by `tokio::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioFs;

impl FileSystem for TokioFs {
    async fn is_file(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }
}

/// Resolves raw block text to diagram source.
#[derive(Debug)]
pub struct Resolver<F> {
    fs: F,
    workspace_root: PathBuf,
}

impl<F: FileSystem> Resolver<F> {
    /// Create a resolver reading files under `workspace_root`.
    pub fn new(fs: F, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            workspace_root: workspace_root.into(),
        }
    }

    /// Workspace root that relative references are joined onto.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Resolve `raw` to diagram source.
    ///
    /// The trimmed text is taken as a file reference when it is a single
    /// line naming an existing file under the workspace root (a leading `/`
    /// is relative to the root as well); the file's contents are
    /// returned. Anything else is returned as inline source.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::Read`] if the referenced file exists but
    /// cannot be read as UTF-8 text.
    pub async fn resolve(&self, raw: &str) -> Result<String, ResolutionError> {
        let text = raw.trim();
        let Some(path) = self.reference_path(text) else {
            return Ok(text.to_owned());
        };
        if !self.fs.is_file(&path).await {
            return Ok(text.to_owned());
        }
        tracing::debug!(path = %path.display(), "Reading diagram source");
        self.fs
            .read_to_string(&path)
            .await
            .map_err(|source| ResolutionError::Read { path, source })
    }

    /// Candidate file path for `text`, if it could be a reference at all.
    fn reference_path(&self, text: &str) -> Option<PathBuf> {
        if text.is_empty() || text.contains('\n') {
            return None;
        }
        // A rooted reference is still relative to the workspace root
        let relative: PathBuf = Path::new(text)
            .components()
            .filter(|component| !matches!(component, Component::RootDir | Component::Prefix(_)))
            .collect();
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.workspace_root.join(relative))
    }
}

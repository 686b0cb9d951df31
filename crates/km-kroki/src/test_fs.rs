//! In-memory filesystem for tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::resolver::FileSystem;

enum Entry {
    Text(String),
    Unreadable,
}

/// Filesystem double with probe counters, an optional gate and delay.
///
/// With a gate, every `is_file` call waits for a permit released by
/// [`MemoryFs::release`]; probes are counted before waiting.
#[derive(Default)]
pub(crate) struct MemoryFs {
    files: HashMap<PathBuf, Entry>,
    probes: Mutex<HashMap<PathBuf, usize>>,
    gate: Option<Semaphore>,
    delay: Option<Duration>,
}

impl MemoryFs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_file(mut self, path: impl Into<PathBuf>, content: &str) -> Self {
        self.files
            .insert(path.into(), Entry::Text(content.to_owned()));
        self
    }

    pub(crate) fn with_unreadable(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.insert(path.into(), Entry::Unreadable);
        self
    }

    pub(crate) fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Let `n` gated probes proceed.
    pub(crate) fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub(crate) fn probes(&self, path: impl AsRef<Path>) -> usize {
        self.probes
            .lock()
            .unwrap()
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_probes(&self) -> usize {
        self.probes.lock().unwrap().values().sum()
    }
}

impl FileSystem for MemoryFs {
    async fn is_file(&self, path: &Path) -> bool {
        *self
            .probes
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_default() += 1;
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.files.contains_key(path)
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        match self.files.get(path) {
            Some(Entry::Text(content)) => Ok(content.clone()),
            Some(Entry::Unreadable) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "permission denied",
            )),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }
}

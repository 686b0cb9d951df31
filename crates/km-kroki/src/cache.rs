//! Generation-scoped resolution cache.
//!
//! A [`ResolutionCache`] belongs to exactly one [`Generation`]: one parse of
//! one document. Block indices are only meaningful within that parse, so the
//! cache is replaced wholesale when the document is re-parsed and every
//! lookup is checked against the owning generation.
//!
//! Entries move through [`Phase::Unresolved`] → [`Phase::Pending`] →
//! [`Phase::Ready`] | [`Phase::Failed`] and never back.

use std::collections::BTreeMap;
use std::fmt;

use tokio::task::JoinHandle;

use crate::resolver::ResolutionError;

/// Identifier of one parse of a document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// The generation following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw counter value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A block's identity: its index within one generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    pub generation: Generation,
    pub index: usize,
}

impl Identity {
    #[must_use]
    pub fn new(generation: Generation, index: usize) -> Self {
        Self { generation, index }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.generation, self.index)
    }
}

/// Lifecycle phase of a resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Unresolved,
    Pending,
    Ready,
    Failed,
}

impl Phase {
    /// Whether the phase is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

/// Phase together with its payload.
#[derive(Debug)]
pub enum ResolutionState {
    Unresolved,
    Pending,
    Ready(String),
    Failed(ResolutionError),
}

impl ResolutionState {
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::Unresolved => Phase::Unresolved,
            Self::Pending => Phase::Pending,
            Self::Ready(_) => Phase::Ready,
            Self::Failed(_) => Phase::Failed,
        }
    }
}

/// Handle of a spawned resolution.
pub type ResolutionHandle = JoinHandle<Result<String, ResolutionError>>;

/// Cache entry for one block.
#[derive(Debug)]
pub struct ResolutionEntry {
    identity: Identity,
    state: ResolutionState,
    /// In-flight task; present from `set_pending` until the scheduler takes it.
    handle: Option<ResolutionHandle>,
}

impl ResolutionEntry {
    fn new(identity: Identity) -> Self {
        Self {
            identity,
            state: ResolutionState::Unresolved,
            handle: None,
        }
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    #[must_use]
    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    /// Resolved content, if Ready.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match &self.state {
            ResolutionState::Ready(content) => Some(content),
            _ => None,
        }
    }

    /// Resolution error, if Failed.
    #[must_use]
    pub fn error(&self) -> Option<&ResolutionError> {
        match &self.state {
            ResolutionState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Result of [`ResolutionCache::settle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Entry moved to the given terminal phase.
    Settled(Phase),
    /// Identity belongs to another generation; cache untouched.
    Stale,
    /// No pending entry for the identity; cache untouched.
    Ignored,
}

/// Per-phase entry counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseCounts {
    pub unresolved: usize,
    pub pending: usize,
    pub ready: usize,
    pub failed: usize,
}

/// Resolution state for every kroki block of one generation.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    generation: Generation,
    entries: BTreeMap<usize, ResolutionEntry>,
}

impl ResolutionCache {
    /// Create an empty cache owned by `generation`.
    #[must_use]
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `identity`, or `None` if absent or from another generation.
    #[must_use]
    pub fn get(&self, identity: Identity) -> Option<&ResolutionEntry> {
        if identity.generation != self.generation {
            return None;
        }
        self.entries.get(&identity.index)
    }

    /// Entry for block `index` of this generation, created Unresolved if absent.
    pub fn get_or_create(&mut self, index: usize) -> &mut ResolutionEntry {
        let identity = Identity::new(self.generation, index);
        self.entries
            .entry(index)
            .or_insert_with(|| ResolutionEntry::new(identity))
    }

    /// Mark an Unresolved entry Pending and register its task.
    ///
    /// Returns `false` and aborts `handle` if the entry is missing, belongs to
    /// another generation, or has already left Unresolved; an identity never
    /// has two resolutions in flight.
    pub fn set_pending(&mut self, identity: Identity, handle: ResolutionHandle) -> bool {
        let entry = (identity.generation == self.generation)
            .then(|| self.entries.get_mut(&identity.index))
            .flatten();
        match entry {
            Some(entry) if entry.phase() == Phase::Unresolved => {
                entry.state = ResolutionState::Pending;
                entry.handle = Some(handle);
                true
            }
            _ => {
                handle.abort();
                false
            }
        }
    }

    /// Take the handles of Pending entries that nobody is awaiting yet.
    ///
    /// Entries stay Pending until settled; a handle is handed out only once.
    pub fn take_unawaited(&mut self) -> Vec<(Identity, ResolutionHandle)> {
        self.entries
            .values_mut()
            .filter(|entry| entry.phase() == Phase::Pending)
            .filter_map(|entry| entry.handle.take().map(|handle| (entry.identity, handle)))
            .collect()
    }

    /// Move a Pending entry to Ready or Failed.
    pub fn settle(
        &mut self,
        identity: Identity,
        result: Result<String, ResolutionError>,
    ) -> SettleOutcome {
        if identity.generation != self.generation {
            return SettleOutcome::Stale;
        }
        let Some(entry) = self.entries.get_mut(&identity.index) else {
            return SettleOutcome::Ignored;
        };
        if entry.phase() != Phase::Pending {
            return SettleOutcome::Ignored;
        }
        entry.handle = None;
        entry.state = match result {
            Ok(content) => ResolutionState::Ready(content),
            Err(err) => ResolutionState::Failed(err),
        };
        SettleOutcome::Settled(entry.phase())
    }

    /// Count entries per phase.
    #[must_use]
    pub fn counts(&self) -> PhaseCounts {
        let mut counts = PhaseCounts::default();
        for entry in self.entries.values() {
            match entry.phase() {
                Phase::Unresolved => counts.unresolved += 1,
                Phase::Pending => counts.pending += 1,
                Phase::Ready => counts.ready += 1,
                Phase::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Entries in block order.
    pub fn entries(&self) -> impl Iterator<Item = &ResolutionEntry> {
        self.entries.values()
    }
}

impl Drop for ResolutionCache {
    fn drop(&mut self) {
        for handle in self.entries.values().filter_map(|entry| entry.handle.as_ref()) {
            handle.abort();
        }
    }
}

//! Post-pass settlement of pending resolutions.
//!
//! After every render pass the scheduler collects the resolutions that pass
//! started, awaits them together, writes the results into the cache and asks
//! the host for exactly one more pass if anything changed.
//!
//! The three stages are separate so the host keeps ownership of its cache
//! while the batch is in flight:
//!
//! 1. [`RenderScheduler::collect`] takes unawaited handles out of the cache.
//! 2. [`PendingBatch::settle`] awaits them; it borrows nothing.
//! 3. [`RenderScheduler::apply`] writes results back, unless the cache has
//!    moved on to another generation in the meantime.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::cache::{
    Generation, Identity, Phase, ResolutionCache, ResolutionHandle, SettleOutcome,
};
use crate::consts::DEFAULT_TIMEOUT;
use crate::resolver::ResolutionError;

/// Receiver of re-render requests.
pub trait RenderHost: Sync {
    /// Ask for one more render pass of `generation`.
    fn request_render(&self, generation: Generation);
}

impl RenderHost for mpsc::UnboundedSender<Generation> {
    fn request_render(&self, generation: Generation) {
        if self.send(generation).is_err() {
            tracing::debug!(%generation, "Render request dropped, host is gone");
        }
    }
}

/// Awaits pending resolutions after each pass.
#[derive(Clone, Copy, Debug)]
pub struct RenderScheduler {
    timeout: Duration,
}

impl RenderScheduler {
    /// Create a scheduler bounding each resolution by `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Take every Pending resolution not yet awaited by an earlier batch.
    pub fn collect(&self, cache: &mut ResolutionCache) -> PendingBatch {
        PendingBatch {
            generation: cache.generation(),
            timeout: self.timeout,
            handles: cache.take_unawaited(),
        }
    }

    /// Write a settled batch into `cache` and request a re-render if needed.
    ///
    /// A batch from another generation is dropped without touching `cache`.
    pub fn apply(
        cache: &mut ResolutionCache,
        settled: SettledBatch,
        host: &impl RenderHost,
    ) -> ApplyOutcome {
        if settled.generation != cache.generation() {
            tracing::debug!(
                batch = %settled.generation,
                current = %cache.generation(),
                discarded = settled.results.len(),
                "Discarding stale batch"
            );
            return ApplyOutcome::Stale {
                generation: settled.generation,
            };
        }
        if settled.results.is_empty() {
            return ApplyOutcome::Idle;
        }

        let mut ready = 0;
        let mut failed = 0;
        for (identity, result) in settled.results {
            match cache.settle(identity, result) {
                SettleOutcome::Settled(Phase::Ready) => ready += 1,
                SettleOutcome::Settled(_) => failed += 1,
                SettleOutcome::Stale | SettleOutcome::Ignored => {}
            }
        }

        let rerender_requested = ready + failed > 0;
        if rerender_requested {
            host.request_render(cache.generation());
        }
        tracing::info!(
            generation = %cache.generation(),
            ready,
            failed,
            elapsed_ms = settled.elapsed.as_millis(),
            "Settled kroki batch"
        );

        ApplyOutcome::Settled {
            ready,
            failed,
            rerender_requested,
        }
    }

    /// Collect, settle and apply in one go.
    ///
    /// Holds `cache` for the whole await; hosts that need to start a new
    /// generation meanwhile use the stages separately.
    pub async fn run(&self, cache: &mut ResolutionCache, host: &impl RenderHost) -> ApplyOutcome {
        let batch = self.collect(cache);
        if batch.is_empty() {
            return ApplyOutcome::Idle;
        }
        let settled = batch.settle().await;
        Self::apply(cache, settled, host)
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

/// Resolutions collected from one pass, not yet awaited.
#[derive(Debug)]
pub struct PendingBatch {
    generation: Generation,
    timeout: Duration,
    handles: Vec<(Identity, ResolutionHandle)>,
}

impl PendingBatch {
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Await every resolution concurrently, each bounded by the timeout.
    ///
    /// Timed-out tasks are aborted. Every collected identity appears in the
    /// result exactly once.
    pub async fn settle(self) -> SettledBatch {
        let started = Instant::now();
        let timeout = self.timeout;
        let identities: Vec<Identity> = self.handles.iter().map(|(id, _)| *id).collect();

        let mut tasks = JoinSet::new();
        for (identity, handle) in self.handles {
            tasks.spawn(await_resolution(identity, handle, timeout));
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((identity, result)) => {
                    results.insert(identity.index, (identity, result));
                }
                Err(err) => tracing::error!(error = %err, "Settle task failed"),
            }
        }
        for identity in identities {
            results.entry(identity.index).or_insert_with(|| {
                (
                    identity,
                    Err(ResolutionError::Aborted("settle task lost".to_owned())),
                )
            });
        }

        SettledBatch {
            generation: self.generation,
            results: results.into_values().collect(),
            elapsed: started.elapsed(),
        }
    }
}

async fn await_resolution(
    identity: Identity,
    mut handle: ResolutionHandle,
    timeout: Duration,
) -> (Identity, Result<String, ResolutionError>) {
    let result = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(ResolutionError::Aborted(err.to_string())),
        Err(_) => {
            handle.abort();
            Err(ResolutionError::Timeout(timeout))
        }
    };
    if let Err(err) = &result {
        tracing::debug!(block = %identity, error = %err, "Resolution failed");
    }
    (identity, result)
}

/// Results of an awaited batch, in block order.
#[derive(Debug)]
pub struct SettledBatch {
    pub generation: Generation,
    pub results: Vec<(Identity, Result<String, ResolutionError>)>,
    pub elapsed: Duration,
}

/// What [`RenderScheduler::apply`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Nothing was pending.
    Idle,
    /// The batch belonged to an older generation and was discarded.
    Stale { generation: Generation },
    /// Results were written to the cache.
    Settled {
        ready: usize,
        failed: usize,
        rerender_requested: bool,
    },
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::resolver::Resolver;
    use crate::test_fs::MemoryFs;

    type TestResolver = Arc<Resolver<Arc<MemoryFs>>>;

    fn resolver(fs: &Arc<MemoryFs>) -> TestResolver {
        Arc::new(Resolver::new(Arc::clone(fs), "/ws"))
    }

    fn start(cache: &mut ResolutionCache, resolver: &TestResolver, index: usize, raw: &str) {
        let identity = cache.get_or_create(index).identity();
        let resolver = Arc::clone(resolver);
        let raw = raw.to_owned();
        assert!(cache.set_pending(
            identity,
            tokio::spawn(async move { resolver.resolve(&raw).await })
        ));
    }

    fn requests(rx: &mut mpsc::UnboundedReceiver<Generation>) -> Vec<Generation> {
        let mut seen = Vec::new();
        while let Ok(generation) = rx.try_recv() {
            seen.push(generation);
        }
        seen
    }

    #[tokio::test]
    async fn test_nothing_pending_is_idle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut cache = ResolutionCache::new(Generation::default());
        cache.get_or_create(0);

        let outcome = RenderScheduler::default().run(&mut cache, &tx).await;
        assert_eq!(outcome, ApplyOutcome::Idle);
        assert!(requests(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_batch_requests_single_render() {
        let fs = Arc::new(MemoryFs::new().with_file("/ws/b.dot", "digraph { b }"));
        let resolver = resolver(&fs);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut cache = ResolutionCache::new(Generation::default());
        start(&mut cache, &resolver, 0, "A -> B");
        start(&mut cache, &resolver, 1, "b.dot");
        start(&mut cache, &resolver, 3, "C -> D");

        let outcome = RenderScheduler::default().run(&mut cache, &tx).await;
        assert_eq!(
            outcome,
            ApplyOutcome::Settled {
                ready: 3,
                failed: 0,
                rerender_requested: true
            }
        );
        assert_eq!(requests(&mut rx), vec![Generation::default()]);
        assert_eq!(cache.counts().pending, 0);
        let identity = Identity::new(Generation::default(), 1);
        assert_eq!(cache.get(identity).unwrap().content(), Some("digraph { b }"));
    }

    #[tokio::test]
    async fn test_handles_are_collected_once() {
        let fs = Arc::new(MemoryFs::new().gated());
        let resolver = resolver(&fs);
        let mut cache = ResolutionCache::new(Generation::default());
        start(&mut cache, &resolver, 0, "a.puml");

        let scheduler = RenderScheduler::default();
        let first = scheduler.collect(&mut cache);
        let second = scheduler.collect(&mut cache);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        fs.release(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = RenderScheduler::apply(&mut cache, first.settle().await, &tx);
        assert!(matches!(outcome, ApplyOutcome::Settled { ready: 1, .. }));
        assert_eq!(
            RenderScheduler::apply(&mut cache, second.settle().await, &tx),
            ApplyOutcome::Idle
        );
        assert_eq!(requests(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_failures_settle_failed() {
        let fs = Arc::new(MemoryFs::new().with_unreadable("/ws/locked.puml"));
        let resolver = resolver(&fs);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut cache = ResolutionCache::new(Generation::default());
        start(&mut cache, &resolver, 0, "locked.puml");
        start(&mut cache, &resolver, 1, "fine");

        let outcome = RenderScheduler::default().run(&mut cache, &tx).await;
        assert_eq!(
            outcome,
            ApplyOutcome::Settled {
                ready: 1,
                failed: 1,
                rerender_requested: true
            }
        );
        assert_eq!(requests(&mut rx).len(), 1);
        let failed = cache.get(Identity::new(Generation::default(), 0)).unwrap();
        assert!(matches!(failed.error(), Some(ResolutionError::Read { .. })));
    }

    async fn explode() -> Result<String, ResolutionError> {
        panic!("resolver exploded");
    }

    #[tokio::test]
    async fn test_panicked_resolution_settles_aborted() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut cache = ResolutionCache::new(Generation::default());
        let identity = cache.get_or_create(0).identity();
        cache.set_pending(identity, tokio::spawn(explode()));

        let outcome = RenderScheduler::default().run(&mut cache, &tx).await;
        assert!(matches!(outcome, ApplyOutcome::Settled { failed: 1, .. }));
        assert!(matches!(
            cache.get(identity).unwrap().error(),
            Some(ResolutionError::Aborted(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_settles_failed() {
        let fs = Arc::new(MemoryFs::new().with_delay(Duration::from_secs(3600)));
        let resolver = resolver(&fs);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut cache = ResolutionCache::new(Generation::default());
        start(&mut cache, &resolver, 0, "slow.puml");

        let scheduler = RenderScheduler::new(Duration::from_millis(250));
        let settled = scheduler.collect(&mut cache).settle().await;
        assert!(settled.elapsed >= Duration::from_millis(250));
        assert!(settled.elapsed < Duration::from_secs(1));

        let outcome = RenderScheduler::apply(&mut cache, settled, &tx);
        assert!(matches!(outcome, ApplyOutcome::Settled { failed: 1, .. }));
        assert_eq!(requests(&mut rx).len(), 1);
        assert!(matches!(
            cache.get(Identity::new(Generation::default(), 0)).unwrap().error(),
            Some(ResolutionError::Timeout(d)) if *d == Duration::from_millis(250)
        ));
    }

    #[tokio::test]
    async fn test_stale_batch_is_discarded() {
        let fs = Arc::new(MemoryFs::new().gated());
        let resolver = resolver(&fs);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let g0 = Generation::default();
        let mut cache = ResolutionCache::new(g0);
        start(&mut cache, &resolver, 0, "old.puml");
        let batch = RenderScheduler::default().collect(&mut cache);

        // Re-parse: the new generation reuses index 0 for another block
        cache = ResolutionCache::new(g0.next());
        start(&mut cache, &resolver, 0, "new.puml");

        fs.release(2);
        let settled = batch.settle().await;
        assert_eq!(settled.generation, g0);
        assert_eq!(
            RenderScheduler::apply(&mut cache, settled, &tx),
            ApplyOutcome::Stale { generation: g0 }
        );
        assert!(requests(&mut rx).is_empty());
        assert_eq!(cache.counts().pending, 1);
        assert_eq!(
            cache.get(Identity::new(g0.next(), 0)).unwrap().phase(),
            Phase::Pending
        );
    }
}

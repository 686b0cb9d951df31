//! Preview session: one document, re-rendered as its content resolves.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use km_renderer::{HtmlBackend, MarkdownRenderer, RenderResult};
use tokio::runtime::Handle;

use crate::cache::{Generation, ResolutionCache};
use crate::encoder::KrokiEncoder;
use crate::resolver::{FileSystem, Resolver};
use crate::scanner::{BlockScanner, ScanOptions};
use crate::scheduler::{ApplyOutcome, PendingBatch, RenderHost, RenderScheduler, SettledBatch};

/// Final output of [`PreviewSession::render_settled`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettledRender {
    /// Output of the last pass.
    pub result: RenderResult,
    /// Number of passes it took.
    pub passes: usize,
}

/// Renders one markdown document, resolving kroki blocks between passes.
///
/// Every [`update`](Self::update) starts a new [`Generation`] with an empty
/// cache; resolutions still registered for the previous one are aborted.
///
/// # Example
///
/// ```no_run
/// # async fn run() {
/// use km_kroki::{PreviewSession, TokioFs};
///
/// let mut session = PreviewSession::new(TokioFs, "docs");
/// session.update("```kroki {lang=graphviz}\ndigraph { a -> b }\n```");
/// let settled = session.render_settled().await;
/// assert!(settled.result.html.starts_with(r#"<img src="https://kroki.io/graphviz/svg/"#));
/// # }
/// ```
pub struct PreviewSession<F> {
    resolver: Arc<Resolver<F>>,
    options: ScanOptions,
    scheduler: RenderScheduler,
    runtime: Handle,
    source: String,
    cache: ResolutionCache,
}

impl<F: FileSystem> PreviewSession<F> {
    /// Create a session resolving file references under `workspace_root`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(fs: F, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            resolver: Arc::new(Resolver::new(fs, workspace_root)),
            options: ScanOptions::default(),
            scheduler: RenderScheduler::default(),
            runtime: Handle::current(),
            source: String::new(),
            cache: ResolutionCache::default(),
        }
    }

    /// Set the Kroki server used in image URLs.
    #[must_use]
    pub fn server_url(mut self, server_url: impl Into<String>) -> Self {
        self.options.encoder = KrokiEncoder::new(server_url);
        self
    }

    /// Set the info-string token marking kroki blocks.
    #[must_use]
    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.options.marker = marker.into();
        self
    }

    /// Set the diagram type for blocks without a `lang` attribute.
    #[must_use]
    pub fn default_lang(mut self, lang: Option<String>) -> Self {
        self.options.default_lang = lang;
        self
    }

    /// Set the per-resolution timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.scheduler = RenderScheduler::new(timeout);
        self
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.cache.generation()
    }

    /// Current document source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Cache of the current generation.
    #[must_use]
    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Scan settings.
    #[must_use]
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Replace the document and start a new generation.
    pub fn update(&mut self, markdown: impl Into<String>) -> Generation {
        let generation = self.cache.generation().next();
        let previous = std::mem::replace(&mut self.cache, ResolutionCache::new(generation));
        tracing::debug!(
            %generation,
            discarded = previous.len(),
            "Starting new generation"
        );
        drop(previous);
        self.source = markdown.into();
        generation
    }

    /// Run one synchronous render pass.
    ///
    /// Missing resolutions are started, not awaited; their blocks render as
    /// placeholders.
    pub fn render_pass(&mut self) -> RenderResult {
        let mut scanner =
            BlockScanner::new(&mut self.cache, &self.resolver, &self.runtime, &self.options);
        let result = MarkdownRenderer::<HtmlBackend>::new()
            .with_processor(&mut scanner)
            .render_markdown(&self.source);
        let started = scanner.started();
        tracing::debug!(
            generation = %self.cache.generation(),
            placeholders = result.placeholders,
            started,
            "Render pass"
        );
        result
    }

    /// Take the resolutions started by earlier passes for awaiting.
    pub fn collect_pending(&mut self) -> PendingBatch {
        self.scheduler.collect(&mut self.cache)
    }

    /// Write a settled batch into the current cache.
    pub fn apply(&mut self, settled: SettledBatch, host: &impl RenderHost) -> ApplyOutcome {
        RenderScheduler::apply(&mut self.cache, settled, host)
    }

    /// Await everything pending and request a re-render if anything settled.
    pub async fn schedule(&mut self, host: &impl RenderHost) -> ApplyOutcome {
        self.scheduler.run(&mut self.cache, host).await
    }

    /// Render until no further pass is requested.
    pub async fn render_settled(&mut self) -> SettledRender {
        let requested = RenderFlag::default();
        let mut passes = 0;
        loop {
            let result = self.render_pass();
            passes += 1;
            self.schedule(&requested).await;
            if !requested.take() {
                return SettledRender { result, passes };
            }
        }
    }
}

#[derive(Default)]
struct RenderFlag(AtomicBool);

impl RenderFlag {
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl RenderHost for RenderFlag {
    fn request_render(&self, _generation: Generation) {
        self.0.store(true, Ordering::Release);
    }
}

//! Per-pass kroki block handling.
//!
//! [`BlockScanner`] is the [`CodeBlockProcessor`] registered for one render
//! pass. It never waits: a block whose content is not resolved yet gets a
//! placeholder and, on first sighting, a spawned resolution registered in the
//! cache. The [`RenderScheduler`](crate::RenderScheduler) awaits those later.

use std::sync::Arc;

use km_renderer::{CodeBlockProcessor, FencedBlock, ProcessResult, escape_html};
use tokio::runtime::Handle;

use crate::attrs::{BlockAttributes, parse_info_attributes};
use crate::cache::{Identity, ResolutionCache, ResolutionState};
use crate::consts::{DEFAULT_MARKER, IMAGE_ALT};
use crate::encoder::KrokiEncoder;
use crate::resolver::{FileSystem, ResolutionError, Resolver};

/// Settings shared by every pass of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanOptions {
    /// URL builder for Ready blocks.
    pub encoder: KrokiEncoder,
    /// Leading info-string token identifying kroki blocks.
    pub marker: String,
    /// Diagram type for blocks without a `lang` attribute.
    pub default_lang: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            encoder: KrokiEncoder::default(),
            marker: DEFAULT_MARKER.to_owned(),
            default_lang: None,
        }
    }
}

/// Markup for a block whose content is still being resolved.
#[must_use]
pub fn placeholder(index: usize) -> String {
    format!(r#"<img src="" alt="{IMAGE_ALT}" data-kroki-pending="{index}">"#)
}

/// Markup for a block with resolved content.
#[must_use]
pub fn image_fragment(url: &str) -> String {
    format!(r#"<img src="{}" alt="{IMAGE_ALT}"><br/>"#, escape_html(url))
}

/// Code block processor handling kroki blocks for one render pass.
pub struct BlockScanner<'c, F> {
    cache: &'c mut ResolutionCache,
    resolver: &'c Arc<Resolver<F>>,
    runtime: &'c Handle,
    options: &'c ScanOptions,
    warnings: Vec<String>,
    started: usize,
}

impl<'c, F: FileSystem> BlockScanner<'c, F> {
    /// Create a scanner for one pass over the cache's generation.
    ///
    /// Resolutions are spawned on `runtime`.
    pub fn new(
        cache: &'c mut ResolutionCache,
        resolver: &'c Arc<Resolver<F>>,
        runtime: &'c Handle,
        options: &'c ScanOptions,
    ) -> Self {
        Self {
            cache,
            resolver,
            runtime,
            options,
            warnings: Vec::new(),
            started: 0,
        }
    }

    /// Number of resolutions started during this pass.
    #[must_use]
    pub fn started(&self) -> usize {
        self.started
    }

    fn start(&mut self, identity: Identity, raw: &str) {
        let resolver = Arc::clone(self.resolver);
        let raw = raw.to_owned();
        tracing::debug!(block = %identity, "Starting resolution");
        let handle = self
            .runtime
            .spawn(async move { resolver.resolve(&raw).await });
        if self.cache.set_pending(identity, handle) {
            self.started += 1;
        }
    }
}

impl<F: FileSystem> CodeBlockProcessor for BlockScanner<'_, F> {
    fn process(&mut self, block: &FencedBlock<'_>) -> ProcessResult {
        if block.language != self.options.marker {
            return ProcessResult::PassThrough;
        }

        let entry = self.cache.get_or_create(block.index);
        let identity = entry.identity();
        match entry.state() {
            ResolutionState::Unresolved => {
                self.start(identity, block.source);
                ProcessResult::Placeholder(placeholder(block.index))
            }
            ResolutionState::Pending => ProcessResult::Placeholder(placeholder(block.index)),
            ResolutionState::Ready(content) => ProcessResult::Inline(ready_markup(
                self.options,
                &mut self.warnings,
                block,
                content,
            )),
            ResolutionState::Failed(err) => {
                report_failure(&mut self.warnings, identity, err);
                ProcessResult::PassThrough
            }
        }
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

fn ready_markup(
    options: &ScanOptions,
    warnings: &mut Vec<String>,
    block: &FencedBlock<'_>,
    content: &str,
) -> String {
    let attrs = parse_info_attributes(block.info_rest()).unwrap_or_else(|err| {
        warnings.push(format!(
            "kroki block {}: {err}; attributes ignored",
            block.index
        ));
        BlockAttributes::default()
    });

    let lang = if let Some(lang) = attrs.lang().or(options.default_lang.as_deref()) {
        lang
    } else {
        warnings.push(format!(
            "kroki block {}: no diagram type, add {{lang=...}} to the info string",
            block.index
        ));
        ""
    };

    image_fragment(&options.encoder.url(content, lang))
}

fn report_failure(warnings: &mut Vec<String>, identity: Identity, err: &ResolutionError) {
    tracing::warn!(block = %identity, error = %err, "Kroki block failed, rendering source");
    warnings.push(format!("kroki block {}: {err}", identity.index));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cache::{Generation, Phase};
    use crate::test_fs::MemoryFs;

    const GOLDEN_SOURCE: &str = "digraph G {\n  Hello->World\n}";
    const GOLDEN_IMG: &str = r#"<img src="https://kroki.io/graphviz/svg/eNpLyUwvSizIUHBXqOZSUPBIzcnJ17ULzy_KSeGqBQCEzQka" alt="kroki"><br/>"#;

    struct Fixture {
        cache: ResolutionCache,
        resolver: Arc<Resolver<Arc<MemoryFs>>>,
        fs: Arc<MemoryFs>,
        options: ScanOptions,
    }

    impl Fixture {
        fn new(fs: MemoryFs) -> Self {
            let fs = Arc::new(fs);
            Self {
                cache: ResolutionCache::new(Generation::default()),
                resolver: Arc::new(Resolver::new(Arc::clone(&fs), "/ws")),
                fs,
                options: ScanOptions::default(),
            }
        }

        fn scan(&mut self, block: &FencedBlock<'_>) -> (ProcessResult, Vec<String>, usize) {
            let runtime = Handle::current();
            let mut scanner =
                BlockScanner::new(&mut self.cache, &self.resolver, &runtime, &self.options);
            let result = scanner.process(block);
            (result, scanner.warnings().to_vec(), scanner.started())
        }

        async fn settle_all(&mut self) {
            for (identity, handle) in self.cache.take_unawaited() {
                let result = handle.await.unwrap();
                self.cache.settle(identity, result);
            }
        }
    }

    #[tokio::test]
    async fn test_other_languages_pass_through() {
        let mut fixture = Fixture::new(MemoryFs::new());
        let (result, warnings, started) = fixture.scan(&FencedBlock::new(0, "rust", "fn x() {}"));
        assert_eq!(result, ProcessResult::PassThrough);
        assert!(warnings.is_empty());
        assert_eq!(started, 0);
        assert!(fixture.cache.is_empty());
    }

    #[tokio::test]
    async fn test_marker_must_be_leading_token() {
        let mut fixture = Fixture::new(MemoryFs::new());
        let (result, ..) = fixture.scan(&FencedBlock::new(0, "krokix {lang=dot}", "a"));
        assert_eq!(result, ProcessResult::PassThrough);
        assert!(fixture.cache.is_empty());
    }

    #[tokio::test]
    async fn test_first_sighting_starts_resolution() {
        let mut fixture = Fixture::new(MemoryFs::new());
        let block = FencedBlock::new(4, "kroki {lang=graphviz}", "a -> b");
        let (result, warnings, started) = fixture.scan(&block);

        assert_eq!(
            result,
            ProcessResult::Placeholder(
                r#"<img src="" alt="kroki" data-kroki-pending="4">"#.to_owned()
            )
        );
        assert!(warnings.is_empty());
        assert_eq!(started, 1);
        assert_eq!(fixture.cache.counts().pending, 1);
    }

    #[tokio::test]
    async fn test_pending_block_is_not_started_twice() {
        let mut fixture = Fixture::new(MemoryFs::new().gated());
        let block = FencedBlock::new(0, "kroki", "a.puml");
        fixture.scan(&block);
        let (result, _, started) = fixture.scan(&block);

        assert!(matches!(result, ProcessResult::Placeholder(_)));
        assert_eq!(started, 0);
        fixture.fs.release(1);
        fixture.settle_all().await;
        assert_eq!(fixture.fs.probes("/ws/a.puml"), 1);
    }

    #[tokio::test]
    async fn test_ready_block_renders_image() {
        let mut fixture = Fixture::new(MemoryFs::new());
        let block = FencedBlock::new(0, "kroki {lang=graphviz}", GOLDEN_SOURCE);
        fixture.scan(&block);
        fixture.settle_all().await;

        let (result, warnings, started) = fixture.scan(&block);
        assert_eq!(result, ProcessResult::Inline(GOLDEN_IMG.to_owned()));
        assert!(warnings.is_empty());
        assert_eq!(started, 0);
    }

    #[tokio::test]
    async fn test_ready_block_from_file() {
        let mut fixture =
            Fixture::new(MemoryFs::new().with_file("/ws/docs/g.dot", GOLDEN_SOURCE));
        let block = FencedBlock::new(0, "kroki lang=graphviz", "docs/g.dot\n");
        fixture.scan(&block);
        fixture.settle_all().await;

        let (result, ..) = fixture.scan(&block);
        assert_eq!(result, ProcessResult::Inline(GOLDEN_IMG.to_owned()));
    }

    #[tokio::test]
    async fn test_default_lang_and_missing_lang() {
        let mut fixture = Fixture::new(MemoryFs::new());
        let block = FencedBlock::new(0, "kroki", GOLDEN_SOURCE);
        fixture.scan(&block);
        fixture.settle_all().await;

        let (result, warnings, _) = fixture.scan(&block);
        let ProcessResult::Inline(html) = result else {
            panic!("expected inline markup");
        };
        assert!(html.starts_with(r#"<img src="https://kroki.io//svg/"#));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("no diagram type"));

        fixture.options.default_lang = Some("graphviz".to_owned());
        let (result, warnings, _) = fixture.scan(&block);
        assert_eq!(result, ProcessResult::Inline(GOLDEN_IMG.to_owned()));
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_attribute_error_still_resolves() {
        let mut fixture = Fixture::new(MemoryFs::new());
        fixture.options.default_lang = Some("graphviz".to_owned());
        let block = FencedBlock::new(0, r#"kroki {lang="graphviz}"#, GOLDEN_SOURCE);
        let (_, _, started) = fixture.scan(&block);
        assert_eq!(started, 1);
        fixture.settle_all().await;

        let (result, warnings, _) = fixture.scan(&block);
        assert_eq!(result, ProcessResult::Inline(GOLDEN_IMG.to_owned()));
        assert_eq!(
            warnings,
            vec!["kroki block 0: unterminated quote in value of 'lang'; attributes ignored"]
        );
    }

    #[tokio::test]
    async fn test_failed_block_passes_through_with_warning() {
        let mut fixture = Fixture::new(MemoryFs::new().with_unreadable("/ws/locked.puml"));
        let block = FencedBlock::new(2, "kroki {lang=plantuml}", "locked.puml");
        fixture.scan(&block);
        fixture.settle_all().await;
        assert_eq!(fixture.cache.counts().failed, 1);

        let (result, warnings, started) = fixture.scan(&block);
        assert_eq!(result, ProcessResult::PassThrough);
        assert_eq!(started, 0);
        assert_eq!(
            warnings,
            vec!["kroki block 2: failed to read /ws/locked.puml: permission denied"]
        );
    }

    #[tokio::test]
    async fn test_custom_marker_and_server() {
        let mut fixture = Fixture::new(MemoryFs::new());
        fixture.options = ScanOptions {
            encoder: KrokiEncoder::new("http://localhost:8000/"),
            marker: "diagram".to_owned(),
            default_lang: None,
        };
        let kroki = FencedBlock::new(0, "kroki {lang=graphviz}", GOLDEN_SOURCE);
        assert_eq!(fixture.scan(&kroki).0, ProcessResult::PassThrough);

        let block = FencedBlock::new(1, "diagram {lang=graphviz}", GOLDEN_SOURCE);
        fixture.scan(&block);
        fixture.settle_all().await;
        let (result, ..) = fixture.scan(&block);
        assert_eq!(
            result,
            ProcessResult::Inline(GOLDEN_IMG.replace("https://kroki.io", "http://localhost:8000"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanning_never_waits_on_resolution() {
        let mut fixture = Fixture::new(MemoryFs::new().with_delay(Duration::from_secs(3600)));
        let started = tokio::time::Instant::now();
        for index in 0..10 {
            fixture.scan(&FencedBlock::new(index, "kroki", "slow.puml"));
        }
        assert_eq!(tokio::time::Instant::now(), started);
        assert_eq!(fixture.cache.counts().pending, 10);
        assert_eq!(
            fixture
                .cache
                .entries()
                .filter(|e| e.phase() == Phase::Pending)
                .count(),
            10
        );
    }
}

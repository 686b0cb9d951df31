//! Fenced block hook for extensible code block handling.
//!
//! Processors are registered with the renderer and offered every fenced code
//! block in document order. The first processor returning something other
//! than [`ProcessResult::PassThrough`] wins; otherwise the backend renders the
//! block as ordinary code.
//!
//! # Example
//!
//! ```
//! use km_renderer::{CodeBlockProcessor, FencedBlock, ProcessResult};
//!
//! struct Shout;
//!
//! impl CodeBlockProcessor for Shout {
//!     fn process(&mut self, block: &FencedBlock<'_>) -> ProcessResult {
//!         if block.language == "shout" {
//!             ProcessResult::Inline(format!("<p>{}</p>", block.source.to_uppercase()))
//!         } else {
//!             ProcessResult::PassThrough
//!         }
//!     }
//! }
//! ```

/// Result of processing a code block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// Replace the block with a stand-in fragment while its content is not
    /// available yet.
    ///
    /// The renderer counts placeholders in [`RenderResult::placeholders`]
    /// so the caller knows another pass will be needed.
    ///
    /// [`RenderResult::placeholders`]: crate::RenderResult::placeholders
    Placeholder(String),

    /// Replace the block with final markup.
    Inline(String),

    /// Render as a regular code block.
    PassThrough,
}

/// A fenced code block as seen by processors during one render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FencedBlock<'a> {
    /// Zero-based ordinal of this code block in the document.
    ///
    /// Stable across passes over the same parse, meaningless across parses.
    pub index: usize,
    /// Full info string after the opening fence (e.g. `kroki {lang=graphviz}`).
    pub info: &'a str,
    /// First whitespace-delimited token of the info string.
    pub language: &'a str,
    /// Raw content of the block.
    pub source: &'a str,
}

impl<'a> FencedBlock<'a> {
    /// Build a block view, splitting the language token off `info`.
    #[must_use]
    pub fn new(index: usize, info: &'a str, source: &'a str) -> Self {
        let info = info.trim();
        let language = info.split_whitespace().next().unwrap_or("");
        Self {
            index,
            info,
            language,
            source,
        }
    }

    /// Info string with the language token removed.
    #[must_use]
    pub fn info_rest(&self) -> &'a str {
        self.info[self.language.len()..].trim_start()
    }
}

/// Hook invoked once per fenced code block per render pass.
///
/// Implementations must return immediately; a render pass never suspends.
pub trait CodeBlockProcessor {
    /// Process a code block and return the fragment to emit.
    fn process(&mut self, block: &FencedBlock<'_>) -> ProcessResult;

    /// Warnings generated during the current pass.
    ///
    /// Default implementation returns empty slice.
    fn warnings(&self) -> &[String] {
        &[]
    }
}

impl<P: CodeBlockProcessor + ?Sized> CodeBlockProcessor for &mut P {
    fn process(&mut self, block: &FencedBlock<'_>) -> ProcessResult {
        (**self).process(block)
    }

    fn warnings(&self) -> &[String] {
        (**self).warnings()
    }
}

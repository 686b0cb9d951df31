//! Markdown renderer with pluggable backends and fenced block hooks.
//!
//! [`MarkdownRenderer`] walks pulldown-cmark events and writes markup through
//! a [`RenderBackend`]. Fenced code blocks are offered to registered
//! [`CodeBlockProcessor`]s first; a processor may replace the block with its
//! own fragment or let it fall through to the backend's code block.
//!
//! A render pass is synchronous and runs to completion. Processors that need
//! asynchronous work must start it during [`CodeBlockProcessor::process`],
//! emit a [`ProcessResult::Placeholder`], and let the caller schedule another
//! pass once the work has settled.
//!
//! # Example
//!
//! ```
//! use km_renderer::{HtmlBackend, MarkdownRenderer};
//!
//! let result = MarkdownRenderer::<HtmlBackend>::new().render_markdown("# Hello\n\n**Bold** text");
//! assert!(result.html.contains("<strong>Bold</strong>"));
//! ```

mod backend;
mod code_block;
mod html;
mod renderer;
mod state;

pub use backend::RenderBackend;
pub use code_block::{CodeBlockProcessor, FencedBlock, ProcessResult};
pub use html::HtmlBackend;
pub use renderer::{MarkdownRenderer, RenderResult};
pub use state::escape_html;

//! Kroki diagram blocks for markdown previews.
//!
//! Fenced blocks whose info string starts with `kroki` are rendered as images
//! served by a [Kroki](https://kroki.io) instance. A block holds either the
//! diagram source or a path to a workspace file containing it:
//!
//! ````markdown
//! ```kroki {lang=graphviz}
//! diagrams/build.dot
//! ```
//! ````
//!
//! The markdown renderer is synchronous and cannot wait for file reads, so
//! rendering happens in passes:
//!
//! 1. [`BlockScanner`] emits a placeholder for every block whose content is
//!    not resolved yet and spawns its resolution.
//! 2. [`RenderScheduler`] awaits the spawned resolutions as one batch, stores
//!    the results in the [`ResolutionCache`] and requests one more pass.
//! 3. The next pass emits `<img>` tags pointing at Kroki URLs built by
//!    [`KrokiEncoder`].
//!
//! Caches are scoped to a [`Generation`]; re-parsing a document starts a new
//! one and late results for the old generation are discarded.
//! [`PreviewSession`] drives the whole cycle for one document.

mod attrs;
mod cache;
mod consts;
mod encoder;
mod resolver;
mod scanner;
mod scheduler;
mod session;
#[cfg(test)]
mod test_fs;

pub use attrs::{AttributeParseError, BlockAttributes, parse_info_attributes};
pub use cache::{
    Generation, Identity, Phase, PhaseCounts, ResolutionCache, ResolutionEntry,
    ResolutionHandle, ResolutionState, SettleOutcome,
};
pub use consts::{DEFAULT_MARKER, DEFAULT_SERVER_URL, DEFAULT_TIMEOUT};
pub use encoder::{KrokiEncoder, encode, encode_token};
pub use resolver::{FileSystem, ResolutionError, Resolver, TokioFs};
pub use scanner::{BlockScanner, ScanOptions, image_fragment, placeholder};
pub use scheduler::{
    ApplyOutcome, PendingBatch, RenderHost, RenderScheduler, SettledBatch,
};
pub use session::{PreviewSession, SettledRender};

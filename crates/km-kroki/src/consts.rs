//! Internal constants for kroki block handling.

use std::time::Duration;

/// Default Kroki server.
pub const DEFAULT_SERVER_URL: &str = "https://kroki.io";

/// Info-string token that marks a fenced block as a diagram description.
pub const DEFAULT_MARKER: &str = "kroki";

/// Default bound on a single content resolution.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Output format path segment in generated URLs.
pub(crate) const OUTPUT_FORMAT: &str = "svg";

/// Alt text identifying diagram images emitted for kroki blocks.
pub(crate) const IMAGE_ALT: &str = "kroki";

/// Attribute selecting the diagram type path segment.
pub(crate) const LANG_ATTRIBUTE: &str = "lang";

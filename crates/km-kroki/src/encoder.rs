//! Kroki URL encoding.
//!
//! Kroki accepts diagram sources in the request path: the source is
//! zlib-compressed at the highest level, base64-encoded, and made URL safe by
//! swapping `+`/`/` for `-`/`_`. Padding is kept as produced.
//!
//! Encoding is pure: the same `(content, diagram_type)` always yields the same
//! URL, so a URL can be recomputed on every render pass instead of cached.

use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use flate2::Compression;
use flate2::write::ZlibEncoder;

use crate::consts::{DEFAULT_SERVER_URL, OUTPUT_FORMAT};

/// Builds Kroki image URLs for a configured server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KrokiEncoder {
    server_url: String,
}

impl KrokiEncoder {
    /// Create an encoder for the given server (e.g. `"https://kroki.io"`).
    ///
    /// Trailing slashes are dropped so the path segments join cleanly.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        let mut server_url = server_url.into();
        server_url.truncate(server_url.trim_end_matches('/').len());
        Self { server_url }
    }

    /// Server URL without trailing slash.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Image URL for `content` rendered as `diagram_type`.
    ///
    /// Format: `{server}/{diagram_type}/svg/{token}`.
    #[must_use]
    pub fn url(&self, content: &str, diagram_type: &str) -> String {
        format!(
            "{}/{diagram_type}/{OUTPUT_FORMAT}/{}",
            self.server_url,
            encode_token(content)
        )
    }
}

impl Default for KrokiEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

/// Image URL for `content` on the public Kroki server.
///
/// # Example
///
/// ```
/// let url = km_kroki::encode("digraph G {\n  Hello->World\n}", "graphviz");
/// assert_eq!(
///     url,
///     "https://kroki.io/graphviz/svg/eNpLyUwvSizIUHBXqOZSUPBIzcnJ17ULzy_KSeGqBQCEzQka"
/// );
/// ```
#[must_use]
pub fn encode(content: &str, diagram_type: &str) -> String {
    KrokiEncoder::default().url(content, diagram_type)
}

/// URL-safe token for `content`: zlib at level 9, then URL-safe base64.
///
/// # Panics
///
/// Compressing into memory cannot fail; a failure here is a bug and panics.
#[must_use]
pub fn encode_token(content: &str) -> String {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(content.len() / 2 + 16),
        Compression::best(),
    );
    encoder
        .write_all(content.as_bytes())
        .expect("zlib compression into a Vec cannot fail");
    let compressed = encoder
        .finish()
        .expect("zlib compression into a Vec cannot fail");
    URL_SAFE.encode(compressed)
}

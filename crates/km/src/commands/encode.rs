//! `km encode` command implementation.

use std::io::Read;
use std::path::PathBuf;

use clap::Args;
use km_config::{CliSettings, Config};
use km_kroki::KrokiEncoder;

use crate::error::CliError;
use crate::output::write_document;

/// Arguments for the encode command.
#[derive(Args)]
pub(crate) struct EncodeArgs {
    /// Diagram type (e.g. graphviz, plantuml, mermaid).
    lang: String,

    /// File with the diagram source (default: read stdin).
    file: Option<PathBuf>,

    /// Kroki server URL (overrides config).
    #[arg(long, env = "KM_KROKI_URL")]
    kroki_url: Option<String>,

    /// Path to configuration file (default: auto-discover km.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl EncodeArgs {
    /// Execute the encode command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the source cannot be read.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        if self.lang.trim().is_empty() {
            return Err(CliError::Validation("diagram type cannot be empty".to_owned()));
        }

        let cli_settings = CliSettings {
            kroki_url: self.kroki_url,
            ..Default::default()
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;

        let source = match &self.file {
            Some(path) => std::fs::read_to_string(path)?,
            None => {
                let mut input = String::new();
                std::io::stdin().read_to_string(&mut input)?;
                inline_source(&input).to_owned()
            }
        };

        let encoder = KrokiEncoder::new(config.kroki.server_url);
        write_document(None, &encoder.url(&source, self.lang.trim()))?;
        Ok(())
    }
}

/// Source typed or piped in, trimmed the way inline block text is.
fn inline_source(input: &str) -> &str {
    input.trim()
}

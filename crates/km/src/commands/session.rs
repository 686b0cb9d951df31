//! Options shared by commands that run a preview session.

use std::path::PathBuf;

use clap::Args;
use km_config::{CliSettings, Config};
use km_kroki::{PreviewSession, TokioFs};

use crate::error::CliError;

/// Configuration and override flags for a preview session.
#[derive(Args)]
pub(crate) struct SessionArgs {
    /// Path to configuration file (default: auto-discover km.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory that file references in kroki blocks are relative to (overrides config).
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Kroki server URL (overrides config).
    #[arg(long, env = "KM_KROKI_URL")]
    kroki_url: Option<String>,

    /// Timeout for resolving a single block, in milliseconds (overrides config).
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable verbose output (show resolution and timing logs).
    #[arg(short, long)]
    pub verbose: bool,
}

impl SessionArgs {
    /// Load configuration with CLI overrides applied.
    pub(crate) fn load_config(&self) -> Result<Config, CliError> {
        let cli_settings = CliSettings {
            kroki_url: self.kroki_url.clone(),
            workspace_root: self.workspace.clone(),
            timeout_ms: self.timeout_ms,
        };
        Ok(Config::load(self.config.as_deref(), Some(&cli_settings))?)
    }
}

/// Build a session reading workspace files from disk.
pub(crate) fn preview_session(config: &Config) -> PreviewSession<TokioFs> {
    PreviewSession::new(TokioFs, &config.resolver_resolved.workspace_root)
        .server_url(&config.kroki.server_url)
        .marker(&config.kroki.marker)
        .default_lang(config.kroki.default_lang.clone())
        .timeout(config.resolver_resolved.timeout)
}

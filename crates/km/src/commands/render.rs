//! `km render` command implementation.

use std::path::PathBuf;

use clap::Args;

use super::session::{SessionArgs, preview_session};
use crate::error::CliError;
use crate::output::{Output, write_document};

/// Arguments for the render command.
#[derive(Args)]
pub(crate) struct RenderArgs {
    /// Path to the markdown file.
    file: PathBuf,

    /// Write HTML to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    pub session: SessionArgs,
}

impl RenderArgs {
    /// Execute the render command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or files cannot be read or written.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let config = self.session.load_config()?;

        let markdown = tokio::fs::read_to_string(&self.file).await?;
        let mut session = preview_session(&config);
        session.update(markdown);
        let settled = session.render_settled().await;

        output.warnings(&settled.result.warnings);
        write_document(self.output.as_deref(), &settled.result.html)?;

        if let Some(path) = &self.output {
            let counts = session.cache().counts();
            output.success(&format!(
                "Rendered {} to {} ({} diagrams, {} failed, {} passes)",
                self.file.display(),
                path.display(),
                counts.ready,
                counts.failed,
                settled.passes
            ));
        }
        Ok(())
    }
}

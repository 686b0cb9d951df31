//! `km watch` command implementation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use clap::Args;
use km_kroki::SettledRender;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::session::{SessionArgs, preview_session};
use crate::error::CliError;
use crate::output::{Output, write_document};

/// Arguments for the watch command.
#[derive(Args)]
pub(crate) struct WatchArgs {
    /// Path to the markdown file.
    file: PathBuf,

    /// File to write rendered HTML to.
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    pub session: SessionArgs,
}

enum Step {
    Rendered(SettledRender),
    Changed,
    Closed,
}

impl WatchArgs {
    /// Execute the watch command.
    ///
    /// Every change to the file starts a new generation; resolutions still in
    /// flight for the previous content are abandoned.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails, the watcher cannot be set up,
    /// or files cannot be read or written.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let config = self.session.load_config()?;
        let mut session = preview_session(&config);

        let (tx, mut changes) = mpsc::channel::<()>(16);
        let target = self.file.file_name().map(OsStr::to_os_string);
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res
                && is_change_to(&event, target.as_deref())
            {
                // Use blocking_send since callback is sync
                let _ = tx.blocking_send(());
            }
        })?;
        // Watch the directory so editors that replace the file are still seen
        watcher.watch(watch_dir(&self.file), RecursiveMode::NonRecursive)?;

        output.highlight(&format!(
            "Watching {} -> {}",
            self.file.display(),
            self.output.display()
        ));

        loop {
            let markdown = tokio::fs::read_to_string(&self.file).await?;
            let generation = session.update(markdown);
            tracing::info!(%generation, "Rendering {}", self.file.display());

            let step = tokio::select! {
                settled = session.render_settled() => Step::Rendered(settled),
                changed = changes.recv() => match changed {
                    Some(()) => Step::Changed,
                    None => Step::Closed,
                },
            };

            match step {
                Step::Rendered(settled) => {
                    output.warnings(&settled.result.warnings);
                    write_document(Some(&self.output), &settled.result.html)?;
                    output.success(&format!(
                        "Rendered {} ({} passes)",
                        self.output.display(),
                        settled.passes
                    ));
                    if changes.recv().await.is_none() {
                        break;
                    }
                }
                Step::Changed => output.info("Source changed, restarting render"),
                Step::Closed => break,
            }

            // Coalesce bursts of events from a single save
            while changes.try_recv().is_ok() {}
        }

        Ok(())
    }
}

/// Directory containing `file`.
fn watch_dir(file: &Path) -> &Path {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Whether `event` creates or modifies the file named `target`.
fn is_change_to(event: &Event, target: Option<&OsStr>) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|path| path.file_name() == target)
}

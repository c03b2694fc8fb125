//! Re-run incremental indexing when supported source files change.

use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use repodex_llm::EmbeddingProvider;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::indexer::CodeIndexer;
use crate::languages::is_indexable;

pub struct IndexWatcher {
    handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl IndexWatcher {
    /// Watch `root` recursively. Each debounced batch of changes to indexable
    /// files triggers one [`CodeIndexer::index_project`] run; failures are
    /// logged and the watcher keeps going.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start<P: EmbeddingProvider + 'static>(
        root: &Path,
        indexer: Arc<CodeIndexer<P>>,
    ) -> Result<Self> {
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(1);
        // Some backends report canonical paths, others the path as given.
        let roots = [
            root.to_path_buf(),
            std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf()),
        ];

        let mut debouncer = new_debouncer(
            Duration::from_secs(1),
            move |events: std::result::Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };

                let relevant = events.iter().any(|e| {
                    let root = roots
                        .iter()
                        .find(|r| e.path.starts_with(r))
                        .unwrap_or(&roots[0]);
                    e.kind == DebouncedEventKind::Any && is_relevant(root, &e.path)
                });
                if relevant {
                    // A full channel already holds a pending run.
                    let _ = notify_tx.try_send(());
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;

        let root = root.to_path_buf();
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            loop {
                tokio::select! {
                    () = run_cancel.cancelled() => break,
                    change = notify_rx.recv() => {
                        if change.is_none() {
                            break;
                        }
                    }
                }
                match indexer.index_project(&root, &run_cancel).await {
                    Ok(report) => tracing::debug!(
                        processed = report.files_processed,
                        removed = report.rows_removed,
                        "watch reindex done"
                    ),
                    Err(e) => tracing::warn!(root = %root.display(), "watch reindex failed: {e:#}"),
                }
            }
        });

        Ok(Self { handle, cancel })
    }

    /// Stop watching and abandon any run in progress.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Whether a change at `path` can affect the index.
///
/// Directory events count too: renaming or moving a directory may produce no
/// event for the files inside it. Paths under hidden directories (including
/// the snapshot's own `.repodex`) never do.
fn is_relevant(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let hidden = relative.components().any(|c| {
        matches!(c, Component::Normal(name) if name.to_string_lossy().starts_with('.'))
    });
    if hidden {
        return false;
    }
    if is_indexable(path) || path.is_dir() {
        return true;
    }
    // A directory that has just been moved away no longer exists to ask.
    !path.exists() && path.extension().is_none()
}

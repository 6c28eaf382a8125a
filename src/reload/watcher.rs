//! Template root watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;

/// Watches the template root and pokes the supervisor on every change.
pub struct TemplateWatcher {
    root: PathBuf,
    trigger: Arc<Notify>,
}

impl TemplateWatcher {
    pub fn new(root: &Path, trigger: Arc<Notify>) -> Self {
        Self {
            root: root.to_path_buf(),
            trigger,
        }
    }

    /// Start watching in the backend's own thread.
    ///
    /// The returned watcher must be kept alive for events to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let trigger = self.trigger.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_access() {
                        return;
                    }
                    tracing::debug!(paths = ?event.paths, kind = ?event.kind, "Template change detected");
                    trigger.notify_one();
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        tracing::info!(root = ?self.root, "Template watcher started");
        Ok(watcher)
    }
}

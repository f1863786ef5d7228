// src/watch/watcher.rs

use std::sync::Arc;

use anyhow::Context;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::console::{Console, LogPrefix};
use crate::errors::Result;
use crate::watch::patterns::{WatchMatcher, WatchPatterns};

/// Source of "something relevant changed" notifications for one watch
/// session.
///
/// The receiver returned by `start` buffers at most one pending
/// notification; further changes while one is pending are dropped.
pub trait ChangeSource: Send {
    fn start(&mut self) -> Result<mpsc::Receiver<()>>;
    fn stop(&mut self);
}

/// Creates a [`ChangeSource`] per watch session.
pub trait WatcherFactory: Send + Sync {
    fn create(
        &self,
        patterns: &WatchPatterns,
        prefix: Option<&LogPrefix>,
        console: &Arc<dyn Console>,
    ) -> Result<Box<dyn ChangeSource>>;
}

/// Production factory backed by `notify`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyWatcherFactory;

impl WatcherFactory for NotifyWatcherFactory {
    fn create(
        &self,
        patterns: &WatchPatterns,
        prefix: Option<&LogPrefix>,
        console: &Arc<dyn Console>,
    ) -> Result<Box<dyn ChangeSource>> {
        let matcher = WatchMatcher::new(patterns).context("Invalid format for `watch` config")?;
        Ok(Box::new(NotifyChangeSource {
            matcher: Arc::new(matcher),
            prefix: prefix.cloned(),
            console: Arc::clone(console),
            watcher: None,
        }))
    }
}

/// Watches the literal base directory of every include pattern recursively
/// and filters events through a [`WatchMatcher`] inside the notify callback.
pub struct NotifyChangeSource {
    matcher: Arc<WatchMatcher>,
    prefix: Option<LogPrefix>,
    console: Arc<dyn Console>,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for NotifyChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyChangeSource")
            .field("matcher", &self.matcher)
            .field("running", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl ChangeSource for NotifyChangeSource {
    fn start(&mut self) -> Result<mpsc::Receiver<()>> {
        let (tx, rx) = mpsc::channel::<()>(1);

        let matcher = Arc::clone(&self.matcher);
        let console = Arc::clone(&self.console);
        let prefix = self.prefix.clone();

        // Runs synchronously on notify's thread.
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event.kind.is_access() {
                    return;
                }
                if event.paths.iter().any(|path| matcher.should_track(path)) {
                    debug!(paths = ?event.paths, "relevant file change");
                    let _ = tx.try_send(());
                }
            }
            Err(err) => {
                console.error(prefix.as_ref(), &format!("File watching error: {err}"));
            }
        };

        let mut watcher =
            RecommendedWatcher::new(handler, Config::default()).context("Could not enable watch mode")?;

        for root in self.matcher.roots() {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch directory `{}`", root.display()))?;
            info!("file watcher started on {:?}", root);
        }

        if self.matcher.roots().is_empty() {
            self.console.warn(
                self.prefix.as_ref(),
                "No directories found to watch for changes",
            );
        }

        self.watcher = Some(watcher);
        Ok(rx)
    }

    fn stop(&mut self) {
        // Dropping the watcher unregisters every watch and closes the channel.
        if self.watcher.take().is_some() {
            debug!("file watcher stopped");
        }
    }
}

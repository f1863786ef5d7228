use std::sync::{Arc, Mutex};

use runbook::console::{Console, LogPrefix};
use runbook::errors::Result;
use runbook::watch::{ChangeSource, WatchPatterns, WatcherFactory};
use tokio::sync::mpsc;

/// Watcher factory whose change notifications are fired by the test.
#[derive(Debug, Default)]
pub struct ManualWatcherFactory {
    senders: Arc<Mutex<Vec<mpsc::Sender<()>>>>,
    created: Mutex<Vec<WatchPatterns>>,
}

impl ManualWatcherFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report a change to every started source. Like the real watcher, a
    /// notification is dropped while one is already pending.
    pub fn trigger(&self) {
        for tx in self.senders.lock().unwrap().iter() {
            let _ = tx.try_send(());
        }
    }

    /// Patterns of every source created so far.
    pub fn created(&self) -> Vec<WatchPatterns> {
        self.created.lock().unwrap().clone()
    }

    /// Number of sources currently started.
    pub fn active(&self) -> usize {
        self.senders
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl WatcherFactory for ManualWatcherFactory {
    fn create(
        &self,
        patterns: &WatchPatterns,
        _prefix: Option<&LogPrefix>,
        _console: &Arc<dyn Console>,
    ) -> Result<Box<dyn ChangeSource>> {
        self.created.lock().unwrap().push(patterns.clone());
        Ok(Box::new(ManualChangeSource {
            senders: Arc::clone(&self.senders),
        }))
    }
}

pub struct ManualChangeSource {
    senders: Arc<Mutex<Vec<mpsc::Sender<()>>>>,
}

impl ChangeSource for ManualChangeSource {
    fn start(&mut self) -> Result<mpsc::Receiver<()>> {
        let (tx, rx) = mpsc::channel(1);
        self.senders.lock().unwrap().push(tx);
        Ok(rx)
    }

    // The session drops its receiver, which closes the sender.
    fn stop(&mut self) {}
}

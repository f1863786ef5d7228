use std::sync::Mutex;
use std::time::Duration;

use runbook::console::{Console, ConsoleLine};

/// Console that keeps every line in memory.
#[derive(Debug, Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<ConsoleLine>>,
}

impl RecordingConsole {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<ConsoleLine> {
        self.lines.lock().unwrap().clone()
    }

    /// Every line rendered without colors, in emission order.
    pub fn plain(&self) -> Vec<String> {
        self.lines().iter().map(ConsoleLine::render_plain).collect()
    }

    /// Child output lines only (no status lines or markers), unprefixed.
    pub fn output(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|line| match line {
                ConsoleLine::Output { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Number of rendered lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.plain().iter().filter(|l| l.contains(needle)).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }

    /// Index of the first rendered line containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.plain().iter().position(|l| l.contains(needle))
    }

    /// Poll until a line containing `needle` shows up.
    pub async fn wait_for(&self, needle: &str) {
        while !self.contains(needle) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until at least `n` lines contain `needle`.
    pub async fn wait_for_count(&self, needle: &str, n: usize) {
        while self.count(needle) < n {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Number of child output lines equal to `text`.
    pub fn output_count(&self, text: &str) -> usize {
        self.output().iter().filter(|l| l.as_str() == text).count()
    }

    /// Poll until the child output contains `text` at least `n` times.
    pub async fn wait_for_output(&self, text: &str, n: usize) {
        while self.output_count(text) < n {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn dump(&self) -> String {
        self.plain().join("\n")
    }
}

impl Console for RecordingConsole {
    fn emit(&self, line: ConsoleLine) {
        self.lines.lock().unwrap().push(line);
    }
}

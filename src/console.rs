// src/console.rs

//! User-facing line output.
//!
//! Everything a user is meant to read while commands run (status lines,
//! child output, "Executing `...`" markers) goes through a [`Console`].
//! Diagnostics for developers go through `tracing` instead (see
//! `logging.rs`), which keeps stdout readable.
//!
//! Lines are rendered as:
//!
//! ```text
//! web ⟫ Running `pre` command...
//! web ⟫ WARNING: Restarting in 2 seconds... (attempt 1/3)
//! 2 api ⟫ ERROR: The command has failed with exit code 1
//! ```
//!
//! The numeric id before the prefix text only appears when the same text is
//! used by more than one command.

use std::collections::HashMap;
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex};

use colored::Colorize;

/// Longest prefix text (in chars) shown before truncation kicks in.
const MAX_PREFIX_CHARS: usize = 50;
const TRUNCATED_PREFIX_CHARS: usize = 47;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Color of a log prefix. Assigned in rotation by [`PrefixAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixColor {
    Cyan,
    Gray,
    Green,
    Magenta,
    Blue,
    Yellow,
    BrightMagenta,
}

impl PrefixColor {
    pub const ROTATION: [PrefixColor; 7] = [
        PrefixColor::Cyan,
        PrefixColor::Gray,
        PrefixColor::Green,
        PrefixColor::Magenta,
        PrefixColor::Blue,
        PrefixColor::Yellow,
        PrefixColor::BrightMagenta,
    ];

    fn paint(self, text: &str) -> String {
        let colored = match self {
            PrefixColor::Cyan => text.cyan(),
            PrefixColor::Gray => text.bright_black(),
            PrefixColor::Green => text.green(),
            PrefixColor::Magenta => text.magenta(),
            PrefixColor::Blue => text.blue(),
            PrefixColor::Yellow => text.yellow(),
            PrefixColor::BrightMagenta => text.bright_magenta(),
        };
        colored.to_string()
    }
}

/// A prefix as it should be printed right now (id already resolved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrefix {
    pub text: String,
    pub color: PrefixColor,
}

/// One line of user-facing output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLine {
    Status {
        level: Level,
        prefix: Option<RenderedPrefix>,
        message: String,
    },
    /// A line read from a child's stdout or stderr.
    Output {
        prefix: Option<RenderedPrefix>,
        text: String,
    },
    /// Marker emitted right before a command line starts in the shell.
    Executing {
        prefix: Option<RenderedPrefix>,
        command: String,
    },
}

impl ConsoleLine {
    /// Plain (uncolored) rendering, shared by every console implementation.
    pub fn render_plain(&self) -> String {
        match self {
            ConsoleLine::Status {
                level,
                prefix,
                message,
            } => {
                let body = match level {
                    Level::Info => message.clone(),
                    Level::Warn => format!("WARNING: {message}"),
                    Level::Error => format!("ERROR: {message}"),
                };
                with_prefix(prefix.as_ref().map(|p| p.text.as_str()), &body)
            }
            ConsoleLine::Output { prefix, text } => {
                with_prefix(prefix.as_ref().map(|p| p.text.as_str()), text)
            }
            ConsoleLine::Executing { prefix, command } => with_prefix(
                prefix.as_ref().map(|p| p.text.as_str()),
                &format!("Executing `{command}`"),
            ),
        }
    }

    fn render_colored(&self) -> String {
        let painted_prefix = |prefix: &Option<RenderedPrefix>| {
            prefix.as_ref().map(|p| p.color.paint(&p.text))
        };
        match self {
            ConsoleLine::Status {
                level,
                prefix,
                message,
            } => {
                let body = match level {
                    Level::Info => message.green().to_string(),
                    Level::Warn => format!("WARNING: {message}").yellow().to_string(),
                    Level::Error => format!("ERROR: {message}").red().to_string(),
                };
                with_prefix(painted_prefix(prefix).as_deref(), &body)
            }
            ConsoleLine::Output { prefix, text } => {
                with_prefix(painted_prefix(prefix).as_deref(), text)
            }
            ConsoleLine::Executing { prefix, command } => with_prefix(
                painted_prefix(prefix).as_deref(),
                &format!("Executing `{command}`").green().to_string(),
            ),
        }
    }
}

fn with_prefix(prefix: Option<&str>, body: &str) -> String {
    match prefix {
        Some(p) if !p.trim().is_empty() => format!("{p} {body}"),
        _ => body.to_string(),
    }
}

/// Sink for user-facing lines. Implementations must be cheap to call from
/// many tasks at once.
pub trait Console: Send + Sync {
    fn emit(&self, line: ConsoleLine);

    fn info(&self, prefix: Option<&LogPrefix>, message: &str) {
        self.status(Level::Info, prefix, message);
    }

    fn warn(&self, prefix: Option<&LogPrefix>, message: &str) {
        self.status(Level::Warn, prefix, message);
    }

    fn error(&self, prefix: Option<&LogPrefix>, message: &str) {
        self.status(Level::Error, prefix, message);
    }

    fn status(&self, level: Level, prefix: Option<&LogPrefix>, message: &str) {
        self.emit(ConsoleLine::Status {
            level,
            prefix: prefix.map(LogPrefix::render),
            message: message.to_string(),
        });
    }
}

/// Console writing to stdout, colored unless `NO_COLOR` is set or stdout is
/// not a terminal.
#[derive(Debug)]
pub struct StdConsole {
    color: bool,
}

impl StdConsole {
    pub fn new() -> Self {
        let color = std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal();
        Self { color }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for StdConsole {
    fn emit(&self, line: ConsoleLine) {
        let rendered = if self.color {
            line.render_colored()
        } else {
            line.render_plain()
        };
        // Locking stdout keeps concurrent lines from interleaving mid-line.
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{rendered}");
    }
}

/// Identity used to prefix every line belonging to one runner entry.
#[derive(Debug, Clone)]
pub struct LogPrefix {
    text: String,
    id: usize,
    color: PrefixColor,
    allocator: Arc<PrefixAllocator>,
}

impl LogPrefix {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn color(&self) -> PrefixColor {
        self.color
    }

    /// Render as `"<id> <text> ⟫"`, where the id is only shown once more
    /// than one command shares the same text.
    pub fn render(&self) -> RenderedPrefix {
        let show_id = self.allocator.count(&self.text) > 1;
        RenderedPrefix {
            text: format_prefix(self.id, &self.text, show_id),
            color: self.color,
        }
    }
}

/// Pure formatting of a prefix, exposed for tests.
pub fn format_prefix(id: usize, text: &str, show_id: bool) -> String {
    let shown = if text.chars().count() > MAX_PREFIX_CHARS {
        let head: String = text.chars().take(TRUNCATED_PREFIX_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    };

    if show_id {
        format!("{id} {shown} ⟫")
    } else {
        format!("{shown} ⟫")
    }
}

/// Hands out log prefixes: per-text instance counters plus a color rotation.
#[derive(Debug, Default)]
pub struct PrefixAllocator {
    state: Mutex<AllocatorState>,
}

#[derive(Debug, Default)]
struct AllocatorState {
    counts: HashMap<String, usize>,
    next_color: usize,
}

impl PrefixAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn allocate(self: &Arc<Self>, text: &str) -> LogPrefix {
        let (id, color) = {
            let mut state = self.lock();
            let count = state.counts.entry(text.to_string()).or_insert(0);
            *count += 1;
            let id = *count;

            let color = PrefixColor::ROTATION[state.next_color % PrefixColor::ROTATION.len()];
            state.next_color = (state.next_color + 1) % PrefixColor::ROTATION.len();
            (id, color)
        };

        LogPrefix {
            text: text.to_string(),
            id,
            color,
            allocator: Arc::clone(self),
        }
    }

    /// How many prefixes have been handed out for `text` so far.
    pub fn count(&self, text: &str) -> usize {
        self.lock().counts.get(text).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AllocatorState> {
        // A poisoned counter map is still a valid counter map.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

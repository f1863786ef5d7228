// src/exec/output.rs

//! Line pumps for child stdout/stderr.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::console::{Console, ConsoleLine, LogPrefix};

/// The two pump tasks of one child process.
#[derive(Debug)]
pub(crate) struct OutputPumps {
    handles: Vec<JoinHandle<()>>,
}

impl OutputPumps {
    pub(crate) fn spawn(
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
        console: &Arc<dyn Console>,
        prefix: Option<&LogPrefix>,
        markers: HashMap<String, String>,
    ) -> Self {
        let mut handles = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            handles.push(tokio::spawn(pump(
                stdout,
                Arc::clone(console),
                prefix.cloned(),
                Some(markers),
            )));
        }
        if let Some(stderr) = stderr {
            handles.push(tokio::spawn(pump(
                stderr,
                Arc::clone(console),
                prefix.cloned(),
                None,
            )));
        }
        Self { handles }
    }

    /// Wait until both streams hit EOF.
    pub(crate) async fn finish(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }

    /// Stop pumping without waiting for EOF (a killed child's descendants
    /// may still hold the pipes open).
    pub(crate) fn abort(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

async fn pump<R>(
    reader: R,
    console: Arc<dyn Console>,
    prefix: Option<LogPrefix>,
    markers: Option<HashMap<String, String>>,
) where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        let raw = match segments.next_segment().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(err) => {
                trace!(error = %err, "output stream closed with error");
                break;
            }
        };

        let decoded = String::from_utf8_lossy(&raw);
        let text = decoded.strip_suffix('\r').unwrap_or(&decoded);
        let rendered = prefix.as_ref().map(LogPrefix::render);

        let marker_hit = markers
            .as_ref()
            .and_then(|markers| markers.get(text.trim()));

        let line = match marker_hit {
            Some(command) => ConsoleLine::Executing {
                prefix: rendered,
                command: command.clone(),
            },
            None => ConsoleLine::Output {
                prefix: rendered,
                text: text.to_string(),
            },
        };
        console.emit(line);
    }
}

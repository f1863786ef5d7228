// src/engine/port.rs

//! Port gate: block a runner entry until the TCP ports it depends on accept
//! connections.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

use crate::console::LogPrefix;
use crate::errors::{Interruption, Outcome, Result, RunbookError};
use crate::types::{format_seconds, seconds_to_duration};

use super::Engine;

// Roughly thirty years; any deadline past this is effectively unbounded.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Single reachability probe: a plain TCP connect to `localhost:port`.
pub async fn check_port(port: u16, limit: Duration) -> Result<()> {
    match timeout(limit, TcpStream::connect(("localhost", port))).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(err)) => Err(RunbookError::IoError(err)),
        Err(_) => Err(RunbookError::IoError(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connecting to port {port} timed out"),
        ))),
    }
}

/// Wait for each port in turn. `timeout_secs <= 0` means the default timeout.
///
/// Returns `Interrupted(Terminated)` if the engine shuts down while waiting.
pub async fn wait_for_ports(
    engine: &Engine,
    prefix: Option<&LogPrefix>,
    ports: &[u16],
    timeout_secs: f64,
) -> Outcome {
    for &port in ports {
        let outcome = wait_for_port(engine, prefix, port, timeout_secs).await;
        if !outcome.is_success() {
            return outcome;
        }
    }
    Outcome::Success
}

async fn wait_for_port(
    engine: &Engine,
    prefix: Option<&LogPrefix>,
    port: u16,
    timeout_secs: f64,
) -> Outcome {
    let settings = engine.settings();
    let console = engine.console();
    let timeout_secs = if timeout_secs > 0.0 {
        timeout_secs
    } else {
        settings.default_port_timeout
    };

    let deadline = deadline_after(timeout_secs);
    log_remaining(engine, prefix, port, deadline);
    let mut last_log = Instant::now();

    while Instant::now() < deadline {
        if engine.is_terminating() {
            return Outcome::Interrupted(Interruption::Terminated);
        }

        match check_port(port, settings.port_poll).await {
            Ok(()) => {
                console.info(prefix, &format!("Port {port} is ready for connection"));
                return Outcome::Success;
            }
            Err(err) => debug!(port, error = %err, "port not ready yet"),
        }

        if last_log.elapsed() >= settings.port_log_interval {
            log_remaining(engine, prefix, port, deadline);
            last_log = Instant::now();
        }

        tokio::select! {
            _ = sleep(settings.port_poll) => {}
            _ = engine.root_token().cancelled() => {
                return Outcome::Interrupted(Interruption::Terminated);
            }
        }
    }

    Outcome::Failed(RunbookError::PortTimeout {
        port,
        timeout: format_seconds(timeout_secs),
    })
}

/// `now + secs`, saturating for timeouts too large to represent.
fn deadline_after(secs: f64) -> Instant {
    let now = Instant::now();
    let wait = seconds_to_duration(secs);
    now.checked_add(wait)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn log_remaining(engine: &Engine, prefix: Option<&LogPrefix>, port: u16, deadline: Instant) {
    let remaining = deadline.saturating_duration_since(Instant::now()).as_secs_f64();
    engine.console().info(
        prefix,
        &format!(
            "Checking if port {port} is ready for connection... (timeout in {} seconds)",
            format_seconds(remaining)
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_timeouts_saturate() {
        let soon = Instant::now() + Duration::from_secs(3600);
        for secs in [f64::INFINITY, 1e300, 1e12] {
            assert!(deadline_after(secs) > soon, "{secs}");
        }
    }
}

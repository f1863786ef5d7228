// src/process/unix.rs

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Default)]
pub(super) struct Platform;

impl Platform {
    pub(super) fn new() -> Self {
        Platform
    }

    /// Each child leads a fresh process group (pgid = its pid).
    pub(super) fn prepare(&self, cmd: &mut Command) {
        cmd.process_group(0);
    }

    pub(super) fn adopt(&self, _pid: u32) {}

    pub(super) fn terminate(&self, pid: u32) {
        signal_group(pid, Signal::SIGTERM);
    }

    pub(super) fn interrupt(&self, pid: u32) {
        signal_group(pid, Signal::SIGINT);
    }

    pub(super) fn kill(&self, pid: u32) {
        signal_group(pid, Signal::SIGKILL);
        let Some(target) = to_pid(pid) else { return };
        match kill(target, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => debug!(pid, error = %err, "failed to kill process"),
        }
    }

    pub(super) fn restart_stop(&self, pid: u32) {
        self.terminate(pid);
    }

    pub(super) fn release_all(&self) {}
}

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}

fn signal_group(pid: u32, signal: Signal) {
    let Some(group) = to_pid(pid) else { return };
    match killpg(group, signal) {
        // Already gone: nothing to do.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => debug!(pid, ?signal, error = %err, "failed to signal process group"),
    }
}

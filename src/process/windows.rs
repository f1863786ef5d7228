// src/process/windows.rs

use std::ffi::c_void;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::Console::{CTRL_C_EVENT, GenerateConsoleCtrlEvent};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
    SetInformationJobObject, TerminateJobObject,
};
use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_SET_QUOTA, PROCESS_TERMINATE};

/// Holds the kill-on-close job object every child is assigned to.
#[derive(Debug)]
pub(super) struct Platform {
    // Raw job handle, 0 when the job object could not be created.
    job: usize,
}

impl Platform {
    pub(super) fn new() -> Self {
        Self { job: create_job() }
    }

    pub(super) fn prepare(&self, _cmd: &mut Command) {}

    pub(super) fn adopt(&self, pid: u32) {
        if self.job == 0 {
            return;
        }
        // SAFETY: plain Win32 calls on handles we own; the process handle is
        // closed before returning.
        unsafe {
            let process: HANDLE = OpenProcess(PROCESS_SET_QUOTA | PROCESS_TERMINATE, 0, pid);
            if process.is_null() {
                debug!(pid, "could not open process for job assignment");
                return;
            }
            if AssignProcessToJobObject(self.job as HANDLE, process) == 0 {
                debug!(pid, "could not assign process to job object");
            }
            CloseHandle(process);
        }
    }

    /// Raises Ctrl-C on the console group of `pid`.
    pub(super) fn terminate(&self, pid: u32) {
        // SAFETY: no pointers involved.
        let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_C_EVENT, pid) };
        if ok == 0 {
            debug!(pid, "failed to raise console ctrl event");
        }
    }

    pub(super) fn interrupt(&self, pid: u32) {
        self.terminate(pid);
    }

    pub(super) fn kill(&self, pid: u32) {
        let status = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F", "/T"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(err) = status {
            debug!(pid, error = %err, "failed to run taskkill");
        }
    }

    pub(super) fn restart_stop(&self, pid: u32) {
        self.kill(pid);
    }

    pub(super) fn release_all(&self) {
        if self.job == 0 {
            return;
        }
        // SAFETY: the job handle stays valid for the lifetime of `self`.
        unsafe {
            TerminateJobObject(self.job as HANDLE, 0);
        }
    }
}

fn create_job() -> usize {
    // SAFETY: null attributes and name are allowed; the limit struct is plain
    // data, so zero-initialising it is valid.
    unsafe {
        let job = CreateJobObjectW(std::ptr::null(), std::ptr::null());
        if job.is_null() {
            debug!("could not create job object");
            return 0;
        }

        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        let ok = SetInformationJobObject(
            job,
            JobObjectExtendedLimitInformation,
            &info as *const JOBOBJECT_EXTENDED_LIMIT_INFORMATION as *const c_void,
            std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
        );
        if ok == 0 {
            debug!("could not configure job object");
        }

        job as usize
    }
}

//! Process liveness checks
//!
//! Tunnel registry entries name the process that owns them. Entries whose
//! owner is gone are stale and get cleaned up, so the registry and the
//! reconciler need a way to ask whether a PID is still running.
//!
//! The check does not verify process identity: a recycled PID reads as
//! alive.

/// Tells whether a process on this host is still running
pub trait ProcessProbe: Send + Sync {
    /// Check whether the process with the given PID is alive
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }
}

/// Check if a process with the given PID is still alive
///
/// On Unix, uses kill(pid, 0) to check if the process exists.
/// On Windows, uses OpenProcess to check if the process exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // pid 0 would signal our whole process group
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // ESRCH means no such process; EPERM means it exists but belongs to someone else
    unsafe {
        let result = libc::kill(pid as libc::pid_t, 0);
        if result == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        err.raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(windows)]
pub fn is_process_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

//! Platform-specific process management.
//!
//! Enumeration goes through `sysinfo`; termination uses signals on Unix and
//! `taskkill` on Windows.

use crate::error::{CompanionError, Result};
use std::ffi::OsString;
use std::path::Path;
use sysinfo::{Process, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, info, warn};

/// Windows `CREATE_NO_WINDOW` creation flag.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Keep console children from flashing a window on Windows. No-op elsewhere.
pub fn suppress_console_window(cmd: &mut std::process::Command) {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    #[cfg(not(windows))]
    {
        let _ = cmd;
    }
}

/// Forcefully terminate a process.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sends `SIGKILL` and reaps the process if it is our child
/// - **Windows**: Uses `taskkill /PID {pid} /F /T`
///
/// # Returns
/// `true` if the process is gone (or was never running).
pub fn force_kill(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        force_kill_unix(pid)
    }

    #[cfg(windows)]
    {
        force_kill_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(CompanionError::Other(format!(
            "Process termination not implemented for this platform (pid {pid})"
        )))
    }
}

#[cfg(unix)]
fn force_kill_unix(pid: u32) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::sys::wait::{waitpid, WaitPidFlag};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| CompanionError::Other(format!("PID {pid} out of range")))?;
    let nix_pid = Pid::from_raw(raw);

    debug!("Sending SIGKILL to process {}", pid);
    match kill(nix_pid, Signal::SIGKILL) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(true),
        Err(e) => {
            return Err(CompanionError::Other(format!(
                "Failed to kill process {pid}: {e}"
            )))
        }
    }

    // ECHILD means another owner reaps it; that's fine.
    match waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => debug!("Reaped process {}: {:?}", pid, status),
        Err(Errno::ECHILD) => {}
        Err(e) => debug!("waitpid({}) failed: {}", pid, e),
    }

    Ok(true)
}

#[cfg(windows)]
fn force_kill_windows(pid: u32) -> Result<bool> {
    use std::process::Command;

    debug!("Terminating process {} with taskkill", pid);

    let mut cmd = Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string(), "/F", "/T"]);
    suppress_console_window(&mut cmd);
    let output = cmd
        .output()
        .map_err(|e| CompanionError::Other(format!("Failed to run taskkill: {}", e)))?;

    if output.status.success() {
        debug!("Process {} terminated successfully", pid);
        Ok(true)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // "not found" errors are OK - process already dead
        if stderr.contains("not found") || stderr.contains("not running") {
            Ok(true)
        } else {
            warn!("taskkill failed for {}: {}", pid, stderr);
            Ok(false)
        }
    }
}

/// Length at which Linux truncates the kernel `comm` name.
const COMM_NAME_LIMIT: usize = 15;

/// Scan the process table for processes whose executable name equals `name`,
/// ignoring case.
///
/// Returns a list of (pid, name) tuples. Threads and zombies are skipped.
pub fn find_processes_by_name(name: &str) -> Vec<(u32, String)> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::new()
            .with_exe(UpdateKind::OnlyIfNotSet)
            .with_cmd(UpdateKind::OnlyIfNotSet),
    );

    system
        .processes()
        .iter()
        .filter(|(_, process)| process.thread_kind().is_none())
        .filter(|(_, process)| process.status() != sysinfo::ProcessStatus::Zombie)
        .filter(|(_, process)| process_matches(process, name))
        .map(|(pid, process)| (pid.as_u32(), process.name().to_string_lossy().into_owned()))
        .collect()
}

fn process_matches(process: &Process, name: &str) -> bool {
    name_matches(
        &process.name().to_string_lossy(),
        process.exe(),
        process.cmd(),
        name,
    )
}

/// Decide whether a process identified by its kernel name, executable path
/// and command line runs the executable `wanted`.
///
/// The kernel name is cut at [`COMM_NAME_LIMIT`] characters on Linux. The
/// executable path covers native binaries. When the name was cut and the
/// path is unreadable, or points at an interpreter running a script, the
/// first two command-line words are checked instead.
fn name_matches(process_name: &str, exe: Option<&Path>, cmd: &[OsString], wanted: &str) -> bool {
    let wanted = wanted.to_lowercase();
    let process_name = process_name.to_lowercase();
    if process_name == wanted {
        return true;
    }

    let same_file_name = |path: &Path| {
        path.file_name()
            .is_some_and(|file_name| file_name.to_string_lossy().to_lowercase() == wanted)
    };

    if exe.is_some_and(same_file_name) {
        return true;
    }

    let truncated =
        process_name.chars().count() >= COMM_NAME_LIMIT && wanted.starts_with(&process_name);
    truncated
        && cmd
            .iter()
            .take(2)
            .any(|word| same_file_name(Path::new(word)))
}

/// Force-kill every process named `name` (case-insensitive), skipping the
/// PIDs in `exclude`.
///
/// A failure on one process never stops the sweep. Returns how many
/// processes were terminated.
pub fn kill_processes_by_name(name: &str, exclude: &[u32]) -> u32 {
    let matches = find_processes_by_name(name);
    let mut killed = 0;

    for (pid, process_name) in matches {
        if exclude.contains(&pid) {
            continue;
        }
        match force_kill(pid) {
            Ok(true) => {
                info!("Killed process {} ({})", pid, process_name);
                killed += 1;
            }
            Ok(false) => warn!("Process {} ({}) survived termination", pid, process_name),
            Err(e) => warn!("Failed to kill process {} ({}): {}", pid, process_name, e),
        }
    }

    killed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(words: &[&str]) -> Vec<OsString> {
        words.iter().map(OsString::from).collect()
    }

    /// Whether `pid` has left the process table (or only its zombie remains).
    #[cfg(unix)]
    fn is_gone(pid: u32) -> bool {
        let sys_pid = sysinfo::Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new(),
        );
        system
            .process(sys_pid)
            .is_none_or(|p| p.status() == sysinfo::ProcessStatus::Zombie)
    }

    #[test]
    fn test_name_matches_kernel_name_ignoring_case() {
        assert!(name_matches("Alist", None, &[], "alist"));
        assert!(!name_matches("alist-helper", None, &[], "alist"));
    }

    #[test]
    fn test_name_matches_truncated_binary_by_exe() {
        let exe = Path::new("/opt/openlist/openlist-linux-amd64");
        assert!(name_matches("openlist-linux-", Some(exe), &[], "openlist-linux-amd64"));
    }

    #[test]
    fn test_name_matches_truncated_without_exe_uses_cmdline() {
        let binary = words(&["/opt/openlist/openlist-linux-amd64", "server"]);
        assert!(name_matches("openlist-linux-", None, &binary, "openlist-linux-amd64"));

        let script = words(&["/bin/sh", "/opt/openlist/openlist-linux-amd64", "server"]);
        let shell = Path::new("/usr/bin/dash");
        assert!(name_matches("openlist-linux-", Some(shell), &script, "openlist-linux-amd64"));
    }

    #[test]
    fn test_name_matches_rejects_other_truncated_names() {
        let cmd = words(&["/opt/openlist/openlist-linux-arm64", "server"]);
        assert!(!name_matches("openlist-linux-", None, &cmd, "openlist-linux-amd64"));

        // Short names are never truncated, so the command line is not consulted.
        let cmd = words(&["/bin/sh", "/srv/alist"]);
        assert!(!name_matches("sh", None, &cmd, "alist"));
    }

    #[test]
    fn test_find_processes_no_match() {
        assert!(find_processes_by_name("no-such-process-name-xyz").is_empty());
    }

    #[test]
    fn test_kill_by_name_no_match() {
        assert_eq!(kill_processes_by_name("no-such-process-name-xyz", &[]), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_force_kill_child() {
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(force_kill(pid).unwrap());

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !is_gone(pid) && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(is_gone(pid));
    }
}

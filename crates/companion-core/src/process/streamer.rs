//! Launching the managed process and streaming its output.

use crate::error::{CompanionError, Result};
use crate::events::{EventSender, LogLine, SupervisorEvent};
use crate::platform;
use chrono::{DateTime, Local};
use std::io::{BufRead, BufReader, PipeReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SPAWN_BUSY_RETRIES: u32 = 5;
const SPAWN_BUSY_BACKOFF: Duration = Duration::from_millis(50);

/// Identifies a launched managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcessHandle {
    /// Executable that was launched.
    pub executable: PathBuf,
    /// Working directory of the process.
    pub working_dir: PathBuf,
    /// Process ID.
    pub pid: u32,
    /// When the process was spawned.
    pub launched_at: DateTime<Local>,
}

/// Configuration for launching the managed executable.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Path to the executable.
    pub executable: PathBuf,
    /// Working directory, the executable's own directory by default.
    pub working_dir: PathBuf,
    /// Arguments to pass.
    pub args: Vec<String>,
}

impl LaunchConfig {
    /// Launch `executable` with `args` inside its own directory.
    pub fn new<I, S>(executable: impl AsRef<Path>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let executable = executable.as_ref().to_path_buf();
        Self {
            working_dir: working_dir_of(&executable),
            executable,
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Directory the managed executable runs in.
pub fn working_dir_of(executable: &Path) -> PathBuf {
    match executable.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Spawn `config` with stdout and stderr sharing one pipe, so reads observe
/// the exact interleaving the child produced.
pub(crate) fn spawn_with_combined_output(config: &LaunchConfig) -> Result<(Child, PipeReader)> {
    if !config.executable.is_file() {
        return Err(CompanionError::ExecutableNotFound(config.executable.clone()));
    }

    let spawn_err = |e: std::io::Error| CompanionError::Spawn {
        program: config.executable.display().to_string(),
        message: e.to_string(),
    };

    let (reader, writer) = std::io::pipe().map_err(spawn_err)?;
    let stderr_writer = writer.try_clone().map_err(spawn_err)?;

    let mut cmd = Command::new(&config.executable);
    cmd.args(&config.args)
        .current_dir(&config.working_dir)
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr_writer);
    platform::suppress_console_window(&mut cmd);

    // A binary that was just written (restored, or replaced by the operator)
    // can briefly report "text file busy" while another fork holds it open.
    let mut attempts = 0;
    let child = loop {
        match cmd.spawn() {
            Ok(child) => break child,
            Err(e)
                if e.kind() == std::io::ErrorKind::ExecutableFileBusy
                    && attempts < SPAWN_BUSY_RETRIES =>
            {
                attempts += 1;
                debug!("{} busy, retrying spawn", config.executable.display());
                std::thread::sleep(SPAWN_BUSY_BACKOFF);
            }
            Err(e) => return Err(spawn_err(e)),
        }
    };

    // The command still owns our copies of the write end; EOF only arrives
    // once they are closed.
    drop(cmd);

    Ok((child, reader))
}

/// Runs the managed process with captured output on its own thread.
pub struct LogStreamer;

impl LogStreamer {
    /// Launch the process and start streaming its output.
    ///
    /// Each non-empty, trimmed line is sent as [`SupervisorEvent::Log`] as
    /// soon as it is read. When the stream closes the child is reaped and
    /// [`SupervisorEvent::Exited`] follows. Returns without waiting for the
    /// process.
    pub fn launch(config: &LaunchConfig, events: EventSender) -> Result<ManagedProcessHandle> {
        info!(
            "Launching {} {} in {}",
            config.executable.display(),
            config.args.join(" "),
            config.working_dir.display()
        );

        let (child, reader) = spawn_with_combined_output(config)?;
        let pid = child.id();

        let handle = ManagedProcessHandle {
            executable: config.executable.clone(),
            working_dir: config.working_dir.clone(),
            pid,
            launched_at: Local::now(),
        };

        let spawned = std::thread::Builder::new()
            .name(format!("log-streamer-{pid}"))
            .spawn(move || stream_output(child, reader, events));

        match spawned {
            Ok(_) => {
                info!("Launched managed process with PID {}", pid);
                Ok(handle)
            }
            Err(e) => {
                // Nobody would observe or reap the child.
                error!("Failed to start log streamer for {}: {}", pid, e);
                if let Err(kill_err) = platform::force_kill(pid) {
                    warn!("Failed to kill unobserved process {}: {}", pid, kill_err);
                }
                Err(CompanionError::Spawn {
                    program: config.executable.display().to_string(),
                    message: format!("log streamer thread: {e}"),
                })
            }
        }
    }
}

/// Read `reader` line by line until end-of-stream, then reap `child`.
fn stream_output(mut child: Child, reader: PipeReader, events: EventSender) {
    let pid = child.id();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut receiver_gone = false;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let text = text.trim();
                if text.is_empty() || receiver_gone {
                    continue;
                }
                // Keep draining after the receiver is gone so the child
                // never blocks on a full pipe.
                if events.send(SupervisorEvent::Log(LogLine::now(text))).is_err() {
                    debug!("Event receiver dropped, discarding output of {}", pid);
                    receiver_gone = true;
                }
            }
            Err(e) => {
                warn!("Error reading output of {}: {}", pid, e);
                let _ = events.send(SupervisorEvent::StreamFailed {
                    pid,
                    message: e.to_string(),
                });
                break;
            }
        }
    }

    // A forced stop may already have reaped the process.
    let code = match child.wait() {
        Ok(status) => status.code(),
        Err(e) => {
            debug!("wait({}) failed: {}", pid, e);
            None
        }
    };
    info!("Managed process {} exited (code {:?})", pid, code);
    let _ = events.send(SupervisorEvent::Exited { pid, code });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use tempfile::TempDir;

    #[test]
    fn test_launch_config_defaults_to_executable_dir() {
        let config = LaunchConfig::new("/opt/alist/alist", ["server", "--force-bin-dir"]);
        assert_eq!(config.working_dir, PathBuf::from("/opt/alist"));
        assert_eq!(config.args, vec!["server", "--force-bin-dir"]);
    }

    #[test]
    fn test_working_dir_of_bare_name() {
        assert_eq!(working_dir_of(Path::new("alist")), PathBuf::from("."));
    }

    #[test]
    fn test_launch_missing_executable() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, _rx) = events::channel();
        let config = LaunchConfig::new(temp_dir.path().join("alist"), ["server"]);

        let result = LogStreamer::launch(&config, tx);
        assert!(matches!(result, Err(CompanionError::ExecutableNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_interleaves_stdout_and_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("emit");
        std::fs::write(
            &script,
            "#!/bin/sh\necho one\necho two >&2\necho\necho '  three  '\nexit 3\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (tx, mut rx) = events::channel();
        let handle = LogStreamer::launch(&LaunchConfig::new(&script, Vec::<String>::new()), tx)
            .unwrap();
        assert_eq!(handle.working_dir, temp_dir.path());

        let mut lines = Vec::new();
        let exit_code = loop {
            match rx.recv().await.unwrap() {
                SupervisorEvent::Log(line) => lines.push(line.text),
                SupervisorEvent::Exited { pid, code } => {
                    assert_eq!(pid, handle.pid);
                    break code;
                }
                other => panic!("unexpected event {other:?}"),
            }
        };

        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(exit_code, Some(3));
    }
}

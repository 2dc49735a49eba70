//! Lifecycle ownership of the managed process.

use super::admin;
use super::streamer::{LaunchConfig, LogStreamer, ManagedProcessHandle};
use crate::config::{ServerArgs, SupervisorConfig};
use crate::error::{CompanionError, Result};
use crate::events::{EventSender, SupervisorEvent};
use crate::platform;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of the managed process as seen by the controller.
///
/// Restarting is not a state of its own: it is `Stopping`, a settle delay,
/// then `Starting`, all under one [`LifecycleGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ControllerState {
    lifecycle: LifecycleState,
    handle: Option<ManagedProcessHandle>,
}

/// Sole owner of the managed process lifecycle.
///
/// Every lifecycle operation runs under an exclusive [`LifecycleGuard`];
/// an operation issued while another is in flight fails with
/// [`CompanionError::Busy`].
pub struct ProcessController {
    executable: RwLock<Option<PathBuf>>,
    events: EventSender,
    state: Mutex<ControllerState>,
    op_lock: tokio::sync::Mutex<()>,
    restart_settle: Duration,
}

impl ProcessController {
    pub fn new(
        config: &SupervisorConfig,
        executable: Option<PathBuf>,
        events: EventSender,
    ) -> Self {
        Self {
            executable: RwLock::new(executable),
            events,
            state: Mutex::new(ControllerState {
                lifecycle: LifecycleState::Stopped,
                handle: None,
            }),
            op_lock: tokio::sync::Mutex::new(()),
            restart_settle: config.restart_settle,
        }
    }

    /// The resolved executable, if any.
    pub fn executable(&self) -> Option<PathBuf> {
        self.executable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Point the controller at a different executable.
    pub fn set_executable(&self, path: Option<PathBuf>) {
        *self
            .executable
            .write()
            .unwrap_or_else(PoisonError::into_inner) = path;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lock_state().lifecycle
    }

    /// Handle of the process this controller launched last, while it lives.
    pub fn current(&self) -> Option<ManagedProcessHandle> {
        self.lock_state().handle.clone()
    }

    /// Take exclusive control of the lifecycle.
    pub fn acquire(&self) -> Result<LifecycleGuard<'_>> {
        match self.op_lock.try_lock() {
            Ok(permit) => Ok(LifecycleGuard {
                controller: self,
                _permit: permit,
            }),
            Err(_) => {
                let state = self.state();
                debug!("Rejecting lifecycle operation while {}", state);
                Err(CompanionError::Busy {
                    state: state.to_string(),
                })
            }
        }
    }

    /// Launch the server. `Ok(None)` when no executable is resolved.
    pub fn start(&self) -> Result<Option<ManagedProcessHandle>> {
        self.acquire()?.start()
    }

    /// Kill every process sharing the executable's file name.
    pub fn stop(&self) -> Result<u32> {
        Ok(self.acquire()?.stop())
    }

    /// Stop, wait for the settle delay, start.
    pub async fn restart(&self) -> Result<Option<ManagedProcessHandle>> {
        self.acquire()?.restart().await
    }

    /// Run an admin subcommand and block until it exits.
    ///
    /// `Ok(None)` when no executable is resolved.
    pub fn run_admin_command(&self, args: &[String]) -> Result<Option<String>> {
        match self.executable() {
            Some(exe) => admin::run_admin_command(&exe, args).map(Some),
            None => {
                debug!("No executable resolved, skipping admin command");
                Ok(None)
            }
        }
    }

    /// Forget `pid` once its output stream has closed.
    pub fn mark_exited(&self, pid: u32) {
        let mut state = self.lock_state();
        if state.handle.as_ref().map(|h| h.pid) == Some(pid) {
            state.handle = None;
            if state.lifecycle == LifecycleState::Running {
                state.lifecycle = LifecycleState::Stopped;
            }
            info!("Managed process {} is gone", pid);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_lifecycle(&self, lifecycle: LifecycleState) {
        self.lock_state().lifecycle = lifecycle;
    }
}

/// Exclusive permission to drive the lifecycle.
///
/// Composite procedures (restart, credential reveal, restore) hold one guard
/// for their whole sequence.
pub struct LifecycleGuard<'a> {
    controller: &'a ProcessController,
    _permit: tokio::sync::MutexGuard<'a, ()>,
}

impl LifecycleGuard<'_> {
    /// Executable the guarded operations act on.
    pub fn executable(&self) -> Option<PathBuf> {
        self.controller.executable()
    }

    /// Launch `<exe> server --force-bin-dir` in the executable's directory.
    pub fn start(&self) -> Result<Option<ManagedProcessHandle>> {
        let Some(exe) = self.controller.executable() else {
            debug!("No executable resolved, start is a no-op");
            return Ok(None);
        };

        self.controller.set_lifecycle(LifecycleState::Starting);
        let config = LaunchConfig::new(&exe, ServerArgs::SERVE);

        match LogStreamer::launch(&config, self.controller.events.clone()) {
            Ok(handle) => {
                {
                    let mut state = self.controller.lock_state();
                    state.lifecycle = LifecycleState::Running;
                    state.handle = Some(handle.clone());
                }
                let _ = self
                    .controller
                    .events
                    .send(SupervisorEvent::Launched(handle.clone()));
                Ok(Some(handle))
            }
            Err(e) => {
                self.controller.set_lifecycle(LifecycleState::Stopped);
                Err(e)
            }
        }
    }

    /// Kill every process named like the executable, including ones this
    /// controller did not launch. Returns how many were killed.
    pub fn stop(&self) -> u32 {
        let Some(exe) = self.controller.executable() else {
            debug!("No executable resolved, stop is a no-op");
            return 0;
        };

        self.controller.set_lifecycle(LifecycleState::Stopping);
        let killed = kill_by_executable_name(&exe);
        {
            let mut state = self.controller.lock_state();
            state.lifecycle = LifecycleState::Stopped;
            state.handle = None;
        }
        info!("Stopped {} process(es) named like {}", killed, exe.display());
        killed
    }

    /// Stop, wait for the settle delay, start. Zero matches on stop is fine.
    pub async fn restart(&self) -> Result<Option<ManagedProcessHandle>> {
        self.stop();
        tokio::time::sleep(self.controller.restart_settle).await;
        self.start()
    }

    /// Run an admin subcommand off the async runtime's worker thread.
    pub async fn run_admin(&self, args: Vec<String>) -> Result<Option<String>> {
        let Some(exe) = self.controller.executable() else {
            debug!("No executable resolved, skipping admin command");
            return Ok(None);
        };
        tokio::task::spawn_blocking(move || admin::run_admin_command(&exe, &args))
            .await
            .map_err(|e| CompanionError::Other(format!("Admin command task failed: {e}")))?
            .map(Some)
    }
}

fn kill_by_executable_name(exe: &Path) -> u32 {
    let Some(name) = exe.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        warn!("Executable path {} has no file name", exe.display());
        return 0;
    };
    platform::kill_processes_by_name(&name, &[std::process::id()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    fn controller(executable: Option<PathBuf>) -> (ProcessController, events::EventReceiver) {
        let (tx, rx) = events::channel();
        let config = SupervisorConfig {
            restart_settle: Duration::from_millis(10),
            ..SupervisorConfig::default()
        };
        (ProcessController::new(&config, executable, tx), rx)
    }

    #[test]
    fn test_unresolved_executable_is_noop() {
        let (controller, _rx) = controller(None);

        assert!(controller.start().unwrap().is_none());
        assert_eq!(controller.stop().unwrap(), 0);
        assert!(controller
            .run_admin_command(&["admin".to_string(), "show".to_string()])
            .unwrap()
            .is_none());
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert!(controller.current().is_none());
    }

    #[tokio::test]
    async fn test_restart_without_executable() {
        let (controller, _rx) = controller(None);
        assert!(controller.restart().await.unwrap().is_none());
    }

    #[test]
    fn test_overlapping_operations_rejected() {
        let (controller, _rx) = controller(None);

        let guard = controller.acquire().unwrap();
        assert!(matches!(
            controller.start(),
            Err(CompanionError::Busy { .. })
        ));
        assert!(matches!(controller.stop(), Err(CompanionError::Busy { .. })));
        drop(guard);

        assert!(controller.acquire().is_ok());
    }

    #[test]
    fn test_start_missing_executable_returns_to_stopped() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let (controller, _rx) = controller(Some(temp_dir.path().join("alist")));

        assert!(matches!(
            controller.start(),
            Err(CompanionError::ExecutableNotFound(_))
        ));
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_mark_exited_ignores_unknown_pid() {
        let (controller, _rx) = controller(None);
        controller.mark_exited(12345);
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_lifecycle_display() {
        assert_eq!(LifecycleState::Stopping.to_string(), "stopping");
        assert_eq!(LifecycleState::Running.to_string(), "running");
    }
}

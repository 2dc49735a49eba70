//! Top-level orchestration of the companion.
//!
//! The [`Supervisor`] is driven from a single task. It is the only place
//! that mutates the credential store or touches the clipboard: background
//! contexts send [`SupervisorEvent`]s and the supervisor applies them in
//! [`Supervisor::pump`] or [`Supervisor::next_event`].
//!
//! # Example
//!
//! ```rust,no_run
//! use companion_core::config::SupervisorConfig;
//! use companion_core::supervisor::{Supervisor, TracingNotifier};
//!
//! #[tokio::main]
//! async fn main() -> companion_core::Result<()> {
//!     let mut supervisor = Supervisor::new(SupervisorConfig::default(), TracingNotifier)?;
//!     supervisor.start_probe();
//!     supervisor.start_service()?;
//!
//!     while let Some(event) = supervisor.next_event().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

use crate::backup::{BackupEngine, ExportSummary, RestoreOutcome, RestoreReport};
use crate::config::{ServerArgs, SupervisorConfig};
use crate::credentials::{self, Credential, CredentialStore};
use crate::error::{CompanionError, Result};
use crate::events::{self, EventReceiver, EventSender, LogLine, SupervisorEvent};
use crate::process::{
    LifecycleState, LivenessProbe, ManagedProcessHandle, PathResolver, ProcessController,
};
use crate::settings::WindowGeometry;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Conditions that need the operator's attention before anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// Restore could not overwrite files still held open.
    FilesInUse { message: String },
    /// Restore failed for any other reason.
    RestoreFailed { message: String },
}

impl Alert {
    pub fn title(&self) -> &'static str {
        match self {
            Alert::FilesInUse { .. } => "Restore failed",
            Alert::RestoreFailed { .. } => "Restore error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Alert::FilesInUse { .. } => "Some files are still in use. Close every running server \
                 process manually, or re-run the companion elevated, then try again."
                .to_string(),
            Alert::RestoreFailed { message } => {
                format!("The restore ran into an unexpected error: {message}")
            }
        }
    }
}

/// Front-end seam: how the supervisor reaches the operator.
pub trait Notifier: Send {
    /// Append a line to the operator log.
    fn log(&self, line: &LogLine);

    /// Replace the clipboard content.
    fn set_clipboard(&self, text: &str);

    /// A password was captured or set.
    fn credentials_captured(&self, _credential: &Credential) {}

    fn reachability_changed(&self, _reachable: bool) {}

    /// Blocking notification.
    fn alert(&self, alert: Alert);
}

impl<T: Notifier + Sync + ?Sized> Notifier for Arc<T> {
    fn log(&self, line: &LogLine) {
        (**self).log(line)
    }

    fn set_clipboard(&self, text: &str) {
        (**self).set_clipboard(text)
    }

    fn credentials_captured(&self, credential: &Credential) {
        (**self).credentials_captured(credential)
    }

    fn reachability_changed(&self, reachable: bool) {
        (**self).reachability_changed(reachable)
    }

    fn alert(&self, alert: Alert) {
        (**self).alert(alert)
    }
}

/// Notifier that routes everything through `tracing`.
///
/// Clipboard content is never logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn log(&self, line: &LogLine) {
        info!(target: "openlist", "{}", line.text);
    }

    fn set_clipboard(&self, text: &str) {
        debug!("Clipboard updated ({} chars)", text.chars().count());
    }

    fn credentials_captured(&self, credential: &Credential) {
        info!("Credentials captured for user {}", credential.username);
    }

    fn reachability_changed(&self, reachable: bool) {
        info!(
            "Service is {}",
            if reachable { "running" } else { "not running" }
        );
    }

    fn alert(&self, alert: Alert) {
        error!("{}: {}", alert.title(), alert.message());
    }
}

/// Snapshot of what the supervisor knows.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub executable: Option<PathBuf>,
    pub lifecycle: String,
    pub pid: Option<u32>,
    /// `None` until the first probe result arrives.
    pub reachable: Option<bool>,
    pub url: String,
    pub username: String,
    pub has_password: bool,
}

/// Owns every component and applies their events.
pub struct Supervisor {
    config: SupervisorConfig,
    resolver: PathResolver,
    controller: Arc<ProcessController>,
    backup: BackupEngine,
    credentials: CredentialStore,
    events_tx: EventSender,
    events: EventReceiver,
    notifier: Box<dyn Notifier>,
    reachable: Option<bool>,
    probe: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Validate `config`, resolve the executable and wire the components.
    pub fn new(config: SupervisorConfig, notifier: impl Notifier + 'static) -> Result<Self> {
        config.validate()?;

        let resolver = PathResolver::new(&config);
        let executable = resolver.resolve();
        match &executable {
            Some(exe) => info!("Managing {}", exe.display()),
            None => warn!("No server executable found, process control is disabled"),
        }

        let (events_tx, events) = events::channel();
        let controller = Arc::new(ProcessController::new(
            &config,
            executable,
            events_tx.clone(),
        ));
        let backup = BackupEngine::new(&config, Arc::clone(&controller));

        Ok(Self {
            config,
            resolver,
            controller,
            backup,
            credentials: CredentialStore::new(),
            events_tx,
            events,
            notifier: Box::new(notifier),
            reachable: None,
            probe: None,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn executable(&self) -> Option<PathBuf> {
        self.controller.executable()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn controller(&self) -> &Arc<ProcessController> {
        &self.controller
    }

    /// Sender for injecting events from other front-end contexts.
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Last reachability reported by the probe.
    pub fn is_reachable(&self) -> Option<bool> {
        self.reachable
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.controller.state()
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            executable: self.controller.executable(),
            lifecycle: self.controller.state().to_string(),
            pid: self.controller.current().map(|h| h.pid),
            reachable: self.reachable,
            url: self.config.service_url(),
            username: self.credentials.username().to_string(),
            has_password: self.credentials.has_password(),
        }
    }

    /// Start the periodic liveness probe. Must be called inside a runtime.
    pub fn start_probe(&mut self) {
        if self.probe.is_some() {
            return;
        }
        let probe = LivenessProbe::new(&self.config);
        self.probe = Some(probe.spawn(self.events_tx.clone()));
    }

    /// Persist a new executable path and manage it from now on.
    pub fn set_executable_path(&mut self, path: &Path) -> Result<PathBuf> {
        if !path.is_file() {
            return Err(CompanionError::ExecutableNotFound(path.to_path_buf()));
        }
        let path = self.resolver.set(path)?;
        self.controller.set_executable(Some(path.clone()));
        self.log("Executable path updated");
        Ok(path)
    }

    pub fn start_service(&mut self) -> Result<Option<ManagedProcessHandle>> {
        if self.controller.executable().is_none() {
            debug!("No executable resolved, ignoring start");
            return Ok(None);
        }
        self.log("Starting service...");
        self.controller.start()
    }

    pub fn stop_service(&mut self) -> Result<u32> {
        if self.controller.executable().is_none() {
            debug!("No executable resolved, ignoring stop");
            return Ok(0);
        }
        let killed = self.controller.stop()?;
        self.log("Service stopped");
        Ok(killed)
    }

    pub async fn restart_service(&mut self) -> Result<Option<ManagedProcessHandle>> {
        if self.controller.executable().is_none() {
            debug!("No executable resolved, ignoring restart");
            return Ok(None);
        }
        self.log("Restarting service...");
        self.controller.restart().await
    }

    /// Stop the server, read the admin password with `admin show`, then
    /// start the server again whatever happened.
    ///
    /// Returns the captured credential, if any.
    pub async fn reveal_credentials(&mut self) -> Result<Option<Credential>> {
        let controller = Arc::clone(&self.controller);
        let guard = controller.acquire()?;
        if guard.executable().is_none() {
            debug!("No executable resolved, ignoring credential reveal");
            return Ok(None);
        }

        self.log("Extracting credentials...");
        guard.stop();
        tokio::time::sleep(self.config.reveal_settle).await;

        let args = ServerArgs::ADMIN_SHOW.map(String::from).to_vec();
        let output = match guard.run_admin(args).await {
            Ok(output) => output,
            // The password can be printed even when the command exits non-zero
            Err(CompanionError::AdminCommandFailed { status, output, .. }) => {
                warn!("`admin show` exited with {}", status);
                Some(output)
            }
            Err(e) => {
                warn!("Credential reveal failed: {}", e);
                None
            }
        };
        let captured = match output.as_deref().and_then(credentials::extract_shown_password) {
            Some(password) => Some(self.capture_password(password)),
            None => {
                debug!("No password in `admin show` output");
                self.log("Failed to read credentials");
                None
            }
        };

        if let Err(e) = guard.start() {
            self.log(&format!("Failed to start service: {e}"));
        }
        Ok(captured)
    }

    /// Set a new admin password with `admin set`, then restart the server.
    ///
    /// The server is restarted even when the command fails; the error is
    /// returned afterwards.
    pub async fn set_password(&mut self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(CompanionError::InvalidInput(
                "password must not be empty".to_string(),
            ));
        }
        let controller = Arc::clone(&self.controller);
        let guard = controller.acquire()?;
        if guard.executable().is_none() {
            debug!("No executable resolved, ignoring password change");
            return Ok(());
        }

        let mut args = ServerArgs::ADMIN_SET.map(String::from).to_vec();
        args.push(password.to_string());
        let result = guard.run_admin(args).await;

        match &result {
            Ok(_) => {
                self.capture_password(password.to_string());
                self.log("Password updated");
            }
            Err(e) => {
                warn!("Password change failed: {}", e);
                self.log("Failed to update password");
            }
        }

        self.log("Restarting service...");
        if let Err(e) = guard.restart().await {
            self.log(&format!("Failed to start service: {e}"));
        }
        result.map(|_| ())
    }

    /// Copy the username to the clipboard.
    pub fn copy_username(&self) {
        self.notifier.set_clipboard(self.credentials.username());
        self.log("Copied to clipboard");
    }

    /// Copy the password to the clipboard. `false` while it is unknown.
    pub fn copy_password(&self) -> bool {
        match self.credentials.password() {
            Some(password) => {
                self.notifier.set_clipboard(password);
                self.log("Copied to clipboard");
                true
            }
            None => false,
        }
    }

    pub fn export_backup(&self, dest: impl AsRef<Path>) -> Result<Option<ExportSummary>> {
        match self.backup.export(dest) {
            Ok(Some(summary)) => {
                self.log(&format!("Backup exported to {}", summary.archive.display()));
                Ok(Some(summary))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.log(&format!("Backup failed: {e}"));
                Err(e)
            }
        }
    }

    /// Restore a backup. Failures are raised as [`Alert`]s as well as
    /// reported.
    pub async fn import_backup(&self, src: impl AsRef<Path>) -> Result<Option<RestoreReport>> {
        if self.controller.executable().is_none() {
            debug!("No executable resolved, ignoring restore");
            return Ok(None);
        }
        self.log("Preparing restore, stopping every server process...");

        let report = self.backup.import(src).await?;
        if let Some(report) = &report {
            match &report.outcome {
                RestoreOutcome::Restored { .. } => {
                    self.log("Restore complete, service restarted");
                }
                RestoreOutcome::FilesInUse { message } => {
                    self.log("Restore failed: files are still in use, re-run elevated");
                    self.notifier.alert(Alert::FilesInUse {
                        message: message.clone(),
                    });
                }
                RestoreOutcome::Failed { message } => {
                    self.log(&format!("Restore failed: {message}"));
                    self.notifier.alert(Alert::RestoreFailed {
                        message: message.clone(),
                    });
                }
            }
        }
        Ok(report)
    }

    pub fn window_geometry(&self) -> WindowGeometry {
        WindowGeometry::load(&self.config.geometry_file())
    }

    pub fn save_window_geometry(&self, geometry: &WindowGeometry) -> Result<()> {
        geometry.save(&self.config.geometry_file())
    }

    /// Apply every pending event without waiting. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply(&event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next event and apply it.
    pub async fn next_event(&mut self) -> Option<SupervisorEvent> {
        let event = self.events.recv().await?;
        self.apply(&event);
        Some(event)
    }

    fn apply(&mut self, event: &SupervisorEvent) {
        match event {
            SupervisorEvent::Log(line) => {
                self.notifier.log(line);
                if let Some(password) = credentials::extract_startup_password(&line.text) {
                    self.capture_password(password);
                }
            }
            SupervisorEvent::Launched(handle) => {
                debug!("Launched {} (PID {})", handle.executable.display(), handle.pid);
            }
            SupervisorEvent::Exited { pid, code } => {
                debug!("Process {} exited with {:?}", pid, code);
                self.controller.mark_exited(*pid);
            }
            SupervisorEvent::StreamFailed { pid, message } => {
                self.log(&format!("Lost output of process {pid}: {message}"));
            }
            SupervisorEvent::Reachability(reachable) => {
                self.reachable = Some(*reachable);
                self.notifier.reachability_changed(*reachable);
            }
        }
    }

    fn capture_password(&mut self, password: String) -> Credential {
        self.credentials.set_password(password);
        let credential = self.credentials.credential().clone();
        if let Some(password) = credential.password.as_deref() {
            self.notifier.set_clipboard(password);
        }
        self.notifier.credentials_captured(&credential);
        credential
    }

    fn log(&self, text: &str) {
        self.notifier.log(&LogLine::now(text));
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
    }
}

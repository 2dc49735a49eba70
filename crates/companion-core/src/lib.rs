//! Companion Core - Headless supervisor for a local OpenList/alist server.
//!
//! This crate locates the server executable, starts and stops it, streams
//! its output, probes its port, captures the admin credentials it prints and
//! backs up or restores its data directory. It has no UI of its own; a
//! front-end plugs in through [`Notifier`].
//!
//! # Example
//!
//! ```rust,no_run
//! use companion_core::{Supervisor, SupervisorConfig, TracingNotifier};
//!
//! #[tokio::main]
//! async fn main() -> companion_core::Result<()> {
//!     let mut supervisor = Supervisor::new(SupervisorConfig::default(), TracingNotifier)?;
//!     supervisor.start_probe();
//!
//!     // Read the admin password, restarting the server around it
//!     if let Some(credential) = supervisor.reveal_credentials().await? {
//!         println!("Logged in as {}", credential.username);
//!     }
//!
//!     // Snapshot the data directory
//!     supervisor.export_backup("backups/openlist.zip")?;
//!
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod platform;
pub mod process;
pub mod settings;
pub mod supervisor;

// Re-export commonly used types
pub use backup::{BackupEngine, ExportSummary, RestoreOutcome, RestoreReport};
pub use config::{ServerArgs, SupervisorConfig, SupervisorDefaults};
pub use credentials::{Credential, CredentialStore};
pub use error::{CompanionError, Result};
pub use events::{LogLine, SupervisorEvent};
pub use process::{
    LifecycleState, LivenessProbe, ManagedProcessHandle, PathResolver, ProcessController,
};
pub use settings::WindowGeometry;
pub use supervisor::{Alert, Notifier, Supervisor, SupervisorStatus, TracingNotifier};

//! Process management for the managed server.
//!
//! Handles resolving, launching, probing and stopping the server executable.
//!
//! # Stop Strategy
//!
//! Stopping does not rely on the handle of the process this supervisor
//! launched. Every process whose name matches the executable's file name
//! (case-insensitive) is killed, which also takes down instances left over
//! from earlier runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use companion_core::config::SupervisorConfig;
//! use companion_core::events;
//! use companion_core::process::{PathResolver, ProcessController};
//!
//! #[tokio::main]
//! async fn main() -> companion_core::Result<()> {
//!     let config = SupervisorConfig::default();
//!     let (tx, _rx) = events::channel();
//!
//!     let executable = PathResolver::new(&config).resolve();
//!     let controller = ProcessController::new(&config, executable, tx);
//!
//!     if let Some(handle) = controller.start()? {
//!         println!("PID: {}", handle.pid);
//!     }
//!     controller.restart().await?;
//!
//!     Ok(())
//! }
//! ```

mod admin;
mod controller;
mod probe;
mod resolver;
mod streamer;

pub use admin::{run_admin_command, strip_ansi};
pub use controller::{LifecycleGuard, LifecycleState, ProcessController};
pub use probe::{is_reachable, LivenessProbe};
pub use resolver::PathResolver;
pub use streamer::{working_dir_of, LaunchConfig, LogStreamer, ManagedProcessHandle};

//! Console rendering of supervisor notifications.

use companion_core::{Alert, Credential, LogLine, Notifier};
use std::sync::{Mutex, PoisonError};

/// Prints the operator log to stdout and alerts to stderr.
///
/// A terminal has no shared clipboard, so copied values are kept in memory
/// and echoed once.
#[derive(Debug, Default)]
pub struct ConsoleNotifier {
    clipboard: Mutex<Option<String>>,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last copied value.
    #[cfg(test)]
    pub fn clipboard(&self) -> Option<String> {
        self.clipboard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for ConsoleNotifier {
    fn log(&self, line: &LogLine) {
        println!("{}", line.display());
    }

    fn set_clipboard(&self, text: &str) {
        println!("  clipboard: {text}");
        *self
            .clipboard
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(text.to_string());
    }

    fn credentials_captured(&self, credential: &Credential) {
        println!(
            "  credentials captured: {} / {}",
            credential.username,
            credential.password.as_deref().unwrap_or("?")
        );
    }

    fn reachability_changed(&self, reachable: bool) {
        if reachable {
            println!("  status: running");
        } else {
            println!("  status: not running");
        }
    }

    fn alert(&self, alert: Alert) {
        eprintln!("!! {}: {}", alert.title(), alert.message());
    }
}

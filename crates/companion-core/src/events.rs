//! Events flowing from background contexts to the supervisor.

use crate::process::ManagedProcessHandle;
use chrono::{DateTime, Local};
use tokio::sync::mpsc;

/// One line of managed-process output, stamped on receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub received_at: DateTime<Local>,
    pub text: String,
}

impl LogLine {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            received_at: Local::now(),
            text: text.into(),
        }
    }

    /// `[HH:MM:SS] text`, the way the operator log shows it.
    pub fn display(&self) -> String {
        format!("[{}] {}", self.received_at.format("%H:%M:%S"), self.text)
    }
}

/// Notifications delivered to the primary context.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A line produced by the managed process.
    Log(LogLine),
    /// A managed process was launched.
    Launched(ManagedProcessHandle),
    /// The output stream of a launched process closed and the process was reaped.
    Exited { pid: u32, code: Option<i32> },
    /// Reading the output stream failed before end-of-stream.
    StreamFailed { pid: u32, message: String },
    /// The service port changed reachability.
    Reachability(bool),
}

pub type EventSender = mpsc::UnboundedSender<SupervisorEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SupervisorEvent>;

/// Create the channel that carries [`SupervisorEvent`]s.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_line_display() {
        let line = LogLine::now("start server @ 0.0.0.0:5244");
        let shown = line.display();
        assert!(shown.starts_with('['));
        assert!(shown.ends_with("] start server @ 0.0.0.0:5244"));
    }
}

//! TCP liveness probing of the service port.

use crate::config::SupervisorConfig;
use crate::events::{EventSender, SupervisorEvent};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Returns `true` iff a TCP connection to `host:port` succeeds within `timeout`.
///
/// Refusals, timeouts and resolution failures all read as unreachable.
pub async fn is_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Periodic reachability check that drives displayed status only.
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    host: String,
    port: u16,
    timeout: Duration,
    interval: Duration,
}

impl LivenessProbe {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: config.probe_timeout,
            interval: config.probe_interval,
        }
    }

    /// Run a single probe.
    pub async fn check(&self) -> bool {
        is_reachable(&self.host, self.port, self.timeout).await
    }

    /// Start probing on a fixed interval.
    ///
    /// The first observation and every change are sent as
    /// [`SupervisorEvent::Reachability`]. The task ends once the receiver is
    /// dropped.
    pub fn spawn(self, events: EventSender) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Liveness probe on {}:{} every {:?}",
                self.host, self.port, self.interval
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<bool> = None;

            loop {
                ticker.tick().await;
                let reachable = self.check().await;
                if last == Some(reachable) {
                    continue;
                }
                last = Some(reachable);
                debug!("Service reachable: {}", reachable);
                if events.send(SupervisorEvent::Reachability(reachable)).is_err() {
                    debug!("Event receiver dropped, stopping liveness probe");
                    break;
                }
            }
        })
    }
}

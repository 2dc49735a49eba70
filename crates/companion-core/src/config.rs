//! Centralized configuration for the companion.
//!
//! Constant defaults live on [`SupervisorDefaults`]; the runtime values are
//! carried by [`SupervisorConfig`], which is handed to every component at
//! construction.

use crate::error::{CompanionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reference defaults for the supervisor.
pub struct SupervisorDefaults;

impl SupervisorDefaults {
    pub const HOST: &'static str = "127.0.0.1";
    pub const PORT: u16 = 5244;
    pub const DEFAULT_USERNAME: &'static str = "admin";

    #[cfg(windows)]
    pub const EXECUTABLE_NAME: &'static str = "alist.exe";
    #[cfg(not(windows))]
    pub const EXECUTABLE_NAME: &'static str = "alist";

    pub const DATA_DIR_NAME: &'static str = "data";
    pub const PATH_OVERRIDE_FILE: &'static str = ".openlist_path";
    pub const GEOMETRY_FILE: &'static str = ".openlist_geo";

    // Liveness
    pub const PROBE_TIMEOUT: Duration = Duration::from_millis(100);
    pub const PROBE_INTERVAL: Duration = Duration::from_millis(1000);

    // Settle delays
    pub const RESTART_SETTLE: Duration = Duration::from_millis(1000);
    pub const REVEAL_SETTLE: Duration = Duration::from_millis(1500);
    pub const RESTORE_SETTLE: Duration = Duration::from_millis(2000);
    pub const RESTORE_RESTART_DELAY: Duration = Duration::from_millis(1000);
}

/// Arguments the managed executable understands.
pub struct ServerArgs;

impl ServerArgs {
    pub const SERVE: [&'static str; 2] = ["server", "--force-bin-dir"];
    pub const ADMIN_SHOW: [&'static str; 2] = ["admin", "show"];
    pub const ADMIN_SET: [&'static str; 2] = ["admin", "set"];
}

/// Runtime configuration shared by the supervisor components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Directory the co-located executable is looked up in.
    pub app_dir: PathBuf,
    /// Directory holding the hidden override files.
    pub settings_dir: PathBuf,
    /// File name of the managed executable.
    pub executable_name: String,
    /// Host probed for liveness.
    pub host: String,
    /// Port probed for liveness.
    pub port: u16,
    #[serde(with = "millis")]
    pub probe_timeout: Duration,
    #[serde(with = "millis")]
    pub probe_interval: Duration,
    #[serde(with = "millis")]
    pub restart_settle: Duration,
    #[serde(with = "millis")]
    pub reveal_settle: Duration,
    #[serde(with = "millis")]
    pub restore_settle: Duration,
    #[serde(with = "millis")]
    pub restore_restart_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let app_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            app_dir,
            settings_dir: PathBuf::from("."),
            executable_name: SupervisorDefaults::EXECUTABLE_NAME.to_string(),
            host: SupervisorDefaults::HOST.to_string(),
            port: SupervisorDefaults::PORT,
            probe_timeout: SupervisorDefaults::PROBE_TIMEOUT,
            probe_interval: SupervisorDefaults::PROBE_INTERVAL,
            restart_settle: SupervisorDefaults::RESTART_SETTLE,
            reveal_settle: SupervisorDefaults::REVEAL_SETTLE,
            restore_settle: SupervisorDefaults::RESTORE_SETTLE,
            restore_restart_delay: SupervisorDefaults::RESTORE_RESTART_DELAY,
        }
    }
}

impl SupervisorConfig {
    /// Load a config from a JSON file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CompanionError::io_with_path(e, path))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the supervisor misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.executable_name.trim().is_empty() {
            return Err(CompanionError::Config {
                message: "executable_name must not be empty".to_string(),
            });
        }
        if self.port == 0 {
            return Err(CompanionError::Config {
                message: "port must be non-zero".to_string(),
            });
        }
        if self.probe_interval.is_zero() {
            return Err(CompanionError::Config {
                message: "probe_interval must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Co-located executable candidate.
    pub fn colocated_executable(&self) -> PathBuf {
        self.app_dir.join(&self.executable_name)
    }

    /// Location of the hidden path override file.
    pub fn path_override_file(&self) -> PathBuf {
        self.settings_dir.join(SupervisorDefaults::PATH_OVERRIDE_FILE)
    }

    /// Location of the hidden window geometry file.
    pub fn geometry_file(&self) -> PathBuf {
        self.settings_dir.join(SupervisorDefaults::GEOMETRY_FILE)
    }

    /// Address shown to the operator for the admin panel.
    pub fn service_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Durations are stored as integer milliseconds in config files.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_reference_timings() {
        let config = SupervisorConfig::default();
        assert_eq!(config.port, 5244);
        assert_eq!(config.probe_timeout, Duration::from_millis(100));
        assert_eq!(config.probe_interval, Duration::from_secs(1));
        assert_eq!(config.restore_settle, Duration::from_secs(2));
        assert_eq!(config.service_url(), "http://127.0.0.1:5244");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("companion.json");
        std::fs::write(&path, r#"{"port": 5255, "restart_settle": 250}"#).unwrap();

        let config = SupervisorConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 5255);
        assert_eq!(config.restart_settle, Duration::from_millis(250));
        assert_eq!(config.executable_name, SupervisorDefaults::EXECUTABLE_NAME);
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let config = SupervisorConfig {
            executable_name: "  ".to_string(),
            ..SupervisorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CompanionError::Config { .. })
        ));
    }
}

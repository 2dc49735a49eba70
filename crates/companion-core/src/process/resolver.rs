//! Locating the managed executable.

use crate::config::SupervisorConfig;
use crate::error::{CompanionError, Result};
use crate::platform;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Resolves where the managed executable lives.
///
/// Lookup order: a co-located executable next to the companion, then the
/// path persisted in the hidden override file.
#[derive(Debug, Clone)]
pub struct PathResolver {
    colocated: PathBuf,
    override_file: PathBuf,
}

impl PathResolver {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            colocated: config.colocated_executable(),
            override_file: config.path_override_file(),
        }
    }

    /// Resolve the executable path, or `None` if no valid file is known.
    pub fn resolve(&self) -> Option<PathBuf> {
        if self.colocated.is_file() {
            debug!("Using co-located executable {}", self.colocated.display());
            return Some(platform::normalize_path(&self.colocated));
        }

        let raw = match fs::read_to_string(&self.override_file) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(
                    "No path override at {}: {}",
                    self.override_file.display(),
                    e
                );
                return None;
            }
        };

        let candidate = PathBuf::from(raw.trim().replace('"', ""));
        if candidate.is_file() {
            debug!("Using override executable {}", candidate.display());
            Some(platform::normalize_path(&candidate))
        } else {
            debug!(
                "Override {} does not reference a file",
                candidate.display()
            );
            None
        }
    }

    /// Persist `path` as the override for future resolution.
    ///
    /// Hiding the override file is best effort.
    pub fn set(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = self.override_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| CompanionError::io_with_path(e, parent))?;
            }
        }

        let normalized = platform::normalize_path(path);
        fs::write(&self.override_file, normalized.to_string_lossy().as_bytes())
            .map_err(|e| CompanionError::io_with_path(e, &self.override_file))?;

        if let Err(e) = platform::hide_file(&self.override_file) {
            warn!(
                "Failed to hide {}: {}",
                self.override_file.display(),
                e
            );
        }

        info!("Executable path updated to {}", normalized.display());
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(temp_dir: &TempDir) -> SupervisorConfig {
        SupervisorConfig {
            app_dir: temp_dir.path().join("app"),
            settings_dir: temp_dir.path().join("settings"),
            executable_name: "alist".to_string(),
            ..SupervisorConfig::default()
        }
    }

    #[test]
    fn test_resolve_empty() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = PathResolver::new(&config_in(&temp_dir));
        assert!(resolver.resolve().is_none());
    }

    #[test]
    fn test_resolve_colocated_wins() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);
        fs::create_dir_all(&config.app_dir).unwrap();
        fs::write(config.colocated_executable(), "bin").unwrap();

        let other = temp_dir.path().join("other-alist");
        fs::write(&other, "bin").unwrap();
        let resolver = PathResolver::new(&config);
        resolver.set(&other).unwrap();

        assert_eq!(resolver.resolve(), Some(config.colocated_executable()));
    }

    #[test]
    fn test_resolve_quoted_override() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);
        let exe = temp_dir.path().join("custom").join("alist");
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, "bin").unwrap();

        fs::create_dir_all(&config.settings_dir).unwrap();
        fs::write(
            config.path_override_file(),
            format!("  \"{}\"\n", exe.display()),
        )
        .unwrap();

        let resolver = PathResolver::new(&config);
        assert_eq!(resolver.resolve(), Some(exe));
    }

    #[test]
    fn test_resolve_override_to_directory_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);
        fs::create_dir_all(&config.settings_dir).unwrap();
        fs::write(
            config.path_override_file(),
            temp_dir.path().display().to_string(),
        )
        .unwrap();

        let resolver = PathResolver::new(&config);
        assert!(resolver.resolve().is_none());
    }

    #[test]
    fn test_set_persists() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);
        let exe = temp_dir.path().join("alist");
        fs::write(&exe, "bin").unwrap();

        let resolver = PathResolver::new(&config);
        resolver.set(&exe).unwrap();

        // A fresh resolver reads the same override
        assert_eq!(PathResolver::new(&config).resolve(), Some(exe));
    }
}

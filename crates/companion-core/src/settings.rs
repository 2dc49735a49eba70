//! Persisted window geometry for a front-end.

use crate::error::{CompanionError, Result};
use crate::platform;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

fn default_origin() -> i32 {
    100
}

/// Window position and, once known, size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    #[serde(default = "default_origin")]
    pub x: i32,
    #[serde(default = "default_origin")]
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            x: default_origin(),
            y: default_origin(),
            w: None,
            h: None,
        }
    }
}

impl WindowGeometry {
    /// Size, only when both dimensions are stored.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.w.zip(self.h)
    }

    /// Load from `path`. Missing or unreadable files yield the defaults.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No window geometry at {}: {}", path.display(), e);
                return Self::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring corrupt window geometry {}: {}", path.display(), e);
            Self::default()
        })
    }

    /// Write to `path` and hide the file. Failing to hide is not an error.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json).map_err(|e| CompanionError::io_with_path(e, path))?;
        if let Err(e) = platform::hide_file(path) {
            warn!("Failed to hide {}: {}", path.display(), e);
        }
        Ok(())
    }
}

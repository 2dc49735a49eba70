//! Platform-specific file handling.

use crate::error::{CompanionError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Mark a file as hidden from casual browsing.
///
/// # Platform Behavior
/// - **Windows**: Sets `FILE_ATTRIBUTE_HIDDEN`
/// - **Linux/macOS**: No-op; the companion's settings files are dot-prefixed
///
/// Callers treat failure as non-fatal.
pub fn hide_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(CompanionError::Io {
            message: "cannot hide a missing file".to_string(),
            path: Some(path.to_path_buf()),
            source: None,
        });
    }

    #[cfg(windows)]
    {
        hide_file_windows(path)
    }

    #[cfg(not(windows))]
    {
        debug!("Dot-prefixed name already hides {}", path.display());
        Ok(())
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn hide_file_windows(path: &Path) -> Result<()> {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{SetFileAttributesW, FILE_ATTRIBUTE_HIDDEN};

    let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();

    // SAFETY: `wide` is a NUL-terminated UTF-16 buffer that outlives the call.
    let ok = unsafe { SetFileAttributesW(wide.as_ptr(), FILE_ATTRIBUTE_HIDDEN) };
    if ok == 0 {
        return Err(CompanionError::io_with_path(
            std::io::Error::last_os_error(),
            path,
        ));
    }
    debug!("Marked {} hidden", path.display());
    Ok(())
}

/// Lexically normalize a path: drop `.` segments and fold `..` into the
/// preceding component. Symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

//! Export and restore of the managed server's data directory.
//!
//! Archives carry a top-level `data/` entry and restore by extracting over
//! the executable's directory.

use crate::config::{SupervisorConfig, SupervisorDefaults};
use crate::error::{CompanionError, Result};
use crate::platform;
use crate::process::{working_dir_of, ManagedProcessHandle, ProcessController};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Result of a successful export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    /// Archive that was written.
    pub archive: PathBuf,
    /// Number of regular files stored.
    pub files: usize,
}

/// How the extraction step of a restore ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored { files: usize },
    /// The OS refused access to a file, usually because a process still
    /// holds it. The data directory may be partially restored.
    FilesInUse { message: String },
    Failed { message: String },
}

impl RestoreOutcome {
    fn from_extraction(result: Result<usize>) -> Self {
        match result {
            Ok(files) => RestoreOutcome::Restored { files },
            Err(e) if e.is_permission_denied() => RestoreOutcome::FilesInUse {
                message: e.to_string(),
            },
            Err(e) => RestoreOutcome::Failed {
                message: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RestoreOutcome::Restored { .. })
    }
}

/// What a restore did.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub outcome: RestoreOutcome,
    /// The relaunched server. `None` if the relaunch itself failed.
    pub relaunched: Option<ManagedProcessHandle>,
}

/// Archives and restores `<executable-dir>/data`.
pub struct BackupEngine {
    controller: Arc<ProcessController>,
    restore_settle: Duration,
    restart_delay: Duration,
}

impl BackupEngine {
    pub fn new(config: &SupervisorConfig, controller: Arc<ProcessController>) -> Self {
        Self {
            controller,
            restore_settle: config.restore_settle,
            restart_delay: config.restore_restart_delay,
        }
    }

    /// Data directory of the resolved executable.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.controller
            .executable()
            .map(|exe| working_dir_of(&exe).join(SupervisorDefaults::DATA_DIR_NAME))
    }

    /// Write the data directory into a zip archive at `dest`.
    ///
    /// `Ok(None)` when no executable is resolved. A `.zip` extension is
    /// added when `dest` has none.
    pub fn export(&self, dest: impl AsRef<Path>) -> Result<Option<ExportSummary>> {
        let Some(exe) = self.controller.executable() else {
            debug!("No executable resolved, export is a no-op");
            return Ok(None);
        };
        let base = absolute_path(&working_dir_of(&exe))?;
        let data_dir = base.join(SupervisorDefaults::DATA_DIR_NAME);
        if !data_dir.is_dir() {
            return Err(CompanionError::DataDirNotFound(data_dir));
        }

        // Both sides absolute, so an archive written inside `data` is skipped
        let archive = absolute_path(&with_zip_extension(dest.as_ref()))?;
        if let Some(parent) = archive.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CompanionError::io_with_path(e, parent))?;
        }

        info!("Exporting {} to {}", data_dir.display(), archive.display());
        let files = write_archive(&base, &data_dir, &archive)?;
        info!("Exported {} file(s) to {}", files, archive.display());

        Ok(Some(ExportSummary { archive, files }))
    }

    /// Restore an archive over the executable's directory.
    ///
    /// Holds the lifecycle guard for the whole procedure: stop, settle, stop
    /// again, extract, then start regardless of how extraction went.
    /// `Ok(None)` when no executable is resolved.
    pub async fn import(&self, src: impl AsRef<Path>) -> Result<Option<RestoreReport>> {
        let src = src.as_ref().to_path_buf();
        let guard = self.controller.acquire()?;
        let Some(exe) = guard.executable() else {
            debug!("No executable resolved, import is a no-op");
            return Ok(None);
        };
        if !src.is_file() {
            return Err(CompanionError::io_with_path(
                std::io::Error::new(std::io::ErrorKind::NotFound, "archive not found"),
                src,
            ));
        }
        let target = working_dir_of(&exe);

        info!("Restoring {} into {}", src.display(), target.display());
        guard.stop();
        tokio::time::sleep(self.restore_settle).await;
        // Catch anything that came back up during the settle delay
        let survivors = guard.stop();
        if survivors > 0 {
            warn!("Killed {} process(es) that survived the first stop", survivors);
        }

        let extracted = tokio::task::spawn_blocking(move || extract_archive(&src, &target))
            .await
            .map_err(|e| CompanionError::Other(format!("Restore task failed: {e}")))
            .and_then(|result| result);
        let outcome = RestoreOutcome::from_extraction(extracted);

        match &outcome {
            RestoreOutcome::Restored { files } => {
                info!("Restored {} file(s)", files);
                tokio::time::sleep(self.restart_delay).await;
            }
            RestoreOutcome::FilesInUse { message } => {
                error!("Restore blocked by files in use: {}", message);
            }
            RestoreOutcome::Failed { message } => {
                error!("Restore failed: {}", message);
            }
        }

        let relaunched = match guard.start() {
            Ok(handle) => handle,
            Err(e) => {
                error!("Relaunch after restore failed: {}", e);
                None
            }
        };

        Ok(Some(RestoreReport {
            outcome,
            relaunched,
        }))
    }
}

fn with_zip_extension(dest: &Path) -> PathBuf {
    if dest.extension().is_some() {
        dest.to_path_buf()
    } else {
        dest.with_extension("zip")
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .map(|absolute| platform::normalize_path(&absolute))
        .map_err(|e| CompanionError::io_with_path(e, path))
}

/// Archive name of `path` relative to `base`, always `/`-separated.
fn entry_name(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn write_archive(base: &Path, data_dir: &Path, archive: &Path) -> Result<usize> {
    let file = File::create(archive).map_err(|e| CompanionError::io_with_path(e, archive))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let mut files = 0;

    for entry in WalkDir::new(data_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CompanionError::Io {
            message: format!("Failed to walk data directory: {}", e),
            path: e.path().map(Path::to_path_buf),
            source: e.into_io_error(),
        })?;
        let path = entry.path();
        if path == archive {
            continue;
        }
        let Some(name) = entry_name(base, path) else {
            continue;
        };

        if entry.file_type().is_dir() {
            zip.add_directory(name, entry_options(&entry))?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, entry_options(&entry))?;
            let mut input = BufReader::new(
                File::open(path).map_err(|e| CompanionError::io_with_path(e, path))?,
            );
            std::io::copy(&mut input, &mut zip)
                .map_err(|e| CompanionError::io_with_path(e, path))?;
            files += 1;
        } else {
            debug!("Skipping {} (not a regular file)", path.display());
        }
    }

    zip.finish()?
        .flush()
        .map_err(|e| CompanionError::io_with_path(e, archive))?;
    Ok(files)
}

#[cfg(unix)]
fn entry_options(entry: &walkdir::DirEntry) -> SimpleFileOptions {
    use std::os::unix::fs::PermissionsExt;
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    match entry.metadata() {
        Ok(metadata) => options.unix_permissions(metadata.permissions().mode()),
        Err(_) => options,
    }
}

#[cfg(not(unix))]
fn entry_options(_entry: &walkdir::DirEntry) -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Extract every entry of `archive` under `target`, overwriting in place.
fn extract_archive(archive: &Path, target: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| CompanionError::io_with_path(e, archive))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| CompanionError::Archive {
        message: format!("Invalid zip archive {}: {}", archive.display(), e),
        source: Some(e),
    })?;
    let mut files = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;

        let outpath = match entry.enclosed_name() {
            Some(path) => target.join(path),
            None => {
                warn!("Skipping unsafe archive entry {:?}", entry.name());
                continue;
            }
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)
                .map_err(|e| CompanionError::io_with_path(e, &outpath))?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CompanionError::io_with_path(e, parent))?;
            }
            let mut outfile =
                File::create(&outpath).map_err(|e| CompanionError::io_with_path(e, &outpath))?;
            std::io::copy(&mut entry, &mut outfile)
                .map_err(|e| CompanionError::io_with_path(e, &outpath))?;
            files += 1;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
            }
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use tempfile::TempDir;

    fn engine(executable: Option<PathBuf>) -> (BackupEngine, events::EventReceiver) {
        let (tx, rx) = events::channel();
        let config = SupervisorConfig {
            restore_settle: Duration::from_millis(10),
            restore_restart_delay: Duration::from_millis(10),
            ..SupervisorConfig::default()
        };
        let controller = Arc::new(ProcessController::new(&config, executable, tx));
        (BackupEngine::new(&config, controller), rx)
    }

    #[test]
    fn test_with_zip_extension() {
        assert_eq!(
            with_zip_extension(Path::new("/backups/openlist")),
            PathBuf::from("/backups/openlist.zip")
        );
        assert_eq!(
            with_zip_extension(Path::new("/backups/openlist.zip")),
            PathBuf::from("/backups/openlist.zip")
        );
    }

    #[test]
    fn test_entry_name_uses_forward_slashes() {
        let base = Path::new("/srv/alist");
        assert_eq!(
            entry_name(base, &base.join("data").join("temp").join("a.txt")).as_deref(),
            Some("data/temp/a.txt")
        );
        assert_eq!(entry_name(base, base), None);
    }

    #[test]
    fn test_restore_outcome_classification() {
        let denied = CompanionError::io_with_path(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "in use"),
            "/srv/alist/data/data.db",
        );
        assert!(matches!(
            RestoreOutcome::from_extraction(Err(denied)),
            RestoreOutcome::FilesInUse { .. }
        ));

        let corrupt = CompanionError::Archive {
            message: "Invalid zip archive".into(),
            source: None,
        };
        assert_eq!(
            RestoreOutcome::from_extraction(Err(corrupt)),
            RestoreOutcome::Failed {
                message: "Archive error: Invalid zip archive".into()
            }
        );

        assert!(RestoreOutcome::from_extraction(Ok(3)).is_success());
    }

    #[test]
    fn test_export_without_executable_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let (engine, _rx) = engine(None);
        assert!(engine.export(temp_dir.path().join("out.zip")).unwrap().is_none());
        assert!(engine.data_dir().is_none());
    }

    #[test]
    fn test_export_missing_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let (engine, _rx) = engine(Some(temp_dir.path().join("alist")));

        let result = engine.export(temp_dir.path().join("out.zip"));
        assert!(matches!(result, Err(CompanionError::DataDirNotFound(_))));
        assert!(!temp_dir.path().join("out.zip").exists());
    }

    #[test]
    fn test_export_layout() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        std::fs::create_dir_all(data.join("temp")).unwrap();
        std::fs::write(data.join("config.json"), b"{}").unwrap();
        std::fs::write(data.join("temp").join("x.bin"), [0u8, 1, 2]).unwrap();

        let (engine, _rx) = engine(Some(temp_dir.path().join("alist")));
        let summary = engine
            .export(temp_dir.path().join("backups").join("snapshot"))
            .unwrap()
            .unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(
            summary.archive,
            temp_dir.path().join("backups").join("snapshot.zip")
        );

        let zip = ZipArchive::new(File::open(&summary.archive).unwrap()).unwrap();
        let mut names: Vec<&str> = zip.file_names().collect();
        names.sort();
        assert_eq!(
            names,
            vec!["data/", "data/config.json", "data/temp/", "data/temp/x.bin"]
        );
    }

    #[test]
    fn test_export_into_data_dir_skips_archive() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        std::fs::create_dir_all(data.join("nested")).unwrap();
        std::fs::write(data.join("config.json"), b"{}").unwrap();

        let (engine, _rx) = engine(Some(temp_dir.path().join("alist")));
        let summary = engine
            .export(data.join("nested").join("..").join("self.zip"))
            .unwrap()
            .unwrap();

        assert_eq!(summary.archive, data.join("self.zip"));
        assert_eq!(summary.files, 1);

        let zip = ZipArchive::new(File::open(&summary.archive).unwrap()).unwrap();
        assert!(zip.file_names().all(|name| name != "data/self.zip"));
    }

    #[test]
    fn test_extract_skips_unsafe_entries() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("evil.zip");
        {
            let mut zip = ZipWriter::new(File::create(&archive).unwrap());
            let options = SimpleFileOptions::default();
            zip.start_file("../escaped.txt", options).unwrap();
            zip.write_all(b"nope").unwrap();
            zip.start_file("data/ok.txt", options).unwrap();
            zip.write_all(b"fine").unwrap();
            zip.finish().unwrap();
        }

        let target = temp_dir.path().join("app");
        std::fs::create_dir_all(&target).unwrap();
        let files = extract_archive(&archive, &target).unwrap();

        assert_eq!(files, 1);
        assert_eq!(
            std::fs::read_to_string(target.join("data").join("ok.txt")).unwrap(),
            "fine"
        );
        assert!(!temp_dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_extract_corrupt_archive() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("broken.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();

        let result = extract_archive(&archive, temp_dir.path());
        assert!(matches!(result, Err(CompanionError::Archive { .. })));
    }

    #[tokio::test]
    async fn test_import_without_executable_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("snapshot.zip");
        std::fs::write(&archive, b"").unwrap();

        let (engine, _rx) = engine(None);
        assert!(engine.import(&archive).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_import_rejected_while_busy() {
        let temp_dir = TempDir::new().unwrap();
        let (engine, _rx) = engine(Some(temp_dir.path().join("alist")));

        let _guard = engine.controller.acquire().unwrap();
        let result = engine.import(temp_dir.path().join("snapshot.zip")).await;
        assert!(matches!(result, Err(CompanionError::Busy { .. })));
    }
}

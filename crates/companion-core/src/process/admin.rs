//! Short-lived admin subcommands of the managed executable.

use super::streamer::{spawn_with_combined_output, LaunchConfig};
use crate::error::{CompanionError, Result};
use regex::Regex;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

static ANSI_SGR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("ANSI regex must compile"));

/// Remove ANSI color/style escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ANSI_SGR.replace_all(text, "").into_owned()
}

/// Run `executable` with `args` in its own directory and block until it exits.
///
/// Returns the combined stdout/stderr with ANSI escapes stripped. A non-zero
/// exit status is an [`CompanionError::AdminCommandFailed`] carrying the
/// captured text. Only the leading subcommand words are echoed into errors and
/// logs, so `admin set <password>` never leaks the password.
pub fn run_admin_command(executable: &Path, args: &[String]) -> Result<String> {
    let shown = args.iter().take(2).cloned().collect::<Vec<_>>().join(" ");
    info!("Running admin command `{}`", shown);

    let config = LaunchConfig::new(executable, args.iter().cloned());
    let (mut child, mut reader) = spawn_with_combined_output(&config)?;

    let mut raw = Vec::new();
    reader
        .read_to_end(&mut raw)
        .map_err(|e| CompanionError::io_with_path(e, executable))?;
    let status = child
        .wait()
        .map_err(|e| CompanionError::io_with_path(e, executable))?;

    let output = strip_ansi(&String::from_utf8_lossy(&raw));
    debug!("`{}` exited with {} ({} bytes)", shown, status, output.len());

    if !status.success() {
        return Err(CompanionError::AdminCommandFailed {
            args: shown,
            status: status.to_string(),
            output,
        });
    }
    Ok(output)
}

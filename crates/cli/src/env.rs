//! Environment variable resolution (§6 External Interfaces).
//!
//! mcabber reads `HOME` for its config directory (handled for us by
//! `wisp_core::config::config_path`, which goes through
//! `directories::ProjectDirs` instead), a temp directory for external-event
//! scratch files, and an optional path to a command FIFO that it both reads
//! from and re-exports so child processes (external-event scripts) can find
//! it.

use std::env;
use std::path::PathBuf;

/// Picks the temp directory the way mcabber's `get_tmpdir()` does: the
/// first of `MCABBERTMPDIR`, `TMPDIR`, `TMP`, `TEMP` that is set, falling
/// back to the platform default.
pub fn resolve_tmp_dir() -> PathBuf {
    for var in ["MCABBERTMPDIR", "TMPDIR", "TMP", "TEMP"] {
        if let Ok(value) = env::var(var) {
            if !value.is_empty() {
                return PathBuf::from(value);
            }
        }
    }
    env::temp_dir()
}

/// Path to the command FIFO. Honours an explicit `MCABBER_FIFO`, otherwise
/// falls back to a default path under the temp directory. Either way the
/// resolved path is re-exported into `MCABBER_FIFO` so anything we spawn
/// later (external-event scripts) can find it, mirroring the original
/// client's behaviour. Returns `None` only if FIFO support was explicitly
/// disabled by setting `MCABBER_FIFO` to an empty string.
pub fn resolve_fifo_path(tmp_dir: &std::path::Path) -> Option<PathBuf> {
    if let Ok(value) = env::var("MCABBER_FIFO") {
        if value.is_empty() {
            return None;
        }
        return Some(PathBuf::from(value));
    }

    let path = tmp_dir.join("wisp.fifo");
    unsafe {
        env::set_var("MCABBER_FIFO", &path);
    }
    Some(path)
}

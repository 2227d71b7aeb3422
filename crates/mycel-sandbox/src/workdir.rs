// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::SandboxError;

pub const STATUS_PIPE_FILENAME: &str = "status.pipe";
pub const INPUT_DIR: &str = "input";
pub const OUTPUT_DIR: &str = "output";

/// Join `filename` under `base`, refusing anything that could escape it:
/// empty names, absolute paths, backslash-rooted names, and `..` anywhere.
/// The returned path always satisfies `path.starts_with(base)`.
pub fn safe_filename(filename: &str, base: &Path) -> Result<PathBuf, SandboxError> {
    if filename.is_empty() {
        return Err(SandboxError::EmptyFilename);
    }
    if filename.starts_with('\\') {
        return Err(SandboxError::UnsafeFilename(filename.to_string()));
    }
    let rel = Path::new(filename);
    if rel.is_absolute() {
        return Err(SandboxError::UnsafeFilename(filename.to_string()));
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(SandboxError::UnsafeFilename(filename.to_string())),
        }
    }
    Ok(base.join(rel))
}

/// Create the per-task work directory:
///
/// ```text
/// {base}/{task_id}/
///   input/        pre-loaded artifacts
///   output/       harvested after the tool exits
///   status.pipe   0600 FIFO for NDJSON status frames
/// ```
pub fn setup_work_directory(base: &Path, task_id: &str) -> Result<PathBuf, SandboxError> {
    let work_dir = safe_filename(task_id, base)?;
    std::fs::create_dir_all(work_dir.join(INPUT_DIR))?;
    std::fs::create_dir_all(work_dir.join(OUTPUT_DIR))?;

    let pipe_path = work_dir.join(STATUS_PIPE_FILENAME);
    if pipe_path.exists() {
        std::fs::remove_file(&pipe_path)?;
    }
    make_fifo(&pipe_path, 0o600)?;
    debug!(work_dir = %work_dir.display(), "sandbox work directory ready");
    Ok(work_dir)
}

#[cfg(unix)]
fn make_fifo(path: &Path, mode: u32) -> Result<(), SandboxError> {
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SandboxError::Setup(format!("pipe path contains NUL: {}", path.display())))?;
    if unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) } != 0 {
        return Err(SandboxError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Remove a work directory. Missing directories are fine (crash cleanup may
/// run twice).
pub fn cleanup_work_directory(work_dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(work_dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(work_dir = %work_dir.display(), error = %e, "work directory cleanup failed");
        }
    }
}

/// Delete work directories older than `max_age`. Returns how many were
/// removed. Runs periodically to catch directories orphaned by a crash.
pub fn cleanup_stale_work_dirs(base: &Path, max_age: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(base) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if let Some(age) = age {
            if age > max_age {
                debug!(dir = %path.display(), age_secs = age.as_secs(), "removing stale work dir");
                if std::fs::remove_dir_all(&path).is_ok() {
                    removed += 1;
                }
            }
        }
    }
    removed
}

/// True when at least `min_free_mb` MiB are free on the filesystem holding
/// `path`. Fails open: an unreadable filesystem is reported as "enough" so
/// a broken statvfs never blocks tool execution.
#[cfg(unix)]
pub fn check_disk_space(path: &Path, min_free_mb: u64) -> bool {
    use std::os::unix::ffi::OsStrExt;
    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return true;
    };
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) } != 0 {
        return true;
    }
    let free_bytes = stats.f_bavail as u64 * stats.f_frsize as u64;
    free_bytes >= min_free_mb * 1024 * 1024
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

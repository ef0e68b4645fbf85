//! The atomic load/save half of the Registry Store: owns the bytes of
//! `projects.json` and the backup-and-restore rollback discipline that
//! every mutation goes through.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::jsonc::parse_jsonc;
use crate::types::{AppError, ProjectsFile, Result};

const HEADER_COMMENT: &str = "// Project configurations for CCR agent system";

/// Returns `~/.claude-code-router/projects.json`, the default registry
/// location. Falls back to a relative path if the home directory can't be
/// resolved (e.g. a minimal container), matching the "best effort, never
/// panic" posture of the rest of the registry.
pub fn default_projects_file_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".claude-code-router").join("projects.json"),
        None => PathBuf::from(".claude-code-router/projects.json"),
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".backup");
    PathBuf::from(s)
}

/// Reads and parses `path` as a comment-tolerant JSON `ProjectsFile`. A
/// missing file is not an error: it means an empty registry. A parse
/// failure is [`AppError::Invalid`] and leaves the file untouched — callers
/// must not attempt to "fix" it by overwriting.
pub async fn load(path: &Path) -> Result<ProjectsFile> {
    let bytes = match tokio::fs::read_to_string(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ProjectsFile::default());
        }
        Err(e) => return Err(AppError::from(e)),
    };

    parse_jsonc(&bytes)
}

/// Probes whether `dir` (or its nearest existing ancestor, if `dir` itself
/// doesn't exist yet) is writable, by creating and immediately removing a
/// zero-byte marker file. This is the cheapest reliable cross-platform
/// writability check; permission bits alone don't account for read-only
/// filesystems or mandatory-access-control layers.
async fn probe_writable(dir: &Path) -> Result<()> {
    let mut probe_dir = dir.to_path_buf();
    while !probe_dir.as_os_str().is_empty() {
        match tokio::fs::metadata(&probe_dir).await {
            Ok(meta) if meta.is_dir() => break,
            Ok(_) => return Err(AppError::Io(format!("{} is not a directory", probe_dir.display()))),
            Err(_) => match probe_dir.parent() {
                Some(parent) => probe_dir = parent.to_path_buf(),
                None => break,
            },
        }
    }

    let probe_file = probe_dir.join(".ccr-write-probe");
    match tokio::fs::write(&probe_file, b"").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&probe_file).await;
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(AppError::Perm(format!(
            "directory not writable: {}",
            probe_dir.display()
        ))),
        Err(e) => Err(AppError::from(e)),
    }
}

/// Atomically saves `data` to `path`, following the backup-and-restore
/// rollback discipline:
///
/// 1. Verify the containing directory is writable.
/// 2. Back up the existing file, if any.
/// 3. Create the containing directory if missing.
/// 4. Serialize with the leading comment header.
/// 5. Write the new content.
/// 6. Delete the backup on success (non-fatal if that fails).
/// 7. On any failure after the backup was taken, restore it and surface the
///    original error — the file must never be left half-written.
pub async fn save(path: &Path, data: &ProjectsFile) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    probe_writable(parent).await?;

    let backup = backup_path(path);
    let had_existing = tokio::fs::metadata(path).await.is_ok();
    if had_existing {
        tokio::fs::copy(path, &backup)
            .await
            .map_err(AppError::from)?;
    }

    let result = write_new_content(path, parent, data).await;

    match result {
        Ok(()) => {
            if had_existing {
                if let Err(e) = tokio::fs::remove_file(&backup).await {
                    warn!(error = %e, path = %backup.display(), "failed to remove registry backup file");
                }
            }
            Ok(())
        }
        Err(e) => {
            if had_existing {
                if let Err(restore_err) = tokio::fs::copy(&backup, path).await {
                    warn!(error = %restore_err, "failed to restore registry backup after a failed save");
                }
                let _ = tokio::fs::remove_file(&backup).await;
            } else {
                // Nothing existed before; remove whatever partial write happened.
                let _ = tokio::fs::remove_file(path).await;
            }
            Err(e)
        }
    }
}

async fn write_new_content(path: &Path, parent: &Path, data: &ProjectsFile) -> Result<()> {
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(AppError::from)?;

    let body = serde_json::to_string_pretty(data).map_err(AppError::from)?;
    let content = format!("{HEADER_COMMENT}\n{body}\n");

    tokio::fs::write(path, content).await.map_err(AppError::from)
}

//! Initialization payloads and the temporary seed scripts built from them.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use testbay_common::constants::{SEED_FILE_SUFFIX, SEED_SEPARATOR};
use testbay_common::error::{Result, TestbayError};

/// Data to run against the service before the workload starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitializationPayload {
    /// Script file, relative paths resolved against the seed root.
    pub file: Option<PathBuf>,
    /// Literal statements appended after the file contents.
    pub inline: Option<String>,
}

impl InitializationPayload {
    /// Returns `true` when neither a file nor inline text is configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.file.is_none() && self.inline.is_none()
    }

    /// Builds the seed script: file, separator, inline text, then the marker.
    ///
    /// The separator guards against a file whose last statement lacks its
    /// terminator. The marker statement runs last, so its artifact only
    /// exists once everything before it has executed.
    ///
    /// # Errors
    ///
    /// Returns [`TestbayError::SeedWriteFailed`] if the file cannot be read.
    pub fn compose(&self, seed_root: &Path, marker: &str) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(file) = &self.file {
            let path = seed_root.join(file);
            let content = std::fs::read_to_string(&path)
                .map_err(|source| TestbayError::SeedWriteFailed { path, source })?;
            parts.push(content);
        }
        if let Some(inline) = &self.inline {
            parts.push(inline.clone());
        }

        let mut script = parts
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(SEED_SEPARATOR);
        if !script.is_empty() {
            script.push(';');
        }
        script.push_str(marker);
        script.push(';');
        Ok(script)
    }
}

/// A seed script on disk, deleted when dropped.
#[derive(Debug)]
pub struct SeedFile {
    file: NamedTempFile,
}

impl SeedFile {
    /// Writes `script` to a fresh `{prefix}*.sql` file under `dir`.
    ///
    /// The file is made world-readable: the service inside the container
    /// reads it as its own unprivileged user.
    ///
    /// # Errors
    ///
    /// Returns [`TestbayError::SeedWriteFailed`] if the file cannot be
    /// created, written or have its permissions changed.
    pub fn write(script: &str, dir: &Path, prefix: &str) -> Result<Self> {
        let write_err = |source: std::io::Error| TestbayError::SeedWriteFailed {
            path: dir.to_path_buf(),
            source,
        };
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(SEED_FILE_SUFFIX)
            .tempfile_in(dir)
            .map_err(write_err)?;
        file.write_all(script.as_bytes()).map_err(write_err)?;
        file.flush().map_err(write_err)?;
        make_readable(file.path()).map_err(write_err)?;
        tracing::debug!(path = %file.path().display(), bytes = script.len(), "seed script written");
        Ok(Self { file })
    }

    /// Location of the script.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(unix)]
fn make_readable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_readable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Removes leftover seed files carrying `prefix` from `dir`.
///
/// Best-effort: unreadable entries and failed removals are skipped.
/// Returns the number of files removed.
pub fn remove_stale(dir: &Path, prefix: &str) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let is_seed = entry.file_name().to_string_lossy().starts_with(prefix)
            && entry.file_type().is_ok_and(|t| t.is_file());
        if !is_seed {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => tracing::debug!(path = %entry.path().display(), %e, "could not remove stale seed file"),
        }
    }
    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "removed stale seed files");
    }
    removed
}

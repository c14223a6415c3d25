// ~/src/extractor.rs

use std::{
    fs::{self, File},
    io::{self, Cursor, Read},
    path::{Component, Path, PathBuf},
};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::{error::ExtractError, fetcher::Fetch, DEBUG_NAME};

const MB: u64 = 1024 * 1024;
const STAGING_DIR: &str = ".partial";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Compressed download size.
    pub max_archive_bytes: u64,
    /// Sum of declared uncompressed sizes.
    pub max_total_bytes: u64,
    /// Declared size of one entry, and the hard cap on bytes copied for it.
    pub max_entry_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_archive_bytes: 10 * MB,
            max_total_bytes: 100 * MB,
            max_entry_bytes: 50 * MB,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub dirs: usize,
    pub bytes: u64,
}

/// One validated archive member, resolved against the staging root.
struct PlannedEntry {
    index: usize,
    relative: PathBuf,
    is_dir: bool,
    #[cfg_attr(not(unix), allow(dead_code))]
    unix_mode: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SecureExtractor {
    limits: ExtractLimits,
}

impl SecureExtractor {
    pub fn new(limits: ExtractLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ExtractLimits {
        self.limits
    }

    pub fn fetch_and_unpack(
        &self,
        fetcher: &dyn Fetch,
        url: &str,
        dest: &Path,
    ) -> Result<ExtractSummary, ExtractError> {
        info!(url, dest = %dest.display(), "[{}][EXTRACT] Fetching bundle", DEBUG_NAME);
        let bytes = fetcher.fetch_bytes(url, self.limits.max_archive_bytes)?;
        self.unpack_bytes(bytes, dest)
    }

    /// Validates every entry first, then extracts into a staging directory
    /// inside `dest` and moves the result into place. Any failure removes the
    /// staging directory, so `dest` only ever receives a complete archive.
    pub fn unpack_bytes(&self, bytes: Vec<u8>, dest: &Path) -> Result<ExtractSummary, ExtractError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let plan = self.plan(&mut archive)?;

        fs::create_dir_all(dest).map_err(|source| io_err(dest, source))?;
        let root = std::path::absolute(dest).map_err(|source| io_err(dest, source))?;
        let staging = root.join(STAGING_DIR);
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|source| io_err(&staging, source))?;
        }
        fs::create_dir_all(&staging).map_err(|source| io_err(&staging, source))?;

        let result = self
            .write_entries(&mut archive, &plan, &staging)
            .and_then(|summary| promote(&staging, &root).map(|_| summary));

        if staging.exists() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                warn!("[{}][EXTRACT] Failed to remove staging dir {}: {e}", DEBUG_NAME, staging.display());
            }
        }

        let summary = result?;
        info!(
            files = summary.files,
            dirs = summary.dirs,
            bytes = summary.bytes,
            "[{}][EXTRACT] Bundle extracted to {}", DEBUG_NAME, root.display()
        );
        Ok(summary)
    }

    fn plan<R: Read + io::Seek>(&self, archive: &mut ZipArchive<R>) -> Result<Vec<PlannedEntry>, ExtractError> {
        let mut total: u64 = 0;
        let mut plan = Vec::with_capacity(archive.len());

        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            let name = entry.name().to_string();

            total = total.saturating_add(entry.size());
            if total > self.limits.max_total_bytes {
                return Err(ExtractError::TotalSizeExceeded {
                    limit: self.limits.max_total_bytes,
                });
            }

            if entry.size() > self.limits.max_entry_bytes {
                return Err(ExtractError::EntryTooLarge {
                    entry: name,
                    limit: self.limits.max_entry_bytes,
                });
            }

            let relative = sanitize_archive_path(&name)?;
            plan.push(PlannedEntry {
                index,
                relative,
                is_dir: entry.is_dir(),
                unix_mode: entry.unix_mode(),
            });
        }

        Ok(plan)
    }

    fn write_entries<R: Read + io::Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        plan: &[PlannedEntry],
        staging: &Path,
    ) -> Result<ExtractSummary, ExtractError> {
        let mut summary = ExtractSummary::default();

        for planned in plan {
            let destination = resolve_within(staging, &planned.relative)?;

            if planned.is_dir {
                fs::create_dir_all(&destination).map_err(|source| io_err(&destination, source))?;
                summary.dirs += 1;
                continue;
            }

            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|source| io_err(parent, source))?;
            }

            let mut entry = archive.by_index(planned.index)?;
            let mut output = File::create(&destination).map_err(|source| io_err(&destination, source))?;

            let cap = self.limits.max_entry_bytes;
            let copied = io::copy(&mut (&mut entry).take(cap + 1), &mut output)
                .map_err(|source| io_err(&destination, source))?;
            if copied > cap {
                return Err(ExtractError::EntryTooLarge {
                    entry: entry.name().to_string(),
                    limit: cap,
                });
            }

            #[cfg(unix)]
            if let Some(mode) = planned.unix_mode {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(mode & 0o777);
                fs::set_permissions(&destination, perms).map_err(|source| io_err(&destination, source))?;
            }

            debug!(entry = %planned.relative.display(), bytes = copied, "[{}][EXTRACT] Wrote entry", DEBUG_NAME);
            summary.files += 1;
            summary.bytes += copied;
        }

        Ok(summary)
    }
}

/// Rejects absolute names and anything but plain segments. Backslashes are
/// treated as separators so Windows-made archives cannot sneak `..\` through.
pub fn sanitize_archive_path(entry: &str) -> Result<PathBuf, ExtractError> {
    let tainted = || ExtractError::PathEscape {
        entry: entry.to_string(),
    };

    let normalized = entry.replace('\\', "/");
    let path = Path::new(&normalized);
    if normalized.starts_with('/') || path.is_absolute() {
        return Err(tainted());
    }

    let mut sanitized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            _ => return Err(tainted()),
        }
    }

    if sanitized.as_os_str().is_empty() {
        return Err(tainted());
    }

    Ok(sanitized)
}

/// Joins and checks the result is a strict descendant of `root`.
fn resolve_within(root: &Path, relative: &Path) -> Result<PathBuf, ExtractError> {
    let target = root.join(relative);
    if target == root || !target.starts_with(root) {
        return Err(ExtractError::PathEscape {
            entry: relative.display().to_string(),
        });
    }
    Ok(target)
}

/// Moves every top-level staging child into `root`, replacing what was there.
fn promote(staging: &Path, root: &Path) -> Result<(), ExtractError> {
    let entries = fs::read_dir(staging).map_err(|source| io_err(staging, source))?;
    for entry in entries {
        let entry = entry.map_err(|source| io_err(staging, source))?;
        let target = root.join(entry.file_name());

        if let Ok(meta) = fs::symlink_metadata(&target) {
            let removed = if meta.is_dir() {
                fs::remove_dir_all(&target)
            } else {
                fs::remove_file(&target)
            };
            removed.map_err(|source| io_err(&target, source))?;
        }

        fs::rename(entry.path(), &target).map_err(|source| io_err(&target, source))?;
    }
    Ok(())
}

fn io_err(path: &Path, source: io::Error) -> ExtractError {
    ExtractError::Io {
        path: path.to_path_buf(),
        source,
    }
}

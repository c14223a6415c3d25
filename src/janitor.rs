// ~/src/janitor.rs

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{debug, info};

use crate::{error::JanitorError, APP_DIR_NAME, DEBUG_NAME};

const PROTECTED_ROOTS: &[&str] = &["/", "/home", "/usr", "/etc", "/var", "/root", "C:\\", "C:\\Windows", "C:\\Users"];

/// Retention and cleanup for generated files. Every operation refuses paths
/// outside the application-private directory.
#[derive(Debug, Clone)]
pub struct Janitor {
    required: String,
}

impl Default for Janitor {
    fn default() -> Self {
        Self::new(APP_DIR_NAME)
    }
}

impl Janitor {
    pub fn new(required: impl Into<String>) -> Self {
        Self {
            required: required.into(),
        }
    }

    /// Fails unless `dir` lies inside the application-private directory.
    pub fn check_scope(&self, dir: &Path) -> Result<(), JanitorError> {
        if !dir.to_string_lossy().contains(&self.required) {
            return Err(JanitorError::OutsideAppDir {
                required: self.required.clone(),
                path: dir.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Recursively deletes `dir`.
    pub fn wipe(&self, dir: &Path) -> Result<(), JanitorError> {
        self.check_scope(dir)?;

        let meta = fs::metadata(dir).map_err(|source| io_err(dir, source))?;
        if !meta.is_dir() {
            return Err(JanitorError::NotADirectory(dir.to_path_buf()));
        }

        let abs = std::path::absolute(dir).map_err(|source| io_err(dir, source))?;
        if is_protected(&abs) {
            return Err(JanitorError::ProtectedRoot(abs));
        }

        fs::remove_dir_all(&abs).map_err(|source| io_err(&abs, source))?;
        info!("[{}][JANITOR] Wiped {}", DEBUG_NAME, abs.display());
        Ok(())
    }

    /// Keeps the `keep` most recently modified files ending in `ext` and
    /// deletes the rest. Returns how many were removed.
    pub fn retain(&self, dir: &Path, ext: &str, keep: usize) -> Result<usize, JanitorError> {
        self.check_scope(dir)?;

        let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir).map_err(|source| io_err(dir, source))? {
            let entry = entry.map_err(|source| io_err(dir, source))?;
            let name = entry.file_name();
            if !name.to_string_lossy().ends_with(ext) {
                continue;
            }

            let meta = entry.metadata().map_err(|source| io_err(&entry.path(), source))?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((modified, entry.path()));
        }

        if candidates.len() <= keep {
            return Ok(0);
        }

        // newest first; the name breaks ties so equal mtimes stay deterministic
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        let mut removed = 0;
        for (_, path) in candidates.into_iter().skip(keep) {
            fs::remove_file(&path).map_err(|source| io_err(&path, source))?;
            debug!("[{}][JANITOR] Removed {}", DEBUG_NAME, path.display());
            removed += 1;
        }

        Ok(removed)
    }
}

fn is_protected(abs: &Path) -> bool {
    if PROTECTED_ROOTS.iter().any(|root| abs == Path::new(root)) {
        return true;
    }
    if abs.parent().is_none() {
        return true;
    }
    crate::paths::user_home_dir().is_some_and(|home| abs == home)
}

fn io_err(path: &Path, source: io::Error) -> JanitorError {
    JanitorError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        fs::File,
        time::{Duration, UNIX_EPOCH},
    };

    fn app_root() -> anyhow::Result<(tempfile::TempDir, PathBuf)> {
        let tmp = tempfile::tempdir()?;
        let root = tmp.path().join(APP_DIR_NAME);
        fs::create_dir_all(&root)?;
        Ok((tmp, root))
    }

    fn touch(path: &Path, secs: u64) -> anyhow::Result<()> {
        let file = File::create(path)?;
        file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))?;
        Ok(())
    }

    #[test]
    fn retain_keeps_two_newest_of_five() -> anyhow::Result<()> {
        let (_tmp, root) = app_root()?;
        let proc = root.join("proc");
        fs::create_dir_all(&proc)?;
        for (i, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            touch(&proc.join(format!("{name}.png")), 1_000 + i as u64 * 60)?;
        }
        touch(&proc.join("notes.txt"), 10)?;

        let removed = Janitor::default().retain(&proc, ".png", 2)?;
        assert_eq!(removed, 3);

        let mut left: Vec<String> = fs::read_dir(&proc)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<Result<_, _>>()?;
        left.sort();
        assert_eq!(left, vec!["d.png", "e.png", "notes.txt"]);
        Ok(())
    }

    #[test]
    fn retain_below_limit_is_a_noop() -> anyhow::Result<()> {
        let (_tmp, root) = app_root()?;
        touch(&root.join("only.png"), 5)?;
        assert_eq!(Janitor::default().retain(&root, ".png", 2)?, 0);
        assert!(root.join("only.png").exists());
        Ok(())
    }

    #[test]
    fn wipe_removes_tree_inside_app_dir() -> anyhow::Result<()> {
        let (_tmp, root) = app_root()?;
        let tmp_dir = root.join("files").join("abc").join(".tmp");
        fs::create_dir_all(tmp_dir.join("deep"))?;
        fs::write(tmp_dir.join("deep").join("cache.png"), b"x")?;

        Janitor::default().wipe(&tmp_dir)?;
        assert!(!tmp_dir.exists());
        assert!(root.join("files").join("abc").exists());
        Ok(())
    }

    #[test]
    fn wipe_refuses_paths_outside_app_dir() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let victim = tmp.path().join("important");
        fs::create_dir_all(&victim)?;

        let err = Janitor::default().wipe(&victim).unwrap_err();
        assert!(matches!(err, JanitorError::OutsideAppDir { .. }));
        assert!(victim.exists());

        let err = Janitor::default().retain(&victim, ".png", 0).unwrap_err();
        assert!(matches!(err, JanitorError::OutsideAppDir { .. }));
        Ok(())
    }

    #[test]
    fn wipe_refuses_system_roots() {
        // a janitor whose marker is empty accepts any path, so only the root guard is left
        let janitor = Janitor::new("");
        let err = janitor.wipe(Path::new("/")).unwrap_err();
        assert!(matches!(err, JanitorError::ProtectedRoot(_)));
    }

    #[test]
    fn wipe_requires_a_directory() -> anyhow::Result<()> {
        let (_tmp, root) = app_root()?;
        let file = root.join("latest.png");
        fs::write(&file, b"x")?;
        assert!(matches!(
            Janitor::default().wipe(&file),
            Err(JanitorError::NotADirectory(_))
        ));
        Ok(())
    }
}

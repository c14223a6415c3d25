// ~/src/bootstrap.rs

use std::{
    fs,
    path::{Path, PathBuf},
};

use regex::Regex;
use tracing::{debug, info};

use crate::{
    error::BootstrapError,
    extractor::SecureExtractor,
    fetcher::Fetch,
    paths::{log_dir, repos_dir, FILES_DIR},
    utility::file_exists,
    DEBUG_NAME,
};

pub const DEFAULT_REPOSITORY: &str = "https://github.com/TilmanGriesel/AlpineZen-Basecamp/archive/refs/heads/main.zip";
pub const DEFAULT_PROFILE_NAME: &str = "fellhorn";
pub const DEFAULT_PROFILE_TYPE: &str = "default";

const REPO_ARCHIVE_PATTERN: &str = r"([^/]+)/archive/refs/heads/([^/]+)\.zip$";

/// `https://host/owner/repo/archive/refs/heads/main.zip` unpacks into
/// `repo-main/`.
pub fn repo_folder_name(repository_url: &str) -> Option<String> {
    let re = Regex::new(REPO_ARCHIVE_PATTERN).ok()?;
    let caps = re.captures(repository_url)?;
    Some(format!("{}-{}", &caps[1], &caps[2]))
}

/// `repos/<repo>-<branch>/<name>/<type>.yaml`
pub fn profile_path(
    repos: &Path,
    repository_url: &str,
    name: &str,
    profile_type: &str,
) -> Result<PathBuf, BootstrapError> {
    let folder = repo_folder_name(repository_url)
        .ok_or_else(|| BootstrapError::UnrecognizedRepository(repository_url.to_string()))?;
    Ok(repos.join(folder).join(name).join(format!("{profile_type}.yaml")))
}

/// Creates the fixed top-level directories of the application root.
pub fn prepare_app_dirs(app_dir: &Path) -> Result<(), BootstrapError> {
    for dir in [repos_dir(app_dir), app_dir.join(FILES_DIR), log_dir(app_dir)] {
        fs::create_dir_all(&dir).map_err(|source| BootstrapError::Prepare {
            path: dir.clone(),
            source,
        })?;
        debug!("[{}][BOOTSTRAP] Ensured {}", DEBUG_NAME, dir.display());
    }
    Ok(())
}

/// Downloads the configuration bundle into `repos/` and returns the path of
/// the selected profile.
pub fn prepare(
    app_dir: &Path,
    fetcher: &dyn Fetch,
    repository_url: &str,
    name: &str,
    profile_type: &str,
) -> Result<PathBuf, BootstrapError> {
    info!("[{}][BOOTSTRAP] Preparing {}", DEBUG_NAME, app_dir.display());
    prepare_app_dirs(app_dir)?;

    let repos = repos_dir(app_dir);
    let profile = profile_path(&repos, repository_url, name, profile_type)?;

    let summary = SecureExtractor::default().fetch_and_unpack(fetcher, repository_url, &repos)?;
    info!(
        files = summary.files,
        bytes = summary.bytes,
        "[{}][BOOTSTRAP] Default repository updated", DEBUG_NAME
    );

    if !file_exists(&profile) {
        return Err(BootstrapError::ProfileMissing(profile));
    }
    info!("[{}][BOOTSTRAP] Using profile {}", DEBUG_NAME, profile.display());
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use std::{
        io::{Cursor, Write},
        sync::atomic::{AtomicUsize, Ordering},
    };

    struct BundleFetch {
        bytes: Vec<u8>,
        calls: AtomicUsize,
    }

    impl Fetch for BundleFetch {
        fn download(&self, url: &str, _dest: &Path) -> Result<u64, FetchError> {
            Err(FetchError::Status {
                url: url.to_string(),
                status: 500,
            })
        }

        fn fetch_bytes(&self, _url: &str, _limit: u64) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }
    }

    fn bundle(entries: &[(&str, &str)]) -> anyhow::Result<Vec<u8>> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (path, contents) in entries {
            zip.start_file(*path, zip::write::FileOptions::default())?;
            zip.write_all(contents.as_bytes())?;
        }
        Ok(zip.finish()?.into_inner())
    }

    #[test]
    fn folder_name_from_github_archive_url() {
        assert_eq!(repo_folder_name(DEFAULT_REPOSITORY).as_deref(), Some("AlpineZen-Basecamp-main"));
        assert_eq!(
            repo_folder_name("https://example.com/a/b/archive/refs/heads/dev.zip").as_deref(),
            Some("b-dev")
        );
        assert_eq!(repo_folder_name("https://example.com/bundle.zip"), None);
    }

    #[test]
    fn prepare_unpacks_bundle_and_resolves_profile() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let app = tmp.path().join(crate::APP_DIR_NAME);
        let fetcher = BundleFetch {
            bytes: bundle(&[("AlpineZen-Basecamp-main/fellhorn/default.yaml", "input:\n  url: https://x/y.jpg\n")])?,
            calls: AtomicUsize::new(0),
        };

        let profile = prepare(&app, &fetcher, DEFAULT_REPOSITORY, DEFAULT_PROFILE_NAME, DEFAULT_PROFILE_TYPE)?;

        assert_eq!(
            profile,
            app.join("repos").join("AlpineZen-Basecamp-main").join("fellhorn").join("default.yaml")
        );
        assert!(profile.is_file());
        assert!(app.join("files").is_dir());
        assert!(app.join("log").is_dir());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn unknown_url_shape_fails_before_download() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let fetcher = BundleFetch {
            bytes: Vec::new(),
            calls: AtomicUsize::new(0),
        };

        let err = prepare(tmp.path(), &fetcher, "https://example.com/bundle.zip", "a", "b").unwrap_err();
        assert!(matches!(err, BootstrapError::UnrecognizedRepository(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn missing_profile_is_reported() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let fetcher = BundleFetch {
            bytes: bundle(&[("AlpineZen-Basecamp-main/other/default.yaml", "x: 1\n")])?,
            calls: AtomicUsize::new(0),
        };

        let err = prepare(tmp.path(), &fetcher, DEFAULT_REPOSITORY, "fellhorn", "default").unwrap_err();
        assert!(matches!(err, BootstrapError::ProfileMissing(_)));
        Ok(())
    }
}

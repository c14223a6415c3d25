// ~/src/error.rs

use std::{io, path::PathBuf};

use thiserror::Error;

/* =========================
   CONFIGURATION
   ========================= */

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config root must be a mapping")]
    NotAMapping,

    #[error("missing required config key '{0}'")]
    MissingKey(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/* =========================
   NETWORK
   ========================= */

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("failed to write download to {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("non-retryable error: {0}")]
    NonRetryable(Box<FetchError>),

    #[error("operation failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    pub fn request(url: &str, err: reqwest::Error) -> Self {
        Self::Request {
            url: url.to_string(),
            message: error_chain_text(&err.without_url()),
        }
    }

    /// What went wrong, without the URL, for retry classification.
    pub fn cause_text(&self) -> String {
        match self {
            Self::Client(message) | Self::Request { message, .. } => message.clone(),
            Self::Status { status, .. } => format!("unexpected status {status}"),
            Self::TooLarge { limit, .. } => format!("response exceeds {limit} bytes"),
            Self::Io { source, .. } => error_chain_text(source),
            Self::NonRetryable(inner) | Self::Exhausted { last: inner, .. } => inner.cause_text(),
        }
    }
}

/// Flattens an error and all of its sources into one `a: b: c` line.
pub fn error_chain_text(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

/* =========================
   ARCHIVES
   ========================= */

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("archive is not a readable zip")]
    Zip(#[from] zip::result::ZipError),

    #[error("content filepath is tainted: {entry}")]
    PathEscape { entry: String },

    #[error("total uncompressed size exceeds limit of {limit} bytes")]
    TotalSizeExceeded { limit: u64 },

    #[error("entry {entry} exceeds max single file size of {limit} bytes")]
    EntryTooLarge { entry: String, limit: u64 },

    #[error("extraction io failure at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("repository url does not look like <owner>/<repo>/archive/refs/heads/<branch>.zip: {0}")]
    UnrecognizedRepository(String),

    #[error("failed to create {path}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to fetch configuration bundle")]
    Extract(#[from] ExtractError),

    #[error("profile not found in configuration bundle: {0}")]
    ProfileMissing(PathBuf),
}

/* =========================
   FILESYSTEM
   ========================= */

#[derive(Debug, Error)]
pub enum JanitorError {
    #[error("directory path must include '{required}': {path}")]
    OutsideAppDir { required: String, path: PathBuf },

    #[error("refusing to remove important system directory: {0}")]
    ProtectedRoot(PathBuf),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("janitor io failure at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/* =========================
   IMAGES
   ========================= */

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("file path cannot be empty")]
    EmptyPath,

    #[error("file is too large: {0} bytes")]
    TooLarge(u64),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid image format or corrupt image")]
    Decode(#[source] image::ImageError),

    #[error("failed to re-encode image")]
    Encode(#[source] image::ImageError),

    #[error("sanitizer io failure at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to open image {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to save image {path}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image io failure at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("crop rectangle is empty for a {width}x{height} image")]
    EmptyCrop { width: u32, height: u32 },

    #[error("clock rendering failed: {0}")]
    Clock(String),
}

/* =========================
   DESKTOP
   ========================= */

#[derive(Debug, Error)]
pub enum DesktopError {
    #[error("failed to set desktop image: {0}")]
    Rejected(String),

    #[error("failed to launch {program}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },
}

/* =========================
   PIPELINE
   ========================= */

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("deep clean requires source fetch")]
    InvalidRequest,

    #[error("no processed cache at {0}; a fetching cycle has to run first")]
    MissingCache(PathBuf),

    #[error("failed to prepare directory {path}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Janitor(#[from] JanitorError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Sanitize(#[from] SanitizeError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Desktop(#[from] DesktopError),
}

impl CycleError {
    /// Configuration mistakes rather than runtime failures.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidRequest | Self::Janitor(JanitorError::OutsideAppDir { .. }))
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("update interval is too short; minimum is {minimum} minutes, got {actual}")]
    IntervalTooShort { minimum: i64, actual: i64 },

    #[error("failed to spawn {0} thread")]
    Spawn(&'static str, #[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Leaf;

    impl std::fmt::Display for Leaf {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("Connection refused (os error 111)")
        }
    }

    impl std::error::Error for Leaf {}

    #[derive(Debug)]
    struct Outer(Leaf);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("error sending request")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn chain_text_includes_sources() {
        let text = error_chain_text(&Outer(Leaf));
        assert_eq!(text, "error sending request: Connection refused (os error 111)");
    }

    #[test]
    fn cause_text_leaves_out_the_url() {
        let err = FetchError::Status {
            url: "https://timeout.example.com/refused.jpg".into(),
            status: 404,
        };
        assert_eq!(err.cause_text(), "unexpected status 404");

        let wrapped = FetchError::NonRetryable(Box::new(FetchError::Request {
            url: "https://example.com/a.jpg".into(),
            message: "tcp connect error: Connection refused".into(),
        }));
        assert_eq!(wrapped.cause_text(), "tcp connect error: Connection refused");
    }

    #[test]
    fn only_configuration_mistakes_are_fatal() {
        assert!(CycleError::InvalidRequest.is_fatal());
        assert!(CycleError::Janitor(JanitorError::OutsideAppDir {
            required: ".alpenglow_wallpaper".into(),
            path: PathBuf::from("/srv/wall"),
        })
        .is_fatal());
        assert!(!CycleError::Janitor(JanitorError::NotADirectory(PathBuf::from("x"))).is_fatal());
        assert!(!CycleError::MissingCache(PathBuf::from("cache.png")).is_fatal());
    }
}

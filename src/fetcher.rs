// ~/src/fetcher.rs

use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::Path,
    time::Duration,
};

use reqwest::blocking::{Client, Response};
use tracing::{debug, info};

use crate::{
    error::{error_chain_text, FetchError},
    retry::RetryPolicy,
    DEBUG_NAME,
};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn user_agent() -> String {
    format!("{}/{}", crate::APP_NAME, env!("CARGO_PKG_VERSION"))
}

/// Plain HTTP GET capability. The engine and the bootstrap only see this.
pub trait Fetch: Send + Sync {
    /// Streams the body of `url` into `dest`, returning the byte count.
    fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;

    /// Reads the whole body into memory, failing once it grows past `limit`.
    fn fetch_bytes(&self, url: &str, limit: u64) -> Result<Vec<u8>, FetchError>;
}

pub struct ResilientFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl ResilientFetcher {
    pub fn new(policy: RetryPolicy) -> Result<Self, FetchError> {
        Self::with_timeout(policy, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(policy: RetryPolicy, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()
            .map_err(|e| FetchError::Client(error_chain_text(&e)))?;

        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn get(&self, url: &str) -> Result<Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::request(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }

    fn download_once(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let mut response = self.get(url)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| FetchError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = File::create(dest).map_err(|source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        let written = response
            .copy_to(&mut writer)
            .map_err(|e| FetchError::request(url, e))?;
        writer.flush().map_err(|source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        Ok(written)
    }

    fn fetch_bytes_once(&self, url: &str, limit: u64) -> Result<Vec<u8>, FetchError> {
        let response = self.get(url)?;

        let mut buf = Vec::new();
        response
            .take(limit.saturating_add(1))
            .read_to_end(&mut buf)
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: error_chain_text(&e),
            })?;

        if buf.len() as u64 > limit {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                limit,
            });
        }

        Ok(buf)
    }
}

impl Fetch for ResilientFetcher {
    fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        debug!(url, dest = %dest.display(), "[{}][FETCH] Downloading", DEBUG_NAME);
        let written = self.policy.run(|attempt| {
            debug!(url, attempt, "[{}][FETCH] GET", DEBUG_NAME);
            self.download_once(url, dest)
        })?;
        info!(url, bytes = written, "[{}][FETCH] Download complete", DEBUG_NAME);
        Ok(written)
    }

    fn fetch_bytes(&self, url: &str, limit: u64) -> Result<Vec<u8>, FetchError> {
        self.policy.run(|attempt| {
            debug!(url, attempt, limit, "[{}][FETCH] GET into memory", DEBUG_NAME);
            self.fetch_bytes_once(url, limit)
        })
    }
}

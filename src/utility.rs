// ~/src/utility.rs

use std::{
    fs::{self, File},
    io,
    path::Path,
};

use image::Rgb;
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

pub const HASH_LENGTH: usize = 16;

pub fn hash_sha256(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// First sixteen hex characters of `sha256(input + seed)`.
pub fn short_hash(input: &str, seed: &str) -> String {
    let mut full = hash_sha256(&format!("{input}{seed}"));
    full.truncate(HASH_LENGTH);
    full
}

/// True for an existing regular file; directories do not count.
pub fn file_exists(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Copies `src` over `dst` and syncs the destination before returning.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut source = File::open(src)?;
    let mut dest = File::create(dst)?;
    let copied = io::copy(&mut source, &mut dest)?;
    dest.sync_all()?;
    Ok(copied)
}

#[cfg(windows)]
pub fn to_wstring(s: &str) -> Vec<u16> {
    use std::{ffi::OsStr, os::windows::ffi::OsStrExt};

    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

pub fn parse_hex_color(value: &str) -> Result<Rgb<u8>, ConfigError> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if digits.len() != 6 {
        return Err(ConfigError::invalid(
            "clock_font_color",
            format!("invalid length for '{value}', must be 6 hex digits"),
        ));
    }

    let bytes = hex::decode(digits)
        .map_err(|e| ConfigError::invalid("clock_font_color", format!("'{value}': {e}")))?;
    Ok(Rgb([bytes[0], bytes[1], bytes[2]]))
}

// ~/src/sanitizer.rs

use std::{
    ffi::OsString,
    fs::{self, File},
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

use image::{ImageFormat, ImageReader};
use tracing::debug;

use crate::{error::SanitizeError, DEBUG_NAME};

pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Decodes the downloaded file and re-encodes it in its own format, replacing
/// the original. Whatever the decoder did not understand is dropped.
pub fn sanitize_image(path: &Path) -> Result<ImageFormat, SanitizeError> {
    if path.as_os_str().is_empty() {
        return Err(SanitizeError::EmptyPath);
    }

    let size = fs::metadata(path).map_err(|source| io_err(path, source))?.len();
    if size > MAX_IMAGE_BYTES {
        return Err(SanitizeError::TooLarge(size));
    }

    let reader = ImageReader::open(path)
        .map_err(|source| io_err(path, source))?
        .with_guessed_format()
        .map_err(|source| io_err(path, source))?;

    let format = match reader.format() {
        Some(f @ (ImageFormat::Png | ImageFormat::Jpeg)) => f,
        Some(other) => return Err(SanitizeError::UnsupportedFormat(format!("{other:?}"))),
        None => return Err(SanitizeError::UnsupportedFormat("unknown".to_string())),
    };

    let img = reader.decode().map_err(SanitizeError::Decode)?;

    let temp = sanitized_sibling(path);
    let written = write_encoded(&img, format, &temp);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    fs::rename(&temp, path).map_err(|source| io_err(path, source))?;
    debug!(format = ?format, bytes = size, "[{}][SANITIZE] Re-encoded {}", DEBUG_NAME, path.display());
    Ok(format)
}

fn write_encoded(img: &image::DynamicImage, format: ImageFormat, dest: &Path) -> Result<(), SanitizeError> {
    let file = File::create(dest).map_err(|source| io_err(dest, source))?;
    let mut writer = BufWriter::new(file);
    img.write_to(&mut writer, format).map_err(SanitizeError::Encode)?;

    let file = writer
        .into_inner()
        .map_err(|e| io_err(dest, e.into_error()))?;
    file.sync_all().map_err(|source| io_err(dest, source))?;
    Ok(())
}

fn sanitized_sibling(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".sanitized");
    PathBuf::from(name)
}

fn io_err(path: &Path, source: io::Error) -> SanitizeError {
    SanitizeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

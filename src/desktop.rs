// ~/src/desktop.rs

use std::path::Path;

use tracing::debug;

use crate::{error::DesktopError, DEBUG_NAME};

/// The one OS capability the pipeline consumes.
pub trait DesktopBackground: Send + Sync {
    fn set_desktop_background(&self, path: &Path) -> Result<(), DesktopError>;
}

/// Accepts every image and paints nothing. Used for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDesktop;

impl DesktopBackground for NoopDesktop {
    fn set_desktop_background(&self, path: &Path) -> Result<(), DesktopError> {
        debug!("[{}][DESKTOP] Headless, not applying {}", DEBUG_NAME, path.display());
        Ok(())
    }
}

/// The implementation for the target this binary was built for.
pub fn platform_default() -> Box<dyn DesktopBackground> {
    Box::new(platform::PlatformDesktop)
}

#[cfg(windows)]
mod platform {
    use std::{ffi::c_void, path::Path};

    use windows::Win32::UI::WindowsAndMessaging::{
        SystemParametersInfoW, SPIF_SENDCHANGE, SPIF_UPDATEINIFILE, SPI_SETDESKWALLPAPER,
    };

    use super::DesktopBackground;
    use crate::{error::DesktopError, utility::to_wstring};

    pub struct PlatformDesktop;

    impl DesktopBackground for PlatformDesktop {
        fn set_desktop_background(&self, path: &Path) -> Result<(), DesktopError> {
            let mut wide = to_wstring(&path.to_string_lossy());
            unsafe {
                SystemParametersInfoW(
                    SPI_SETDESKWALLPAPER,
                    0,
                    Some(wide.as_mut_ptr() as *mut c_void),
                    SPIF_UPDATEINIFILE | SPIF_SENDCHANGE,
                )
            }
            .map_err(|e| DesktopError::Rejected(e.to_string()))
        }
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use std::{path::Path, process::Command};

    use super::DesktopBackground;
    use crate::error::DesktopError;

    pub struct PlatformDesktop;

    impl DesktopBackground for PlatformDesktop {
        fn set_desktop_background(&self, path: &Path) -> Result<(), DesktopError> {
            let escaped = path.to_string_lossy().replace('\\', "\\\\").replace('"', "\\\"");
            let script = format!(
                "tell application \"System Events\" to tell every desktop to set picture to \"{escaped}\""
            );

            let output = Command::new("osascript")
                .args(["-e", &script])
                .output()
                .map_err(|source| DesktopError::Spawn {
                    program: "osascript",
                    source,
                })?;
            if !output.status.success() {
                return Err(DesktopError::Rejected(
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ));
            }
            Ok(())
        }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
mod platform {
    use std::{path::Path, process::Command};

    use super::DesktopBackground;
    use crate::error::DesktopError;

    const SCHEMA: &str = "org.gnome.desktop.background";

    pub struct PlatformDesktop;

    impl DesktopBackground for PlatformDesktop {
        fn set_desktop_background(&self, path: &Path) -> Result<(), DesktopError> {
            let uri = format!("file://{}", path.display());
            // GNOME 42+ reads the dark variant separately
            for key in ["picture-uri", "picture-uri-dark"] {
                let output = Command::new("gsettings")
                    .args(["set", SCHEMA, key, &uri])
                    .output()
                    .map_err(|source| DesktopError::Spawn {
                        program: "gsettings",
                        source,
                    })?;
                if !output.status.success() && key == "picture-uri" {
                    return Err(DesktopError::Rejected(
                        String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    ));
                }
            }
            Ok(())
        }
    }
}

#[cfg(not(any(windows, unix)))]
mod platform {
    use std::path::Path;

    use super::DesktopBackground;
    use crate::error::DesktopError;

    pub struct PlatformDesktop;

    impl DesktopBackground for PlatformDesktop {
        fn set_desktop_background(&self, _path: &Path) -> Result<(), DesktopError> {
            Err(DesktopError::Rejected("unsupported platform".to_string()))
        }
    }
}

//! Path helpers for key and data files

use std::path::{Path, PathBuf};

/// Expand a path, replacing a leading `~` with the user's home directory
pub fn expand_path(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Ok(stripped) = path.strip_prefix("~") {
            if let Some(home) = home_dir() {
                return home.join(stripped);
            }
        }
    }
    path.to_path_buf()
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

/// Data directory for the current platform
///
/// - Linux: `$XDG_DATA_HOME/campuscoin` or `~/.local/share/campuscoin`
/// - macOS: `~/Library/Application Support/CampusCoin`
/// - Windows: `%APPDATA%\CampusCoin`
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir()
            .map(|h| h.join("Library/Application Support/CampusCoin"))
            .unwrap_or_else(|| PathBuf::from(".campuscoin"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                home_dir()
                    .map(|h| h.join(".local/share"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("campuscoin")
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("CampusCoin")
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        home_dir()
            .map(|h| h.join(".campuscoin"))
            .unwrap_or_else(|| PathBuf::from(".campuscoin"))
    }
}

/// Default location of the authority keyfile
pub fn default_authority_keyfile() -> PathBuf {
    default_data_dir().join("authority.key")
}

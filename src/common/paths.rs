//! Configuration/log locations and source path normalization

use std::path::{Component, Path, PathBuf};

/// Name used for the config and data directories
const APP_NAME: &str = "jsonnet-debugger";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/jsonnet-debugger/`
/// - macOS: `~/Library/Application Support/jsonnet-debugger/`
/// - Windows: `%APPDATA%\jsonnet-debugger\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Normalize a source path so breakpoints and stop locations compare equal
///
/// Existing files are canonicalized. Anything else is made absolute against
/// the working directory and cleaned lexically (`.` dropped, `..` popped).
/// Pseudo-files such as `<cmdline>` and `<stdin>` are returned unchanged.
pub fn normalize(path: &Path) -> PathBuf {
    if is_pseudo_file(path) {
        return path.to_path_buf();
    }
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Names like `<stdin>` that stand for input without a backing file
pub fn is_pseudo_file(path: &Path) -> bool {
    let s = path.to_string_lossy();
    s.starts_with('<') && s.ends_with('>')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_normalize_cleans_dot_segments() {
        let path = Path::new("/no/such/dir/./lib/../main.jsonnet");
        assert_eq!(normalize(path), PathBuf::from("/no/such/dir/main.jsonnet"));
    }

    #[test]
    fn test_normalize_relative_is_absolute() {
        let normalized = normalize(Path::new("missing-file.jsonnet"));
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("missing-file.jsonnet"));
    }

    #[test]
    fn test_pseudo_files_are_untouched() {
        assert_eq!(normalize(Path::new("<cmdline>")), PathBuf::from("<cmdline>"));
    }
}

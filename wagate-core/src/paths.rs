// ABOUTME: XDG Base Directory paths for config, data, credentials and logs.
// ABOUTME: Falls back to relative directories when no home directory is known.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Application identifier for XDG directories
const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "wagate";
const APPLICATION: &str = "wagate";

/// Get XDG-compliant directories for the application
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Get the data directory path (e.g., ~/.local/share/wagate/)
/// Falls back to ./data if XDG directories unavailable
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Get the config directory path (e.g., ~/.config/wagate/)
/// Falls back to current directory if XDG directories unavailable
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the default config file path
/// e.g., ~/.config/wagate/config.toml
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Credential root under a data directory
pub fn credentials_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("auth")
}

/// Log directory under a data directory
pub fn log_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("logs")
}

/// Default health log database under a data directory
pub fn health_db(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("health.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_layout_under_data_dir() {
        let root = Path::new("/srv/wagate");
        assert_eq!(credentials_dir(root), Path::new("/srv/wagate/auth"));
        assert_eq!(log_dir(root), Path::new("/srv/wagate/logs"));
        assert_eq!(health_db(root), Path::new("/srv/wagate/health.db"));
    }

    #[test]
    fn test_config_file_is_toml() {
        assert!(config_file().ends_with("config.toml"));
    }
}

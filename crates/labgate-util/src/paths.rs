//! Default paths for labgate components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/labgate/labgated.sock` or `/tmp/labgate-$USER/labgated.sock`
//! - Data: `$XDG_DATA_HOME/labgate` or `~/.local/share/labgate`
//! - Config: `$XDG_CONFIG_HOME/labgate/config.toml` or `~/.config/labgate/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const LABGATE_SOCKET_ENV: &str = "LABGATE_SOCKET";

/// Environment variable for overriding the data directory
pub const LABGATE_DATA_DIR_ENV: &str = "LABGATE_DATA_DIR";

const SOCKET_FILENAME: &str = "labgated.sock";
const CONFIG_FILENAME: &str = "config.toml";
const ROSTER_FILENAME: &str = "roster.yaml";
const APP_DIR: &str = "labgate";

/// Default socket path, honoring `$LABGATE_SOCKET`
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(LABGATE_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Socket path ignoring `$LABGATE_SOCKET`.
/// Used for config defaults where the env var is checked separately.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Default data directory, honoring `$LABGATE_DATA_DIR`
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(LABGATE_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share").join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Default configuration file path
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Default roster snapshot inside a data directory
pub fn roster_path_in(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join(ROSTER_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_contains_app_dir() {
        let path = socket_path_without_env();
        assert!(path.to_string_lossy().contains("labgate"));
        assert!(path.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn data_dir_contains_app_dir() {
        assert!(data_dir_without_env().to_string_lossy().contains("labgate"));
    }

    #[test]
    fn roster_lives_in_data_dir() {
        let dir = PathBuf::from("/var/lib/labgate");
        assert_eq!(roster_path_in(&dir), dir.join("roster.yaml"));
    }
}

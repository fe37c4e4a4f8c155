//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// SDN controller settings
    #[serde(default)]
    pub controller: RawControllerConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawServiceConfig {
    /// IPC socket path (default: $XDG_RUNTIME_DIR/labgate/labgated.sock)
    pub socket_path: Option<PathBuf>,

    /// Data directory for roster snapshots
    pub data_dir: Option<PathBuf>,

    /// Snapshot loaded at startup (default: <data_dir>/roster.yaml)
    pub roster_path: Option<PathBuf>,

    /// Target of `export_roster` when no path is given (default: roster_path)
    pub export_path: Option<PathBuf>,

    /// Disconnect every session before exiting
    pub teardown_on_shutdown: Option<bool>,
}

/// SDN controller settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawControllerConfig {
    /// Base URL of the controller REST API
    pub url: Option<String>,

    /// Per-call timeout in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Delete already-pushed rules when an install fails part way
    pub rollback_partial_install: Option<bool>,
}

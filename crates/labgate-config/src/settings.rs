//! Validated settings

use crate::schema::{RawConfig, RawControllerConfig, RawServiceConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Floodlight REST endpoint of the lab network
pub const DEFAULT_CONTROLLER_URL: &str = "http://192.168.200.200:8080";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Validated configuration ready for use by the service
#[derive(Debug, Clone, Default)]
pub struct LabgateConfig {
    pub service: ServiceConfig,
    pub controller: ControllerConfig,
}

impl LabgateConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            controller: ControllerConfig::from_raw(raw.controller),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub roster_path: PathBuf,
    pub export_path: PathBuf,
    pub teardown_on_shutdown: bool,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let data_dir = raw
            .data_dir
            .unwrap_or_else(labgate_util::data_dir_without_env);
        let roster_path = raw
            .roster_path
            .unwrap_or_else(|| labgate_util::roster_path_in(&data_dir));
        let export_path = raw.export_path.unwrap_or_else(|| roster_path.clone());

        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(labgate_util::socket_path_without_env),
            data_dir,
            roster_path,
            export_path,
            teardown_on_shutdown: raw.teardown_on_shutdown.unwrap_or(true),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base URL without a trailing slash
    pub url: String,
    pub request_timeout: Duration,
    pub rollback_partial_install: bool,
}

impl ControllerConfig {
    fn from_raw(raw: RawControllerConfig) -> Self {
        let url = raw
            .url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_CONTROLLER_URL.to_string());

        Self {
            url,
            request_timeout: raw
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            rollback_partial_install: raw.rollback_partial_install.unwrap_or(false),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_raw(RawControllerConfig::default())
    }
}

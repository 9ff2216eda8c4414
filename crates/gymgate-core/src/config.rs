//! Configuration resolution for GymGate.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/gymgate/settings.json)
//! 3. Project config (.gymgate/settings.json)
//! 4. Environment variables (highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete GymGate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub enrollment: EnrollmentSettings,
    #[serde(default)]
    pub presence: PresenceSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enrollment: EnrollmentSettings::default(),
            presence: PresenceSettings::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Enrollment protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentSettings {
    /// How long a single attempt may wait for a terminal device status
    /// before giving up (seconds).
    pub attempt_timeout_secs: u64,
}

impl Default for EnrollmentSettings {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: 180,
        }
    }
}

/// Device presence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSettings {
    /// A device whose last heartbeat is older than this is unreachable
    /// (seconds).
    pub reachability_window_secs: u64,
    /// How long a cached device listing stays fresh (seconds).
    pub cache_ttl_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            reachability_window_secs: 120,
            cache_ttl_secs: 30,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    // Load project config
    if let Some(dir) = project_dir {
        let project_path = dir.join(".gymgate").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    // Apply environment overrides
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".gymgate").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/gymgate/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("gymgate").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.enrollment = overlay.enrollment;
    base.presence = overlay.presence;
    base.log_level = overlay.log_level;
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("GYMGATE_ATTEMPT_TIMEOUT_SECS") {
        if let Ok(n) = val.parse() {
            config.enrollment.attempt_timeout_secs = n;
        }
    }
    if let Ok(val) = std::env::var("GYMGATE_REACHABILITY_WINDOW_SECS") {
        if let Ok(n) = val.parse() {
            config.presence.reachability_window_secs = n;
        }
    }
    if let Ok(val) = std::env::var("GYMGATE_CACHE_TTL_SECS") {
        if let Ok(n) = val.parse() {
            config.presence.cache_ttl_secs = n;
        }
    }
    if let Ok(val) = std::env::var("GYMGATE_LOG_LEVEL") {
        config.log_level = val;
    }
}

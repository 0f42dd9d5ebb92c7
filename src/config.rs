use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::system::snapshot::SortKey;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub refresh_rate_ms: u64,
    /// Elevated-privilege mode: attempt nice decreases instead of rejecting them up front.
    pub privileged: bool,
    pub proc_root: PathBuf,
    pub max_processes: usize,
    pub default_sort: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            refresh_rate_ms: 2000,
            privileged: false,
            proc_root: PathBuf::from("/proc"),
            max_processes: 25,
            default_sort: "cpu".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub protect_critical: bool,
    pub critical_processes: Vec<String>,
    pub kill_escalation_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        let critical = [
            "bash",
            "sh",
            "zsh",
            "fish",
            "tcsh",
            "csh",
            "sshd",
            "ssh",
            "systemd",
            "init",
            "systemd-logind",
            "login",
            "gnome-session",
            "kde-session",
            "xfce4-session",
        ];
        ControlConfig {
            protect_critical: true,
            critical_processes: critical.iter().map(|s| s.to_string()).collect(),
            kill_escalation_ms: 100,
        }
    }
}

impl Config {
    pub fn refresh_interval(&self) -> Result<Duration, ConfigError> {
        match self.general.refresh_rate_ms {
            0 => Err(ConfigError::NonPositiveInterval),
            ms => Ok(Duration::from_millis(ms)),
        }
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey::from_str_config(&self.general.default_sort)
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("procwatch").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "invalid config, using defaults"
                );
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::audio::{CommandSet, RouterSettings};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub virtual_mic: VirtualMicConfig,
    pub resolver: ResolverConfig,
    pub commands: CommandsConfig,
    pub streams: StreamsConfig,
}

/// The device recording applications see
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VirtualMicConfig {
    pub name: String,
    pub description: String,
}

impl Default for VirtualMicConfig {
    fn default() -> Self {
        Self {
            name: "VirtualMic".to_string(),
            description: "Virtual Microphone".to_string(),
        }
    }
}

/// Port lookup retry policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Extra lookups after the first one finds no stereo ports
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            retry_delay_ms: 200,
        }
    }
}

/// External tools; override to use wrappers or absolute paths
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandsConfig {
    pub pw_dump: String,
    pub pw_link: String,
    pub pactl: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        let commands = CommandSet::default();
        Self {
            pw_dump: commands.pw_dump,
            pw_link: commands.pw_link,
            pactl: commands.pactl,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StreamsConfig {
    /// Application names never offered as sources
    pub ignore: Vec<String>,
}

impl Config {
    pub fn command_set(&self) -> CommandSet {
        CommandSet {
            pw_dump: self.commands.pw_dump.clone(),
            pw_link: self.commands.pw_link.clone(),
            pactl: self.commands.pactl.clone(),
        }
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            device_name: self.virtual_mic.name.clone(),
            device_description: self.virtual_mic.description.clone(),
            retries: self.resolver.retries,
            retry_delay: Duration::from_millis(self.resolver.retry_delay_ms),
            ignored_names: self.streams.ignore.clone(),
        }
    }
}

/// Manages configuration file loading and saving
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with XDG-compliant config directory
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("virtmic");

        Self::with_dir(&config_dir)
    }

    /// Use `config_dir` instead of the XDG location
    pub fn with_dir(config_dir: &Path) -> Result<Self> {
        fs::create_dir_all(config_dir).context("Failed to create config directory")?;

        let config_path = config_dir.join("config.toml");
        debug!("Config path: {}", config_path.display());

        Ok(Self { config_path })
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// A missing file is created with defaults; a corrupted one is moved to
    /// `config.toml.bak` and defaults are used.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, writing defaults");
            let config = Config::default();
            self.save(&config)?;
            return Ok(config);
        }

        match fs::read_to_string(&self.config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!("Config loaded successfully");
                    Ok(config)
                }
                Err(e) => {
                    warn!("Config parse error: {}, backing up and using defaults", e);
                    let backup_path = self.config_path.with_extension("toml.bak");
                    let _ = fs::rename(&self.config_path, &backup_path);
                    Ok(Config::default())
                }
            },
            Err(e) => {
                warn!("Failed to read config: {}, using defaults", e);
                Ok(Config::default())
            }
        }
    }

    /// Save configuration to disk
    /// Uses atomic write (write to temp file, then rename)
    pub fn save(&self, config: &Config) -> Result<()> {
        let toml_string = toml::to_string_pretty(config).context("Failed to serialize config")?;

        let temp_path = self.config_path.with_extension("toml.tmp");
        fs::write(&temp_path, toml_string).context("Failed to write config to temp file")?;

        fs::rename(&temp_path, &self.config_path).context("Failed to rename temp config file")?;

        debug!("Config saved successfully");
        Ok(())
    }
}

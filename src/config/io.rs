use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::str;
use directories_next::ProjectDirs;
use log::{info, warn};
use tokio::fs;

use crate::config::types::DriverConfig;
use crate::error::ConfigError;

// creates a path to <exe name>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to myo-armband.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com.github", "weaselworks", "myo-armband").map(|dirs| {
        dirs.config_dir().join("myo-armband.json")
    })
}

pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) if attr.is_file() => return Ok(path),
            Ok(_) => {},
            Err(err) => {
                info!("No portable config at {} ({}); using local path instead", path.to_string_lossy(), err);
            },
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

#[derive(Debug, Clone)]
pub struct ConfigIO {
    path: PathBuf,
}

impl ConfigIO {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(ConfigIO { path: get_config_path()? })
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        ConfigIO { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<DriverConfig, ConfigError> {
        info!("Reading config file {}", self.path.to_string_lossy());
        let content = fs::read(&self.path).await?;

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(DriverConfig::default());
        }

        let content = str::from_utf8(&content)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;

        Ok(serde_json::from_str(content)?)
    }

    /// Like `read`, but a missing file yields the defaults.
    pub async fn read_or_default(&self) -> Result<DriverConfig, ConfigError> {
        match self.read().await {
            Ok(config) => Ok(config),
            Err(err) if err.is_file_not_found_error() => {
                info!("Config file not found, using defaults");
                Ok(DriverConfig::default())
            },
            Err(err) => Err(err),
        }
    }

    pub async fn save(&self, config: &DriverConfig) -> Result<(), ConfigError> {
        info!("Saving config to {}", self.path.to_string_lossy());

        if let Some(directory) = self.path.parent() {
            fs::create_dir_all(directory).await?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content.as_bytes()).await?;
        Ok(())
    }
}

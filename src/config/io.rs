use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::OpenOptions;
use std::str;
use log::{info, warn};

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to the config file in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\inverter-chart.exe => F:\inverter-chart.json
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

// creates a path to inverter-chart.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "bluetooth-chart", "inverter-chart").map(|dirs| {
        dirs.config_dir().join("inverter-chart.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            }
            Err(err) => {
                info!("No portable config at {}; Using local path instead. ({})", path.to_string_lossy(), err);
            },
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    /// Open the config file at `path`, or at the default location if `None`.
    pub fn new_sync(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => get_config_path()?,
        };
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            if !directory.as_os_str().is_empty() {
                std::fs::create_dir_all(directory)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    // obtain an exclusive file lock so that this config file is used by only one instance of
    // this application.
    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let file = self.clone_std_file()?;

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(file),
        })
    }

    fn clone_std_file(&self) -> Result<std::fs::File, ConfigError> {
        let inner = match self.inner.lock() {
            Ok(inner) => inner,
            // the inner file handle is never left in an inconsistent state
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(inner.file.try_clone()?)
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        Ok(File::from_std(self.clone_std_file()?))
    }

    async fn read_existing(&self) -> Result<Option<Config>, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }

        let content = str::from_utf8(&content)?;
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Read the config file. An empty file is filled with the defaults so that they can be edited
    /// by hand.
    pub async fn read_or_create(&self) -> Result<Config, ConfigError> {
        match self.read_existing().await? {
            Some(config) => Ok(config),
            None => {
                let config = Config::default();
                self.save(&config).await?;
                Ok(config)
            },
        }
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Calibration;

    fn temp_config_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("inverter-chart-test-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_empty_file_reads_defaults() {
        let path = temp_config_path("empty");
        let _ = std::fs::remove_file(&path);

        let config_io = ConfigIO::new_sync(Some(&path)).expect("open config");
        let config = config_io.read_or_create().await.expect("read config");
        assert_eq!(config, Config::default());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_read_or_create_writes_defaults() {
        let path = temp_config_path("create");
        let _ = std::fs::remove_file(&path);

        let config_io = ConfigIO::new_sync(Some(&path)).expect("open config");
        assert_eq!(config_io.read_or_create().await.expect("read config"), Config::default());

        let written = std::fs::read_to_string(&path).expect("config file");
        assert!(written.contains("\"voltageMax\": 220.0"));
        assert_eq!(config_io.read_or_create().await.expect("read config"), Config::default());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_invalid_calibration_is_rejected() {
        let path = temp_config_path("invalid");
        std::fs::write(&path, r#"{"calibration": {"voltageMax": 0}}"#).expect("write config");

        let config_io = ConfigIO::new_sync(Some(&path)).expect("open config");
        assert!(matches!(config_io.read_or_create().await, Err(ConfigError::InvalidValue { .. })));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_save_then_read() {
        let path = temp_config_path("save");
        let _ = std::fs::remove_file(&path);

        let config_io = ConfigIO::new_sync(Some(&path)).expect("open config");
        let mut config = Config::default();
        config.calibration = Calibration { voltage_max: 110.0, efficiency_breakpoint: 110.1, power_max: 1500.0 };
        config_io.save(&config).await.expect("save config");

        let reopened = ConfigIO::new_sync(Some(&path)).expect("reopen config");
        assert_eq!(reopened.read_or_create().await.expect("read config"), config);

        let _ = std::fs::remove_file(&path);
    }
}

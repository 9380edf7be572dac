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
use log::{debug, info, warn};

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to sync-remote.json next to the executable, so that a copy of the binary on a usb
// stick brings its own settings
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\sync-remote.exe => F:\sync-remote.json
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

// creates a path to sync-remote.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "sync", "sync-remote").map(|dirs| {
        dirs.config_dir().join("sync-remote.json")
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
                debug!("Could not read metadata of: {}; Using local path instead. ({:?})", path.to_string_lossy(), err);
            },
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

/// Holds the exclusive lock that makes this process the only owner of the radio.
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
    pub fn new_sync() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        Self::open_sync(&path)
    }

    pub fn open_sync(path: &Path) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
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

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    // None while the file is still empty
    async fn read_stored(&self) -> Result<Option<Config>, ConfigError> {
        let mut file = self.get_file()?;
        debug!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(None);
        }

        let content = str::from_utf8(&content)?;
        Ok(Some(serde_json::from_str(content)?))
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        Ok(self.read_stored().await?.unwrap_or_default())
    }

    /// Like `read`, but a fresh (empty) config file gets the defaults written into it, so the user
    /// has every key at hand when editing it.
    pub async fn load(&self) -> Result<Config, ConfigError> {
        if let Some(config) = self.read_stored().await? {
            return Ok(config);
        }

        info!("Config file is empty, writing defaults");
        let config = Config::default();
        self.save(&config).await?;
        Ok(config)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        debug!("Saving config");

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

    fn temp_config_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sync-remote-test-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        dir.join("sync-remote.json")
    }

    #[tokio::test]
    async fn test_empty_file_reads_defaults() {
        let path = temp_config_path("empty");
        let config_io = ConfigIO::open_sync(&path).unwrap();

        assert_eq!(config_io.read().await.unwrap(), Config::default());
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_saved_config_is_read_back() {
        let path = temp_config_path("save");
        let config_io = ConfigIO::open_sync(&path).unwrap();

        let mut config = Config::default();
        config.target_name = "SYNC-LAB".to_string();
        config.scan_timeout_ms = 10_000;
        config_io.save(&config).await.unwrap();

        let reopened = ConfigIO::open_sync(&path).unwrap();
        assert_eq!(reopened.read().await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_load_writes_defaults_once() {
        let path = temp_config_path("load");
        let config_io = ConfigIO::open_sync(&path).unwrap();

        assert_eq!(config_io.load().await.unwrap(), Config::default());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"targetName\": \"SYNC\""));

        std::fs::write(&path, r#"{"targetName": "SYNC-2"}"#).unwrap();
        assert_eq!(config_io.load().await.unwrap().target_name, "SYNC-2");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"targetName": "SYNC-2"}"#);
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let path = temp_config_path("invalid");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let config_io = ConfigIO::open_sync(&path).unwrap();
        assert!(matches!(config_io.read().await, Err(ConfigError::JsonError { .. })));
    }
}

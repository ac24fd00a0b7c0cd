//! Persisted document adapters.
//!
//! Implements [`ConfigPort`] twice:
//!
//! - [`JsonFileStore`]: pretty-printed JSON on disk.  Writes go to a
//!   sibling temp file which is then renamed over the original, so a crash
//!   mid-write leaves the previous document intact.
//! - [`MemoryStore`]: in-memory copy for tests and dry runs.
//!
//! Both validate before persisting.

use std::cell::{Cell, RefCell};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info};

use crate::app::ports::ConfigPort;
use crate::config::{SystemConfig, validate_config};
use crate::error::ConfigError;

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigPort for JsonFileStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ConfigError::NotFound),
            Err(e) => {
                error!("State: cannot read {}: {}", self.path.display(), e);
                return Err(ConfigError::IoError);
            }
        };
        let cfg: SystemConfig = serde_json::from_str(&text).map_err(|e| {
            error!("State: {} is corrupted: {}", self.path.display(), e);
            ConfigError::Corrupted
        })?;
        validate_config(&cfg)?;
        info!("State: loaded {}", self.path.display());
        Ok(cfg)
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let mut text = serde_json::to_string_pretty(config).map_err(|_| ConfigError::IoError)?;
        text.push('\n');

        let tmp = self.temp_path();
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| {
            error!("State: cannot write {}: {}", self.path.display(), e);
            ConfigError::IoError
        })?;
        debug!("State: saved {}", self.path.display());
        Ok(())
    }
}

/// In-memory document.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: RefCell<Option<SystemConfig>>,
    saves: Cell<u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(config: SystemConfig) -> Self {
        Self {
            doc: RefCell::new(Some(config)),
            saves: Cell::new(0),
        }
    }

    /// Successful saves so far.
    pub fn saves(&self) -> u32 {
        self.saves.get()
    }

    pub fn snapshot(&self) -> Option<SystemConfig> {
        self.doc.borrow().clone()
    }
}

impl ConfigPort for MemoryStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        self.doc.borrow().clone().ok_or(ConfigError::NotFound)
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        *self.doc.borrow_mut() = Some(config.clone());
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

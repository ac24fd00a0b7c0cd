//! Write-through state store.
//!
//! Owns the persisted document for the lifetime of the control loop.
//! Units report their runtime fields through [`StatePort`]; every change
//! updates the in-memory copy and rewrites the whole document at once, so
//! a crash at any point leaves `used` and `running` recoverable.

use log::{error, warn};

use crate::app::ports::{ConfigPort, StatePort, UnitState};
use crate::config::SystemConfig;
use crate::error::ConfigError;

pub struct StateStore<P: ConfigPort> {
    port: P,
    doc: SystemConfig,
}

impl<P: ConfigPort> StateStore<P> {
    /// Load the document, falling back to the built-in layout when there
    /// is none yet.  A corrupted or invalid document is an error.
    pub fn open(port: P) -> Result<Self, ConfigError> {
        let doc = match port.load() {
            Ok(doc) => doc,
            Err(ConfigError::NotFound) => {
                error!("No persisted configuration found, using built-in defaults");
                SystemConfig::default()
            }
            Err(e) => return Err(e),
        };
        Ok(Self { port, doc })
    }

    pub fn with_document(port: P, doc: SystemConfig) -> Self {
        Self { port, doc }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.doc
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Runtime fields of one unit as last persisted.
    pub fn unit(&self, unit: &str) -> Option<UnitState> {
        self.doc.heaters.get(unit).map(|h| UnitState {
            used: h.used,
            running: h.running,
        })
    }

    /// Rewrite the whole document.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.port.save(&self.doc)
    }
}

impl<P: ConfigPort> StatePort for StateStore<P> {
    fn persist(&mut self, unit: &str, state: UnitState) -> Result<(), ConfigError> {
        let Some(entry) = self.doc.heaters.get_mut(unit) else {
            warn!("State: {} is not in the document", unit);
            return Err(ConfigError::UnknownUnit);
        };
        if entry.used == state.used && entry.running == state.running {
            return Ok(());
        }
        entry.used = state.used;
        entry.running = state.running;
        self.port.save(&self.doc)
    }
}

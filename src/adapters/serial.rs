//! `serialport`-backed link backend.
//!
//! Discovers board nodes by path prefix (e.g. `/dev/ttyUSB*`), opens them
//! with a read timeout, and power-cycles the device by running an external
//! command (typically a USB bus reset).

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::Command;
use std::time::{Duration, SystemTime};

use log::{debug, error, info};
use serialport::{ClearBuffer, SerialPort};

use crate::drivers::link::{DeviceNode, LinkBackend, SerialLink};
use crate::error::LinkError;

/// Responses longer than this are cut off (the board never sends them).
const MAX_LINE: usize = 64;

pub struct SerialBackend;

impl SerialBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SerialBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkBackend for SerialBackend {
    type Link = SerialPortLink;

    fn discover(&mut self, prefix: &str) -> Vec<DeviceNode> {
        let prefix = Path::new(prefix);
        let dir = prefix.parent().unwrap_or_else(|| Path::new("/dev"));
        let Some(stem) = prefix.file_name().and_then(|s| s.to_str()) else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };

        entries
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_str().is_some_and(|n| n.starts_with(stem)))
            .map(|e| {
                let enumerated = e
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                DeviceNode {
                    path: e.path().to_string_lossy().into_owned(),
                    enumerated,
                }
            })
            .collect()
    }

    fn open(&mut self, path: &str, baud: u32, timeout: Duration) -> Result<SerialPortLink, LinkError> {
        let port = serialport::new(path, baud).timeout(timeout).open().map_err(|e| {
            error!("Serial: cannot open {}: {}", path, e);
            LinkError::OpenFailed
        })?;
        Ok(SerialPortLink { port })
    }

    fn power_cycle(&mut self, command: &[String]) -> Result<(), LinkError> {
        let Some((program, args)) = command.split_first() else {
            return Ok(());
        };
        info!("Serial: power cycling device ({})", command.join(" "));
        match Command::new(program).args(args).status() {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                error!("Serial: power cycle exited with {}", status);
                Err(LinkError::PowerCycleFailed)
            }
            Err(e) => {
                error!("Serial: power cycle could not run: {}", e);
                Err(LinkError::PowerCycleFailed)
            }
        }
    }
}

pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink for SerialPortLink {
    fn drain(&mut self) -> Result<(), LinkError> {
        self.port.clear(ClearBuffer::Input).map_err(|e| {
            debug!("Serial: clear failed: {}", e);
            LinkError::Io
        })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.port
            .write_all(bytes)
            .and_then(|()| self.port.flush())
            .map_err(|e| {
                debug!("Serial: write failed: {}", e);
                LinkError::Io
            })
    }

    fn read_line(&mut self) -> Result<String, LinkError> {
        let mut line = Vec::with_capacity(8);
        let mut byte = [0u8; 1];
        while line.len() < MAX_LINE {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => line.push(byte[0]),
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => {
                    debug!("Serial: read failed: {}", e);
                    return Err(LinkError::Io);
                }
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::rqlite::DEFAULT_RQLITE_PORT;
use crate::archive::WriterSettings;
use crate::io::serial::{Parity, SerialOptions};
use crate::repl::{LineEnding, ReplOptions, DEFAULT_MAX_LINE_LENGTH};

const APP_DIR: &str = "forthwire";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveBackendKind {
    #[default]
    Sqlite,
    Rqlite,
    None,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ArchiveSettings {
    #[serde(default)]
    pub backend: ArchiveBackendKind,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    #[serde(default = "default_rqlite_host")]
    pub rqlite_host: String,
    #[serde(default = "default_rqlite_port")]
    pub rqlite_port: u16,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,

    // Line discipline
    #[serde(default)]
    pub line_ending: LineEnding,
    #[serde(default = "default_command_terminator")]
    pub command_terminator: String,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub archive: ArchiveSettings,
}

fn default_port() -> String {
    "/dev/ttyACM0".to_string()
}
fn default_baud_rate() -> u32 {
    115200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_command_terminator() -> String {
    "\n".to_string()
}
fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}
fn default_poll_interval_ms() -> u64 {
    50
}

fn default_sqlite_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("archive.db")
}
fn default_rqlite_host() -> String {
    "localhost".to_string()
}
fn default_rqlite_port() -> u16 {
    DEFAULT_RQLITE_PORT
}
fn default_batch_size() -> usize {
    64
}
fn default_flush_interval_ms() -> u64 {
    250
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            backend: ArchiveBackendKind::default(),
            sqlite_path: default_sqlite_path(),
            rqlite_host: default_rqlite_host(),
            rqlite_port: default_rqlite_port(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            line_ending: LineEnding::default(),
            command_terminator: default_command_terminator(),
            max_line_length: default_max_line_length(),
            poll_interval_ms: default_poll_interval_ms(),
            log_dir: None,
            archive: ArchiveSettings::default(),
        }
    }
}

impl Settings {
    /// Reject values the serial layer or line assembler cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if !(5..=8).contains(&self.data_bits) {
            return Err(format!("data_bits must be 5..8, got {}", self.data_bits));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(format!("stop_bits must be 1 or 2, got {}", self.stop_bits));
        }
        if self.baud_rate == 0 {
            return Err("baud_rate must be non-zero".to_string());
        }
        if self.max_line_length == 0 {
            return Err("max_line_length must be non-zero".to_string());
        }
        if self.archive.batch_size == 0 {
            return Err("archive.batch_size must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn serial_options(&self) -> SerialOptions {
        SerialOptions {
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            ..SerialOptions::default()
        }
    }

    pub fn repl_options(&self) -> ReplOptions {
        ReplOptions {
            line_ending: self.line_ending,
            command_terminator: self.command_terminator.clone(),
            max_line_length: self.max_line_length,
        }
    }

    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings {
            batch_size: self.archive.batch_size,
            flush_interval: Duration::from_millis(self.archive.flush_interval_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// `<config_dir>/forthwire/config.toml`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

/// Load settings from `path`, or from the default location when `None`.
/// A missing file yields the defaults.
pub fn load(path: Option<&Path>) -> Result<Settings, String> {
    let settings_path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_settings_path() {
            Some(p) => p,
            None => return Ok(Settings::default()),
        },
    };

    if !settings_path.exists() {
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(&settings_path)
        .map_err(|e| format!("Failed to read settings {:?}: {}", settings_path, e))?;
    let settings: Settings = toml::from_str(&content)
        .map_err(|e| format!("Failed to parse settings {:?}: {}", settings_path, e))?;
    settings.validate()?;
    Ok(settings)
}

pub fn save(path: &Path, settings: &Settings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config dir: {}", e))?;
    }

    let content = toml::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.port, "/dev/ttyACM0");
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.command_terminator, "\n");
        assert_eq!(settings.archive.backend, ArchiveBackendKind::Sqlite);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
port = "/dev/ttyUSB1"
line_ending = "cr"
parity = "even"

[archive]
backend = "rqlite"
rqlite_host = "archive.local"
"#,
        )
        .unwrap();

        let settings = load(Some(&path)).unwrap();
        assert_eq!(settings.port, "/dev/ttyUSB1");
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.line_ending, LineEnding::Cr);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.archive.backend, ArchiveBackendKind::Rqlite);
        assert_eq!(settings.archive.rqlite_host, "archive.local");
        assert_eq!(settings.archive.rqlite_port, 4001);
        assert_eq!(settings.archive.batch_size, 64);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "data_bits = 9\n").unwrap();
        assert!(load(Some(&path)).unwrap_err().contains("data_bits"));

        std::fs::write(&path, "line_ending = \"sideways\"\n").unwrap();
        assert!(load(Some(&path)).unwrap_err().contains("Failed to parse"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.baud_rate = 9600;
        settings.archive.backend = ArchiveBackendKind::None;
        settings.log_dir = Some(dir.path().join("logs"));

        save(&path, &settings).unwrap();
        assert_eq!(load(Some(&path)).unwrap(), settings);
    }

    #[test]
    fn test_derived_options() {
        let mut settings = Settings::default();
        settings.stop_bits = 2;
        settings.archive.flush_interval_ms = 100;

        assert_eq!(settings.serial_options().summary(), "8N2");
        assert_eq!(settings.repl_options(), ReplOptions::default());
        assert_eq!(
            settings.writer_settings().flush_interval,
            Duration::from_millis(100)
        );
    }
}

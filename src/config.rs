//! Sender configuration: which devices exist, what unit each reports in, and
//! where each device's data file lives.
//!
//! The configuration file is a flat line-oriented format, one device per
//! line: `device_id,unit_name,data_file_path`. Blank lines and lines
//! starting with `#` are ignored.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::units::Unit;

/// One configured device: its identity, reporting unit, and data source.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescriptor {
    /// 4-bit device identity, 0–15.
    pub device_id: u8,
    /// The unit this device's readings are expressed in.
    pub unit: Unit,
    /// Path to the device's data file, as written in the config.
    pub data_file_path: String,
}

/// Parse a configuration file's contents into a list of [`SensorDescriptor`]s.
pub fn parse_config(contents: &str) -> Result<Vec<SensorDescriptor>, ConfigError> {
    let mut out = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(ConfigError::MalformedLine {
                line_no,
                raw: line.to_string(),
            });
        }

        let device_id: u8 = parts[0].parse().map_err(|_| ConfigError::MalformedLine {
            line_no,
            raw: line.to_string(),
        })?;

        let unit = Unit::from_name(parts[1]).ok_or_else(|| ConfigError::UnknownUnit {
            line_no,
            name: parts[1].to_string(),
        })?;

        out.push(SensorDescriptor {
            device_id,
            unit,
            data_file_path: parts[2].to_string(),
        });
    }
    Ok(out)
}

/// Load and parse the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Vec<SensorDescriptor>, ConfigError> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Load a device's data file, flattening comma-separated decimal numbers
/// across all non-blank, non-comment lines into a single stream of samples.
pub fn load_data_stream(path: &Path, device_id: u8) -> Result<Vec<f64>, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let mut out = Vec::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        for field in trimmed.split(',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            if let Ok(v) = field.parse::<f64>() {
                out.push(v);
            }
        }
    }
    if out.is_empty() {
        return Err(ConfigError::EmptyDataStream { device_id });
    }
    Ok(out)
}

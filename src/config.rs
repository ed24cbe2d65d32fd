//! Engine settings and schema files, both persisted as YAML.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, anyhow};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{
    csv_upload::PreviewOptions,
    error::Result,
    io_utils::resolve_encoding,
    schema::{ColumnModel, TableSchema},
};

pub const DEFAULT_MAX_BYTES_PER_REQUEST: usize = 2 * 1024 * 1024;
pub const DEFAULT_PREVIEW_SAMPLE_ROWS: usize = 5;
pub const DEFAULT_PREVIEW_MAX_SCAN_ROWS: usize = 1000;
pub const DEFAULT_STRING_SIZE: i64 = 50;
pub const DEFAULT_ENCODING: &str = "utf-8";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_bytes_per_request: usize,
    pub preview_sample_rows: usize,
    pub preview_max_scan_rows: usize,
    pub default_string_size: i64,
    pub encoding: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_bytes_per_request: DEFAULT_MAX_BYTES_PER_REQUEST,
            preview_sample_rows: DEFAULT_PREVIEW_SAMPLE_ROWS,
            preview_max_scan_rows: DEFAULT_PREVIEW_MAX_SCAN_ROWS,
            default_string_size: DEFAULT_STRING_SIZE,
            encoding: DEFAULT_ENCODING.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: EngineConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config YAML in {path:?}"))?;
        config
            .encoding()
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("Validating config in {path:?}"))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path).with_context(|| format!("Creating config file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing config YAML")
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        resolve_encoding(Some(&self.encoding))
    }

    pub fn preview_options(&self, full_scan: bool) -> PreviewOptions {
        PreviewOptions {
            sample_rows: self.preview_sample_rows,
            max_scan_rows: self.preview_max_scan_rows,
            full_scan,
            default_string_size: self.default_string_size,
        }
    }
}

/// Loads an ordered column list and validates every column.
pub fn load_schema(path: &Path) -> anyhow::Result<Vec<ColumnModel>> {
    TableSchema::load(path).map(|schema| schema.columns)
}

pub fn save_schema(path: &Path, columns: &[ColumnModel]) -> anyhow::Result<()> {
    TableSchema::new(columns.to_vec()).save(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{UTF_8, WINDOWS_1252};

    #[test]
    fn missing_fields_take_defaults() {
        let config: EngineConfig = serde_yaml::from_str("preview_sample_rows: 9\n").unwrap();
        assert_eq!(config.preview_sample_rows, 9);
        assert_eq!(config.max_bytes_per_request, DEFAULT_MAX_BYTES_PER_REQUEST);
        assert_eq!(config.encoding().unwrap(), UTF_8);
    }

    #[test]
    fn encoding_label_is_resolved() {
        let config = EngineConfig {
            encoding: "windows-1252".to_string(),
            ..EngineConfig::default()
        };
        assert_eq!(config.encoding().unwrap(), WINDOWS_1252);
        let options = config.preview_options(true);
        assert!(options.full_scan);
        assert_eq!(options.default_string_size, DEFAULT_STRING_SIZE);
    }
}

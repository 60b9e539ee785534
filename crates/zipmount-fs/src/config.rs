use crate::{VfsError, VfsResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use zipmount_format::{CompressionMethod, WriteOptions};

/// Compression for entries written by the virtual filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    Deflated,
}

impl From<Compression> for CompressionMethod {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// Settings shared by every mount of a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Prefix of temporary files created next to a backing archive on close.
    pub temp_prefix: String,
    /// Compression for new or rewritten content.
    pub compression: Compression,
    /// Deflate level, `None` for the library default.
    pub compression_level: Option<i64>,
    /// How long a cascading close waits for a busy nested mount.
    pub lock_timeout_ms: u64,
    /// File extensions treated as zip containers.
    pub archive_extensions: Vec<String>,
    /// Write directory entries even when files already imply them.
    pub store_implicit_directories: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            temp_prefix: ".tmp.zipmount-".to_string(),
            compression: Compression::Deflated,
            compression_level: None,
            lock_timeout_ms: 5000,
            archive_extensions: [
                "zip", "jar", "war", "ear", "apk", "docx", "xlsx", "pptx", "odt", "epub",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
            store_implicit_directories: false,
        }
    }
}

impl VfsConfig {
    pub fn from_toml_str(text: &str) -> VfsResult<Self> {
        let config: VfsConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> VfsResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> VfsResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            compression: self.compression.into(),
            compression_level: self.compression_level,
            store_implicit_directories: self.store_implicit_directories,
        }
    }

    /// Whether the file name carries one of the configured archive extensions.
    pub fn is_archive_name(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.archive_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn validate(&self) -> VfsResult<()> {
        if self.temp_prefix.is_empty() || self.temp_prefix.contains(|c: char| c == '/' || c == '\\') {
            return Err(VfsError::Config(format!(
                "temp_prefix must be a plain file name prefix, got {:?}",
                self.temp_prefix
            )));
        }
        if let Some(level) = self.compression_level {
            if !(0..=9).contains(&level) {
                return Err(VfsError::Config(format!(
                    "compression_level must be between 0 and 9, got {level}"
                )));
            }
        }
        Ok(())
    }
}

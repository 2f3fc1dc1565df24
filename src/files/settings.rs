//! File store settings, persisted under `ffm:files:settings`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Largest accepted upload (50 MB)
pub const DEFAULT_MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Default byte budget for stored file payloads
pub const DEFAULT_MAX_STORAGE_SIZE: usize = 4 * 1024 * 1024;

const DEFAULT_ALLOWED_TYPES: &[&str] = &[
    // Documents
    "application/pdf",
    "application/rtf",
    "application/msword",
    "application/vnd.ms-*",
    "application/vnd.openxmlformats-officedocument.*",
    "application/vnd.oasis.opendocument.*",
    "text/*",
    // Data and code
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/javascript",
    "application/sql",
    // Archives
    "application/zip",
    "application/gzip",
    "application/x-tar",
    "application/x-7z-compressed",
    "application/vnd.rar",
    // Media
    "image/*",
    "audio/*",
    "video/*",
];

// == File Store Settings ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStoreSettings {
    /// Largest accepted file, in bytes
    pub max_file_size: usize,
    /// Budget for all encoded payloads together, in bytes
    pub max_storage_size: usize,
    /// Accepted MIME types; a trailing `*` matches any suffix
    pub allowed_types: Vec<String>,
}

impl Default for FileStoreSettings {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_storage_size: DEFAULT_MAX_STORAGE_SIZE,
            allowed_types: DEFAULT_ALLOWED_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl FileStoreSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(StoreError::Validation("maxFileSize must be positive".into()));
        }
        if self.max_storage_size == 0 {
            return Err(StoreError::Validation("maxStorageSize must be positive".into()));
        }
        Ok(())
    }

    // == Type Allowed ==
    /// Checks a MIME type against the allow-list, ignoring case and parameters.
    pub fn is_type_allowed(&self, mime_type: &str) -> bool {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.is_empty() {
            return false;
        }

        self.allowed_types.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            match pattern.strip_suffix('*') {
                Some(prefix) => essence.starts_with(prefix),
                None => essence == pattern,
            }
        })
    }

    pub fn with_update(&self, update: &FileStoreSettingsUpdate) -> Result<Self> {
        let next = Self {
            max_file_size: update.max_file_size.unwrap_or(self.max_file_size),
            max_storage_size: update.max_storage_size.unwrap_or(self.max_storage_size),
            allowed_types: update
                .allowed_types
                .clone()
                .unwrap_or_else(|| self.allowed_types.clone()),
        };
        next.validate()?;
        Ok(next)
    }
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStoreSettingsUpdate {
    pub max_file_size: Option<usize>,
    pub max_storage_size: Option<usize>,
    pub allowed_types: Option<Vec<String>>,
}

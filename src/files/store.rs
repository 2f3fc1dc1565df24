//! File Store
//!
//! Uploaded files kept as base64 payloads in an insertion-ordered array
//! under `ffm:files`. Files are never modified in place.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::current_timestamp_ms;
use crate::error::{Result, StoreError};
use crate::files::FileStoreSettings;
use crate::substrate::{load_collection, Substrate, FILES_KEY, FILE_SETTINGS_KEY};

// == Stored File ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Size of the original content
    pub size_bytes: usize,
    /// Base64 of the content
    pub payload: String,
    /// Unix milliseconds
    pub created_at: u64,
    /// Unix milliseconds
    pub last_modified: u64,
}

impl StoredFile {
    /// Decodes the payload back into the original bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        BASE64.decode(&self.payload).map_err(|e| {
            StoreError::Validation(format!("payload of '{}' is not valid base64: {}", self.id, e))
        })
    }
}

// == File Store ==
#[derive(Debug)]
pub struct FileStore {
    files: Vec<StoredFile>,
    settings: FileStoreSettings,
    substrate: Arc<dyn Substrate>,
}

impl FileStore {
    /// Loads files and settings; corrupt collections start empty.
    pub fn load(substrate: Arc<dyn Substrate>, defaults: FileStoreSettings) -> Self {
        let settings =
            match load_collection::<FileStoreSettings>(substrate.as_ref(), FILE_SETTINGS_KEY) {
                Some(stored) if stored.validate().is_ok() => stored,
                Some(_) => {
                    warn!("Stored file settings are invalid, using defaults");
                    defaults
                }
                None => defaults,
            };
        let files: Vec<StoredFile> =
            load_collection(substrate.as_ref(), FILES_KEY).unwrap_or_default();

        debug!("File store loaded {} files", files.len());
        Self {
            files,
            settings,
            substrate,
        }
    }

    pub fn settings(&self) -> &FileStoreSettings {
        &self.settings
    }

    pub fn update_settings(&mut self, next: FileStoreSettings) -> Result<()> {
        next.validate()?;
        self.substrate
            .set(FILE_SETTINGS_KEY, &serde_json::to_string(&next)?)?;
        self.settings = next;
        Ok(())
    }

    /// Bytes used by all encoded payloads.
    pub fn usage(&self) -> usize {
        self.files.iter().map(|f| f.payload.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    // == Prepare ==
    /// Validates an upload and builds its record without storing it.
    pub fn prepare(&self, name: &str, mime_type: &str, bytes: &[u8]) -> Result<StoredFile> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("File name cannot be empty".into()));
        }
        if bytes.len() > self.settings.max_file_size {
            return Err(StoreError::Validation(format!(
                "File '{}' is {} bytes, the maximum is {} bytes",
                name,
                bytes.len(),
                self.settings.max_file_size
            )));
        }
        if !self.settings.is_type_allowed(mime_type) {
            return Err(StoreError::Validation(format!(
                "File type '{}' is not allowed",
                mime_type
            )));
        }

        let now = current_timestamp_ms();
        let file = StoredFile {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes: bytes.len(),
            payload: BASE64.encode(bytes),
            created_at: now,
            last_modified: now,
        };

        let projected = self.usage() + file.payload.len();
        if projected > self.settings.max_storage_size {
            return Err(StoreError::QuotaExceeded(format!(
                "File storage limit of {} bytes would be exceeded",
                self.settings.max_storage_size
            )));
        }
        Ok(file)
    }

    // == Insert ==
    pub fn insert(&mut self, file: StoredFile) -> Result<()> {
        let id = file.id.clone();
        self.files.push(file);
        if let Err(e) = self.persist() {
            self.files.pop();
            return Err(e);
        }
        info!("Stored file {}", id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&StoredFile> {
        self.files.iter().find(|f| f.id == id)
    }

    // == Delete ==
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let Some(index) = self.files.iter().position(|f| f.id == id) else {
            return Ok(false);
        };

        let removed = self.files.remove(index);
        if let Err(e) = self.persist() {
            self.files.insert(index, removed);
            return Err(e);
        }
        debug!("Deleted file {}", id);
        Ok(true)
    }

    // == Export ==
    /// Writes the decoded file into `dir`, never overwriting existing files.
    ///
    /// Returns the written path, or None if `id` is unknown.
    pub fn export(&self, id: &str, dir: &Path) -> Result<Option<PathBuf>> {
        let Some(file) = self.get(id) else {
            return Ok(None);
        };
        let bytes = file.decode()?;

        fs::create_dir_all(dir)?;
        let path = unique_path(dir, &sanitize_file_name(&file.name));
        fs::write(&path, bytes)?;

        info!("Exported file {} to {}", id, path.display());
        Ok(Some(path))
    }

    /// Copies all files in insertion order.
    pub fn snapshot(&self) -> Vec<StoredFile> {
        self.files.clone()
    }

    // == Replace All ==
    /// Swaps in a complete set of files and settings, persisting both.
    pub fn replace_all(&mut self, files: Vec<StoredFile>, settings: FileStoreSettings) -> Result<()> {
        settings.validate()?;
        let previous_files = std::mem::replace(&mut self.files, files);
        let previous_settings = self.settings.clone();

        let result = serde_json::to_string(&settings)
            .map_err(StoreError::from)
            .and_then(|serialized| self.substrate.set(FILE_SETTINGS_KEY, &serialized))
            .and_then(|_| self.persist());

        if let Err(e) = result {
            self.files = previous_files;
            if let Err(restore_err) = self.persist().and_then(|_| {
                serde_json::to_string(&previous_settings)
                    .map_err(StoreError::from)
                    .and_then(|s| self.substrate.set(FILE_SETTINGS_KEY, &s))
            }) {
                warn!("Failed to restore previous file store state: {}", restore_err);
            }
            return Err(e);
        }

        self.settings = settings;
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let serialized = serde_json::to_string(&self.files)?;
        self.substrate.set(FILES_KEY, &serialized)
    }
}

fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    if cleaned.trim().is_empty() || cleaned == "." || cleaned == ".." {
        "download".to_string()
    } else {
        cleaned
    }
}

fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1..)
        .map(|n| match &extension {
            Some(ext) => dir.join(format!("{} ({}).{}", stem, n, ext)),
            None => dir.join(format!("{} ({})", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

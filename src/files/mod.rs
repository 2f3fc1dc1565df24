//! File Store Module
//!
//! Blob storage for uploaded files with size/type validation and its own
//! storage budget.

mod settings;
mod store;

pub use settings::{
    FileStoreSettings, FileStoreSettingsUpdate, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_STORAGE_SIZE,
};
pub use store::{FileStore, StoredFile};

//! Directory-backed substrate.
//!
//! Each key maps to one file. Writes go to a temp file that is synced and
//! then renamed over the target, so a crash leaves either the old or the
//! new value on disk.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;

use tracing::debug;

use crate::error::Result;
use crate::substrate::Substrate;

// == File Substrate ==
#[derive(Debug, Clone)]
pub struct FileSubstrate {
    root: PathBuf,
}

impl FileSubstrate {
    /// Opens (creating if needed) a substrate rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", file_name))
    }
}

impl Substrate for FileSubstrate {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let temp_path = path.with_extension(format!("json.{}.tmp", process::id()));

        if let Err(e) = write_synced(&temp_path, value).and_then(|_| fs::rename(&temp_path, &path)) {
            discard_temp(&temp_path);
            return Err(e.into());
        }

        debug!("Persisted {} ({} bytes)", path.display(), value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_synced(path: &Path, value: &str) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(value.as_bytes())?;
    file.sync_all()
}

fn discard_temp(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => debug!("Failed to remove temp file {}: {}", path.display(), e),
    }
}

//! On-disk layout for a node's files: `<root>/upload/` holds files a local
//! client has staged for `store_file`; `<root>/chord_storage/` holds
//! everything the node currently has on disk as primary or backup, per
//! `SPEC_FULL.md` §4.5.

use crate::error::EngineError;
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("upload"))?;
        std::fs::create_dir_all(root.join("chord_storage"))?;
        Ok(Storage { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.root.join("upload")
    }

    pub fn chord_storage_dir(&self) -> PathBuf {
        self.root.join("chord_storage")
    }

    pub fn read_upload(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.upload_dir().join(name);
        std::fs::read(&path).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn read_storage(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.chord_storage_dir().join(name);
        std::fs::read(&path).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn write_storage(&self, name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        let path = self.chord_storage_dir().join(name);
        std::fs::write(&path, bytes).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn delete_storage(&self, name: &str) -> Result<(), EngineError> {
        let path = self.chord_storage_dir().join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(EngineError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// File names currently present in `chord_storage/`, for
    /// `clean_redundant_file`.
    pub fn list_storage_files(&self) -> Result<Vec<String>, EngineError> {
        let dir = self.chord_storage_dir();
        let entries = std::fs::read_dir(&dir).map_err(|source| EngineError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| EngineError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

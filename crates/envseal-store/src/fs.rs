//! File-backed store
//!
//! Each entry is one file under the root; `/` in a name selects a
//! subdirectory, so `encryption/default.key` lives at
//! `{root}/encryption/default.key`. Writes go to a temp file in the target
//! directory first and are then moved into place, so readers never observe a
//! partially written value.

use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use envseal_core::{EnvsealError, EnvsealResult, KeyValueStore};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// A store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an entry name to its path, refusing names that would escape the root.
    pub fn path_for(&self, name: &str) -> EnvsealResult<PathBuf> {
        let relative = Path::new(name);
        let valid = !name.is_empty()
            && !name.contains('\0')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(EnvsealError::Store(format!("invalid entry name: {name:?}")));
        }
        Ok(self.root.join(relative))
    }

    /// Write `value` to a temp file beside `path`, ready to be moved into place.
    fn stage(&self, path: &Path, value: &[u8]) -> EnvsealResult<NamedTempFile> {
        let parent = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent).map_err(|e| {
            EnvsealError::Store(format!("creating {}: {e}", parent.display()))
        })?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, name: &str) -> EnvsealResult<Option<Vec<u8>>> {
        let path = self.path_for(name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EnvsealError::Store(format!("reading {}: {e}", path.display()))),
        }
    }

    fn set(&self, name: &str, value: &[u8]) -> EnvsealResult<()> {
        let path = self.path_for(name)?;
        self.stage(&path, value)?
            .persist(&path)
            .map_err(|e| EnvsealError::Store(format!("writing {}: {}", path.display(), e.error)))?;
        tracing::debug!(path = %path.display(), "stored entry");
        Ok(())
    }

    /// Atomic across processes: the entry is linked into place only if no
    /// file exists at its path.
    fn set_if_absent(&self, name: &str, value: &[u8]) -> EnvsealResult<Vec<u8>> {
        let path = self.path_for(name)?;
        if let Some(existing) = self.get(name)? {
            return Ok(existing);
        }
        match self.stage(&path, value)?.persist_noclobber(&path) {
            Ok(_) => {
                tracing::debug!(path = %path.display(), "created entry");
                Ok(value.to_vec())
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "entry created concurrently");
                self.get(name)?.ok_or_else(|| {
                    EnvsealError::Store(format!("{} vanished after create", path.display()))
                })
            }
            Err(e) => Err(EnvsealError::Store(format!(
                "writing {}: {}",
                path.display(),
                e.error
            ))),
        }
    }
}

//! The `current` pointer
//!
//! A relative symlink `<root>/current -> <id>`. Updates build a new link
//! under a temporary name and rename it over the old one, so readers see
//! either the old target or the new one and nothing in between.

use crate::version::VersionId;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use vault_core::fsutil::{sync_dir, temp_sibling};
use vault_core::{IoResultExt, Result, VaultError};

pub const POINTER_NAME: &str = "current";

#[derive(Debug, Clone)]
pub struct CurrentPointer {
    root: PathBuf,
    link: PathBuf,
}

impl CurrentPointer {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let link = root.join(POINTER_NAME);
        Self { root, link }
    }

    pub fn path(&self) -> &Path {
        &self.link
    }

    /// Identifier the link names, whether or not it still exists
    pub fn target(&self) -> Result<Option<VersionId>> {
        match fs::read_link(&self.link) {
            Ok(target) => {
                let name = target
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(VersionId::parse(&name).ok())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            // Something other than a symlink sits at the pointer path
            Err(e) if e.kind() == ErrorKind::InvalidInput => Ok(None),
            Err(e) => Err(VaultError::io_at(&self.link, e)),
        }
    }

    /// Identifier the link names, only if that directory exists
    pub fn resolve(&self) -> Result<Option<VersionId>> {
        Ok(self.target()?.filter(|id| self.root.join(id.as_str()).is_dir()))
    }

    /// Atomically point at `id`
    pub fn set(&self, id: &VersionId) -> Result<()> {
        let tmp = temp_sibling(&self.link);
        let _ = fs::remove_file(&tmp);
        symlink(id.as_str(), &tmp).at(&tmp)?;
        if let Err(e) = fs::rename(&tmp, &self.link) {
            let _ = fs::remove_file(&tmp);
            return Err(VaultError::io_at(&self.link, e));
        }
        sync_dir(&self.root)
    }

    /// Remove the pointer; absent is not an error
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.link) {
            Ok(()) => sync_dir(&self.root),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::io_at(&self.link, e)),
        }
    }
}

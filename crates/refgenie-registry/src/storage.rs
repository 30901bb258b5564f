//! Managed storage: staging, atomic promotion, and deletion of tag
//! directories under the storage root.
//!
//! Downloads and builds never write into a live tag directory. They fill a
//! staging directory created inside the storage root (same filesystem, so the
//! final move is a rename), and the result is promoted only while the
//! configuration lock is held. A promotion over an existing directory keeps
//! the old one aside until the configuration commit succeeds, so a failed
//! commit can put it back.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use refgenie_core::config::TAG_ROOT_SEEK_VALUE;
use refgenie_core::path::validate_identifier;
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RegistryError, Result};

const PAYLOAD_DIR: &str = "payload";

/// A scratch directory inside the storage root, removed on drop.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create a staging area under `root`, creating `root` if needed.
    pub fn new_in(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .map_err(|e| RegistryError::storage(root, format!("creating storage root: {e}")))?;
        let dir = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(root)
            .map_err(|e| RegistryError::storage(root, format!("creating staging dir: {e}")))?;
        std::fs::create_dir(dir.path().join(PAYLOAD_DIR))?;
        Ok(StagingArea { dir })
    }

    /// Directory that becomes the tag directory on promotion.
    pub fn payload(&self) -> PathBuf {
        self.dir.path().join(PAYLOAD_DIR)
    }

    /// Empty the payload directory for another attempt.
    pub fn reset(&self) -> Result<()> {
        let payload = self.payload();
        if payload.exists() {
            std::fs::remove_dir_all(&payload)?;
        }
        std::fs::create_dir(&payload)?;
        Ok(())
    }
}

/// A staged directory moved into place, with the previous occupant kept
/// aside until [`commit`](Promotion::commit) or
/// [`rollback`](Promotion::rollback).
#[derive(Debug)]
#[must_use = "a promotion must be committed or rolled back"]
pub struct Promotion {
    target: PathBuf,
    backup: Option<PathBuf>,
}

/// Move `staged` to `target` by rename.
pub fn promote(staged: &Path, target: &Path) -> Result<Promotion> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| RegistryError::storage(parent, format!("creating tag parent: {e}")))?;
    }

    let backup = if target.exists() {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let aside = target.with_file_name(format!(".{name}.old-{}", Uuid::new_v4()));
        std::fs::rename(target, &aside)
            .map_err(|e| RegistryError::storage(target, format!("moving old files aside: {e}")))?;
        Some(aside)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(staged, target) {
        if let Some(aside) = &backup {
            let _ = std::fs::rename(aside, target);
        }
        return Err(RegistryError::storage(target, format!("promoting staged files: {e}")));
    }

    debug!(target = %target.display(), replaced = backup.is_some(), "promoted staged files");
    Ok(Promotion {
        target: target.to_path_buf(),
        backup,
    })
}

impl Promotion {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Drop the previous files for good.
    pub fn commit(self) {
        if let Some(aside) = &self.backup {
            if let Err(e) = std::fs::remove_dir_all(aside) {
                warn!(path = %aside.display(), error = %e, "could not delete replaced files");
            }
        }
    }

    /// Undo the promotion: remove the new files and restore the old ones.
    pub fn rollback(self) {
        if let Err(e) = std::fs::remove_dir_all(&self.target) {
            warn!(path = %self.target.display(), error = %e, "could not remove promoted files");
        }
        if let Some(aside) = &self.backup {
            if let Err(e) = std::fs::rename(aside, &self.target) {
                warn!(path = %aside.display(), error = %e, "could not restore replaced files");
            }
        }
    }
}

/// Delete a tag directory, then any asset and genome directories it leaves
/// empty. Refuses anything that is not strictly inside `root`.
///
/// Returns whether a directory was deleted.
pub fn remove_tag_dir(root: &Path, dir: &Path) -> Result<bool> {
    if !dir.starts_with(root) || dir == root {
        debug!(path = %dir.display(), "not inside storage root, leaving files");
        return Ok(false);
    }
    if !dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(dir)
        .map_err(|e| RegistryError::storage(dir, format!("deleting tag files: {e}")))?;

    let mut parent = dir.parent();
    while let Some(p) = parent {
        if p == root || !p.starts_with(root) || std::fs::remove_dir(p).is_err() {
            break;
        }
        parent = p.parent();
    }
    Ok(true)
}

/// Interpret a path received from a manifest as a plain relative path.
///
/// Rejects absolute paths, `..` and anything else that could escape the
/// directory it is joined onto.
pub(crate) fn safe_relative(raw: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Check that every seek key has a legal name and points inside the tag
/// directory.
pub(crate) fn check_seek_keys(seek_keys: &BTreeMap<String, String>) -> std::result::Result<(), String> {
    for (key, value) in seek_keys {
        validate_identifier("seek key", key).map_err(|e| e.to_string())?;
        if value != TAG_ROOT_SEEK_VALUE && safe_relative(value).is_none() {
            return Err(format!(
                "seek key '{key}' points outside the tag directory: '{value}'"
            ));
        }
    }
    Ok(())
}

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use common::{DbError, DbResult, ObjectName};
use tracing::debug;

use crate::ObjectKind;

/// Resolves object names to files under one base directory and performs
/// whole-file reads and writes.
///
/// Writes go through a temporary file followed by a rename, so a reader
/// observes either the previous content or the new content, never a
/// partial write. The store does no locking; concurrency is arbitrated in
/// memory by the descriptor tables.
#[derive(Clone, Debug)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `base`, creating the directory if needed.
    pub fn open(base: impl Into<PathBuf>) -> DbResult<Self> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// The store's base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Full path of the file backing `name`.
    pub fn path_of(&self, name: ObjectName, kind: ObjectKind) -> PathBuf {
        self.base.join(format!("{name}.{}", kind.extension()))
    }

    /// Whether a file for `name` exists.
    pub fn exists(&self, name: ObjectName, kind: ObjectKind) -> bool {
        self.path_of(name, kind).exists()
    }

    /// Read the whole record, validating the leading magic byte.
    pub fn read(&self, name: ObjectName, kind: ObjectKind) -> DbResult<Vec<u8>> {
        let path = self.path_of(name, kind);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                DbError::NotFound(format!("{} '{name}'", kind.extension()))
            } else {
                DbError::Io(e)
            }
        })?;
        match bytes.first() {
            None => Err(DbError::CorruptFormat(format!("empty file '{name}'"))),
            Some(&found) if found != kind.magic() => Err(DbError::CorruptMagic {
                expected: kind.magic(),
                found,
            }),
            Some(_) => Ok(bytes),
        }
    }

    /// Replace the record with `bytes` via temp-file plus rename.
    pub fn write(&self, name: ObjectName, kind: ObjectKind, bytes: &[u8]) -> DbResult<()> {
        let path = self.path_of(name, kind);
        let tmp = path.with_extension(format!("{}.tmp", kind.extension()));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Remove the file backing `name`.
    pub fn unlink(&self, name: ObjectName, kind: ObjectKind) -> DbResult<()> {
        let path = self.path_of(name, kind);
        debug!(%name, kind = kind.extension(), "unlinking object file");
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                DbError::NotFound(format!("{} '{name}'", kind.extension()))
            } else {
                DbError::Io(e)
            }
        })
    }

    /// Draw object names until one has no backing file.
    pub fn fresh_name(&self, kind: ObjectKind) -> ObjectName {
        loop {
            let name = ObjectName::generate();
            if !self.exists(name, kind) {
                return name;
            }
        }
    }
}

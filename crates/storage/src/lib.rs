//! On-disk object store and record formats.
//!
//! Every persistent object is one whole file named by its 8-byte
//! [`ObjectName`](common::ObjectName), with a one-byte magic prefix
//! identifying the record kind. This crate owns:
//!
//! - name-to-path resolution and atomic whole-file I/O ([`FileStore`])
//! - the page record, its codec, and the row-level byte edits ([`Page`])
//! - the directory record and its codec ([`Directory`])
//!
//! Multi-byte integers are little-endian on disk. Row boundaries inside a
//! page payload are framed with sentinel bytes; all sentinel handling
//! stays inside this crate.

#[cfg(test)]
mod tests;

mod directory;
mod page;
mod store;

pub use directory::Directory;
pub use page::{Page, WriteSpan};
pub use store::FileStore;

/// Leading magic byte of a page file.
pub const PAGE_MAGIC: u8 = 0xAA;
/// Leading magic byte of a directory file.
pub const DIRECTORY_MAGIC: u8 = 0xBB;
/// Leading magic byte of a table file.
pub const TABLE_MAGIC: u8 = 0xEE;
/// Leading magic byte of a database file.
pub const DATABASE_MAGIC: u8 = 0xFC;

/// Default payload capacity of a page.
pub const PAGE_CONTENT_SIZE: usize = 4096;

/// Marks the start of a row inside a page payload.
pub const ROW_DELIMITER: u8 = 0xFD;
/// Separates columns inside an encoded row.
pub const COLUMN_DELIMITER: u8 = 0xFC;
/// Tombstone byte overwriting deleted row content.
pub const PAGE_EMPTY: u8 = 0xFE;

/// Upper bound on pages referenced by one directory (count is one byte).
pub const MAX_DIRECTORY_PAGES: usize = 255;
/// Upper bound on directories referenced by one table.
pub const MAX_TABLE_DIRECTORIES: usize = 255;
/// Upper bound on columns in one table schema.
pub const MAX_TABLE_COLUMNS: usize = 255;

/// The four persistent record kinds, each with its own file extension and
/// magic byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Page,
    Directory,
    Table,
    Database,
}

/// A persistent record kind with a stable binary form.
///
/// Implemented by every object the store can hold; managers and the
/// catalog stay generic over it.
pub trait Record: Sized + Send + Sync + 'static {
    const KIND: ObjectKind;

    fn name(&self) -> common::ObjectName;
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> common::DbResult<Self>;
}

impl Record for Page {
    const KIND: ObjectKind = ObjectKind::Page;

    fn name(&self) -> common::ObjectName {
        Page::name(self)
    }

    fn encode(&self) -> Vec<u8> {
        Page::encode(self)
    }

    fn decode(bytes: &[u8]) -> common::DbResult<Self> {
        Page::decode(bytes)
    }
}

impl Record for Directory {
    const KIND: ObjectKind = ObjectKind::Directory;

    fn name(&self) -> common::ObjectName {
        Directory::name(self)
    }

    fn encode(&self) -> Vec<u8> {
        Directory::encode(self)
    }

    fn decode(bytes: &[u8]) -> common::DbResult<Self> {
        Directory::decode(bytes)
    }
}

impl ObjectKind {
    /// Filename extension of this kind.
    pub fn extension(self) -> &'static str {
        match self {
            ObjectKind::Page => "pg",
            ObjectKind::Directory => "dr",
            ObjectKind::Table => "tb",
            ObjectKind::Database => "db",
        }
    }

    /// Expected leading magic byte of this kind.
    pub fn magic(self) -> u8 {
        match self {
            ObjectKind::Page => PAGE_MAGIC,
            ObjectKind::Directory => DIRECTORY_MAGIC,
            ObjectKind::Table => TABLE_MAGIC,
            ObjectKind::Database => DATABASE_MAGIC,
        }
    }
}

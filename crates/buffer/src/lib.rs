//! Descriptor tables and manager facades for page-level caching and I/O.
//!
//! The descriptor tables (one for pages, one for directories) sit between
//! the object store and the database layer, providing:
//! - bounded in-memory caching keyed by object name
//! - first-unlocked-wins admission with flush-on-replace write-back
//! - advisory per-object locks with thread-identity ownership
//!
//! The manager facades combine a [`storage::FileStore`], the record
//! codecs, and one descriptor table each, and expose the row-level and
//! page-list edits under the advisory lock.
//!
//! # Example
//!
//! ```no_run
//! use buffer::PageManager;
//! use common::{Config, OwnerId};
//! use storage::FileStore;
//!
//! let config = Config::default();
//! let store = FileStore::open(&config.base_dir).unwrap();
//! let pages = PageManager::with_config(store, &config);
//!
//! let owner = OwnerId::current();
//! let page = pages.create_page(config.page_size).unwrap();
//! pages.append(&page, owner, b"hello").unwrap();
//! pages.sync(owner).unwrap();
//! ```


mod cache;
mod lock;

pub use cache::{Backing, DescriptorTable, Handle};
pub use lock::{LockGuard, ObjectLock};

use std::sync::Arc;

use common::{Config, DbError, DbResult, LockMode, ObjectName, OwnerId};
use storage::{Directory, FileStore, Page, Record, WriteSpan};
use tracing::debug;

/// Handle to a cached page.
pub type PageHandle = Handle<Page>;
/// Handle to a cached directory.
pub type DirectoryHandle = Handle<Directory>;

/// Facade over one record kind: store + codec + descriptor table.
///
/// `load` serves from the cache when it can; on a miss the record is read
/// and decoded from disk, then admitted (possibly evicting one unlocked
/// entry). Mutations performed through the facade take the object's
/// advisory lock for the duration of the edit.
#[derive(Debug)]
pub struct ObjectManager<T: Record> {
    store: FileStore,
    cache: DescriptorTable<T>,
    lock_mode: LockMode,
}

/// Facade over pages; the page descriptor table lives inside.
pub type PageManager = ObjectManager<Page>;
/// Facade over directories; the directory descriptor table lives inside.
pub type DirectoryManager = ObjectManager<Directory>;

impl<T: Record> Backing<T> for ObjectManager<T> {
    fn write_back(&self, handle: &Handle<T>) -> DbResult<()> {
        self.store
            .write(handle.name(), T::KIND, &handle.read().encode())
    }

    fn reload(&self, name: ObjectName) -> DbResult<Arc<Handle<T>>> {
        let bytes = self.store.read(name, T::KIND)?;
        let record = T::decode(&bytes)?;
        Ok(Arc::new(Handle::new(record.name(), self.lock_mode, record)))
    }
}

impl<T: Record> ObjectManager<T> {
    pub fn new(store: FileStore, slots: usize, enabled: bool, lock_mode: LockMode) -> Self {
        Self {
            store,
            cache: DescriptorTable::new(slots, enabled),
            lock_mode,
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Fetch by name: cache hit, or read + decode + admit.
    ///
    /// A fully contended cache surfaces as [`DbError::Busy`]; the caller
    /// retries. Repeated loads of a cached name return the same
    /// allocation.
    pub fn load(&self, name: ObjectName) -> DbResult<Arc<Handle<T>>> {
        if let Some(handle) = self.cache.find(name) {
            return Ok(handle);
        }
        debug!(%name, kind = T::KIND.extension(), "cache miss, loading from store");
        let handle = Backing::reload(self, name)?;
        self.admit(handle)
    }

    /// Lookup without touching the store.
    pub fn find(&self, name: ObjectName) -> Option<Arc<Handle<T>>> {
        self.cache.find(name)
    }

    pub fn is_cached(&self, name: ObjectName) -> bool {
        self.cache.find(name).is_some()
    }

    /// Whether this handle is still the canonical copy: the cached entry
    /// for its name, or any handle at all in pass-through mode. A handle
    /// evicted since it was loaded is stale; mutations to it would be
    /// lost, so callers re-load and retry instead.
    pub fn is_current(&self, handle: &Arc<Handle<T>>) -> bool {
        if !self.cache.is_enabled() {
            return true;
        }
        match self.cache.find(handle.name()) {
            Some(current) => Arc::ptr_eq(&current, handle),
            None => false,
        }
    }

    /// Persist a fresh record and admit it into the cache. The file
    /// exists before any parent can reference the name.
    pub fn create_from(&self, record: T) -> DbResult<Arc<Handle<T>>> {
        let name = record.name();
        self.store.write(name, T::KIND, &record.encode())?;
        self.admit(Arc::new(Handle::new(name, self.lock_mode, record)))
    }

    fn admit(&self, handle: Arc<Handle<T>>) -> DbResult<Arc<Handle<T>>> {
        match self.cache.add(handle, OwnerId::current(), self) {
            Err(DbError::Rejected) => Err(DbError::Busy),
            other => other,
        }
    }

    /// Encode and write without evicting from the cache.
    pub fn save(&self, handle: &Handle<T>) -> DbResult<()> {
        self.write_back(handle)
    }

    /// Write back and evict, by allocation identity. Uncached handles are
    /// dropped without a write.
    pub fn flush(&self, handle: &Arc<Handle<T>>) -> DbResult<()> {
        self.cache.flush_object(handle, self)
    }

    /// Release a handle: write back if cached, otherwise just drop it.
    pub fn free(&self, handle: Arc<Handle<T>>) -> DbResult<()> {
        self.cache.flush_object(&handle, self)
    }

    /// Flush-and-reload every cached entry. `Busy` aborts at the first
    /// slot held by another owner; earlier slots stay synced.
    pub fn sync(&self, owner: OwnerId) -> DbResult<()> {
        self.cache.sync(owner, self)
    }

    /// Flush every cached entry without reloading.
    pub fn clear(&self, owner: OwnerId) -> DbResult<()> {
        self.cache.clear(owner, self)
    }

    /// Remove the backing file, dropping any cached copy unwritten.
    pub fn unlink(&self, name: ObjectName, owner: OwnerId) -> DbResult<()> {
        self.cache.discard(name, owner)?;
        self.store.unlink(name, T::KIND)
    }

    /// Draw a name with no backing file yet.
    pub fn fresh_name(&self) -> ObjectName {
        self.store.fresh_name(T::KIND)
    }
}

impl ObjectManager<Page> {
    /// Page manager sized and configured from [`Config`].
    pub fn with_config(store: FileStore, config: &Config) -> Self {
        Self::new(
            store,
            config.page_cache_slots,
            config.cache_enabled,
            config.lock_mode,
        )
    }

    /// Allocate an empty page with a fresh name and persist it.
    pub fn create_page(&self, capacity: usize) -> DbResult<Arc<PageHandle>> {
        let name = self.fresh_name();
        self.create_from(Page::with_capacity(name, capacity))
    }

    /// Append one row under the advisory lock.
    pub fn append(&self, handle: &PageHandle, owner: OwnerId, row: &[u8]) -> DbResult<()> {
        let _guard = handle.lock().acquire(owner)?;
        handle.write().append_row(row)
    }

    /// Overwrite bytes at an offset under the advisory lock, truncating
    /// at capacity.
    pub fn insert(
        &self,
        handle: &PageHandle,
        owner: OwnerId,
        offset: usize,
        bytes: &[u8],
    ) -> DbResult<WriteSpan> {
        let _guard = handle.lock().acquire(owner)?;
        Ok(handle.write().write_at(offset, bytes))
    }

    /// Tombstone a byte range under the advisory lock.
    pub fn delete(
        &self,
        handle: &PageHandle,
        owner: OwnerId,
        offset: usize,
        len: usize,
    ) -> DbResult<()> {
        let _guard = handle.lock().acquire(owner)?;
        handle.write().erase_at(offset, len);
        Ok(())
    }

    /// Byte scan for a single value, skipping tombstones.
    pub fn find_value(&self, handle: &PageHandle, start: usize, needle: u8) -> Option<usize> {
        handle.read().find_byte(start, needle)
    }

    /// Byte scan for a needle slice, skipping tombstones.
    pub fn find_data(&self, handle: &PageHandle, start: usize, needle: &[u8]) -> Option<usize> {
        handle.read().find_bytes(start, needle)
    }

    /// [`Self::find_value`] reported as a row index.
    pub fn find_value_row(&self, handle: &PageHandle, start: usize, needle: u8) -> Option<usize> {
        handle.read().find_byte_row(start, needle)
    }

    /// [`Self::find_data`] reported as a row index.
    pub fn find_data_row(&self, handle: &PageHandle, start: usize, needle: &[u8]) -> Option<usize> {
        handle.read().find_bytes_row(start, needle)
    }
}

impl ObjectManager<Directory> {
    /// Directory manager sized and configured from [`Config`].
    pub fn with_config(store: FileStore, config: &Config) -> Self {
        Self::new(
            store,
            config.dir_cache_slots,
            config.cache_enabled,
            config.lock_mode,
        )
    }

    /// Allocate an empty directory with a fresh name and persist it.
    pub fn create_directory(&self) -> DbResult<Arc<DirectoryHandle>> {
        let name = self.fresh_name();
        self.create_from(Directory::new(name))
    }

    /// Link a page name under the advisory lock.
    pub fn link_page(
        &self,
        handle: &DirectoryHandle,
        owner: OwnerId,
        page: ObjectName,
    ) -> DbResult<()> {
        let _guard = handle.lock().acquire(owner)?;
        handle.write().link_page(page)
    }

    /// Unlink a page name under the advisory lock.
    pub fn unlink_page(
        &self,
        handle: &DirectoryHandle,
        owner: OwnerId,
        page: ObjectName,
    ) -> DbResult<()> {
        let _guard = handle.lock().acquire(owner)?;
        handle.write().unlink_page(page)
    }
}

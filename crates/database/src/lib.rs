//! Row-level database operations over the paged storage engine.
//!
//! A [`Database`] owns the two descriptor-table managers, the catalog,
//! and the object store rooted at one base directory. Row operations
//! resolve a table, walk its directories in order, walk each directory's
//! pages in order, and apply the page-level primitives. Rows are
//! addressed by their global index: the count of row delimiters preceding
//! them across the table's pages. Deleting a row tombstones its content
//! but keeps its delimiter, so indexes stay stable.
//!
//! Contention (`Busy`) is always transient: every operation retries with
//! bounded exponential backoff before giving up, and a surfaced `Busy`
//! may simply be retried again by the caller.
//!
//! # Example
//!
//! ```no_run
//! use catalog::{Column, ColumnType};
//! use common::{Config, ObjectName};
//! use database::Database;
//!
//! let config = Config::default();
//! let db = Database::create(config, ObjectName::new("mydb").unwrap()).unwrap();
//!
//! db.create_table(
//!     ObjectName::new("users").unwrap(),
//!     vec![
//!         Column::new("id", ColumnType::Int, 8).unwrap(),
//!         Column::new("login", ColumnType::Text, 16).unwrap(),
//!     ],
//!     0,
//! )
//! .unwrap();
//!
//! db.append_row(ObjectName::new("users").unwrap(), &[b"1", b"alice"])
//!     .unwrap();
//! db.sync().unwrap();
//! ```


use std::sync::{Arc, RwLock};
use std::thread;

use buffer::{DirectoryManager, PageHandle, PageManager};
use catalog::{Catalog, Column, TableSchema};
use common::{Config, DbError, DbResult, ObjectName, OwnerId};
use storage::{FileStore, Page, PAGE_EMPTY};
use tracing::{debug, info};

/// How an accepted row landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The row fit into an existing page.
    Stored,
    /// A fresh page (and possibly a fresh directory) was allocated for
    /// the row.
    PageAllocated,
}

/// Where one row lives: its page plus the content span inside it.
struct RowLocation {
    page: Arc<PageHandle>,
    offset: usize,
    len: usize,
}

/// The top-level engine handle: catalog plus the two descriptor-table
/// facades over one base directory.
///
/// All row operations take `&self`; the descriptor tables are internally
/// synchronized and the catalog sits behind its own read-write lock, so a
/// `Database` can be shared across threads.
#[derive(Debug)]
pub struct Database {
    config: Config,
    pages: PageManager,
    directories: DirectoryManager,
    catalog: RwLock<Catalog>,
}

impl Database {
    /// Create a fresh database record under `config.base_dir`.
    pub fn create(config: Config, name: ObjectName) -> DbResult<Self> {
        config.validate()?;
        let store = FileStore::open(&config.base_dir)?;
        let catalog = Catalog::create(store.clone(), name)?;
        info!(%name, base = %config.base_dir.display(), "created database");
        Ok(Self::assemble(config, store, catalog))
    }

    /// Open an existing database record under `config.base_dir`.
    pub fn open(config: Config, name: ObjectName) -> DbResult<Self> {
        config.validate()?;
        let store = FileStore::open(&config.base_dir)?;
        let catalog = Catalog::open(store.clone(), name)?;
        info!(%name, base = %config.base_dir.display(), "opened database");
        Ok(Self::assemble(config, store, catalog))
    }

    fn assemble(config: Config, store: FileStore, catalog: Catalog) -> Self {
        Self {
            pages: PageManager::with_config(store.clone(), &config),
            directories: DirectoryManager::with_config(store, &config),
            catalog: RwLock::new(catalog),
            config,
        }
    }

    pub fn name(&self) -> ObjectName {
        self.catalog.read().unwrap().name()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `op`, retrying transient contention with bounded exponential
    /// backoff.
    fn retrying<T>(&self, mut op: impl FnMut() -> DbResult<T>) -> DbResult<T> {
        let mut backoff = self.config.busy_backoff;
        let mut attempts = 0;
        loop {
            match op() {
                Err(err) if err.is_contention() && attempts < self.config.busy_retries => {
                    attempts += 1;
                    thread::sleep(backoff);
                    backoff *= 2;
                }
                other => return other,
            }
        }
    }

    /// In pass-through mode nothing writes back on eviction, so mutated
    /// pages are persisted eagerly.
    fn persist_page(&self, page: &PageHandle) -> DbResult<()> {
        if !self.config.cache_enabled {
            self.pages.save(page)?;
        }
        Ok(())
    }

    /// Register a table. The schema must produce rows that fit a page.
    pub fn create_table(
        &self,
        name: ObjectName,
        columns: Vec<Column>,
        access: u8,
    ) -> DbResult<()> {
        let schema = TableSchema::try_new(columns.clone())?;
        if Page::appended_size(schema.row_stride()) > self.config.page_size {
            return Err(DbError::SignatureMismatch(format!(
                "row stride {} cannot fit a page of {} bytes",
                schema.row_stride(),
                self.config.page_size
            )));
        }
        self.catalog
            .write()
            .unwrap()
            .create_table(name, columns, access)
    }

    /// Drop a table and reclaim every directory and page it references.
    pub fn drop_table(&self, name: ObjectName) -> DbResult<()> {
        let owner = OwnerId::current();
        let dir_names = {
            let catalog = self.catalog.read().unwrap();
            catalog.table(name)?.directories().to_vec()
        };
        for dir_name in dir_names {
            let page_names = {
                let dir = self.retrying(|| self.directories.load(dir_name))?;
                let names = dir.read().pages().to_vec();
                names
            };
            for page_name in page_names {
                self.retrying(|| self.pages.unlink(page_name, owner))?;
            }
            self.retrying(|| self.directories.unlink(dir_name, owner))?;
        }
        self.catalog.write().unwrap().drop_table(name)?;
        Ok(())
    }

    /// Table names currently registered.
    pub fn table_names(&self) -> Vec<ObjectName> {
        self.catalog
            .read()
            .unwrap()
            .tables()
            .map(|t| t.name())
            .collect()
    }

    fn schema_and_directories(&self, table: ObjectName) -> DbResult<(TableSchema, Vec<ObjectName>)> {
        let catalog = self.catalog.read().unwrap();
        let table = catalog.table(table)?;
        Ok((table.schema().clone(), table.directories().to_vec()))
    }

    /// Append one row, first-fit across the table's pages, allocating a
    /// page (and a directory when the last one is full) on demand.
    pub fn append_row(&self, table: ObjectName, values: &[&[u8]]) -> DbResult<WriteOutcome> {
        let owner = OwnerId::current();
        let (schema, _) = self.schema_and_directories(table)?;
        let row = schema.encode_row(values)?;
        self.retrying(|| self.append_encoded(table, owner, &row))
    }

    fn append_encoded(
        &self,
        table: ObjectName,
        owner: OwnerId,
        row: &[u8],
    ) -> DbResult<WriteOutcome> {
        let (_, dir_names) = self.schema_and_directories(table)?;
        let needed = Page::appended_size(row.len());

        for dir_name in &dir_names {
            let dir = self.directories.load(*dir_name)?;
            let page_names = dir.read().pages().to_vec();
            for page_name in page_names {
                let page = self.pages.load(page_name)?;
                // Hold the advisory lock across the space check and the
                // append, and skip pages that were evicted in between:
                // a mutation on a stale copy would never be written back.
                let Ok(_guard) = page.lock().acquire(owner) else {
                    continue;
                };
                if !self.pages.is_current(&page) {
                    continue;
                }
                if page.read().free_space() < needed {
                    continue;
                }
                self.pages.append(&page, owner, row)?;
                self.persist_page(&page)?;
                return Ok(WriteOutcome::Stored);
            }
        }

        // No page had room: allocate, fill, then link parent-ward so the
        // child file always exists before anything references it.
        let page = self.pages.create_page(self.config.page_size)?;
        let page_guard = page.lock().acquire(owner);
        if page_guard.is_err() || !self.pages.is_current(&page) {
            // The fresh page was grabbed by a concurrent eviction before
            // we could pin it. Nothing references it yet; reclaim the
            // file and retry the whole append.
            let _ = self.pages.unlink(page.name(), owner);
            return Err(DbError::Busy);
        }
        self.pages.append(&page, owner, row)?;
        self.persist_page(&page)?;
        debug!(table = %table, page = %page.name(), "allocated page for append");

        let dir = match dir_names.last() {
            Some(&last) => {
                let dir = self.directories.load(last)?;
                if dir.read().is_full() { None } else { Some(dir) }
            }
            None => None,
        };
        let dir = match dir {
            Some(dir) => dir,
            None => {
                let dir = self.directories.create_directory()?;
                let mut catalog = self.catalog.write().unwrap();
                catalog.table_mut(table)?.link_directory(dir.name())?;
                catalog.save_table(table)?;
                debug!(table = %table, directory = %dir.name(), "allocated directory");
                dir
            }
        };
        let dir_guard = dir.lock().acquire(owner);
        if dir_guard.is_err() || !self.directories.is_current(&dir) {
            let _ = self.pages.unlink(page.name(), owner);
            return Err(DbError::Busy);
        }
        self.directories.link_page(&dir, owner, page.name())?;
        self.directories.save(&dir)?;
        Ok(WriteOutcome::PageAllocated)
    }

    /// Walk the table to the page holding global row `index`.
    fn locate(&self, table: ObjectName, index: usize) -> DbResult<RowLocation> {
        let (_, dir_names) = self.schema_and_directories(table)?;
        let mut remaining = index;
        for dir_name in dir_names {
            let dir = self.retrying(|| self.directories.load(dir_name))?;
            let page_names = dir.read().pages().to_vec();
            for page_name in page_names {
                let page = self.retrying(|| self.pages.load(page_name))?;
                let span = {
                    let body = page.read();
                    let count = body.row_count();
                    if remaining >= count {
                        remaining -= count;
                        None
                    } else {
                        body.row_span(remaining)
                    }
                };
                if let Some((offset, len)) = span {
                    return Ok(RowLocation { page, offset, len });
                }
            }
        }
        Err(DbError::NotFound(format!(
            "row {index} in table '{table}'"
        )))
    }

    /// Read one row by global index. Tombstoned rows read as missing.
    pub fn read_row(&self, table: ObjectName, index: usize) -> DbResult<Vec<Vec<u8>>> {
        let (schema, _) = self.schema_and_directories(table)?;
        let location = self.locate(table, index)?;
        let row = {
            let body = location.page.read();
            body.content()[location.offset..location.offset + location.len].to_vec()
        };
        if row.iter().all(|&b| b == PAGE_EMPTY) {
            return Err(DbError::NotFound(format!(
                "row {index} in table '{table}' is deleted"
            )));
        }
        schema.decode_row(&row)
    }

    /// Overwrite one row in place. The fixed stride makes the
    /// replacement exact.
    pub fn update_row(&self, table: ObjectName, index: usize, values: &[&[u8]]) -> DbResult<()> {
        let owner = OwnerId::current();
        let (schema, _) = self.schema_and_directories(table)?;
        let row = schema.encode_row(values)?;
        self.retrying(|| {
            let location = self.locate(table, index)?;
            let _guard = location.page.lock().acquire(owner)?;
            if !self.pages.is_current(&location.page) {
                return Err(DbError::Busy);
            }
            let span = self
                .pages
                .insert(&location.page, owner, location.offset, &row)?;
            if span.is_truncated() {
                return Err(DbError::Overflow);
            }
            self.persist_page(&location.page)
        })
    }

    /// Tombstone one row's content, keeping its delimiter so later rows
    /// keep their indexes.
    pub fn delete_row(&self, table: ObjectName, index: usize) -> DbResult<()> {
        let owner = OwnerId::current();
        self.retrying(|| {
            let location = self.locate(table, index)?;
            let _guard = location.page.lock().acquire(owner)?;
            if !self.pages.is_current(&location.page) {
                return Err(DbError::Busy);
            }
            self.pages
                .delete(&location.page, owner, location.offset, location.len)?;
            self.persist_page(&location.page)
        })
    }

    /// Global index of the first row containing `needle`, scanning pages
    /// in logical order and skipping tombstones.
    pub fn find_value(&self, table: ObjectName, needle: u8) -> DbResult<Option<usize>> {
        self.scan(table, |page, rows_before| {
            page.read()
                .find_byte_row(0, needle)
                .map(|row| rows_before + row)
        })
    }

    /// Global index of the first row whose encoded form equals `values`.
    pub fn find_row(&self, table: ObjectName, values: &[&[u8]]) -> DbResult<Option<usize>> {
        let (schema, _) = self.schema_and_directories(table)?;
        let row = schema.encode_row(values)?;
        self.scan(table, |page, rows_before| {
            page.read()
                .find_bytes_row(0, &row)
                .map(|r| rows_before + r)
        })
    }

    /// Total rows framed in the table, tombstoned ones included.
    pub fn row_count(&self, table: ObjectName) -> DbResult<usize> {
        let mut total = 0;
        self.scan(table, |page, _| {
            total += page.read().row_count();
            None::<()>
        })?;
        Ok(total)
    }

    fn scan<T>(
        &self,
        table: ObjectName,
        mut visit: impl FnMut(&Arc<PageHandle>, usize) -> Option<T>,
    ) -> DbResult<Option<T>> {
        let (_, dir_names) = self.schema_and_directories(table)?;
        let mut rows_before = 0;
        for dir_name in dir_names {
            let dir = self.retrying(|| self.directories.load(dir_name))?;
            let page_names = dir.read().pages().to_vec();
            for page_name in page_names {
                let page = self.retrying(|| self.pages.load(page_name))?;
                if let Some(found) = visit(&page, rows_before) {
                    return Ok(Some(found));
                }
                rows_before += page.read().row_count();
            }
        }
        Ok(None)
    }

    /// Flush-and-reload both descriptor tables and persist the catalog:
    /// the engine's durability barrier.
    pub fn sync(&self) -> DbResult<()> {
        let owner = OwnerId::current();
        self.retrying(|| self.pages.sync(owner))?;
        self.retrying(|| self.directories.sync(owner))?;
        self.catalog.read().unwrap().save()
    }

    /// Drain both caches and persist the catalog, consuming the handle.
    pub fn close(self) -> DbResult<()> {
        let owner = OwnerId::current();
        self.retrying(|| self.pages.clear(owner))?;
        self.retrying(|| self.directories.clear(owner))?;
        self.catalog.read().unwrap().save()?;
        info!(name = %self.catalog.read().unwrap().name(), "closed database");
        Ok(())
    }
}

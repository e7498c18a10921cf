//! Table and database records: the schema layer above directories.
//!
//! A table file names its column layout and the directories holding its
//! rows; a database file is the flat list of table names. Both are plain
//! store records, never cached: they are small, change rarely, and are
//! rewritten whole on every mutation.
//!
//! Row bytes never leave this crate unframed: [`TableSchema::encode_row`]
//! and [`TableSchema::decode_row`] own all padding and column-delimiter
//! handling, so sentinel values stay out of caller-facing APIs.

use ahash::RandomState;
use bytes::{Buf, BufMut};
use common::{DbError, DbResult, NAME_SIZE, ObjectName};
use hashbrown::HashMap;
use storage::{
    COLUMN_DELIMITER, DATABASE_MAGIC, FileStore, MAX_TABLE_COLUMNS, MAX_TABLE_DIRECTORIES,
    ObjectKind, PAGE_EMPTY, ROW_DELIMITER, Record, TABLE_MAGIC,
};
use tracing::debug;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Storage class of one column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Text,
    Byte,
}

impl ColumnType {
    fn as_byte(self) -> u8 {
        match self {
            ColumnType::Int => 0,
            ColumnType::Text => 1,
            ColumnType::Byte => 2,
        }
    }

    fn from_byte(byte: u8) -> DbResult<Self> {
        match byte {
            0 => Ok(ColumnType::Int),
            1 => Ok(ColumnType::Text),
            2 => Ok(ColumnType::Byte),
            other => Err(DbError::CorruptFormat(format!(
                "unknown column type {other:#04x}"
            ))),
        }
    }
}

/// One column: fixed-width label, storage class, byte width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: ObjectName,
    pub ty: ColumnType,
    pub size: u8,
}

impl Column {
    pub fn new(name: &str, ty: ColumnType, size: u8) -> DbResult<Self> {
        if size == 0 {
            return Err(DbError::SignatureMismatch(format!(
                "column '{name}' has zero width"
            )));
        }
        Ok(Self {
            name: ObjectName::new(name)?,
            ty,
            size,
        })
    }
}

/// Ordered, immutable column layout of a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<Column>,
    ordinals: Map<ObjectName, usize>,
}

impl TableSchema {
    pub fn try_new(columns: Vec<Column>) -> DbResult<Self> {
        if columns.is_empty() {
            return Err(DbError::SignatureMismatch(
                "table must contain at least one column".into(),
            ));
        }
        if columns.len() > MAX_TABLE_COLUMNS {
            return Err(DbError::SignatureMismatch(format!(
                "table has {} columns, limit is {MAX_TABLE_COLUMNS}",
                columns.len()
            )));
        }
        let mut ordinals = Map::default();
        for (ordinal, column) in columns.iter().enumerate() {
            if ordinals.insert(column.name, ordinal).is_some() {
                return Err(DbError::SignatureMismatch(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns, ordinals })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_index(&self, name: ObjectName) -> Option<usize> {
        self.ordinals.get(&name).copied()
    }

    /// Encoded byte length of every row of this schema: the column widths
    /// plus one delimiter between each pair of columns. The row's leading
    /// row delimiter is page framing, not part of the row.
    pub fn row_stride(&self) -> usize {
        let widths: usize = self.columns.iter().map(|c| usize::from(c.size)).sum();
        widths + self.columns.len() - 1
    }

    /// Encode one row: values zero-padded to their column width, joined
    /// with the column delimiter.
    ///
    /// Oversized or miscounted values are a signature mismatch; values
    /// carrying a sentinel byte are rejected as corrupt rather than
    /// escaped.
    pub fn encode_row(&self, values: &[&[u8]]) -> DbResult<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(DbError::SignatureMismatch(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        let mut row = Vec::with_capacity(self.row_stride());
        for (column, value) in self.columns.iter().zip(values) {
            if value.len() > usize::from(column.size) {
                return Err(DbError::SignatureMismatch(format!(
                    "value of {} bytes exceeds column '{}' width {}",
                    value.len(),
                    column.name,
                    column.size
                )));
            }
            if value
                .iter()
                .any(|b| matches!(*b, ROW_DELIMITER | COLUMN_DELIMITER | PAGE_EMPTY))
            {
                return Err(DbError::CorruptFormat(format!(
                    "value for column '{}' contains a reserved sentinel byte",
                    column.name
                )));
            }
            if !row.is_empty() {
                row.push(COLUMN_DELIMITER);
            }
            row.extend_from_slice(value);
            row.resize(row.len() + usize::from(column.size) - value.len(), 0);
        }
        Ok(row)
    }

    /// Decode one row back into per-column values, stripping the zero
    /// padding.
    pub fn decode_row(&self, row: &[u8]) -> DbResult<Vec<Vec<u8>>> {
        if row.len() != self.row_stride() {
            return Err(DbError::CorruptFormat(format!(
                "row is {} bytes, schema stride is {}",
                row.len(),
                self.row_stride()
            )));
        }
        let mut values = Vec::with_capacity(self.columns.len());
        let mut rest = row;
        for (ordinal, column) in self.columns.iter().enumerate() {
            if ordinal > 0 {
                if rest[0] != COLUMN_DELIMITER {
                    return Err(DbError::CorruptFormat(format!(
                        "missing delimiter before column '{}'",
                        column.name
                    )));
                }
                rest = &rest[1..];
            }
            let (value, tail) = rest.split_at(usize::from(column.size));
            let end = value
                .iter()
                .rposition(|&b| b != 0)
                .map_or(0, |last| last + 1);
            values.push(value[..end].to_vec());
            rest = tail;
        }
        Ok(values)
    }
}

/// A table record: column schema plus the ordered list of directories
/// holding its rows. The access byte is carried through the format;
/// enforcement belongs to a higher layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
    name: ObjectName,
    schema: TableSchema,
    access: u8,
    directories: Vec<ObjectName>,
}

impl Table {
    pub fn new(name: ObjectName, schema: TableSchema, access: u8) -> Self {
        Self {
            name,
            schema,
            access,
            directories: Vec::new(),
        }
    }

    pub fn name(&self) -> ObjectName {
        self.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn access(&self) -> u8 {
        self.access
    }

    pub fn directories(&self) -> &[ObjectName] {
        &self.directories
    }

    pub fn is_full(&self) -> bool {
        self.directories.len() >= MAX_TABLE_DIRECTORIES
    }

    /// Append a directory reference. Duplicates and overflow are
    /// rejected.
    pub fn link_directory(&mut self, directory: ObjectName) -> DbResult<()> {
        if self.directories.contains(&directory) {
            return Err(DbError::CorruptFormat(format!(
                "directory '{directory}' already linked in table '{}'",
                self.name
            )));
        }
        if self.is_full() {
            return Err(DbError::Overflow);
        }
        self.directories.push(directory);
        Ok(())
    }

    pub fn unlink_directory(&mut self, directory: ObjectName) -> DbResult<()> {
        let index = self
            .directories
            .iter()
            .position(|&d| d == directory)
            .ok_or_else(|| DbError::NotFound(format!("directory '{directory}' in table")))?;
        self.directories.remove(index);
        Ok(())
    }
}

impl Record for Table {
    const KIND: ObjectKind = ObjectKind::Table;

    fn name(&self) -> ObjectName {
        self.name
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(TABLE_MAGIC);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(self.schema.columns.len() as u8);
        for column in &self.schema.columns {
            buf.put_slice(column.name.as_bytes());
            buf.put_u8(column.ty.as_byte());
            buf.put_u8(column.size);
        }
        buf.put_u8(self.access);
        buf.put_u8(self.directories.len() as u8);
        for directory in &self.directories {
            buf.put_slice(directory.as_bytes());
        }
        buf
    }

    fn decode(bytes: &[u8]) -> DbResult<Self> {
        let mut rest = bytes;
        if rest.remaining() < 1 + NAME_SIZE + 1 {
            return Err(DbError::CorruptFormat(format!(
                "table record truncated at {} bytes",
                bytes.len()
            )));
        }
        let magic = rest.get_u8();
        if magic != TABLE_MAGIC {
            return Err(DbError::CorruptMagic {
                expected: TABLE_MAGIC,
                found: magic,
            });
        }
        let mut name = [0u8; NAME_SIZE];
        rest.copy_to_slice(&mut name);
        let column_count = usize::from(rest.get_u8());
        if rest.remaining() < column_count * (NAME_SIZE + 2) + 2 {
            return Err(DbError::CorruptFormat(
                "table record truncated inside the column list".into(),
            ));
        }
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let mut label = [0u8; NAME_SIZE];
            rest.copy_to_slice(&mut label);
            let ty = ColumnType::from_byte(rest.get_u8())?;
            let size = rest.get_u8();
            if size == 0 {
                return Err(DbError::CorruptFormat("column with zero width".into()));
            }
            columns.push(Column {
                name: ObjectName::from_bytes(label),
                ty,
                size,
            });
        }
        let access = rest.get_u8();
        let dir_count = usize::from(rest.get_u8());
        if rest.remaining() < dir_count * NAME_SIZE {
            return Err(DbError::CorruptFormat(
                "table record truncated inside the directory list".into(),
            ));
        }
        let mut table = Table::new(
            ObjectName::from_bytes(name),
            TableSchema::try_new(columns)
                .map_err(|e| DbError::CorruptFormat(format!("bad schema: {e}")))?,
            access,
        );
        for _ in 0..dir_count {
            let mut directory = [0u8; NAME_SIZE];
            rest.copy_to_slice(&mut directory);
            table
                .link_directory(ObjectName::from_bytes(directory))
                .map_err(|e| DbError::CorruptFormat(format!("bad directory list: {e}")))?;
        }
        Ok(table)
    }
}

/// The database record: a flat list of table names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseRecord {
    name: ObjectName,
    tables: Vec<ObjectName>,
}

impl DatabaseRecord {
    pub fn new(name: ObjectName) -> Self {
        Self {
            name,
            tables: Vec::new(),
        }
    }

    pub fn name(&self) -> ObjectName {
        self.name
    }

    pub fn tables(&self) -> &[ObjectName] {
        &self.tables
    }

    pub fn add_table(&mut self, table: ObjectName) -> DbResult<()> {
        if self.tables.contains(&table) {
            return Err(DbError::CorruptFormat(format!(
                "table '{table}' already registered"
            )));
        }
        if self.tables.len() >= u8::MAX as usize {
            return Err(DbError::Overflow);
        }
        self.tables.push(table);
        Ok(())
    }

    pub fn remove_table(&mut self, table: ObjectName) -> DbResult<()> {
        let index = self
            .tables
            .iter()
            .position(|&t| t == table)
            .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))?;
        self.tables.remove(index);
        Ok(())
    }
}

impl Record for DatabaseRecord {
    const KIND: ObjectKind = ObjectKind::Database;

    fn name(&self) -> ObjectName {
        self.name
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + NAME_SIZE + 1 + self.tables.len() * NAME_SIZE);
        buf.put_u8(DATABASE_MAGIC);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(self.tables.len() as u8);
        for table in &self.tables {
            buf.put_slice(table.as_bytes());
        }
        buf
    }

    fn decode(bytes: &[u8]) -> DbResult<Self> {
        let mut rest = bytes;
        if rest.remaining() < 1 + NAME_SIZE + 1 {
            return Err(DbError::CorruptFormat(format!(
                "database record truncated at {} bytes",
                bytes.len()
            )));
        }
        let magic = rest.get_u8();
        if magic != DATABASE_MAGIC {
            return Err(DbError::CorruptMagic {
                expected: DATABASE_MAGIC,
                found: magic,
            });
        }
        let mut name = [0u8; NAME_SIZE];
        rest.copy_to_slice(&mut name);
        let count = usize::from(rest.get_u8());
        if rest.remaining() < count * NAME_SIZE {
            return Err(DbError::CorruptFormat(
                "database record truncated inside the table list".into(),
            ));
        }
        let mut record = DatabaseRecord::new(ObjectName::from_bytes(name));
        for _ in 0..count {
            let mut table = [0u8; NAME_SIZE];
            rest.copy_to_slice(&mut table);
            record
                .add_table(ObjectName::from_bytes(table))
                .map_err(|e| DbError::CorruptFormat(format!("bad table list: {e}")))?;
        }
        Ok(record)
    }
}

/// Persistent catalog: the database record plus every table it names,
/// loaded eagerly and indexed by name.
#[derive(Debug)]
pub struct Catalog {
    store: FileStore,
    record: DatabaseRecord,
    tables: Map<ObjectName, Table>,
}

impl Catalog {
    /// Create a fresh database record on disk.
    pub fn create(store: FileStore, name: ObjectName) -> DbResult<Self> {
        let record = DatabaseRecord::new(name);
        store.write(name, ObjectKind::Database, &record.encode())?;
        debug!(%name, "created database record");
        Ok(Self {
            store,
            record,
            tables: Map::default(),
        })
    }

    /// Load an existing database record and all of its tables.
    pub fn open(store: FileStore, name: ObjectName) -> DbResult<Self> {
        let record = DatabaseRecord::decode(&store.read(name, ObjectKind::Database)?)?;
        let mut tables = Map::default();
        for &table_name in record.tables() {
            let table = Table::decode(&store.read(table_name, ObjectKind::Table)?)?;
            tables.insert(table_name, table);
        }
        Ok(Self {
            store,
            record,
            tables,
        })
    }

    pub fn name(&self) -> ObjectName {
        self.record.name()
    }

    /// Persist the database record; table records are saved individually
    /// as they change.
    pub fn save(&self) -> DbResult<()> {
        self.store
            .write(self.record.name(), ObjectKind::Database, &self.record.encode())
    }

    /// Persist one table record.
    pub fn save_table(&self, name: ObjectName) -> DbResult<()> {
        let table = self.table(name)?;
        self.store
            .write(name, ObjectKind::Table, &table.encode())
    }

    /// Register a new table and persist both the table and the record.
    pub fn create_table(
        &mut self,
        name: ObjectName,
        columns: Vec<Column>,
        access: u8,
    ) -> DbResult<()> {
        if self.tables.contains_key(&name) {
            return Err(DbError::CorruptFormat(format!(
                "table '{name}' already exists"
            )));
        }
        let table = Table::new(name, TableSchema::try_new(columns)?, access);
        self.store.write(name, ObjectKind::Table, &table.encode())?;
        self.record.add_table(name)?;
        self.tables.insert(name, table);
        self.save()?;
        debug!(%name, "created table");
        Ok(())
    }

    /// Remove a table from the catalog and unlink its record file. The
    /// table's directories and pages are the caller's to reclaim first.
    pub fn drop_table(&mut self, name: ObjectName) -> DbResult<Table> {
        let table = self
            .tables
            .remove(&name)
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))?;
        self.record.remove_table(name)?;
        self.store.unlink(name, ObjectKind::Table)?;
        self.save()?;
        debug!(%name, "dropped table");
        Ok(table)
    }

    pub fn table(&self, name: ObjectName) -> DbResult<&Table> {
        self.tables
            .get(&name)
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))
    }

    pub fn table_mut(&mut self, name: ObjectName) -> DbResult<&mut Table> {
        self.tables
            .get_mut(&name)
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.record
            .tables()
            .iter()
            .filter_map(|name| self.tables.get(name))
    }
}

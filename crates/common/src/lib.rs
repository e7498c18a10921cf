
use serde::{Deserialize, Serialize};
use std::{fmt, io, path::PathBuf, str::FromStr, thread, time::Duration};
use thiserror::Error;
use uuid::Uuid;

/// Length of every persistent object name, in bytes.
///
/// Pages, directories, tables, databases and column labels all share the
/// same fixed-width identifier; the name doubles as the filename stem of
/// the object's backing file.
pub const NAME_SIZE: usize = 8;

/// Fixed-width identifier for a persistent object.
///
/// Shorter names are zero-padded on the right. The padding is not part of
/// the logical name, so `ObjectName::new("pg1")` and a name decoded from a
/// zero-padded file header compare equal.
///
/// Examples:
/// - `let page = ObjectName::new("pg000001").unwrap();`
/// - `let fresh = ObjectName::generate();`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectName([u8; NAME_SIZE]);

impl ObjectName {
    /// Build a name from a string of at most [`NAME_SIZE`] bytes.
    pub fn new(name: &str) -> DbResult<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > NAME_SIZE {
            return Err(DbError::CorruptFormat(format!(
                "object name must be 1..={NAME_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.contains(&0) {
            return Err(DbError::CorruptFormat(
                "object name must not contain NUL bytes".into(),
            ));
        }
        let mut buf = [0u8; NAME_SIZE];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Reconstruct a name from its on-disk, zero-padded form.
    pub fn from_bytes(bytes: [u8; NAME_SIZE]) -> Self {
        Self(bytes)
    }

    /// The zero-padded wire form.
    pub fn as_bytes(&self) -> &[u8; NAME_SIZE] {
        &self.0
    }

    /// Generate a fresh random name (leading hex digits of a v4 uuid).
    ///
    /// Uniqueness against existing files is the allocator's job; callers
    /// re-draw on collision.
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        let mut buf = [0u8; NAME_SIZE];
        buf.copy_from_slice(&hex.as_bytes()[..NAME_SIZE]);
        Self(buf)
    }

    fn trimmed(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &self.0[..end]
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.trimmed()))
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectName({self})")
    }
}

impl FromStr for ObjectName {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Opaque identity of the thread holding an advisory lock.
///
/// Wraps the scheduler's own thread id; nothing assumes the ids are dense
/// or small.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnerId(thread::ThreadId);

impl OwnerId {
    /// Identity of the calling thread.
    pub fn current() -> Self {
        Self(thread::current().id())
    }
}

/// Canonical error type shared across the storage subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad magic byte: expected {expected:#04x}, found {found:#04x}")]
    CorruptMagic { expected: u8, found: u8 },
    #[error("corrupt record: {0}")]
    CorruptFormat(String),
    #[error("object is locked by another owner")]
    Busy,
    #[error("page has no room for the row")]
    Overflow,
    #[error("every cache slot is locked by another owner")]
    Rejected,
    #[error("row does not match the table signature: {0}")]
    SignatureMismatch(String),
    #[error("access denied")]
    AccessDenied,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DbError {
    /// True for transient contention failures that a caller may retry.
    pub fn is_contention(&self) -> bool {
        matches!(self, DbError::Busy | DbError::Rejected)
    }
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Selects between real advisory locking and a no-op lock for
/// single-threaded deployments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMode {
    Advisory,
    Disabled,
}

/// Runtime configuration for the storage engine.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .base_dir(PathBuf::from("./my_db"))
///     .page_cache_slots(64)
///     .cache_enabled(true)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory that owns every page, directory, table and database file.
    #[builder(default = PathBuf::from("./db_data"))]
    pub base_dir: PathBuf,
    /// Payload capacity of newly created pages, in bytes.
    #[builder(default = 4096)]
    pub page_size: usize,
    /// Number of slots in the page descriptor table.
    #[builder(default = 1024)]
    pub page_cache_slots: usize,
    /// Number of slots in the directory descriptor table.
    #[builder(default = 10)]
    pub dir_cache_slots: usize,
    /// When false both descriptor tables become pass-throughs and every
    /// load reads from disk.
    #[builder(default = true)]
    pub cache_enabled: bool,
    /// Advisory locking, or the no-op lock for single-threaded use.
    #[builder(default = LockMode::Advisory)]
    pub lock_mode: LockMode,
    /// How many times facade operations retry on `Busy` before giving up.
    #[builder(default = 8)]
    pub busy_retries: u32,
    /// Initial backoff between retries; doubles per attempt.
    #[builder(default = Duration::from_micros(100))]
    pub busy_backoff: Duration,
}

impl Config {
    /// Check the values against the engine's hard bounds: the page size
    /// counter is two bytes on disk and the descriptor tables need at
    /// least one slot. Surfaced as a typed error before any file or
    /// cache is built from the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.page_size == 0 || self.page_size > usize::from(u16::MAX) {
            return Err(DbError::CorruptFormat(format!(
                "page size {} is outside 1..={}",
                self.page_size,
                u16::MAX
            )));
        }
        if self.page_cache_slots == 0 || self.dir_cache_slots == 0 {
            return Err(DbError::CorruptFormat(
                "descriptor tables need at least one slot".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, LockMode, ObjectName, OwnerId};
}

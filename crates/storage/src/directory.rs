use bytes::{Buf, BufMut};
use common::{DbError, DbResult, NAME_SIZE, ObjectName};

use crate::{DIRECTORY_MAGIC, MAX_DIRECTORY_PAGES};

/// Byte length of the encoded directory header: magic, name, page count.
const HEADER_BYTES: usize = 1 + NAME_SIZE + 1;

/// An ordered list of page names forming one contiguous logical address
/// range. Order is significant: it defines the row address space of the
/// directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directory {
    name: ObjectName,
    pages: Vec<ObjectName>,
}

impl Directory {
    /// Empty directory.
    pub fn new(name: ObjectName) -> Self {
        Self {
            name,
            pages: Vec::new(),
        }
    }

    pub fn name(&self) -> ObjectName {
        self.name
    }

    /// Referenced page names, in logical order.
    pub fn pages(&self) -> &[ObjectName] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_full(&self) -> bool {
        self.pages.len() >= MAX_DIRECTORY_PAGES
    }

    pub fn contains(&self, page: ObjectName) -> bool {
        self.pages.contains(&page)
    }

    /// Append a page reference. Duplicates and overflow are rejected.
    pub fn link_page(&mut self, page: ObjectName) -> DbResult<()> {
        if self.contains(page) {
            return Err(DbError::CorruptFormat(format!(
                "page '{page}' already linked in directory '{}'",
                self.name
            )));
        }
        if self.is_full() {
            return Err(DbError::Overflow);
        }
        self.pages.push(page);
        Ok(())
    }

    /// Remove a page reference, preserving the order of the rest.
    pub fn unlink_page(&mut self, page: ObjectName) -> DbResult<()> {
        let index = self
            .pages
            .iter()
            .position(|&p| p == page)
            .ok_or_else(|| DbError::NotFound(format!("page '{page}' in directory")))?;
        self.pages.remove(index);
        Ok(())
    }

    /// Encode to the on-disk form: magic, name, count, page names.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_BYTES + self.pages.len() * NAME_SIZE);
        buf.put_u8(DIRECTORY_MAGIC);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(self.pages.len() as u8);
        for page in &self.pages {
            buf.put_slice(page.as_bytes());
        }
        buf
    }

    /// Decode from the on-disk form, rejecting truncation and duplicate
    /// page references.
    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(DbError::CorruptFormat(format!(
                "directory record truncated at {} bytes",
                bytes.len()
            )));
        }
        let mut rest = bytes;
        let magic = rest.get_u8();
        if magic != DIRECTORY_MAGIC {
            return Err(DbError::CorruptMagic {
                expected: DIRECTORY_MAGIC,
                found: magic,
            });
        }
        let mut name = [0u8; NAME_SIZE];
        rest.copy_to_slice(&mut name);
        let count = usize::from(rest.get_u8());
        if rest.remaining() < count * NAME_SIZE {
            return Err(DbError::CorruptFormat(format!(
                "directory lists {count} pages but only {} bytes follow",
                rest.remaining()
            )));
        }
        let mut pages = Vec::with_capacity(count);
        for _ in 0..count {
            let mut page = [0u8; NAME_SIZE];
            rest.copy_to_slice(&mut page);
            let page = ObjectName::from_bytes(page);
            if pages.contains(&page) {
                return Err(DbError::CorruptFormat(format!(
                    "directory references page '{page}' twice"
                )));
            }
            pages.push(page);
        }
        Ok(Self {
            name: ObjectName::from_bytes(name),
            pages,
        })
    }
}

use bytes::{Buf, BufMut};
use common::{DbError, DbResult, NAME_SIZE, ObjectName};

use crate::{PAGE_CONTENT_SIZE, PAGE_EMPTY, PAGE_MAGIC, ROW_DELIMITER};

/// Byte length of the encoded page header: magic, name, used counter.
const HEADER_BYTES: usize = 1 + NAME_SIZE + 2;

/// Result of an offset write: how much of the input fit before the end of
/// the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteSpan {
    pub requested: usize,
    pub written: usize,
}

impl WriteSpan {
    /// True when only a prefix of the input fit.
    pub fn is_truncated(&self) -> bool {
        self.written < self.requested
    }
}

/// The leaf persistent unit: a fixed-capacity byte payload plus header.
///
/// Rows inside the payload are framed by a [`ROW_DELIMITER`] prefix;
/// deleted row content is overwritten with [`PAGE_EMPTY`] tombstones and
/// never compacted. The payload is byte-opaque apart from the sentinels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    name: ObjectName,
    used: u16,
    payload: Vec<u8>,
}

impl Page {
    /// Empty page with the default payload capacity.
    pub fn new(name: ObjectName) -> Self {
        Self::with_capacity(name, PAGE_CONTENT_SIZE)
    }

    /// Empty page with an explicit payload capacity. The used counter is
    /// two bytes on disk, so the capacity must fit it.
    pub fn with_capacity(name: ObjectName, capacity: usize) -> Self {
        assert!(
            capacity <= usize::from(u16::MAX),
            "page capacity must fit the two-byte size counter"
        );
        Self {
            name,
            used: 0,
            payload: vec![0u8; capacity],
        }
    }

    pub fn name(&self) -> ObjectName {
        self.name
    }

    /// Bytes of payload currently in use.
    pub fn used(&self) -> usize {
        usize::from(self.used)
    }

    /// Total payload capacity.
    pub fn capacity(&self) -> usize {
        self.payload.len()
    }

    /// Bytes still available for appends.
    pub fn free_space(&self) -> usize {
        self.capacity() - self.used()
    }

    /// The used prefix of the payload.
    pub fn content(&self) -> &[u8] {
        &self.payload[..self.used()]
    }

    /// Space one appended row of `len` content bytes takes.
    pub fn appended_size(len: usize) -> usize {
        1 + len
    }

    /// Append one row: a delimiter byte followed by the row content.
    ///
    /// Rows containing the delimiter byte are rejected outright rather
    /// than escaped, so a scan can trust every delimiter it sees.
    pub fn append_row(&mut self, row: &[u8]) -> DbResult<()> {
        if row.contains(&ROW_DELIMITER) {
            return Err(DbError::CorruptFormat(
                "row content contains the row delimiter byte".into(),
            ));
        }
        if Self::appended_size(row.len()) > self.free_space() {
            return Err(DbError::Overflow);
        }
        let at = self.used();
        self.payload[at] = ROW_DELIMITER;
        self.payload[at + 1..at + 1 + row.len()].copy_from_slice(row);
        self.used += Self::appended_size(row.len()) as u16;
        Ok(())
    }

    /// Overwrite payload bytes starting at `offset`, truncating at the end
    /// of the payload. Grows the used counter when the write lands past it.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> WriteSpan {
        let capacity = self.capacity();
        let writable = capacity.saturating_sub(offset).min(bytes.len());
        if writable > 0 {
            self.payload[offset..offset + writable].copy_from_slice(&bytes[..writable]);
            self.used = self.used.max((offset + writable) as u16);
        }
        WriteSpan {
            requested: bytes.len(),
            written: writable,
        }
    }

    /// Tombstone `len` bytes at `offset` with [`PAGE_EMPTY`]. Clamped to
    /// the used region; no compaction.
    pub fn erase_at(&mut self, offset: usize, len: usize) {
        let end = self.used().min(offset.saturating_add(len));
        if offset < end {
            self.payload[offset..end].fill(PAGE_EMPTY);
        }
    }

    /// First offset at or after `start` holding `needle`, skipping
    /// tombstoned bytes. Searching for the tombstone byte itself misses.
    pub fn find_byte(&self, start: usize, needle: u8) -> Option<usize> {
        if needle == PAGE_EMPTY {
            return None;
        }
        self.content()
            .iter()
            .enumerate()
            .skip(start)
            .find(|&(_, &b)| b == needle)
            .map(|(i, _)| i)
    }

    /// First offset at or after `start` where `needle` matches, skipping
    /// any window overlapping a tombstone.
    pub fn find_bytes(&self, start: usize, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || needle.contains(&PAGE_EMPTY) {
            return None;
        }
        let content = self.content();
        if start >= content.len() {
            return None;
        }
        content[start..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|i| start + i)
    }

    /// Index of the row containing `offset`: delimiters strictly before
    /// the offset, minus the row's own leading delimiter. Offsets before
    /// the first delimiter count as row zero.
    pub fn row_of_offset(&self, offset: usize) -> usize {
        let end = offset.min(self.used());
        let delimiters = self.payload[..end]
            .iter()
            .filter(|&&b| b == ROW_DELIMITER)
            .count();
        delimiters.saturating_sub(1)
    }

    /// [`Self::find_byte`] reported as a row index.
    pub fn find_byte_row(&self, start: usize, needle: u8) -> Option<usize> {
        self.find_byte(start, needle)
            .map(|offset| self.row_of_offset(offset))
    }

    /// [`Self::find_bytes`] reported as a row index.
    pub fn find_bytes_row(&self, start: usize, needle: &[u8]) -> Option<usize> {
        self.find_bytes(start, needle)
            .map(|offset| self.row_of_offset(offset))
    }

    /// Number of rows framed in this page.
    pub fn row_count(&self) -> usize {
        self.content()
            .iter()
            .filter(|&&b| b == ROW_DELIMITER)
            .count()
    }

    /// Content offset and length of row `index`, excluding its delimiter.
    pub fn row_span(&self, index: usize) -> Option<(usize, usize)> {
        let content = self.content();
        let mut starts = content
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == ROW_DELIMITER)
            .map(|(i, _)| i + 1);
        let start = starts.nth(index)?;
        let end = starts.next().map_or(content.len(), |next| next - 1);
        Some((start, end - start))
    }

    /// Encode to the on-disk form: magic, name, used counter, payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_BYTES + self.capacity());
        buf.put_u8(PAGE_MAGIC);
        buf.put_slice(self.name.as_bytes());
        buf.put_u16_le(self.used);
        buf.put_slice(&self.payload);
        buf
    }

    /// Decode from the on-disk form. The payload capacity is whatever the
    /// file carries after the header.
    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(DbError::CorruptFormat(format!(
                "page record truncated at {} bytes",
                bytes.len()
            )));
        }
        let mut rest = bytes;
        let magic = rest.get_u8();
        if magic != PAGE_MAGIC {
            return Err(DbError::CorruptMagic {
                expected: PAGE_MAGIC,
                found: magic,
            });
        }
        let mut name = [0u8; NAME_SIZE];
        rest.copy_to_slice(&mut name);
        let used = rest.get_u16_le();
        let payload = rest.to_vec();
        if usize::from(used) > payload.len() {
            return Err(DbError::CorruptFormat(format!(
                "page size counter {used} exceeds payload capacity {}",
                payload.len()
            )));
        }
        Ok(Self {
            name: ObjectName::from_bytes(name),
            used,
            payload,
        })
    }
}

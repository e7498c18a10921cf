use super::*;
use common::{DbError, ObjectName};
use proptest::prelude::*;
use tempfile::tempdir;

fn name(s: &str) -> ObjectName {
    ObjectName::new(s).unwrap()
}

#[test]
fn append_frames_rows_with_delimiters() {
    let mut page = Page::with_capacity(name("pg000001"), 16);

    page.append_row(&[0x01, 0x02, 0x03]).unwrap();
    assert_eq!(page.used(), 4);
    assert_eq!(page.content(), &[ROW_DELIMITER, 0x01, 0x02, 0x03]);

    page.append_row(&[0x04]).unwrap();
    assert_eq!(page.used(), 6);
    assert_eq!(
        page.content(),
        &[ROW_DELIMITER, 0x01, 0x02, 0x03, ROW_DELIMITER, 0x04]
    );
}

#[test]
fn delete_tombstones_without_compacting() {
    let mut page = Page::with_capacity(name("pg000001"), 16);
    page.append_row(&[0x01, 0x02, 0x03]).unwrap();
    page.append_row(&[0x04]).unwrap();

    page.erase_at(1, 3);
    assert_eq!(
        page.content(),
        &[
            ROW_DELIMITER, PAGE_EMPTY, PAGE_EMPTY, PAGE_EMPTY, ROW_DELIMITER, 0x04
        ]
    );
    assert_eq!(page.used(), 6);

    // The surviving row is found at row index 1.
    assert_eq!(page.find_byte_row(0, 0x04), Some(1));
    // The tombstoned bytes no longer match anything.
    assert_eq!(page.find_byte(0, 0x02), None);
}

#[test]
fn append_rejects_rows_containing_the_delimiter() {
    let mut page = Page::with_capacity(name("pg000001"), 64);
    let err = page.append_row(&[0x01, ROW_DELIMITER, 0x02]).unwrap_err();
    assert!(matches!(err, DbError::CorruptFormat(_)));
    assert_eq!(page.used(), 0);
}

#[test]
fn append_overflows_when_space_runs_out() {
    let mut page = Page::with_capacity(name("pg000001"), 8);
    page.append_row(&[0x01, 0x02, 0x03]).unwrap();

    let err = page.append_row(&[0x04, 0x05, 0x06, 0x07]).unwrap_err();
    assert!(matches!(err, DbError::Overflow));
    // A row that exactly fills the remaining space still fits.
    page.append_row(&[0x04, 0x05, 0x06]).unwrap();
    assert_eq!(page.free_space(), 0);
}

#[test]
fn write_at_truncates_at_capacity() {
    let mut page = Page::with_capacity(name("pg000001"), 8);
    let span = page.write_at(6, &[0xA0, 0xA1, 0xA2, 0xA3]);
    assert_eq!(span, WriteSpan { requested: 4, written: 2 });
    assert!(span.is_truncated());
    assert_eq!(page.used(), 8);

    let span = page.write_at(8, &[0xB0]);
    assert_eq!(span.written, 0);
}

#[test]
fn write_at_extends_the_used_region() {
    let mut page = Page::with_capacity(name("pg000001"), 32);
    page.append_row(&[0x01]).unwrap();
    assert_eq!(page.used(), 2);

    let span = page.write_at(10, &[0x09]);
    assert!(!span.is_truncated());
    assert_eq!(page.used(), 11);
}

#[test]
fn find_bytes_skips_tombstoned_windows() {
    let mut page = Page::with_capacity(name("pg000001"), 32);
    page.append_row(&[0x10, 0x20, 0x30]).unwrap();
    page.append_row(&[0x10, 0x20, 0x30]).unwrap();

    assert_eq!(page.find_bytes(0, &[0x10, 0x20]), Some(1));
    assert_eq!(page.find_bytes(2, &[0x10, 0x20]), Some(5));
    assert_eq!(page.find_bytes_row(2, &[0x10, 0x20]), Some(1));

    page.erase_at(1, 3);
    assert_eq!(page.find_bytes(0, &[0x10, 0x20]), Some(5));
}

#[test]
fn searching_for_the_tombstone_byte_misses() {
    let mut page = Page::with_capacity(name("pg000001"), 16);
    page.append_row(&[0x01]).unwrap();
    page.erase_at(1, 1);
    assert_eq!(page.find_byte(0, PAGE_EMPTY), None);
    assert_eq!(page.find_bytes(0, &[PAGE_EMPTY]), None);
}

#[test]
fn row_spans_and_counts() {
    let mut page = Page::with_capacity(name("pg000001"), 32);
    page.append_row(&[0x01, 0x02]).unwrap();
    page.append_row(&[0x03]).unwrap();
    page.append_row(&[]).unwrap();

    assert_eq!(page.row_count(), 3);
    assert_eq!(page.row_span(0), Some((1, 2)));
    assert_eq!(page.row_span(1), Some((4, 1)));
    assert_eq!(page.row_span(2), Some((6, 0)));
    assert_eq!(page.row_span(3), None);
}

#[test]
fn page_decode_rejects_bad_input() {
    let page = Page::with_capacity(name("pg000001"), 16);
    let mut bytes = page.encode();

    bytes[0] = 0x00;
    assert!(matches!(
        Page::decode(&bytes),
        Err(DbError::CorruptMagic { expected: PAGE_MAGIC, found: 0x00 })
    ));

    bytes[0] = PAGE_MAGIC;
    // Size counter beyond the payload.
    bytes[9] = 0xFF;
    bytes[10] = 0xFF;
    assert!(matches!(Page::decode(&bytes), Err(DbError::CorruptFormat(_))));

    assert!(matches!(Page::decode(&[PAGE_MAGIC]), Err(DbError::CorruptFormat(_))));
}

#[test]
fn directory_links_and_unlinks_pages() {
    let mut dir = Directory::new(name("dr000001"));
    dir.link_page(name("pg000001")).unwrap();
    dir.link_page(name("pg000002")).unwrap();

    assert_eq!(dir.page_count(), 2);
    assert!(dir.contains(name("pg000001")));

    let err = dir.link_page(name("pg000001")).unwrap_err();
    assert!(matches!(err, DbError::CorruptFormat(_)));

    dir.unlink_page(name("pg000001")).unwrap();
    assert_eq!(dir.pages(), &[name("pg000002")]);

    let err = dir.unlink_page(name("pg000001")).unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));
}

#[test]
fn directory_rejects_more_than_255_pages() {
    let mut dir = Directory::new(name("dr000001"));
    for i in 0..MAX_DIRECTORY_PAGES {
        dir.link_page(name(&format!("pg{i:06}"))).unwrap();
    }
    let err = dir.link_page(name("overflow")).unwrap_err();
    assert!(matches!(err, DbError::Overflow));
}

#[test]
fn directory_decode_rejects_truncation_and_duplicates() {
    let mut dir = Directory::new(name("dr000001"));
    dir.link_page(name("pg000001")).unwrap();
    dir.link_page(name("pg000002")).unwrap();
    let encoded = dir.encode();

    // Chop one page name off the tail.
    let truncated = &encoded[..encoded.len() - 4];
    assert!(matches!(
        Directory::decode(truncated),
        Err(DbError::CorruptFormat(_))
    ));

    // Duplicate the first page name into the second slot.
    let mut duplicated = encoded.clone();
    let first = 10..18;
    let second = 18..26;
    let copy: Vec<u8> = duplicated[first].to_vec();
    duplicated[second].copy_from_slice(&copy);
    assert!(matches!(
        Directory::decode(&duplicated),
        Err(DbError::CorruptFormat(_))
    ));
}

#[test]
fn store_round_trips_records() {
    let base = tempdir().unwrap();
    let store = FileStore::open(base.path()).unwrap();

    let mut page = Page::with_capacity(name("pg000001"), 64);
    page.append_row(&[1, 2, 3]).unwrap();
    store
        .write(page.name(), ObjectKind::Page, &page.encode())
        .unwrap();

    assert!(store.exists(name("pg000001"), ObjectKind::Page));
    let bytes = store.read(name("pg000001"), ObjectKind::Page).unwrap();
    assert_eq!(Page::decode(&bytes).unwrap(), page);
}

#[test]
fn store_read_missing_is_not_found() {
    let base = tempdir().unwrap();
    let store = FileStore::open(base.path()).unwrap();
    let err = store.read(name("nope"), ObjectKind::Page).unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));
}

#[test]
fn store_read_validates_magic_per_kind() {
    let base = tempdir().unwrap();
    let store = FileStore::open(base.path()).unwrap();

    let dir = Directory::new(name("dr000001"));
    store
        .write(dir.name(), ObjectKind::Directory, &dir.encode())
        .unwrap();

    // The same bytes under a page extension fail the magic check.
    store
        .write(dir.name(), ObjectKind::Page, &dir.encode())
        .unwrap();
    let err = store.read(dir.name(), ObjectKind::Page).unwrap_err();
    assert!(matches!(
        err,
        DbError::CorruptMagic { expected: PAGE_MAGIC, found: DIRECTORY_MAGIC }
    ));
}

#[test]
fn store_unlink_removes_the_file() {
    let base = tempdir().unwrap();
    let store = FileStore::open(base.path()).unwrap();

    let page = Page::with_capacity(name("pg000001"), 16);
    store
        .write(page.name(), ObjectKind::Page, &page.encode())
        .unwrap();
    store.unlink(page.name(), ObjectKind::Page).unwrap();

    assert!(!store.exists(page.name(), ObjectKind::Page));
    let err = store.unlink(page.name(), ObjectKind::Page).unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));
}

#[test]
fn fresh_names_avoid_existing_files() {
    let base = tempdir().unwrap();
    let store = FileStore::open(base.path()).unwrap();
    let fresh = store.fresh_name(ObjectKind::Page);
    assert!(!store.exists(fresh, ObjectKind::Page));
}

fn arb_name() -> impl Strategy<Value = ObjectName> {
    "[a-z0-9]{1,8}".prop_map(|s| ObjectName::new(&s).unwrap())
}

proptest! {
    #[test]
    fn page_codec_round_trip(
        name in arb_name(),
        capacity in 16usize..=256,
        data in prop::collection::vec(any::<u8>(), 0..=256),
    ) {
        let mut page = Page::with_capacity(name, capacity);
        page.write_at(0, &data);
        let decoded = Page::decode(&page.encode()).unwrap();
        prop_assert_eq!(decoded, page);
    }

    #[test]
    fn directory_codec_round_trip(
        name in arb_name(),
        pages in prop::collection::btree_set(0u64..1_000_000, 0..=64),
    ) {
        let mut dir = Directory::new(name);
        for page in &pages {
            dir.link_page(ObjectName::new(&format!("{page:08x}")).unwrap()).unwrap();
        }
        let decoded = Directory::decode(&dir.encode()).unwrap();
        prop_assert_eq!(decoded, dir);
    }

    #[test]
    fn accepted_rows_never_contain_the_delimiter(
        row in prop::collection::vec(any::<u8>(), 0..=32),
    ) {
        let mut page = Page::with_capacity(ObjectName::new("prop").unwrap(), 64);
        match page.append_row(&row) {
            Ok(()) => {
                prop_assert!(!row.contains(&ROW_DELIMITER));
                prop_assert_eq!(page.row_span(0), Some((1, row.len())));
            }
            Err(DbError::CorruptFormat(_)) => prop_assert!(row.contains(&ROW_DELIMITER)),
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }
}

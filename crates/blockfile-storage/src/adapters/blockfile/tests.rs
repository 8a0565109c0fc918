//! # File Store Tests

use super::*;
use crate::domain::codec::frame;
use crate::domain::errors::FileStoreError;
use tempfile::TempDir;

#[test]
fn test_blockfile_naming() {
    let dir = Path::new("/ledger");
    assert_eq!(
        blockfile_path(dir, 0),
        PathBuf::from("/ledger/blockfile_000000")
    );
    assert_eq!(
        blockfile_path(dir, 1_234_567),
        PathBuf::from("/ledger/blockfile_1234567")
    );
    assert_eq!(parse_suffix("blockfile_000042"), Some(42));
    assert_eq!(parse_suffix("blockfile_42"), None);
    assert_eq!(parse_suffix("blockfile_00004x"), None);
    assert_eq!(parse_suffix("checkpoint"), None);
}

#[test]
fn test_highest_suffix_ignores_other_files() {
    let dir = TempDir::new().unwrap();
    assert_eq!(highest_suffix(dir.path()).unwrap(), None);

    BlockfileWriter::open(dir.path(), 0).unwrap();
    BlockfileWriter::open(dir.path(), 2).unwrap();
    std::fs::write(dir.path().join("checkpoint"), b"x").unwrap();
    std::fs::write(dir.path().join("blockfile_000009.tmp"), b"x").unwrap();

    assert_eq!(highest_suffix(dir.path()).unwrap(), Some(2));
}

#[test]
fn test_append_returns_offset_after_write() {
    let dir = TempDir::new().unwrap();
    let mut writer = BlockfileWriter::open(dir.path(), 0).unwrap();
    assert_eq!(writer.offset(), 0);
    assert_eq!(writer.append(b"hello", true).unwrap(), 5);
    assert_eq!(writer.append(b" world", false).unwrap(), 11);
    writer.close().unwrap();

    let writer = BlockfileWriter::open(dir.path(), 0).unwrap();
    assert_eq!(writer.offset(), 11, "reopen resumes at file length");
}

#[test]
fn test_read_at_and_short_read() {
    let dir = TempDir::new().unwrap();
    let mut writer = BlockfileWriter::open(dir.path(), 0).unwrap();
    writer.append(b"0123456789", true).unwrap();

    let mut reader = BlockfileReader::new(dir.path());
    assert_eq!(reader.read_at(0, 2, 3).unwrap(), b"234".to_vec());
    assert_eq!(reader.open_suffix(), Some(0));

    match reader.read_at(0, 8, 5) {
        Err(FileStoreError::ShortRead {
            wanted, available, ..
        }) => {
            assert_eq!(wanted, 5);
            assert_eq!(available, 2);
        }
        other => panic!("Expected ShortRead, got {other:?}"),
    }

    reader.release();
    assert_eq!(reader.open_suffix(), None);
}

#[test]
fn test_reader_switches_files() {
    let dir = TempDir::new().unwrap();
    let mut writer = BlockfileWriter::open(dir.path(), 0).unwrap();
    writer.append(b"first", true).unwrap();
    let mut writer = writer.roll().unwrap();
    assert_eq!(writer.suffix(), 1);
    assert_eq!(writer.offset(), 0);
    writer.append(b"second", true).unwrap();

    let mut reader = BlockfileReader::new(dir.path());
    assert_eq!(reader.read_at(0, 0, 5).unwrap(), b"first".to_vec());
    assert_eq!(reader.read_at(1, 0, 6).unwrap(), b"second".to_vec());
    assert_eq!(reader.open_suffix(), Some(1));
}

#[test]
fn test_truncate() {
    let dir = TempDir::new().unwrap();
    let mut writer = BlockfileWriter::open(dir.path(), 0).unwrap();
    writer.append(b"keep-this-drop-that", true).unwrap();
    writer.truncate(9).unwrap();
    assert_eq!(writer.offset(), 9);
    writer.append(b"!", true).unwrap();

    let bytes = std::fs::read(writer.path()).unwrap();
    assert_eq!(bytes, b"keep-this!".to_vec());
}

#[test]
fn test_scanner_reads_records_to_clean_end() {
    let dir = TempDir::new().unwrap();
    let mut writer = BlockfileWriter::open(dir.path(), 3).unwrap();
    let first = frame(b"alpha");
    let second = frame(&[7u8; 200]);
    writer.append(&first.bytes, true).unwrap();
    writer.append(&second.bytes, true).unwrap();

    let mut scanner = RecordScanner::open(dir.path(), 3, 0).unwrap();
    let a = scanner.next_record().unwrap().unwrap();
    assert_eq!(a.payload, b"alpha".to_vec());
    assert_eq!(a.location(), crate::domain::entities::Location::new(3, 1, 5));

    let b = scanner.next_record().unwrap().unwrap();
    assert_eq!(b.header_len, 2);
    assert_eq!(b.offset, first.len());
    assert_eq!(b.end(), first.len() + second.len());

    assert!(scanner.next_record().unwrap().is_none());
    assert_eq!(scanner.position(), scanner.file_len());
}

#[test]
fn test_scanner_resumes_from_offset() {
    let dir = TempDir::new().unwrap();
    let mut writer = BlockfileWriter::open(dir.path(), 0).unwrap();
    let first = frame(b"one");
    writer.append(&first.bytes, true).unwrap();
    writer.append(&frame(b"two").bytes, true).unwrap();

    let mut scanner = RecordScanner::open(dir.path(), 0, first.len()).unwrap();
    assert_eq!(scanner.next_record().unwrap().unwrap().payload, b"two".to_vec());
    assert!(scanner.next_record().unwrap().is_none());
}

#[test]
fn test_scanner_detects_torn_payload() {
    let dir = TempDir::new().unwrap();
    let mut writer = BlockfileWriter::open(dir.path(), 0).unwrap();
    let good = frame(b"complete");
    writer.append(&good.bytes, true).unwrap();
    let torn = frame(&[1u8; 1000]);
    writer.append(&torn.bytes[..50], true).unwrap();

    let mut scanner = RecordScanner::open(dir.path(), 0, 0).unwrap();
    assert!(scanner.next_record().unwrap().is_some());
    let err = scanner.next_record().unwrap_err();
    assert!(err.is_torn_record());
    assert!(matches!(err, FileStoreError::ShortRead { offset, .. } if offset == good.len()));
}

#[test]
fn test_scanner_detects_torn_length_prefix() {
    let dir = TempDir::new().unwrap();
    let mut writer = BlockfileWriter::open(dir.path(), 0).unwrap();
    // First byte of a two-byte varint.
    writer.append(&[0xE8], true).unwrap();

    let mut scanner = RecordScanner::open(dir.path(), 0, 0).unwrap();
    assert!(matches!(
        scanner.next_record(),
        Err(FileStoreError::ShortRead { offset: 0, .. })
    ));
}

#[test]
fn test_scanner_detects_overlong_length_prefix() {
    let dir = TempDir::new().unwrap();
    let mut writer = BlockfileWriter::open(dir.path(), 0).unwrap();
    writer.append(&[0xFF; 16], true).unwrap();

    let mut scanner = RecordScanner::open(dir.path(), 0, 0).unwrap();
    assert!(matches!(
        scanner.next_record(),
        Err(FileStoreError::MalformedHeader { .. })
    ));
}

#[cfg(target_os = "linux")]
#[test]
fn test_failed_append_keeps_offset() {
    let full = std::path::Path::new("/dev/full");
    if !full.exists() {
        return;
    }
    let dir = TempDir::new().unwrap();
    std::os::unix::fs::symlink(full, blockfile_path(dir.path(), 0)).unwrap();

    // Writes fail with ENOSPC and the cut back is refused; both are reported
    // without moving the offset.
    let mut writer = BlockfileWriter::open(dir.path(), 0).unwrap();
    let err = writer.append(&frame(b"block").bytes, true).unwrap_err();
    assert!(matches!(err, FileStoreError::Io { .. }));
    assert!(!err.is_torn_record());
    assert_eq!(writer.offset(), 0);
}

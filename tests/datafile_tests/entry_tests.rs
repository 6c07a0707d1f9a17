//! Tests for record encoding
//!
//! These tests verify:
//! - Framing of puts and tombstones
//! - Zero-length values stay distinct from deletes
//! - Checksum and structural corruption detection

use caskdb::datafile::{Entry, RecordHeader, FLAG_TOMBSTONE, HEADER_SIZE};
use caskdb::CaskError;

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_encode_put_layout() {
    let entry = Entry::put(b"key".to_vec(), b"value".to_vec());
    let buf = entry.encode();

    assert_eq!(buf.len(), HEADER_SIZE + 3 + 5);
    assert_eq!(entry.encoded_len(), buf.len() as u64);
    assert_eq!(buf[4], 0);
    assert_eq!(&buf[5..9], &3u32.to_le_bytes());
    assert_eq!(&buf[9..17], &5u64.to_le_bytes());
    assert_eq!(&buf[17..20], b"key");
    assert_eq!(&buf[20..], b"value");
}

#[test]
fn test_encode_tombstone_sets_flag() {
    let entry = Entry::delete(b"gone".to_vec());
    let buf = entry.encode();

    assert_eq!(buf.len(), HEADER_SIZE + 4);
    assert_eq!(buf[4], FLAG_TOMBSTONE);

    let header = RecordHeader::parse(&buf).unwrap();
    assert!(header.is_tombstone());
    assert_eq!(header.value_len, 0);
    assert_eq!(header.record_len(), buf.len() as u64);
}

#[test]
fn test_decode_put() {
    let entry = Entry::put(b"k".to_vec(), b"v".to_vec());
    let decoded = Entry::decode(&entry.encode(), 0, 0).unwrap();
    assert_eq!(decoded, entry);
    assert_eq!(decoded.value(), Some(&b"v"[..]));
}

#[test]
fn test_empty_value_is_not_a_tombstone() {
    let empty = Entry::put(b"k".to_vec(), Vec::<u8>::new());
    let decoded = Entry::decode(&empty.encode(), 0, 0).unwrap();

    assert!(!decoded.is_tombstone());
    assert_eq!(decoded.value(), Some(&b""[..]));

    let deleted = Entry::decode(&Entry::delete(b"k".to_vec()).encode(), 0, 0).unwrap();
    assert!(deleted.is_tombstone());
    assert_eq!(deleted.value(), None);
    assert_ne!(decoded, deleted);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_flipped_value_byte_is_checksum_mismatch() {
    let mut buf = Entry::put(b"key".to_vec(), b"value".to_vec()).encode();
    let last = buf.len() - 1;
    buf[last] ^= 0xFF;

    match Entry::decode(&buf, 7, 128) {
        Err(CaskError::ChecksumMismatch { segment_id, offset }) => {
            assert_eq!(segment_id, 7);
            assert_eq!(offset, 128);
        }
        other => panic!("expected checksum mismatch, got {:?}", other),
    }
}

#[test]
fn test_flipped_key_byte_is_checksum_mismatch() {
    let mut buf = Entry::put(b"key".to_vec(), b"value".to_vec()).encode();
    buf[HEADER_SIZE] ^= 0x01;
    assert!(matches!(
        Entry::decode(&buf, 0, 0),
        Err(CaskError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_truncated_record_is_corruption() {
    let buf = Entry::put(b"key".to_vec(), b"value".to_vec()).encode();
    assert!(matches!(
        Entry::decode(&buf[..buf.len() - 2], 0, 0),
        Err(CaskError::Corruption(_))
    ));
    assert!(matches!(
        Entry::decode(&buf[..HEADER_SIZE - 1], 0, 0),
        Err(CaskError::Corruption(_))
    ));
}

#[test]
fn test_unknown_flags_rejected() {
    let mut buf = Entry::put(b"key".to_vec(), b"value".to_vec()).encode();
    buf[4] = 0x80;
    assert!(matches!(RecordHeader::parse(&buf), Err(CaskError::Corruption(_))));
}

#[test]
fn test_empty_key_header_rejected() {
    let mut buf = Entry::put(b"key".to_vec(), b"value".to_vec()).encode();
    buf[5..9].copy_from_slice(&0u32.to_le_bytes());
    assert!(matches!(RecordHeader::parse(&buf), Err(CaskError::Corruption(_))));
}

#[test]
fn test_tombstone_with_value_rejected() {
    let mut buf = Entry::put(b"key".to_vec(), b"value".to_vec()).encode();
    buf[4] = FLAG_TOMBSTONE;
    assert!(matches!(RecordHeader::parse(&buf), Err(CaskError::Corruption(_))));
}

//! Tests for the store
//!
//! These tests verify:
//! - Point operations, tombstones and empty values
//! - Ordered scans, ranges and iteration
//! - Persistence across close/reopen, with and without the saved index
//! - Locking, read-only opens, backup and stats

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use caskdb::paths::{self, INDEX_FILENAME, LOCK_FILENAME, META_FILENAME};
use caskdb::{CaskError, Store};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    (dir, store)
}

fn all_pairs(store: &Store) -> Vec<(Vec<u8>, Vec<u8>)> {
    store
        .iter()
        .map(|pair| {
            let (k, v) = pair.unwrap();
            (k.to_vec(), v)
        })
        .collect()
}

fn visited(f: impl FnOnce(&mut dyn FnMut(&[u8]) -> caskdb::Result<()>)) -> Vec<String> {
    let mut keys = Vec::new();
    f(&mut |key: &[u8]| {
        keys.push(String::from_utf8(key.to_vec()).unwrap());
        Ok(())
    });
    keys
}

fn corrupt_byte(path: &std::path::Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    std::io::Read::read_exact(&mut file, &mut byte).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[byte[0] ^ 0xFF]).unwrap();
}

// =============================================================================
// Basic Operation Tests
// =============================================================================

#[test]
fn test_put_get_round_trip() {
    let (_dir, store) = setup();
    store.put("hello", "world").unwrap();
    assert_eq!(store.get(b"hello").unwrap(), b"world");
    assert!(store.has(b"hello"));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_get_missing_key() {
    let (_dir, store) = setup();
    assert!(matches!(store.get(b"nope"), Err(CaskError::KeyNotFound)));
    assert!(!store.has(b"nope"));
}

#[test]
fn test_overwrite() {
    let (_dir, store) = setup();
    store.put("k", "v1").unwrap();
    store.put("k", "v2").unwrap();
    assert_eq!(store.get(b"k").unwrap(), b"v2");
    assert_eq!(store.len(), 1);
}

#[test]
fn test_delete_is_tombstone() {
    let (_dir, store) = setup();
    store.put("k", "v").unwrap();
    store.delete("k").unwrap();

    assert!(!store.has(b"k"));
    assert!(matches!(store.get(b"k"), Err(CaskError::KeyNotFound)));
    assert!(store.is_empty());

    // Deleting again is not an error
    store.delete("k").unwrap();
}

#[test]
fn test_empty_value_is_live() {
    let (dir, store) = setup();
    store.put("empty", "").unwrap();
    assert!(store.has(b"empty"));
    assert_eq!(store.get(b"empty").unwrap(), b"");
    store.close().unwrap();

    let store = Store::open(dir.path()).unwrap();
    assert!(store.has(b"empty"));
    assert_eq!(store.get(b"empty").unwrap(), b"");
}

#[test]
fn test_validation_errors() {
    let dir = TempDir::new().unwrap();
    let store = Store::open_with(dir.path(), Store::builder().max_key_size(4).max_value_size(4)).unwrap();

    assert!(matches!(store.put("", "v"), Err(CaskError::EmptyKey)));
    assert!(matches!(store.put("toolong", "v"), Err(CaskError::KeyTooLarge { .. })));
    assert!(matches!(store.put("k", "toolong"), Err(CaskError::ValueTooLarge { .. })));
    assert!(store.is_empty());
}

#[test]
fn test_binary_keys_and_values() {
    let (_dir, store) = setup();
    let key = vec![0u8, 1, 2, 255];
    let value: Vec<u8> = (0..=255).collect();
    store.put(key.clone(), value.clone()).unwrap();
    assert_eq!(store.get(&key).unwrap(), value);
}

#[test]
fn test_checksum_mismatch_on_corrupt_value() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open(dir.path()).unwrap();
        store.put("k", "hello").unwrap();
        store.close().unwrap();
    }

    // Record at offset 0: 17-byte header, 1-byte key, then the value
    corrupt_byte(&paths::segment_path(dir.path(), 0), 19);

    let store = Store::open_with(dir.path(), Store::builder().auto_recovery(false)).unwrap();
    assert!(matches!(
        store.get(b"k"),
        Err(CaskError::ChecksumMismatch { segment_id: 0, offset: 0 })
    ));
}

// =============================================================================
// Ordered Access Tests
// =============================================================================

#[test]
fn test_for_each_after_overwrite() {
    let (_dir, store) = setup();
    store.put("a", "1").unwrap();
    store.put("b", "2").unwrap();
    store.put("a", "3").unwrap();

    assert_eq!(
        all_pairs(&store),
        vec![
            (b"a".to_vec(), b"3".to_vec()),
            (b"b".to_vec(), b"2".to_vec())
        ]
    );
    assert_eq!(visited(|f| store.for_each(f).unwrap()), vec!["a", "b"]);
    assert_eq!(visited(|f| store.scan(b"a", f).unwrap()), vec!["a"]);
}

#[test]
fn test_scan_prefix() {
    let (_dir, store) = setup();
    for key in ["user:2", "user:1", "order:1", "user:10", "users"] {
        store.put(key, "x").unwrap();
    }
    assert_eq!(
        visited(|f| store.scan(b"user:", f).unwrap()),
        vec!["user:1", "user:10", "user:2"]
    );
    assert!(visited(|f| store.scan(b"zzz", f).unwrap()).is_empty());
}

#[test]
fn test_range_bounds_and_order() {
    let (_dir, store) = setup();
    for key in ["e", "a", "c", "b", "d"] {
        store.put(key, "x").unwrap();
    }
    assert_eq!(visited(|f| store.range(b"b", b"d", f).unwrap()), vec!["b", "c", "d"]);
    assert_eq!(visited(|f| store.range(b"0", b"bb", f).unwrap()), vec!["a", "b"]);
    assert!(matches!(store.range(b"d", b"b", |_| Ok(())), Err(CaskError::InvalidRange)));
}

#[test]
fn test_visitor_error_stops_walk() {
    let (_dir, store) = setup();
    for key in ["a", "b", "c"] {
        store.put(key, "x").unwrap();
    }

    let mut seen = 0;
    let result = store.for_each(|_| {
        seen += 1;
        if seen == 2 {
            Err(CaskError::KeyNotFound)
        } else {
            Ok(())
        }
    });
    assert!(matches!(result, Err(CaskError::KeyNotFound)));
    assert_eq!(seen, 2);
}

#[test]
fn test_keys_and_reverse_iteration() {
    let (_dir, store) = setup();
    for key in ["b", "c", "a"] {
        store.put(key, key).unwrap();
    }

    let keys: Vec<_> = store.keys().iter().map(|k| k.to_vec()).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    let reversed: Vec<_> = store.iter().rev().map(|p| p.unwrap().1).collect();
    assert_eq!(reversed, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn test_iterator_is_a_snapshot() {
    let (_dir, store) = setup();
    store.put("a", "1").unwrap();
    store.put("b", "2").unwrap();

    let iter = store.iter();
    store.put("a", "changed").unwrap();
    store.put("c", "3").unwrap();

    let values: Vec<_> = iter.map(|p| p.unwrap().1).collect();
    assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
}

#[test]
fn test_iter_seek_prefix() {
    let (_dir, store) = setup();
    for key in ["app", "apple", "apply", "banana", "ap"] {
        store.put(key, key.to_uppercase()).unwrap();
    }

    let mut iter = store.iter();
    assert_eq!(iter.next().unwrap().unwrap().0.to_vec(), b"ap");

    // Seeking restarts over the same snapshot, limited to the prefix
    iter.seek_prefix(b"appl");
    let forward: Vec<_> = iter.map(|p| p.unwrap()).collect();
    assert_eq!(
        forward
            .iter()
            .map(|(k, v)| (k.to_vec(), v.clone()))
            .collect::<Vec<_>>(),
        vec![
            (b"apple".to_vec(), b"APPLE".to_vec()),
            (b"apply".to_vec(), b"APPLY".to_vec()),
        ]
    );

    let mut iter = store.iter();
    iter.seek_prefix(b"ap");
    let backward: Vec<_> = iter.rev().map(|p| p.unwrap().0.to_vec()).collect();
    assert_eq!(
        backward,
        vec![b"apply".to_vec(), b"apple".to_vec(), b"app".to_vec(), b"ap".to_vec()]
    );

    let mut iter = store.iter();
    assert_eq!(iter.seek_prefix(b"cherry").count(), 0);
}

// =============================================================================
// Streaming Read Tests
// =============================================================================

#[test]
fn test_get_reader_streams_value() {
    use std::io::Read;

    let (_dir, store) = setup();
    let value: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    store.put("big", value.clone()).unwrap();

    let mut reader = store.get_reader(b"big").unwrap();
    assert_eq!(reader.len(), 10_000);

    let mut head = [0u8; 100];
    reader.read_exact(&mut head).unwrap();
    assert_eq!(&head[..], &value[..100]);
    assert_eq!(reader.remaining(), 9_900);

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, &value[100..]);
}

#[test]
fn test_get_reader_seeks() {
    use std::io::Read;

    let (_dir, store) = setup();
    store.put("k", "0123456789").unwrap();
    let mut reader = store.get_reader(b"k").unwrap();

    let mut buf = [0u8; 3];
    assert_eq!(reader.seek(SeekFrom::Start(4)).unwrap(), 4);
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"456");

    assert_eq!(reader.seek(SeekFrom::End(-2)).unwrap(), 8);
    let mut tail = String::new();
    reader.read_to_string(&mut tail).unwrap();
    assert_eq!(tail, "89");

    assert_eq!(reader.seek(SeekFrom::Current(-5)).unwrap(), 5);
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"567");

    assert!(reader.seek(SeekFrom::Current(-100)).is_err());

    // Past the end reads nothing
    reader.seek(SeekFrom::Start(50)).unwrap();
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_get_reader_missing_and_empty() {
    use std::io::Read;

    let (_dir, store) = setup();
    store.put("empty", "").unwrap();
    store.put("gone", "x").unwrap();
    store.delete("gone").unwrap();

    let mut reader = store.get_reader(b"empty").unwrap();
    assert!(reader.is_empty());
    let mut buf = Vec::new();
    assert_eq!(reader.read_to_end(&mut buf).unwrap(), 0);

    assert!(matches!(store.get_reader(b"gone"), Err(CaskError::KeyNotFound)));
}

#[test]
fn test_get_reader_outlives_merge() {
    use std::io::Read;

    let (_dir, store) = setup();
    store.put("k", "old").unwrap();
    store.put("k", "kept").unwrap();
    let mut reader = store.get_reader(b"k").unwrap();

    store.merge().unwrap();

    let mut value = String::new();
    reader.read_to_string(&mut value).unwrap();
    assert_eq!(value, "kept");
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_after_close() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open(dir.path()).unwrap();
        store.put("a", "1").unwrap();
        store.put("b", "2").unwrap();
        store.delete("a").unwrap();
        store.close().unwrap();
    }

    let store = Store::open(dir.path()).unwrap();
    assert!(!store.has(b"a"));
    assert_eq!(store.get(b"b").unwrap(), b"2");
}

#[test]
fn test_drop_closes_store() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open(dir.path()).unwrap();
        store.put("k", "v").unwrap();
    }

    let store = Store::open(dir.path()).unwrap();
    assert_eq!(store.get(b"k").unwrap(), b"v");
}

#[test]
fn test_sidecar_files_written() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    store.put("k", "v").unwrap();
    store.sync().unwrap();

    assert!(dir.path().join("config.json").exists());
    assert!(dir.path().join(META_FILENAME).exists());
    assert!(dir.path().join(INDEX_FILENAME).exists());
    assert!(dir.path().join(LOCK_FILENAME).exists());
    assert!(paths::segment_path(dir.path(), 0).exists());

    let meta: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join(META_FILENAME)).unwrap()).unwrap();
    assert_eq!(meta["index_up_to_date"], true);
}

#[test]
fn test_write_after_sync_marks_index_stale() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    store.put("a", "1").unwrap();
    store.sync().unwrap();
    store.put("b", "2").unwrap();

    let meta: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join(META_FILENAME)).unwrap()).unwrap();
    assert_eq!(meta["index_up_to_date"], false);

    // A copy taken now looks like a crash right after the second write
    let copy = TempDir::new().unwrap();
    store.backup(copy.path()).unwrap();
    let restored = Store::open(copy.path()).unwrap();
    assert_eq!(restored.get(b"a").unwrap(), b"1");
    assert_eq!(restored.get(b"b").unwrap(), b"2");
}

#[test]
fn test_saved_index_matches_rebuild() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open_with(dir.path(), Store::builder().max_datafile_size(256)).unwrap();
        for i in 0..100 {
            store.put(format!("key{:03}", i), format!("value{}", i)).unwrap();
        }
        for i in (0..100).step_by(4) {
            store.delete(format!("key{:03}", i)).unwrap();
        }
        for i in (1..100).step_by(5) {
            store.put(format!("key{:03}", i), "again").unwrap();
        }
        store.close().unwrap();
    }

    let fast = {
        let store = Store::open(dir.path()).unwrap();
        let pairs = all_pairs(&store);
        store.close().unwrap();
        pairs
    };

    std::fs::remove_file(dir.path().join(INDEX_FILENAME)).unwrap();
    let rebuilt = {
        let store = Store::open(dir.path()).unwrap();
        all_pairs(&store)
    };

    assert_eq!(fast, rebuilt);
    assert_eq!(fast.len(), 80);
}

#[test]
fn test_rotation_keeps_all_data() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open_with(dir.path(), Store::builder().max_datafile_size(100)).unwrap();
        for i in 0..50 {
            store.put(format!("k{:02}", i), vec![b'x'; 30]).unwrap();
        }
        assert!(store.stats().unwrap().datafiles >= 25);
        store.close().unwrap();
    }

    let ids = paths::list_segment_ids(dir.path()).unwrap();
    assert_eq!(ids, (0..ids.len() as u32).collect::<Vec<_>>());

    let store = Store::open(dir.path()).unwrap();
    assert_eq!(store.len(), 50);
    assert_eq!(store.get(b"k49").unwrap(), vec![b'x'; 30]);
}

// =============================================================================
// Locking Tests
// =============================================================================

#[test]
fn test_second_writer_is_locked_out() {
    let (dir, _store) = setup();
    assert!(matches!(Store::open(dir.path()), Err(CaskError::DatabaseLocked)));
}

#[test]
fn test_lock_released_on_close() {
    let (dir, store) = setup();
    store.close().unwrap();
    let store = Store::open(dir.path()).unwrap();
    assert!(!store.is_readonly());
}

#[test]
fn test_readonly_fallback_when_locked() {
    let (dir, writer) = setup();
    writer.put("k", "v").unwrap();
    writer.sync().unwrap();

    let reader = Store::open_with(dir.path(), Store::builder().open_readonly(true)).unwrap();
    assert!(reader.is_readonly());
    assert_eq!(reader.get(b"k").unwrap(), b"v");

    assert!(matches!(reader.put("k", "x"), Err(CaskError::DatabaseReadonly)));
    assert!(matches!(reader.delete("k"), Err(CaskError::DatabaseReadonly)));
    assert!(matches!(reader.merge(), Err(CaskError::DatabaseReadonly)));
    reader.sync().unwrap();
}

#[test]
fn test_open_readonly_takes_lock_when_free() {
    let dir = TempDir::new().unwrap();
    let store = Store::open_with(dir.path(), Store::builder().open_readonly(true)).unwrap();
    assert!(!store.is_readonly());
    store.put("k", "v").unwrap();
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_readers_and_writer() {
    let (_dir, store) = setup();
    for i in 0..100 {
        store.put(format!("key{:03}", i), format!("v{}", i)).unwrap();
    }
    let store = Arc::new(store);

    std::thread::scope(|s| {
        for _ in 0..4 {
            let store = Arc::clone(&store);
            s.spawn(move || {
                for i in 0..100 {
                    let value = store.get(format!("key{:03}", i).as_bytes()).unwrap();
                    assert!(value.starts_with(b"v"));
                }
            });
        }
        let writer = Arc::clone(&store);
        s.spawn(move || {
            for i in 0..100 {
                writer.put(format!("key{:03}", i), format!("v{}-new", i)).unwrap();
            }
        });
    });

    assert_eq!(store.len(), 100);
    assert_eq!(store.get(b"key050").unwrap(), b"v50-new");
}

// =============================================================================
// Backup / Stats Tests
// =============================================================================

#[test]
fn test_backup_copies_store() {
    let (_dir, store) = setup();
    store.put("a", "1").unwrap();
    store.put("b", "2").unwrap();
    store.sync().unwrap();

    let dest = TempDir::new().unwrap();
    let backup_path = dest.path().join("backup");
    store.backup(&backup_path).unwrap();
    assert!(!backup_path.join(LOCK_FILENAME).exists());

    let copy = Store::open(&backup_path).unwrap();
    assert_eq!(copy.get(b"a").unwrap(), b"1");
    assert_eq!(copy.get(b"b").unwrap(), b"2");
}

#[test]
fn test_stats() {
    let dir = TempDir::new().unwrap();
    let store = Store::open_with(dir.path(), Store::builder().max_datafile_size(64)).unwrap();
    let empty = store.stats().unwrap();
    assert_eq!(empty.keys, 0);
    assert_eq!(empty.datafiles, 1);

    for i in 0..4 {
        store.put(format!("k{}", i), vec![b'x'; 40]).unwrap();
    }
    store.put("k0", "y").unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.keys, 4);
    assert!(stats.datafiles >= 4);
    assert!(stats.size >= 4 * 59);
    assert_eq!(stats.reclaimable, 59);
}

#[test]
fn test_stats_on_empty_readonly_store_counts_no_datafiles() {
    let dir = TempDir::new().unwrap();
    // Hold the lock without creating any segment
    let _lock = caskdb::lock::LockFile::try_acquire(dir.path(), 0o600)
        .unwrap()
        .unwrap();

    let reader = Store::open_with(dir.path(), Store::builder().open_readonly(true)).unwrap();
    assert!(reader.is_readonly());
    let stats = reader.stats().unwrap();
    assert_eq!(stats.datafiles, 0);
    assert_eq!(stats.keys, 0);
    assert!(paths::list_segment_ids(dir.path()).unwrap().is_empty());
}

#[test]
fn test_path_and_config() {
    let dir = TempDir::new().unwrap();
    let store = Store::open_with(dir.path(), Store::builder().max_key_size(10)).unwrap();
    assert_eq!(store.path(), dir.path());
    assert_eq!(store.config().max_key_size, 10);
}

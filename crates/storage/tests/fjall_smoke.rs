#![cfg(feature = "fjall")]

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use stashd_storage::fjall::FjallStore;
use stashd_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn fjall_smoke_roundtrip() {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    dir.push(format!("stashd_fjall_smoke_{nanos}"));

    let store = FjallStore::open(&dir).expect("open fjall");
    store.put(Column::Meta, b"key", b"value").expect("put");
    assert_eq!(
        store.get(Column::Meta, b"key").expect("get"),
        Some(b"value".to_vec())
    );

    store
        .put(Column::SubSsh, b"prefix:1", b"a")
        .expect("put prefix");
    store
        .put(Column::SubSsh, b"prefix:2", b"b")
        .expect("put prefix");
    let mut rows = HashSet::new();
    for (key, value) in store
        .scan_prefix(Column::SubSsh, b"prefix:")
        .expect("scan")
    {
        rows.insert((key, value));
    }
    assert_eq!(
        rows,
        HashSet::from([
            (b"prefix:1".to_vec(), b"a".to_vec()),
            (b"prefix:2".to_vec(), b"b".to_vec()),
        ])
    );

    let mut batch = WriteBatch::new();
    batch.put(Column::Meta, b"batch", b"ok");
    batch.delete(Column::Meta, b"key");
    store.write_batch(&batch).expect("batch commit");

    assert!(store.get(Column::Meta, b"key").expect("get").is_none());
    assert_eq!(
        store.get(Column::Meta, b"batch").expect("get"),
        Some(b"ok".to_vec())
    );

    store.clear_column(Column::SubSsh).expect("clear");
    assert!(store
        .scan_prefix(Column::SubSsh, b"")
        .expect("scan")
        .is_empty());

    drop(store);
    let _ = std::fs::remove_dir_all(&dir);
}

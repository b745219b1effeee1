use stashd_storage::memory::MemoryStore;
use stashd_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn put_get_delete() {
    let store = MemoryStore::new();
    store.put(Column::Meta, b"key", b"value").expect("put");
    assert_eq!(
        store.get(Column::Meta, b"key").expect("get"),
        Some(b"value".to_vec())
    );
    store.delete(Column::Meta, b"key").expect("delete");
    assert!(store.get(Column::Meta, b"key").expect("get").is_none());
}

#[test]
fn columns_are_isolated() {
    let store = MemoryStore::new();
    store.put(Column::Ssh, b"k", b"ssh").expect("put");
    store.put(Column::SubSsh, b"k", b"sub").expect("put");
    assert_eq!(
        store.get(Column::Ssh, b"k").expect("get"),
        Some(b"ssh".to_vec())
    );
    assert_eq!(
        store.get(Column::SubSsh, b"k").expect("get"),
        Some(b"sub".to_vec())
    );
    store.clear_column(Column::Ssh).expect("clear");
    assert!(store.get(Column::Ssh, b"k").expect("get").is_none());
    assert!(store.get(Column::SubSsh, b"k").expect("get").is_some());
}

#[test]
fn prefix_scan_is_ordered_and_bounded() {
    let store = MemoryStore::new();
    store.put(Column::SubSsh, b"aa\x01", b"1").expect("put");
    store.put(Column::SubSsh, b"aa\x03", b"3").expect("put");
    store.put(Column::SubSsh, b"aa\x02", b"2").expect("put");
    store.put(Column::SubSsh, b"ab\x01", b"x").expect("put");

    let rows = store.scan_prefix(Column::SubSsh, b"aa").expect("scan");
    let keys: Vec<Vec<u8>> = rows.iter().map(|(key, _)| key.clone()).collect();
    assert_eq!(
        keys,
        vec![b"aa\x01".to_vec(), b"aa\x02".to_vec(), b"aa\x03".to_vec()]
    );
}

#[test]
fn batch_applies_atomically_in_order() {
    let store = MemoryStore::new();
    store.put(Column::Meta, b"stale", b"old").expect("put");

    let mut batch = WriteBatch::new();
    batch.put(Column::Meta, b"fresh", b"new");
    batch.delete(Column::Meta, b"stale");
    batch.put(Column::Meta, b"fresh", b"newer");
    assert!(batch.approx_bytes() > 0);
    store.write_batch(&batch).expect("commit");

    assert!(store.get(Column::Meta, b"stale").expect("get").is_none());
    assert_eq!(
        store.get(Column::Meta, b"fresh").expect("get"),
        Some(b"newer".to_vec())
    );
}

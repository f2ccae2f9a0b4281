use rankwise::{BlobStore, MemoryBlobStore, SqliteBlobStore};
use tempfile::tempdir;

#[tokio::test]
async fn sqlite_store_set_get_overwrite_delete() {
    let dir = tempdir().unwrap();
    let store = SqliteBlobStore::new(dir.path().join("store.sqlite")).unwrap();

    assert_eq!(store.get("missing").await.unwrap(), None);

    store.set("k", b"first").await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"first"[..]));

    store.set("k", b"second").await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"second"[..]));

    store.delete("k").await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("store.sqlite");
    {
        let store = SqliteBlobStore::new(&path).unwrap();
        store.set("session", b"{\"a\":1}").await.unwrap();
    }
    let reopened = SqliteBlobStore::new(&path).unwrap();
    assert_eq!(
        reopened.get("session").await.unwrap().as_deref(),
        Some(&b"{\"a\":1}"[..])
    );
    assert_eq!(reopened.path(), path.as_path());
}

#[tokio::test]
async fn sqlite_store_keys_match_prefix_literally() {
    let dir = tempdir().unwrap();
    let store = SqliteBlobStore::new(dir.path().join("store.sqlite")).unwrap();
    for key in ["list:b", "list:a", "list%x", "other:a"] {
        store.set(key, b"v").await.unwrap();
    }

    assert_eq!(store.keys("list:").await.unwrap(), vec!["list:a", "list:b"]);
    assert_eq!(store.keys("list%").await.unwrap(), vec!["list%x"]);
    assert_eq!(store.keys("").await.unwrap().len(), 4);
}

#[tokio::test]
async fn memory_store_behaves_like_sqlite_store() {
    let store = MemoryBlobStore::new();
    store.set("list:a", b"1").await.unwrap();
    store.set("list:b", b"2").await.unwrap();
    store.set("x", b"3").await.unwrap();

    assert_eq!(store.get("list:a").await.unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(store.keys("list:").await.unwrap(), vec!["list:a", "list:b"]);

    store.delete("list:a").await.unwrap();
    assert_eq!(store.get("list:a").await.unwrap(), None);
}

#[test]
fn store_lock_does_not_truncate_lockfile() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("store.sqlite");
    let store = SqliteBlobStore::new(&db_path).unwrap();

    let mut lock_path = db_path.clone();
    lock_path.set_extension("lock");
    std::fs::write(&lock_path, "keep").unwrap();

    let lock = store.lock_exclusive().unwrap();
    drop(lock);

    let contents = std::fs::read_to_string(&lock_path).unwrap();
    assert_eq!(contents, "keep");
}

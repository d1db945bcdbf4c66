use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;

use super::*;

const STREAM_TIMEOUT: Duration = Duration::from_secs(5);

async fn next_snapshot<T>(stream: &mut RecordStream<T>) -> T {
    timeout(STREAM_TIMEOUT, stream.next())
        .await
        .expect("stream timed out")
        .expect("stream ended")
        .expect("store error")
}

#[tokio::test]
async fn insert_with_existing_id_conflicts() {
    let store = MemoryForageableStore::new();
    let id = store
        .insert(&Forageable::new("Oak", "123 Main", true, ""))
        .await
        .expect("insert");

    let err = store
        .insert(&Forageable::new("Pine", "456 Elm", false, "").with_id(id))
        .await
        .expect_err("duplicate id");
    assert!(matches!(err, StoreError::Conflict(conflict) if conflict == id));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn generated_ids_skip_explicit_ones() {
    let store = MemoryForageableStore::new();
    store
        .insert(&Forageable::new("Oak", "123 Main", true, "").with_id(ForageableId(10)))
        .await
        .expect("explicit insert");
    let generated = store
        .insert(&Forageable::new("Pine", "456 Elm", false, ""))
        .await
        .expect("generated insert");
    assert_eq!(generated, ForageableId(11));
}

#[tokio::test]
async fn query_by_id_goes_quiet_after_delete() {
    let store = MemoryForageableStore::new();
    let id = store
        .insert(&Forageable::new("Ramps", "North Slope", true, ""))
        .await
        .expect("insert");

    let mut one = store.query_by_id(id);
    let found = next_snapshot(&mut one).await;
    assert_eq!(found.name, "Ramps");

    assert!(store.delete(&found).await.expect("delete"));
    assert!(
        timeout(Duration::from_millis(150), one.next()).await.is_err(),
        "deleted record must not emit"
    );
}

#[tokio::test]
async fn unrelated_writes_do_not_repeat_identical_snapshot() {
    let store = MemoryForageableStore::new();
    let id = store
        .insert(&Forageable::new("Ramps", "North Slope", true, ""))
        .await
        .expect("insert");

    let mut one = store.query_by_id(id);
    next_snapshot(&mut one).await;

    store
        .insert(&Forageable::new("Nettle", "Ditch", true, ""))
        .await
        .expect("unrelated insert");
    assert!(
        timeout(Duration::from_millis(150), one.next()).await.is_err(),
        "unchanged record must not re-emit"
    );
}

#[tokio::test]
async fn delete_of_unsaved_record_is_noop() {
    let store = MemoryForageableStore::new();
    let removed = store
        .delete(&Forageable::new("Oak", "123 Main", true, ""))
        .await
        .expect("delete");
    assert!(!removed);
    assert!(store.is_empty().await);
}

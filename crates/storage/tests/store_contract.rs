use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use shared::domain::Forageable;
use storage::{ForageableStore, MemoryForageableStore, RecordStream, SqliteForageableStore};
use tokio::time::timeout;

async fn wait_for<T>(stream: &mut RecordStream<T>, mut predicate: impl FnMut(&T) -> bool) -> T {
    loop {
        let snapshot = timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream timed out")
            .expect("stream ended")
            .expect("store error");
        if predicate(&snapshot) {
            return snapshot;
        }
    }
}

async fn exercise_crud(store: Arc<dyn ForageableStore>) {
    let mut all = store.query_all();
    wait_for(&mut all, |items| items.is_empty()).await;

    let oak = store
        .insert(&Forageable::new("Oak", "123 Main", true, ""))
        .await
        .expect("insert oak");
    let pine = store
        .insert(&Forageable::new("Pine", "456 Elm", false, "resin"))
        .await
        .expect("insert pine");
    wait_for(&mut all, |items| items.len() == 2).await;

    let mut watched = store.query_by_id(oak);
    store
        .update(&Forageable::new("Oak", "124 Main", false, "moved").with_id(oak))
        .await
        .expect("update oak");
    let updated = wait_for(&mut watched, |item| item.address == "124 Main").await;
    assert_eq!(updated.id, Some(oak));
    assert!(!updated.in_season);

    store
        .delete(&Forageable::new("Pine", "456 Elm", false, "resin").with_id(pine))
        .await
        .expect("delete pine");
    let remaining = wait_for(&mut all, |items| items.len() == 1).await;
    assert_eq!(remaining[0].id, Some(oak));
}

#[tokio::test]
async fn sqlite_store_honours_crud_contract() {
    let store = SqliteForageableStore::new("sqlite::memory:").await.expect("db");
    exercise_crud(Arc::new(store)).await;
}

#[tokio::test]
async fn memory_store_honours_crud_contract() {
    exercise_crud(Arc::new(MemoryForageableStore::new())).await;
}

#[tokio::test]
async fn query_streams_are_restartable() {
    let store = MemoryForageableStore::new();
    store
        .insert(&Forageable::new("Oak", "123 Main", true, ""))
        .await
        .expect("insert");

    let mut first = store.query_all();
    let first_snapshot = wait_for(&mut first, |_| true).await;
    drop(first);

    let mut second = store.query_all();
    let second_snapshot = wait_for(&mut second, |_| true).await;
    assert_eq!(first_snapshot, second_snapshot);
}

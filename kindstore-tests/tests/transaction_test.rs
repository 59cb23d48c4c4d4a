use kindstore_client::{ClientError, ReadOptions, TransactionOptions, TransactionState};
use kindstore_core::{Entity, Field, Schema, SharedEntity};
use kindstore_test_utils::*;
use serde_json::json;
use std::sync::Arc;

fn counter_schema() -> Arc<Schema> {
    Schema::builder("Counter")
        .field("count", Field::integer().with_default(0))
        .build()
        .unwrap()
}

fn counter(schema: &Arc<Schema>, id: i64, version: &str) -> SharedEntity {
    let entity = Entity::builder(schema).id(id).build(PROJECT).unwrap().into_shared();
    entity.lock().set_version(Some(version.to_string()));
    entity
}

#[tokio::test]
async fn test_successful_commit_confirms_without_rollback() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = counter_schema();
    let a = counter(&schema, 1, "1");

    let mut tx = client.begin_transaction(TransactionOptions::read_write()).await.unwrap();
    assert_eq!(tx.id(), "tx-1");
    a.lock().set("count", 5).unwrap();
    tx.update(&a);
    tx.commit().await.unwrap();

    assert_eq!(tx.state(), TransactionState::Confirmed);
    assert_eq!(mock.calls("rollback"), 0);
    assert!(!a.lock().has_backup());

    let body = &mock.bodies("commit")[0];
    assert_eq!(body["mode"], "TRANSACTIONAL");
    assert_eq!(body["transaction"], "tx-1");
    assert_eq!(mock.bodies("beginTransaction")[0]["transactionOptions"], json!({"readWrite": {}}));
}

#[tokio::test]
async fn test_conflict_rolls_back_once_and_restores_conflicted_entities() {
    init_tracing();
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = counter_schema();
    let (a, b, c) = (counter(&schema, 1, "10"), counter(&schema, 2, "20"), counter(&schema, 3, "30"));

    mock.script_ok(
        "commit",
        json!({"mutationResults": [
            {"version": "11"},
            {"version": "21", "conflictDetected": true},
            {"version": "31"},
        ]}),
    );

    let mut tx = client.begin_transaction(TransactionOptions::read_write()).await.unwrap();
    tx.update(&a);
    tx.update(&b);
    tx.update(&c);
    let err = tx.commit().await.unwrap_err();

    assert!(matches!(&err, ClientError::TransactionFailed { id } if id == "tx-1"));
    assert!(err.is_retryable());
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert_eq!(mock.calls("rollback"), 1);
    assert_eq!(mock.bodies("rollback")[0]["transaction"], "tx-1");

    assert_eq!(a.lock().version(), Some("11"));
    assert_eq!(b.lock().version(), Some("20"));
    assert_eq!(c.lock().version(), Some("31"));
    for entity in [&a, &b, &c] {
        assert!(!entity.lock().has_backup());
    }
}

#[tokio::test]
async fn test_conflict_returns_allocated_key_to_partial() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = counter_schema();
    let fresh = Entity::builder(&schema).build(PROJECT).unwrap().into_shared();

    mock.script_ok(
        "commit",
        json!({"mutationResults": [
            {"version": "1", "key": key_json("counter", 77), "conflictDetected": true},
        ]}),
    );

    let mut tx = client.begin_transaction(TransactionOptions::read_write()).await.unwrap();
    tx.insert(&fresh);
    assert!(tx.commit().await.is_err());

    let fresh = fresh.lock();
    assert!(fresh.key().is_partial());
    assert_eq!(fresh.version(), None);
}

#[tokio::test]
async fn test_read_only_transaction_never_commits() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = counter_schema();

    let mut tx = client.begin_transaction(TransactionOptions::read_only()).await.unwrap();
    tx.get(&schema, kindstore_core::Key::with_id(PROJECT, "counter", 1))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(tx.state(), TransactionState::Closed);
    assert_eq!(mock.calls("commit"), 0);
    assert_eq!(mock.calls("rollback"), 0);
    assert_eq!(mock.bodies("beginTransaction")[0]["transactionOptions"], json!({"readOnly": {}}));
    assert_eq!(mock.bodies("lookup")[0]["readOptions"], json!({"transaction": "tx-1"}));
}

#[tokio::test]
async fn test_commit_twice_is_rejected() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;

    let mut tx = client.begin_transaction(TransactionOptions::read_write()).await.unwrap();
    tx.commit().await.unwrap();
    assert!(tx.commit().await.is_err());
    assert!(tx.rollback().await.is_err());
}

#[tokio::test]
async fn test_explicit_rollback() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;

    let mut tx = client.begin_transaction(TransactionOptions::read_write()).await.unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert_eq!(mock.calls("rollback"), 1);
}

#[tokio::test]
async fn test_lock_queues_upsert_and_refuses_locked_entities() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = Schema::builder("Seat")
        .field("holder", Field::string())
        .locking()
        .build()
        .unwrap();
    let seat = Entity::builder(&schema).id(3).build(PROJECT).unwrap().into_shared();

    let mut tx = client.begin_transaction(TransactionOptions::read_write()).await.unwrap();
    tx.lock(&seat).unwrap();
    assert!(seat.lock().is_locked());
    assert_eq!(tx.mutations().sizes(), [0, 1, 0, 0]);

    let again = tx.lock(&seat).unwrap_err();
    assert_eq!(again.code(), "LOCKED");
    tx.commit().await.unwrap();

    let body = &mock.bodies("commit")[0];
    assert_eq!(body["mutations"][0]["upsert"]["properties"]["_locked"]["booleanValue"], true);
    // The mark stays until the caller unlocks
    assert!(seat.lock().is_locked());
    seat.lock().unlock().unwrap();
    assert!(!seat.lock().is_locked());
}

#[tokio::test]
async fn test_lock_requires_locking_schema() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = counter_schema();
    let plain = counter(&schema, 1, "1");

    let mut tx = client.begin_transaction(TransactionOptions::read_write()).await.unwrap();
    assert!(matches!(tx.lock(&plain), Err(ClientError::Core(_))));
    assert!(tx.mutations().is_empty());
}

#[tokio::test]
async fn test_transaction_reads_are_pinned() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = counter_schema();

    let tx = client.begin_transaction(TransactionOptions::read_write()).await.unwrap();
    tx.run_query(&kindstore_client::Query::new(&schema)).await.unwrap();
    assert_eq!(mock.bodies("runQuery")[0]["readOptions"], json!({"transaction": "tx-1"}));

    client.run_query(&kindstore_client::Query::new(&schema), ReadOptions::eventual()).await.unwrap();
    assert_eq!(mock.bodies("runQuery")[1]["readOptions"], json!({"readConsistency": "EVENTUAL"}));
}

#[tokio::test]
async fn test_conflict_restores_entity_queued_in_two_groups() -> TestResult {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = Schema::builder("Seat")
        .field("holder", Field::string())
        .locking()
        .build()?;
    let seat = Entity::builder(&schema).id(3).build(PROJECT)?.into_shared();
    seat.lock().set_version(Some("10".to_string()));

    // update is sent before upsert, so the lock write carries the conflict
    mock.script_ok(
        "commit",
        json!({"mutationResults": [
            {"version": "11"},
            {"version": "12", "conflictDetected": true},
        ]}),
    );

    let mut tx = client.begin_transaction(TransactionOptions::read_write()).await?;
    tx.update(&seat);
    tx.lock(&seat)?;
    assert!(tx.commit().await.is_err());

    let seat = seat.lock();
    assert_eq!(seat.version(), Some("10"));
    assert!(!seat.has_backup());
    assert!(!seat.is_locked());
    Ok(())
}

#[tokio::test]
async fn test_rollback_clears_lock_mark() -> TestResult {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = Schema::builder("Seat")
        .field("holder", Field::string())
        .locking()
        .build()?;
    let seat = Entity::builder(&schema).id(4).build(PROJECT)?.into_shared();

    let mut tx = client.begin_transaction(TransactionOptions::read_write()).await?;
    tx.lock(&seat)?;
    tx.rollback().await?;
    assert!(!seat.lock().is_locked());

    let mut again = client.begin_transaction(TransactionOptions::read_write()).await?;
    again.lock(&seat)?;
    again.commit().await?;
    assert!(seat.lock().is_locked());
    Ok(())
}

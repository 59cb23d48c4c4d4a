use kindstore_client::{ClientError, Operand};
use kindstore_core::{Entity, Field, Key, KeyId, Schema, SharedEntity};
use kindstore_test_utils::*;
use serde_json::json;
use std::sync::Arc;

fn account_schema() -> Arc<Schema> {
    Schema::builder("Account")
        .field("owner", Field::string().required())
        .field("balance", Field::integer().with_default(0))
        .build()
        .unwrap()
}

fn account(schema: &Arc<Schema>, id: i64, owner: &str) -> SharedEntity {
    Entity::builder(schema)
        .id(id)
        .value("owner", owner)
        .build(PROJECT)
        .unwrap()
        .into_shared()
}

#[tokio::test]
async fn test_batch_reports_conflicting_operand() {
    init_tracing();
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = account_schema();
    let (a, b, c) = (account(&schema, 1, "ann"), account(&schema, 2, "bob"), account(&schema, 3, "cy"));

    mock.script_ok(
        "commit",
        json!({"mutationResults": [
            {"version": "5"},
            {"version": "6", "conflictDetected": true},
            {"version": "7"},
        ]}),
    );

    let mut batch = client.batch();
    batch.upsert(&a).upsert(&b).upsert(&c);
    let conflicts = batch.commit().await.unwrap();

    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].is_entity(&b));
    assert_eq!(a.lock().version(), Some("5"));
    assert_eq!(c.lock().version(), Some("7"));
    // Non-transactional commits never snapshot
    assert!(!b.lock().has_backup());
}

#[tokio::test]
async fn test_commit_body_orders_groups_and_omits_transaction() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = account_schema();
    let (a, b) = (account(&schema, 1, "ann"), account(&schema, 2, "bob"));
    b.lock().set_version(Some("3".to_string()));

    let mut batch = client.batch();
    batch
        .delete(Key::with_name(PROJECT, "account", "gone"))
        .insert(&a)
        .update(&b);
    batch.commit().await.unwrap();

    let body = &mock.bodies("commit")[0];
    assert_eq!(body["mode"], "NON_TRANSACTIONAL");
    assert!(body.get("transaction").is_none());

    let mutations = body["mutations"].as_array().unwrap();
    assert_eq!(mutations.len(), 3);
    assert_eq!(mutations[0]["baseVersion"], "3");
    assert_eq!(mutations[0]["update"]["properties"]["owner"]["stringValue"], "bob");
    assert!(mutations[1].get("insert").is_some());
    assert!(mutations[1].get("baseVersion").is_none());
    assert_eq!(mutations[2]["delete"]["path"][0]["name"], "gone");
}

#[tokio::test]
async fn test_commit_completes_partial_keys() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = account_schema();
    let entity = Entity::builder(&schema)
        .value("owner", "dee")
        .build(PROJECT)
        .unwrap()
        .into_shared();
    assert!(entity.lock().key().is_partial());

    mock.script_ok(
        "commit",
        json!({"mutationResults": [{"version": "1", "key": key_json("account", 42)}]}),
    );
    let mut batch = client.batch();
    batch.insert(&entity);
    batch.commit().await.unwrap();

    let entity = entity.lock();
    assert_eq!(entity.key().id(), Some(&KeyId::Id(42)));
    assert_eq!(entity.version(), Some("1"));
}

#[tokio::test]
async fn test_result_count_mismatch_leaves_entities_untouched() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = account_schema();
    let (a, b) = (account(&schema, 1, "ann"), account(&schema, 2, "bob"));

    mock.script_ok("commit", json!({"mutationResults": [{"version": "9"}]}));
    let mut batch = client.batch();
    batch.upsert(&a).upsert(&b);
    let err = batch.commit().await.unwrap_err();

    assert!(matches!(err, ClientError::Protocol { .. }));
    assert_eq!(a.lock().version(), None);
    assert_eq!(b.lock().version(), None);
}

#[tokio::test]
async fn test_service_error_surfaces_as_protocol_error() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let schema = account_schema();

    mock.script(
        "commit",
        kindstore_client::HttpResponse::new(400, json!({"error": {"message": "bad entity"}})),
    );
    let mut batch = client.batch();
    batch.upsert(&account(&schema, 1, "ann"));

    match batch.commit().await {
        Err(ClientError::Protocol { endpoint, status, body }) => {
            assert_eq!(endpoint, "commit");
            assert_eq!(status, 400);
            assert!(body.contains("bad entity"));
        }
        other => panic!("expected protocol error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bare_key_conflicts_are_reported() {
    let mock = MockDatastore::new();
    let client = connected_client(&mock).await;
    let key = Key::with_id(PROJECT, "account", 8);

    mock.script_ok("commit", json!({"mutationResults": [{"conflictDetected": true}]}));
    let mut batch = client.batch();
    batch.delete(key.clone());
    let conflicts = batch.commit().await.unwrap();

    assert_eq!(conflicts.len(), 1);
    assert!(matches!(&conflicts[0], Operand::Key(k) if *k == key));
}

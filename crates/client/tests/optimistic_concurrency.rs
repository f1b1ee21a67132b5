//! End-to-end read-modify-write scenarios against the store backends.
//!
//! Two clients share one backend and race on the same key, the way two
//! processes would against a single store endpoint.

use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use vkv_client::chaos::{ChaosBackend, ChaosConfig};
use vkv_client::{
    BackendError, ConflictResolver, DurableBackend, FieldMap, FieldMerge, KvError,
    MemoryBackend, Occurred, Resolution, StoreBackend, StoreClient, VersionMarker, Versioned,
};
use vkv_storage::FsyncPolicy;

type Book = FieldMap<Value>;

fn book(fields: Value) -> Book {
    serde_json::from_value(fields).unwrap()
}

fn marker(entries: &[(&str, u64)]) -> VersionMarker {
    VersionMarker::from_map(entries.iter().map(|(k, v)| (k.to_string(), *v)).collect())
}

async fn seeded<B: StoreBackend>(client: &StoreClient<B>) {
    let m = client
        .put("k", &Versioned::new(book(json!({"title": "X"}))), "c1")
        .await
        .unwrap();
    assert_eq!(m, marker(&[("c1", 1)]));
}

// ────────────────────────── Scenario A ──────────────────────────

#[tokio::test]
async fn test_create_after_not_found() {
    let client = StoreClient::new(Arc::new(MemoryBackend::new()));

    let err = client.get::<Book>("k").await.unwrap_err();
    assert!(matches!(err, KvError::KeyNotFound(ref k) if k == "k"));

    seeded(&client).await;
    let read: Versioned<Book> = client.get("k").await.unwrap();
    assert_eq!(read.value(), &book(json!({"title": "X"})));
    assert_eq!(read.marker(), &marker(&[("c1", 1)]));
}

// ────────────────────────── Scenario B ──────────────────────────

#[tokio::test]
async fn test_second_reader_of_same_snapshot_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let reader1 = StoreClient::new(backend.clone());
    let reader2 = StoreClient::new(backend);
    seeded(&reader1).await;

    let mut first: Versioned<Book> = reader1.get("k").await.unwrap();
    let mut second: Versioned<Book> = reader2.get("k").await.unwrap();

    first.value_mut().insert("author".into(), json!("Y"));
    second.value_mut().insert("notes".into(), json!("Z"));

    let m = reader1.put("k", &first, "c1").await.unwrap();
    assert_eq!(m, marker(&[("c1", 2)]));

    let err = reader2.put("k", &second, "c2").await.unwrap_err();
    let stale = err.as_stale().expect("must be a stale write");
    assert_eq!(stale.ordering, Occurred::Before);
    assert_eq!(stale.local_marker, marker(&[("c1", 1)]));
    assert_eq!(stale.current_marker, marker(&[("c1", 2)]));

    // Both competing values travel with the rejection.
    let local: Versioned<Book> = stale.local().unwrap();
    let remote: Versioned<Book> = stale.remote().unwrap();
    assert_eq!(local.value().get("notes"), Some(&json!("Z")));
    assert_eq!(remote.value().get("author"), Some(&json!("Y")));

    // The committed value is reader 1's, untouched.
    let now: Versioned<Book> = reader1.get("k").await.unwrap();
    assert_eq!(now.value(), &book(json!({"title": "X", "author": "Y"})));
}

#[tokio::test]
async fn test_same_writer_cannot_commit_twice_from_one_base() {
    let client = StoreClient::new(Arc::new(MemoryBackend::new()));
    seeded(&client).await;
    let snapshot: Versioned<Book> = client.get("k").await.unwrap();

    // Both attempts would be issued the same marker {c1:2}.
    assert_eq!(snapshot.marker().next("c1"), snapshot.marker().next("c1"));

    client.put("k", &snapshot, "c1").await.unwrap();
    let err = client.put("k", &snapshot, "c1").await.unwrap_err();
    assert!(err.as_stale().is_some());
}

#[tokio::test]
async fn test_racing_writers_exactly_one_wins() {
    let backend = Arc::new(MemoryBackend::new());
    let client = StoreClient::new(backend);
    seeded(&client).await;
    let snapshot: Versioned<Book> = client.get("k").await.unwrap();

    let attempts = (0..16).map(|i| {
        let client = client.clone();
        let attempt = snapshot.clone().map(|mut b| {
            b.insert("edit".into(), json!(i));
            b
        });
        tokio::spawn(async move { client.put("k", &attempt, &format!("w{}", i)).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one writer may commit from a shared base");
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.as_stale().is_some()));

    let final_marker = client.get::<Book>("k").await.unwrap().marker().clone();
    assert!(final_marker.dominates(snapshot.marker()));
}

// ────────────────────────── Scenario C / D ──────────────────────────

#[tokio::test]
async fn test_disjoint_edits_merge_and_retry() {
    let backend = Arc::new(MemoryBackend::new());
    let c1 = StoreClient::new(backend.clone());
    let c2 = StoreClient::new(backend);
    seeded(&c1).await;

    let ancestor: Versioned<Book> = c1.get("k").await.unwrap();
    let mut with_author = ancestor.clone();
    with_author.value_mut().insert("author".into(), json!("Y"));
    let mut with_year = ancestor.clone();
    with_year.value_mut().insert("year".into(), json!(2001));

    c1.put("k", &with_author, "c1").await.unwrap();
    let stale = c2
        .put("k", &with_year, "c2")
        .await
        .unwrap_err()
        .into_stale()
        .unwrap();

    let resolver = FieldMerge::with_ancestor(ancestor.value().clone());
    let merged = match resolver.resolve_stale(&stale).unwrap() {
        Resolution::Merged { versioned, .. } => versioned,
        other => panic!("disjoint edits must merge, got {:?}", other),
    };
    assert_eq!(
        merged.value(),
        &book(json!({"title": "X", "author": "Y", "year": 2001}))
    );
    assert_eq!(merged.marker(), &marker(&[("c1", 2)]));

    let m = c2.put("k", &merged, "c2").await.unwrap();
    assert_eq!(m, marker(&[("c1", 2), ("c2", 1)]));
    let stored: Versioned<Book> = c1.get("k").await.unwrap();
    assert_eq!(stored.value(), merged.value());
}

#[tokio::test]
async fn test_same_field_edits_stay_unresolved() {
    let backend = Arc::new(MemoryBackend::new());
    let c1 = StoreClient::new(backend.clone());
    let c2 = StoreClient::new(backend);
    seeded(&c1).await;

    let ancestor: Versioned<Book> = c1.get("k").await.unwrap();
    let a = ancestor.clone().map(|mut b| {
        b.insert("title".into(), json!("Harry Potter and the Philosopher's Stone"));
        b
    });
    let b = ancestor.clone().map(|mut b| {
        b.insert("title".into(), json!("Potter 1"));
        b
    });

    c1.put("k", &a, "c1").await.unwrap();
    let err = c2.put("k", &b, "c2").await.unwrap_err();
    let stale = err.as_stale().unwrap();

    match FieldMerge::<Value>::new().resolve_stale(stale).unwrap() {
        Resolution::Unresolved { conflicting, .. } => {
            assert_eq!(conflicting, vec!["title".to_string()]);
        }
        other => panic!("same-field edits must not merge, got {:?}", other),
    }
}

#[tokio::test]
async fn test_committed_removal_is_not_resurrected() {
    let backend = Arc::new(MemoryBackend::new());
    let c1 = StoreClient::new(backend.clone());
    let c2 = StoreClient::new(backend);
    c1.put(
        "k",
        &Versioned::new(book(json!({"title": "X", "notes": "draft"}))),
        "c1",
    )
    .await
    .unwrap();

    let ancestor: Versioned<Book> = c1.get("k").await.unwrap();
    let without_notes = ancestor.clone().map(|mut b| {
        b.remove("notes");
        b
    });
    let with_author = ancestor.clone().map(|mut b| {
        b.insert("author".into(), json!("Y"));
        b
    });

    c1.put("k", &without_notes, "c1").await.unwrap();
    let err = c2.put("k", &with_author, "c2").await.unwrap_err();
    let stale = err.as_stale().unwrap();

    // Without the ancestor the removal looks like an addition on c2's side.
    match FieldMerge::<Value>::new().resolve_stale(stale).unwrap() {
        Resolution::Unresolved { conflicting, .. } => {
            assert_eq!(conflicting, vec!["author".to_string(), "notes".to_string()]);
        }
        other => panic!("one-sided fields must not merge without an ancestor, got {:?}", other),
    }

    let merged = match FieldMerge::with_ancestor(ancestor.into_value())
        .resolve_stale(stale)
        .unwrap()
    {
        Resolution::Merged { versioned, .. } => versioned,
        other => panic!("removal vs addition must merge, got {:?}", other),
    };
    c2.put("k", &merged, "c2").await.unwrap();

    let stored: Versioned<Book> = c1.get("k").await.unwrap();
    assert_eq!(stored.value(), &book(json!({"title": "X", "author": "Y"})));
}

// ────────────────────────── Durable backend ──────────────────────────

#[tokio::test]
async fn test_durable_history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let backend = Arc::new(DurableBackend::open(dir.path(), FsyncPolicy::Always).unwrap());
        let client = StoreClient::new(backend);
        seeded(&client).await;
        let mut v: Versioned<Book> = client.get("k").await.unwrap();
        v.value_mut().insert("author".into(), json!("Y"));
        client.put("k", &v, "c1").await.unwrap();
    }

    let backend = Arc::new(DurableBackend::open(dir.path(), FsyncPolicy::Always).unwrap());
    let client = StoreClient::new(backend);
    let v: Versioned<Book> = client.get("k").await.unwrap();
    assert_eq!(v.marker(), &marker(&[("c1", 2)]));

    // A marker from before the restart is still recognised as stale.
    let old = Versioned::wrap(book(json!({"title": "old"})), marker(&[("c1", 1)]));
    assert!(client.put("k", &old, "c2").await.unwrap_err().as_stale().is_some());
}

// ────────────────────────── Collaborator failures ──────────────────────────

#[tokio::test]
async fn test_backend_outage_is_propagated() {
    let chaos = Arc::new(ChaosBackend::new(MemoryBackend::new(), ChaosConfig::default()));
    let client = StoreClient::new(chaos.clone());
    seeded(&client).await;

    chaos.set_unavailable(true).await;
    assert!(matches!(
        client.get::<Book>("k").await,
        Err(KvError::Backend(BackendError::Unavailable(_)))
    ));
    let v = Versioned::wrap(book(json!({"title": "Y"})), marker(&[("c1", 1)]));
    assert!(matches!(
        client.put("k", &v, "c1").await,
        Err(KvError::Backend(_))
    ));
}

#[tokio::test]
async fn test_lost_ack_is_not_masked() {
    let chaos = Arc::new(ChaosBackend::new(MemoryBackend::new(), ChaosConfig::default()));
    let client = StoreClient::new(chaos.clone());
    seeded(&client).await;
    let v: Versioned<Book> = client.get("k").await.unwrap();
    let edited = v.map(|mut b| {
        b.insert("author".into(), json!("Y"));
        b
    });

    chaos.set_drop_acks(true).await;
    let err = client.put("k", &edited, "c1").await.unwrap_err();
    assert!(matches!(err, KvError::Backend(BackendError::Timeout)));

    // The write did commit; a blind retry with the same marker is stale.
    chaos.set_drop_acks(false).await;
    let now: Versioned<Book> = client.get("k").await.unwrap();
    assert_eq!(now.marker(), &marker(&[("c1", 2)]));
    assert!(client.put("k", &edited, "c1").await.unwrap_err().as_stale().is_some());
}

//! End-to-end scenarios across the full stack

use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use themisdb::{
    ChunkSpec, ContentSpec, Database, DatabaseConfig, Entity, Error, EventType, FusionMode,
    FusionRequest, IsolationLevel, ListOptions, Model, TieBreak, TypedValue, VectorConfig,
};

fn account(pk: &str, balance: i64) -> Entity {
    let mut e = Entity::new(pk);
    e.set_field("balance", TypedValue::Int64(balance));
    e
}

fn balance_of(db: &Database, pk: &str) -> i64 {
    let row = db
        .get_entity(Model::Relational, "accounts", pk)
        .unwrap()
        .unwrap();
    match row.field("balance") {
        Some(TypedValue::Int64(b)) => *b,
        other => panic!("unexpected balance {other:?}"),
    }
}

#[test]
fn money_transfer_is_atomic_and_logged() {
    let db = Database::open().unwrap();

    // Seed both accounts in one transaction.
    let tx = db.begin(Some(IsolationLevel::Snapshot), None);
    db.transactions()
        .with_txn(tx, |txn| {
            txn.put_entity(Model::Relational, "accounts", &account("acc-1", 1000))?;
            txn.put_entity(Model::Relational, "accounts", &account("acc-2", 500))
        })
        .unwrap();
    db.commit(tx).unwrap();

    // Transfer 100 from acc-1 to acc-2.
    let tx = db.begin(Some(IsolationLevel::Snapshot), None);
    db.transactions()
        .with_txn(tx, |txn| {
            let a = txn.get_entity(Model::Relational, "accounts", "acc-1")?.unwrap();
            let b = txn.get_entity(Model::Relational, "accounts", "acc-2")?.unwrap();
            let a_balance = match a.field("balance") {
                Some(TypedValue::Int64(v)) => *v,
                _ => unreachable!(),
            };
            let b_balance = match b.field("balance") {
                Some(TypedValue::Int64(v)) => *v,
                _ => unreachable!(),
            };
            txn.put_entity(Model::Relational, "accounts", &account("acc-1", a_balance - 100))?;
            txn.put_entity(Model::Relational, "accounts", &account("acc-2", b_balance + 100))
        })
        .unwrap();
    db.commit(tx).unwrap();

    assert_eq!(balance_of(&db, "acc-1"), 900);
    assert_eq!(balance_of(&db, "acc-2"), 600);

    // Changefeed: two PUTs + commit, then two PUTs + commit, in order.
    let events = db.changefeed_list(&ListOptions::default()).unwrap();
    let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            EventType::Put,
            EventType::Put,
            EventType::TxCommit,
            EventType::Put,
            EventType::Put,
            EventType::TxCommit,
        ]
    );
    let seqs: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(events[3].key, "relational:accounts:acc-1");
    assert_eq!(events[4].key, "relational:accounts:acc-2");
}

#[test]
fn conflicting_writer_aborts_and_retries() {
    let db = Database::open().unwrap();
    db.put_entity(Model::Relational, "accounts", &account("acc-1", 1000))
        .unwrap();

    // Two snapshot transactions read the same balance and both write.
    let t1 = db.begin(Some(IsolationLevel::Snapshot), None);
    let t2 = db.begin(Some(IsolationLevel::Snapshot), None);
    for tx in [t1, t2] {
        db.transactions()
            .with_txn(tx, |txn| {
                let row = txn.get_entity(Model::Relational, "accounts", "acc-1")?.unwrap();
                let balance = match row.field("balance") {
                    Some(TypedValue::Int64(v)) => *v,
                    _ => unreachable!(),
                };
                txn.put_entity(Model::Relational, "accounts", &account("acc-1", balance - 10))
            })
            .unwrap();
    }

    db.commit(t1).unwrap();
    let err = db.commit(t2).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(err.is_retriable());

    // Retry on a fresh snapshot observes the first writer's result.
    let t3 = db.begin(Some(IsolationLevel::Snapshot), None);
    db.transactions()
        .with_txn(t3, |txn| {
            let row = txn.get_entity(Model::Relational, "accounts", "acc-1")?.unwrap();
            let balance = match row.field("balance") {
                Some(TypedValue::Int64(v)) => *v,
                _ => unreachable!(),
            };
            assert_eq!(balance, 990);
            txn.put_entity(Model::Relational, "accounts", &account("acc-1", balance - 10))
        })
        .unwrap();
    db.commit(t3).unwrap();
    assert_eq!(balance_of(&db, "acc-1"), 980);
}

#[test]
fn vector_namespace_survives_save_and_load() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        vector_save_path: Some(dir.path().to_path_buf()),
        ..Default::default()
    };

    {
        let db = Database::open_with(config.clone()).unwrap();
        db.init_vector_namespace("v", VectorConfig::new(4)).unwrap();
        db.vectors().add("v", "p1", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        db.vectors().save("v").unwrap();
    }

    // Fresh process: load from the artifacts.
    let db = Database::open_with(config).unwrap();
    db.init_vector_namespace("v", VectorConfig::new(4)).unwrap();
    let hits = db.vector_search("v", &[1.0, 0.0, 0.0, 0.0], 1, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].pk, "p1");
    assert!(hits[0].distance.abs() < 1e-6);

    // A mismatched dimension is refused against the persisted state.
    let db2 = Database::open_with(DatabaseConfig {
        vector_save_path: Some(dir.path().to_path_buf()),
        ..Default::default()
    })
    .unwrap();
    let err = db2
        .init_vector_namespace("v", VectorConfig::new(8))
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));
}

#[test]
fn content_dedup_stores_one_blob() {
    let db = Database::open().unwrap();
    let blob = "the same bytes either way".as_bytes();

    let first = db
        .import_content(
            &ContentSpec {
                id: Some("x".to_string()),
                mime_type: "text/plain".to_string(),
                ..Default::default()
            },
            blob,
        )
        .unwrap();
    let second = db
        .import_content(
            &ContentSpec {
                id: Some("y".to_string()),
                mime_type: "text/plain".to_string(),
                ..Default::default()
            },
            blob,
        )
        .unwrap();

    assert_eq!(first.id, "x");
    assert_eq!(second.id, "x", "second import must return the existing id");
    assert!(second.deduplicated);
    assert!(db.get_content_meta("y").is_err());
    assert_eq!(db.get_content_blob("x").unwrap(), blob);
}

#[test]
fn content_chunks_feed_vector_search() {
    let db = Database::open().unwrap();
    let spec = ContentSpec {
        id: Some("doc".to_string()),
        mime_type: "text/markdown".to_string(),
        chunks: Some(vec![
            ChunkSpec {
                text: "vector databases store embeddings".to_string(),
                chunk_type: "text".to_string(),
                embedding: Some(vec![1.0, 0.0, 0.0]),
            },
            ChunkSpec {
                text: "graphs store relationships".to_string(),
                chunk_type: "text".to_string(),
                embedding: Some(vec![0.0, 1.0, 0.0]),
            },
        ]),
        ..Default::default()
    };
    db.import_content(&spec, b"whole document").unwrap();

    let hits = db.vector_search("chunks", &[0.9, 0.1, 0.0], 1, None).unwrap();
    assert_eq!(hits[0].pk, "doc-0");

    db.delete_content("doc").unwrap();
    assert!(db.vector_search("chunks", &[0.9, 0.1, 0.0], 1, None).unwrap().is_empty());
}

#[test]
fn rrf_fusion_reference_case_is_deterministic() {
    let db = Database::open().unwrap();
    let req = FusionRequest {
        text: vec![
            ("A".to_string(), 3.0),
            ("B".to_string(), 2.0),
            ("C".to_string(), 1.0),
        ],
        vector: vec![
            ("C".to_string(), 0.1),
            ("B".to_string(), 0.2),
            ("D".to_string(), 0.3),
        ],
        mode: FusionMode::Rrf { k: 60.0 },
        tie_break: TieBreak::Pk,
        epsilon: None,
        k: 4,
    };

    let hits = db.fusion_search(&req).unwrap();
    let order: Vec<&str> = hits.iter().map(|h| h.pk.as_str()).collect();
    assert_eq!(order, vec!["B", "C", "A", "D"]);

    // Byte-identical on repetition.
    for _ in 0..5 {
        let again = db.fusion_search(&req).unwrap();
        assert_eq!(again, hits);
    }
}

#[test]
fn fusion_requires_some_input() {
    let db = Database::open().unwrap();
    let err = db.fusion_search(&FusionRequest::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn changefeed_long_poll_timeout_and_wakeup() {
    let db = Arc::new(Database::open().unwrap());

    // No writes: returns empty after roughly the timeout.
    let start = Instant::now();
    let events = db
        .changefeed_list(&ListOptions {
            long_poll_ms: 300,
            ..Default::default()
        })
        .unwrap();
    assert!(events.is_empty());
    assert!(start.elapsed() >= Duration::from_millis(250));

    // A concurrent write wakes the poller well before the timeout.
    let tail = db.clone();
    let poller = std::thread::spawn(move || {
        let start = Instant::now();
        let events = tail
            .changefeed_list(&ListOptions {
                long_poll_ms: 5000,
                ..Default::default()
            })
            .unwrap();
        (events, start.elapsed())
    });

    std::thread::sleep(Duration::from_millis(100));
    db.put_entity(Model::Relational, "accounts", &account("acc-1", 1)).unwrap();

    let (events, waited) = poller.join().unwrap();
    assert!(!events.is_empty());
    assert!(waited < Duration::from_millis(3000), "woke after {waited:?}");
}

#[test]
fn hybrid_search_expands_over_graph() {
    let db = Database::open().unwrap();
    db.init_vector_namespace("chunks", VectorConfig::new(2)).unwrap();
    db.vectors().add("chunks", "seed", vec![1.0, 0.0]).unwrap();

    let tx = db.begin(None, None);
    db.transactions()
        .with_txn(tx, |txn| {
            txn.add_edge(&themisdb::Edge {
                edge_pk: "rel-1".to_string(),
                from_pk: "seed".to_string(),
                to_pk: "neighbor".to_string(),
                weight: 1.0,
                fields: Default::default(),
            })
        })
        .unwrap();
    db.commit(tx).unwrap();

    let mut req = themisdb::HybridRequest::new("chunks", vec![1.0, 0.0], 5);
    req.expand_hops = 1;
    let hits = db.hybrid_search(&req).unwrap();
    let pks: Vec<&str> = hits.iter().map(|h| h.pk.as_str()).collect();
    assert_eq!(pks, vec!["seed", "neighbor"]);
}

//! Memory manager behavior: store/read/update/forget, sessions,
//! queries, statistics, and recovery semantics.

use memora::{
    Confidence, Database, DatabaseConfig, EdgeKind, Importance, MemoraError, MemoryOptions,
    MemoryQuery, MemorySource, MemoryType,
};
use tempfile::TempDir;

fn open(dir: &TempDir) -> Database {
    Database::open(DatabaseConfig::new(dir.path())).unwrap()
}

// ==================== Store / read ====================

#[test]
fn store_and_read_back() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    let id = db
        .store_memory(
            MemoryType::Preference,
            "User prefers concise answers",
            MemoryOptions::default()
                .confidence(Confidence::High)
                .importance(Importance::High)
                .source(MemorySource::User),
        )
        .unwrap();
    assert_eq!(id, 1);

    let memory = db.get_memory(id).unwrap();
    assert_eq!(memory.memory_type, MemoryType::Preference);
    assert_eq!(memory.confidence, Confidence::High);
    assert_eq!(memory.importance, Importance::High);
    assert_eq!(memory.content, "User prefers concise answers");
    assert!(memory.embedding.is_some());
}

#[test]
fn empty_content_rejected() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    assert!(matches!(
        db.store_memory(MemoryType::Fact, "", MemoryOptions::default()),
        Err(MemoraError::EmptyContent)
    ));
}

#[test]
fn embedding_skipped_on_request() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    let id = db
        .store_memory(
            MemoryType::Fact,
            "no embedding please",
            MemoryOptions::default().create_embedding(false),
        )
        .unwrap();
    assert!(db.get_memory(id).unwrap().embedding.is_none());
    assert_eq!(db.get_stats().vector_count, 0);
}

#[test]
fn unknown_memory_reads_none() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    assert!(db.get_memory(12345).is_none());
}

// ==================== Store -> snapshot -> restart (S3) ====================

#[test]
fn memory_survives_snapshot_and_restart() {
    let dir = TempDir::new().unwrap();
    {
        let mut db = open(&dir);
        let id = db
            .store_memory(
                MemoryType::Preference,
                "User prefers concise answers",
                MemoryOptions::default()
                    .confidence(Confidence::High)
                    .importance(Importance::High),
            )
            .unwrap();
        assert_eq!(id, 1);
        db.create_snapshot().unwrap();
        // Process "killed" here: drop without a clean close.
    }

    let db = open(&dir);
    let memory = db.get_memory(1).unwrap();
    assert_eq!(memory.content, "User prefers concise answers");
    assert_eq!(memory.memory_type, MemoryType::Preference);
    assert_eq!(memory.confidence, Confidence::High);
    assert_eq!(memory.importance, Importance::High);
    let embedding = memory.embedding.unwrap();
    assert!(embedding.iter().any(|&d| d != 0.0));
    assert_eq!(db.next_memory_id(), 2);
}

#[test]
fn memory_survives_restart_without_snapshot() {
    let dir = TempDir::new().unwrap();
    {
        let mut db = open(&dir);
        db.store_memory(MemoryType::Fact, "log-only fact", MemoryOptions::default())
            .unwrap();
    }
    let db = open(&dir);
    assert_eq!(db.get_memory(1).unwrap().content, "log-only fact");
}

// ==================== Forget (S4) ====================

#[test]
fn forget_is_durable_and_yields_no_placeholder() {
    let dir = TempDir::new().unwrap();
    {
        let mut db = open(&dir);
        let id = db
            .store_memory(MemoryType::Fact, "X", MemoryOptions::default())
            .unwrap();
        db.forget_memory(id).unwrap();
        assert!(db.get_memory(id).is_none());
    }

    let db = open(&dir);
    assert!(db.get_memory(1).is_none());
    // The node and its edges remain in the graph.
    assert_eq!(db.get_stats().node_count, 1);
    // The id stays reserved.
    assert_eq!(db.next_memory_id(), 2);
}

#[test]
fn forget_unknown_is_not_found() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    assert!(matches!(
        db.forget_memory(9),
        Err(MemoraError::MemoryNotFound(9))
    ));
}

#[test]
fn forget_survives_snapshot_cycle() {
    let dir = TempDir::new().unwrap();
    {
        let mut db = open(&dir);
        let id = db
            .store_memory(MemoryType::Fact, "to be forgotten", MemoryOptions::default())
            .unwrap();
        db.create_snapshot().unwrap();
        db.forget_memory(id).unwrap();
    }
    // The snapshot still holds the blob, but the tail tombstone wins.
    let db = open(&dir);
    assert!(db.get_memory(1).is_none());
}

// ==================== Update ====================

#[test]
fn update_replaces_content_and_embedding() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    let id = db
        .store_memory(MemoryType::Fact, "first draft", MemoryOptions::default())
        .unwrap();
    let first_embedding = db.get_memory(id).unwrap().embedding.unwrap();

    db.update_memory(id, "second draft").unwrap();
    let memory = db.get_memory(id).unwrap();
    assert_eq!(memory.content, "second draft");
    assert_ne!(memory.embedding.unwrap(), first_embedding);

    // Update survives restart.
    drop(db);
    let db = open(&dir);
    assert_eq!(db.get_memory(id).unwrap().content, "second draft");
}

#[test]
fn update_unknown_is_not_found() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    assert!(matches!(
        db.update_memory(5, "nope"),
        Err(MemoraError::MemoryNotFound(5))
    ));
}

// ==================== Sessions ====================

#[test]
fn sessions_track_interactions() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    let session = db.create_session("alice", "planning chat", "quarterly planning");
    assert_eq!(db.get_current_session().unwrap().session_id, session);

    db.store_memory(
        MemoryType::Experience,
        "discussed roadmap",
        MemoryOptions::default().session_id(session),
    )
    .unwrap();
    db.store_memory(
        MemoryType::Fact,
        "deadline is friday",
        MemoryOptions::default().session_id(session),
    )
    .unwrap();

    let state = db.get_session(session).unwrap();
    assert_eq!(state.interaction_count, 2);
    assert!(state.is_active);
    assert!(state.last_active >= state.created_at);
}

#[test]
fn current_session_is_default_for_stores() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    let session = db.create_session("bob", "chat", "");
    let id = db
        .store_memory(MemoryType::Fact, "implicit session", MemoryOptions::default())
        .unwrap();
    assert_eq!(db.get_memory(id).unwrap().session_id, Some(session));
    assert_eq!(db.get_session(session).unwrap().interaction_count, 1);
}

#[test]
fn set_current_session_validates() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    assert!(matches!(
        db.set_current_session(3),
        Err(MemoraError::SessionNotFound(3))
    ));
    let first = db.create_session("a", "one", "");
    let second = db.create_session("a", "two", "");
    assert_eq!(db.get_current_session().unwrap().session_id, second);
    db.set_current_session(first).unwrap();
    assert_eq!(db.get_current_session().unwrap().session_id, first);
}

// ==================== Query pipeline ====================

fn seed_memories(db: &mut Database) -> (u64, u64, u64) {
    let session = db.create_session("carol", "notes", "");
    let a = db
        .store_memory(
            MemoryType::Preference,
            "prefers dark roast coffee",
            MemoryOptions::default()
                .confidence(Confidence::High)
                .importance(Importance::Medium)
                .user_id("carol"),
        )
        .unwrap();
    let b = db
        .store_memory(
            MemoryType::Fact,
            "lives in lisbon",
            MemoryOptions::default()
                .confidence(Confidence::Certain)
                .importance(Importance::High)
                .session_id(session)
                .user_id("carol"),
        )
        .unwrap();
    let c = db
        .store_memory(
            MemoryType::Context,
            "currently traveling",
            MemoryOptions::default()
                .confidence(Confidence::Low)
                .importance(Importance::Low)
                .user_id("dave"),
        )
        .unwrap();
    (a, b, c)
}

#[test]
fn filters_apply_in_order() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    let (a, b, c) = seed_memories(&mut db);

    let result = db
        .query_memories(&MemoryQuery {
            memory_types: Some(vec![MemoryType::Preference, MemoryType::Fact]),
            ..MemoryQuery::default()
        })
        .unwrap();
    let ids: Vec<u64> = result.memories.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![a, b]);
    assert!(result.similarity_scores.is_empty());

    let result = db
        .query_memories(&MemoryQuery {
            min_confidence: Some(Confidence::High),
            ..MemoryQuery::default()
        })
        .unwrap();
    let ids: Vec<u64> = result.memories.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![a, b]);

    let result = db
        .query_memories(&MemoryQuery {
            user_id: Some("dave".to_string()),
            ..MemoryQuery::default()
        })
        .unwrap();
    let ids: Vec<u64> = result.memories.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![c]);

    let result = db
        .query_memories(&MemoryQuery {
            min_importance: Some(Importance::High),
            ..MemoryQuery::default()
        })
        .unwrap();
    let ids: Vec<u64> = result.memories.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![b]);
}

#[test]
fn session_filter_applies() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    let (_, b, _) = seed_memories(&mut db);
    let session = db.get_memory(b).unwrap().session_id.unwrap();

    let result = db
        .query_memories(&MemoryQuery {
            session_id: Some(session),
            ..MemoryQuery::default()
        })
        .unwrap();
    let ids: Vec<u64> = result.memories.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![b]);
}

#[test]
fn text_query_ranks_exact_content_first() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    let (a, _, _) = seed_memories(&mut db);

    // The deterministic embedder maps identical text to the identical
    // point, so the exact content is the closest match.
    let result = db
        .query_memories(&MemoryQuery::text("prefers dark roast coffee"))
        .unwrap();
    assert!(!result.memories.is_empty());
    assert_eq!(result.memories[0].id, a);
    assert_eq!(result.similarity_scores.len(), result.memories.len());
    assert!((result.similarity_scores[0] - 1.0).abs() < 1e-5);
    assert!(result.execution_time_ms >= 0.0);
}

#[test]
fn limit_truncates_results() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    seed_memories(&mut db);
    let result = db
        .query_memories(&MemoryQuery {
            limit: 2,
            ..MemoryQuery::default()
        })
        .unwrap();
    assert_eq!(result.memories.len(), 2);
}

#[test]
fn related_memories_attached() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    let (a, b, _) = seed_memories(&mut db);
    db.create_relationship(a, b, EdgeKind::Related).unwrap();

    let result = db
        .query_memories(&MemoryQuery {
            memory_types: Some(vec![MemoryType::Preference]),
            include_related: true,
            max_depth: 1,
            ..MemoryQuery::default()
        })
        .unwrap();
    assert_eq!(result.related_memories.get(&a), Some(&vec![b]));
    assert_eq!(result.relationships.len(), 1);
    assert_eq!(result.relationships[0].to, b);
}

// ==================== Concepts & statistics ====================

#[test]
fn concepts_live_in_reserved_partition() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    let concept = db.create_concept("coffee").unwrap();
    assert!(memora::is_concept_id(concept));

    let memory = db
        .store_memory(MemoryType::Preference, "espresso only", MemoryOptions::default())
        .unwrap();
    db.create_relationship(memory, concept, EdgeKind::ChildOf)
        .unwrap();

    let related = db.query_related(memory, 1).unwrap();
    assert!(related.iter().any(|n| n.id == concept));

    let stats = db.get_statistics();
    assert_eq!(stats.concept_node_count, 1);
}

#[test]
fn statistics_count_by_type_and_confidence() {
    let dir = TempDir::new().unwrap();
    let mut db = open(&dir);
    seed_memories(&mut db);

    let stats = db.get_statistics();
    assert_eq!(stats.total_memories, 3);
    assert_eq!(stats.by_type.get(&MemoryType::Fact), Some(&1));
    assert_eq!(stats.by_type.get(&MemoryType::Preference), Some(&1));
    assert_eq!(stats.by_confidence.get(&Confidence::Certain), Some(&1));
    assert_eq!(stats.session_count, 1);
    assert_eq!(stats.active_session_count, 1);
    assert_eq!(stats.content_cache_size, 3);
    assert_eq!(stats.embedding_cache_size, 3);
}

// ==================== Orphan content recovery ====================

#[test]
fn orphan_content_files_load_on_recovery() {
    let dir = TempDir::new().unwrap();
    {
        let mut db = open(&dir);
        db.store_memory(MemoryType::Fact, "committed fact", MemoryOptions::default())
            .unwrap();
        db.create_snapshot().unwrap();
    }

    // Simulate a snapshot that crashed after writing its content batch
    // but before the manifest rename: an unreferenced .json batch.
    let orphan = serde_json::json!([{ "memory_id": 40, "content": "orphaned insight" }]);
    std::fs::write(
        dir.path().join("memory_contents/11111111-2222-3333-4444-555555555555.json"),
        serde_json::to_vec(&orphan).unwrap(),
    )
    .unwrap();

    let db = open(&dir);
    let recovered = db.get_memory(40).unwrap();
    assert_eq!(recovered.content, "orphaned insight");
    // Recovered with default metadata, embedding recreated.
    assert_eq!(recovered.memory_type, MemoryType::Context);
    assert!(recovered.embedding.is_some());
    // next id moves past the orphan.
    assert_eq!(db.next_memory_id(), 41);
}

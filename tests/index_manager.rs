use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use docvec::{
    Embedder,
    Error,
    HashEmbedder,
    IndexManager,
    IndexOptions,
    IndexStats,
    Result,
    StateFiles,
    chunking::ChunkingConfig,
    registry::DocumentState,
};

const DIM: usize = 64;

fn options(chunk_size: usize, overlap: usize) -> IndexOptions {
    IndexOptions {
        chunking: ChunkingConfig::new(chunk_size, overlap).unwrap(),
        dimension: DIM,
        batch_size: 4,
    }
}

fn hash() -> Arc<dyn Embedder> {
    Arc::new(HashEmbedder::new(DIM))
}

/// Wraps the hashing embedder and fails while `down` is set.
struct Flaky {
    inner: HashEmbedder,
    down: AtomicBool,
}

impl Flaky {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HashEmbedder::new(DIM),
            down: AtomicBool::new(false),
        })
    }
}

impl Embedder for Flaky {
    fn model_name(&self) -> &str {
        "flaky"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingUnavailable("service down".into()));
        }
        self.inner.embed(texts)
    }
}

/// Claims one dimension and returns another.
struct WrongSize;

impl Embedder for WrongSize {
    fn model_name(&self) -> &str {
        "wrong-size"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(vec![vec![0.5; DIM + 1]; texts.len()])
    }
}

#[test]
fn greek_scenario() {
    let manager = IndexManager::in_memory(options(3, 1), hash()).unwrap();

    let outcome = manager
        .ingest("alpha beta gamma delta epsilon", "greek.txt")
        .unwrap();
    assert_eq!(outcome.chunk_count, 2);

    let chunks = manager.document_chunks(&outcome.document_id);
    assert_eq!(
        chunks,
        [
            (0, "alpha beta gamma".to_string()),
            (1, "gamma delta epsilon".to_string())
        ]
    );

    let hits = manager.search("gamma delta epsilon", 5).unwrap();
    assert_eq!(hits[0].chunk_id, 1);
    assert_eq!(hits[0].document_id, outcome.document_id);
    assert_eq!(hits[0].filename, "greek.txt");
    assert!(hits[0].distance.abs() < 1e-6);

    assert_eq!(manager.delete(&outcome.document_id).unwrap(), 2);
    let hits = manager.search("gamma delta epsilon", 5).unwrap();
    assert!(hits.iter().all(|h| h.document_id != outcome.document_id));
    assert!(hits.is_empty());
}

#[test]
fn chunk_count_matches_stores() {
    let manager = IndexManager::in_memory(options(4, 1), hash()).unwrap();
    let text = (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");

    let before = manager.stats();
    let outcome = manager.ingest(&text, "words.txt").unwrap();
    let after = manager.stats();

    let doc = manager.get_document(&outcome.document_id).unwrap();
    assert_eq!(doc.chunk_count, outcome.chunk_count);
    assert_eq!(doc.total_chars, text.chars().count());
    assert_eq!(doc.state, DocumentState::Indexed);
    assert_eq!(
        manager.document_chunks(&outcome.document_id).len(),
        outcome.chunk_count
    );
    assert_eq!(after.vectors - before.vectors, outcome.chunk_count);
    assert_eq!(after.chunks, after.vectors);
}

#[test]
fn search_results_are_ordered() {
    let manager = IndexManager::in_memory(options(5, 2), hash()).unwrap();
    manager
        .ingest("rust borrow checker ownership lifetimes traits", "rust.md")
        .unwrap();
    manager
        .ingest("python dynamic typing garbage collection", "python.md")
        .unwrap();
    manager
        .ingest("rust ownership makes memory safety possible", "safety.md")
        .unwrap();

    let hits = manager.search("rust ownership", 10).unwrap();
    assert!(!hits.is_empty());
    for pair in hits.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn search_on_empty_index_and_bad_k() {
    let manager = IndexManager::in_memory(options(3, 1), hash()).unwrap();
    assert!(manager.search("anything", 3).unwrap().is_empty());
    assert!(matches!(
        manager.search("anything", 0),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn delete_only_removes_target_and_keeps_ids() {
    let manager = IndexManager::in_memory(options(3, 1), hash()).unwrap();
    let a = manager.ingest("one two three four five", "a.txt").unwrap();
    let b = manager.ingest("six seven eight nine ten", "b.txt").unwrap();

    manager.delete(&a.document_id).unwrap();

    let hits = manager.search("six seven eight", 10).unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.document_id == b.document_id));
    // b's chunks keep the ids they were given.
    let ids: Vec<u64> = manager
        .document_chunks(&b.document_id)
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, [2, 3]);

    // The watermark does not move back.
    let c = manager.ingest("eleven twelve", "c.txt").unwrap();
    assert_eq!(manager.document_chunks(&c.document_id)[0].0, 4);

    let deleted = manager.get_document(&a.document_id).unwrap();
    assert_eq!(deleted.state, DocumentState::Deleted);
    assert_eq!(deleted.chunk_count, 0);
    assert!(deleted.deleted_at.is_some());

    assert!(manager.list_documents(false).len() == 2);
    assert!(manager.list_documents(true).len() == 3);
}

#[test]
fn delete_unknown_or_twice_is_not_found() {
    let manager = IndexManager::in_memory(options(3, 1), hash()).unwrap();
    let a = manager.ingest("one two three", "a.txt").unwrap();
    manager.delete(&a.document_id).unwrap();

    assert!(matches!(
        manager.delete(&a.document_id),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        manager.delete(&docvec::DocumentId::new_random()),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn empty_document_is_rejected() {
    let manager = IndexManager::in_memory(options(3, 1), hash()).unwrap();
    let err = manager.ingest(" \n\t ", "blank.txt").unwrap_err();
    assert!(matches!(err, Error::EmptyDocument(name) if name == "blank.txt"));
    assert_eq!(manager.stats().documents, 0);
    assert_eq!(manager.stats().generation, 0);
}

#[test]
fn embedder_failure_rolls_back() {
    let tmp = tempfile::tempdir().unwrap();
    let flaky = Flaky::new();
    let manager = IndexManager::open(
        StateFiles::new(tmp.path().join("state")),
        options(3, 1),
        flaky.clone(),
    )
    .unwrap();
    manager.ingest("kept document text", "kept.txt").unwrap();
    let before = manager.stats();

    flaky.down.store(true, Ordering::SeqCst);
    let err = manager.ingest("lost document text here", "lost.txt").unwrap_err();
    assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    assert_eq!(manager.stats(), before);
    assert!(manager.list_documents(true).iter().all(|d| d.filename != "lost.txt"));

    // The next successful ingest continues right after the kept chunks.
    flaky.down.store(false, Ordering::SeqCst);
    let next = manager.ingest("another one", "next.txt").unwrap();
    assert_eq!(
        manager.document_chunks(&next.document_id)[0].0,
        before.next_id
    );
}

#[test]
fn wrong_vector_length_is_rejected() {
    let manager =
        IndexManager::in_memory(options(3, 1), Arc::new(WrongSize)).unwrap();
    assert!(matches!(
        manager.ingest("one two three", "a.txt"),
        Err(Error::DimensionMismatch {
            expected: DIM,
            actual: 65
        })
    ));
    assert_eq!(manager.stats().vectors, 0);
}

#[test]
fn embedder_dimension_must_match() {
    let err = IndexManager::in_memory(
        options(3, 1),
        Arc::new(HashEmbedder::new(DIM * 2)),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn concurrent_ingests_allocate_contiguous_ids() {
    let manager = IndexManager::in_memory(options(3, 1), hash()).unwrap();
    let texts: Vec<String> = (0..8)
        .map(|t| {
            (0..(5 + t))
                .map(|w| format!("t{t}w{w}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();

    let outcomes: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let manager = &manager;
                s.spawn(move || {
                    manager.ingest(text, &format!("doc{i}.txt")).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let total: usize = outcomes.iter().map(|o| o.chunk_count).sum();
    let mut ids = BTreeSet::new();
    for outcome in &outcomes {
        for (id, _) in manager.document_chunks(&outcome.document_id) {
            assert!(ids.insert(id), "id {id} assigned twice");
        }
    }
    assert_eq!(ids, (0..total as u64).collect::<BTreeSet<_>>());
    assert_eq!(manager.stats().next_id, total as u64);
}

#[test]
fn concurrent_search_sees_whole_documents() {
    let manager = IndexManager::in_memory(options(2, 0), hash()).unwrap();

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 0..20 {
                manager
                    .ingest(&format!("shared token{i} a b c d"), "w.txt")
                    .unwrap();
            }
        });
        s.spawn(|| {
            for _ in 0..50 {
                let snapshot = manager.snapshot();
                snapshot.verify().unwrap();
                for hit in manager.search("shared", 100).unwrap() {
                    let doc = manager.get_document(&hit.document_id).unwrap();
                    assert_eq!(doc.state, DocumentState::Indexed);
                }
            }
        });
    });

    assert_eq!(manager.stats().documents, 20);
}

#[test]
fn batch_ingest_commits_once() {
    let manager = IndexManager::in_memory(options(3, 1), hash()).unwrap();
    let results = manager
        .ingest_batch(vec![
            ("one two three four".into(), "a.txt".into()),
            ("   ".into(), "empty.txt".into()),
            ("five six seven".into(), "b.txt".into()),
        ])
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(Error::EmptyDocument(_))));
    assert!(results[2].is_ok());

    let stats = manager.stats();
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.generation, 1);
}

#[test]
fn state_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let state_dir = tmp.path().join("state");
    let queries = ["alpha gamma", "delta", "omega psi", "beta beta"];

    let (before, deleted): (Vec<_>, _) = {
        let manager = IndexManager::open(
            StateFiles::new(&state_dir),
            options(3, 1),
            hash(),
        )
        .unwrap();
        manager
            .ingest("alpha beta gamma delta epsilon", "greek.txt")
            .unwrap();
        let gone = manager.ingest("omega psi chi phi", "tail.txt").unwrap();
        manager.ingest("beta gamma delta", "mid.txt").unwrap();
        manager.delete(&gone.document_id).unwrap();

        let results = queries
            .iter()
            .map(|q| manager.search(q, 10).unwrap())
            .collect();
        manager.shutdown().unwrap();
        (results, gone.document_id)
    };

    let manager =
        IndexManager::open(StateFiles::new(&state_dir), options(3, 1), hash())
            .unwrap();
    let after: Vec<_> =
        queries.iter().map(|q| manager.search(q, 10).unwrap()).collect();
    assert_eq!(before, after);

    assert_eq!(
        manager.get_document(&deleted).unwrap().state,
        DocumentState::Deleted
    );
    // Ids keep counting from where the previous process stopped.
    let stats = manager.stats();
    let next = manager.ingest("fresh words", "fresh.txt").unwrap();
    assert_eq!(
        manager.document_chunks(&next.document_id)[0].0,
        stats.next_id
    );
}

#[test]
fn stored_dimension_must_match_configuration() {
    let tmp = tempfile::tempdir().unwrap();
    let state_dir = tmp.path().join("state");
    {
        let manager = IndexManager::open(
            StateFiles::new(&state_dir),
            options(3, 1),
            hash(),
        )
        .unwrap();
        manager.ingest("one two three", "a.txt").unwrap();
    }

    let mut wider = options(3, 1);
    wider.dimension = DIM * 2;
    let err = IndexManager::open(
        StateFiles::new(&state_dir),
        wider,
        Arc::new(HashEmbedder::new(DIM * 2)),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.is_fatal());
}

#[test]
fn incompatible_state_version_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let state_dir = tmp.path().join("state");
    {
        let manager = IndexManager::open(
            StateFiles::new(&state_dir),
            options(3, 1),
            hash(),
        )
        .unwrap();
        manager.ingest("one two three", "a.txt").unwrap();
    }

    let current =
        std::fs::read_to_string(state_dir.join("CURRENT")).unwrap();
    let documents = state_dir.join(current.trim()).join("documents.json");
    let text = std::fs::read_to_string(&documents).unwrap();
    std::fs::write(&documents, text.replace("\"version\": 1", "\"version\": 2"))
        .unwrap();

    let err =
        IndexManager::open(StateFiles::new(&state_dir), options(3, 1), hash())
            .unwrap_err();
    assert!(matches!(
        err,
        Error::IncompatibleStateVersion {
            found: 2,
            expected: 1,
            ..
        }
    ));
}

#[test]
fn prune_drops_deleted_records() {
    let manager = IndexManager::in_memory(options(3, 1), hash()).unwrap();
    let a = manager.ingest("one two three", "a.txt").unwrap();
    manager.ingest("four five six", "b.txt").unwrap();
    manager.delete(&a.document_id).unwrap();

    let watermark = manager.stats().next_id;
    assert_eq!(manager.list_documents(true).len(), 2);

    assert_eq!(manager.prune_deleted().unwrap(), 1);
    assert!(manager.get_document(&a.document_id).is_none());
    // The deleted record is gone from the full listing too.
    assert_eq!(manager.list_documents(true).len(), 1);
    assert_eq!(manager.stats().next_id, watermark);
    assert_eq!(manager.prune_deleted().unwrap(), 0);
    manager.snapshot().verify().unwrap();
}

#[test]
fn resolve_accepts_short_prefix() {
    let manager = IndexManager::in_memory(options(3, 1), hash()).unwrap();
    let a = manager.ingest("one two three", "a.txt").unwrap();
    assert_eq!(manager.resolve(&a.document_id.short()).unwrap(), a.document_id);
}

fn generation_dir(state_dir: &std::path::Path, generation: u64) -> std::path::PathBuf {
    state_dir.join(format!("gen-{generation:020}"))
}

#[test]
fn failed_save_publishes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let state_dir = tmp.path().join("state");
    let manager =
        IndexManager::open(StateFiles::new(&state_dir), options(3, 1), hash())
            .unwrap();
    let kept = manager.ingest("alpha beta gamma delta", "kept.txt").unwrap();
    let before = manager.stats();
    let documents_before = manager.list_documents(true);

    // A regular file where the next generation directory must go.
    let blocker = generation_dir(&state_dir, before.generation + 1);
    std::fs::write(&blocker, "in the way").unwrap();

    assert!(manager.ingest("omega psi chi", "lost.txt").is_err());
    assert_eq!(manager.stats(), before);
    assert_eq!(manager.list_documents(true), documents_before);
    assert!(
        manager
            .search("omega psi chi", 10)
            .unwrap()
            .iter()
            .all(|h| h.filename != "lost.txt")
    );

    assert!(manager.delete(&kept.document_id).is_err());
    assert_eq!(
        manager.get_document(&kept.document_id).unwrap().state,
        DocumentState::Indexed
    );
    assert_eq!(
        manager.document_chunks(&kept.document_id).len(),
        kept.chunk_count
    );
    assert_eq!(manager.stats(), before);
    drop(manager);

    std::fs::remove_file(&blocker).unwrap();
    let files = StateFiles::new(&state_dir);
    assert_eq!(files.current_generation().unwrap(), Some(before.generation));
    let reopened =
        IndexManager::open(files, options(3, 1), hash()).unwrap();
    assert_eq!(reopened.stats(), before);
    assert_eq!(reopened.list_documents(true), documents_before);
}

#[test]
fn advanced_pointer_is_restored_after_failed_commit() {
    let tmp = tempfile::tempdir().unwrap();
    let state_dir = tmp.path().join("state");
    let manager =
        IndexManager::open(StateFiles::new(&state_dir), options(3, 1), hash())
            .unwrap();
    manager.ingest("alpha beta gamma delta", "kept.txt").unwrap();
    let before = manager.stats();
    let documents_before = manager.list_documents(true);

    // CURRENT already names the generation the next commit will write, so
    // that commit fails and the previous state has to be written back.
    let claimed = before.generation + 1;
    std::fs::write(
        state_dir.join("CURRENT"),
        format!("gen-{claimed:020}\n"),
    )
    .unwrap();

    let err = manager.ingest("omega psi chi", "lost.txt").unwrap_err();
    assert!(matches!(err, Error::Consistency(_)));

    let after = manager.stats();
    assert_eq!(after.generation, claimed + 1);
    assert_eq!(
        IndexStats {
            generation: before.generation,
            ..after.clone()
        },
        before
    );
    assert_eq!(manager.list_documents(true), documents_before);

    let files = StateFiles::new(&state_dir);
    assert_eq!(files.current_generation().unwrap(), Some(claimed + 1));
    let on_disk = files.load().unwrap().unwrap();
    assert_eq!(on_disk.generation, claimed + 1);
    assert_eq!(on_disk.documents.len(), documents_before.len());
    assert_eq!(on_disk.vectors.len(), before.vectors);

    // Commits continue from the restored generation.
    manager.ingest("omega psi chi", "retry.txt").unwrap();
    assert_eq!(manager.stats().generation, claimed + 2);
    assert_eq!(
        StateFiles::new(&state_dir).current_generation().unwrap(),
        Some(claimed + 2)
    );
}

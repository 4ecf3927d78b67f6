//! Ingest, search and delete across the vector index, chunk store and
//! document registry.
//!
//! The three stores live together in an immutable [`IndexState`]. Readers
//! take an `Arc` to the current state and never block on writers. A write
//! clones the state, applies every change to the clone, persists it and
//! then swaps it in, so a failure at any step leaves the published state
//! exactly as it was.
//!
//! Chunking and embedding happen before the writer lock is taken; the lock
//! only covers the apply and persist steps.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    chunk_store::ChunkStore,
    chunking::ChunkingConfig,
    doc_id::DocumentId,
    embedding::{self, DEFAULT_BATCH_SIZE, DEFAULT_DIMENSION, Embedder},
    error::{Error, Result},
    persist::StateFiles,
    registry::{
        Document, DocumentRegistry, DocumentState, Lifecycle, NewDocument,
    },
    search::SearchHit,
    vector_index::VectorIndex,
};

/// A consistent view of all three stores.
#[derive(Debug, Clone)]
pub struct IndexState {
    pub vectors: VectorIndex,
    pub chunks: ChunkStore,
    pub documents: DocumentRegistry,
    /// Commit counter; every published state has a larger one than the last.
    pub generation: u64,
}

impl IndexState {
    pub fn empty(dimension: usize) -> Self {
        Self {
            vectors: VectorIndex::new(dimension),
            chunks: ChunkStore::new(),
            documents: DocumentRegistry::new(),
            generation: 0,
        }
    }

    /// Check the cross-store invariants.
    ///
    /// The vector ids and chunk ids must be the same set with the same
    /// watermark, every chunk must belong to an indexed document, and each
    /// document's `chunk_count` must match the chunks it owns.
    pub fn verify(&self) -> Result<()> {
        if self.vectors.next_id() != self.chunks.next_id() {
            return Err(Error::Consistency(format!(
                "vector watermark {} differs from chunk watermark {}",
                self.vectors.next_id(),
                self.chunks.next_id()
            )));
        }
        if self.vectors.len() != self.chunks.len()
            || !self.vectors.ids().iter().copied().eq(self.chunks.ids())
        {
            return Err(Error::Consistency(format!(
                "{} vectors but {} chunks, or their ids differ",
                self.vectors.len(),
                self.chunks.len()
            )));
        }

        let mut owned: HashMap<DocumentId, usize> = HashMap::new();
        for (id, chunk) in self.chunks.iter() {
            match self.documents.get(&chunk.document_id) {
                Some(doc) if doc.state == DocumentState::Indexed => {}
                Some(doc) => {
                    return Err(Error::Consistency(format!(
                        "chunk {id} belongs to {} document {}",
                        doc.state, doc.id
                    )));
                }
                None => {
                    return Err(Error::Consistency(format!(
                        "chunk {id} belongs to unknown document {}",
                        chunk.document_id
                    )));
                }
            }
            *owned.entry(chunk.document_id).or_default() += 1;
        }

        for doc in self.documents.iter() {
            let actual = owned.get(&doc.id).copied().unwrap_or(0);
            if doc.chunk_count != actual {
                return Err(Error::Consistency(format!(
                    "document {} records {} chunks but owns {actual}",
                    doc.id, doc.chunk_count
                )));
            }
        }

        Ok(())
    }
}

/// Parameters fixed for the lifetime of an [`IndexManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub chunking: ChunkingConfig,
    pub dimension: usize,
    pub batch_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            dimension: DEFAULT_DIMENSION,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub document_id: DocumentId,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub deleted_documents: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub dimension: usize,
    pub next_id: u64,
    pub generation: u64,
}

/// A document that has been chunked and embedded but not committed.
struct Prepared {
    job: Lifecycle,
    id: DocumentId,
    filename: String,
    total_chars: usize,
    texts: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

pub struct IndexManager {
    state: RwLock<Arc<IndexState>>,
    writer: Mutex<()>,
    embedder: Arc<dyn Embedder>,
    options: IndexOptions,
    files: Option<StateFiles>,
}

impl IndexManager {
    /// Open the index stored under `files`, starting empty if nothing has
    /// been committed there yet.
    pub fn open(
        files: StateFiles,
        options: IndexOptions,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        check_dimension(&options, embedder.as_ref())?;

        let state = match files.load()? {
            Some(state) => {
                if state.vectors.dimension() != options.dimension {
                    return Err(Error::Config(format!(
                        "stored index has dimension {} but {} is configured",
                        state.vectors.dimension(),
                        options.dimension
                    )));
                }
                state
            }
            None => IndexState::empty(options.dimension),
        };

        info!(
            generation = state.generation,
            documents = state.documents.len(),
            vectors = state.vectors.len(),
            model = embedder.model_name(),
            "index opened"
        );

        Ok(Self {
            state: RwLock::new(Arc::new(state)),
            writer: Mutex::new(()),
            embedder,
            options,
            files: Some(files),
        })
    }

    /// An index that is never written to disk.
    pub fn in_memory(
        options: IndexOptions,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        check_dimension(&options, embedder.as_ref())?;
        Ok(Self {
            state: RwLock::new(Arc::new(IndexState::empty(options.dimension))),
            writer: Mutex::new(()),
            embedder,
            options,
            files: None,
        })
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// The currently published state.
    pub fn snapshot(&self) -> Arc<IndexState> {
        Arc::clone(&self.state.read())
    }

    /// Chunk, embed and register one document.
    ///
    /// Nothing is published unless every step succeeds, including the
    /// write to disk.
    pub fn ingest(&self, raw_text: &str, filename: &str) -> Result<IngestOutcome> {
        let mut prepared = self.prepare(raw_text, filename)?;

        let _guard = self.writer.lock();
        let current = self.snapshot();
        let mut next = (*current).clone();
        next.generation += 1;

        let committed = apply(&mut next, &prepared).and_then(|outcome| {
            self.commit(&current, next)?;
            Ok(outcome)
        });
        let outcome = match committed {
            Ok(outcome) => outcome,
            Err(e) => {
                fail(&mut prepared, &e);
                return Err(e);
            }
        };
        prepared.job.advance(DocumentState::Indexed)?;

        info!(
            document = %outcome.document_id,
            filename,
            chunks = outcome.chunk_count,
            "document indexed"
        );
        Ok(outcome)
    }

    /// Ingest many documents with a single commit.
    ///
    /// The inner results report per-document preparation failures such as
    /// [`Error::EmptyDocument`]; those documents are skipped. An outer
    /// error means the commit itself failed and none of the documents were
    /// indexed.
    pub fn ingest_batch(
        &self,
        documents: Vec<(String, String)>,
    ) -> Result<Vec<Result<IngestOutcome>>> {
        let total = documents.len();
        let prepared: Vec<Result<Prepared>> = documents
            .iter()
            .map(|(text, filename)| self.prepare(text, filename))
            .collect();

        let _guard = self.writer.lock();
        let current = self.snapshot();
        let mut next = (*current).clone();
        next.generation += 1;

        let mut outcomes = Vec::with_capacity(total);
        let mut applied: Vec<Prepared> = Vec::new();
        let mut pending = prepared.into_iter();
        while let Some(slot) = pending.next() {
            let mut doc = match slot {
                Ok(doc) => doc,
                Err(e) => {
                    outcomes.push(Err(e));
                    continue;
                }
            };
            match apply(&mut next, &doc) {
                Ok(outcome) => {
                    outcomes.push(Ok(outcome));
                    applied.push(doc);
                }
                Err(e) => {
                    // The working copy is discarded along with every
                    // document in the batch.
                    fail(&mut doc, &e);
                    applied.extend(pending.flatten());
                    applied.iter_mut().for_each(|doc| fail(doc, &e));
                    return Err(e);
                }
            }
        }

        if !applied.is_empty()
            && let Err(e) = self.commit(&current, next)
        {
            applied.iter_mut().for_each(|doc| fail(doc, &e));
            return Err(e);
        }
        for doc in &mut applied {
            doc.job.advance(DocumentState::Indexed)?;
        }

        info!(documents = total, indexed = applied.len(), "batch indexed");
        Ok(outcomes)
    }

    /// Embed `query` and return up to `k` chunks nearest to it.
    ///
    /// Hits that cannot be joined to a live chunk of an indexed document are
    /// dropped with a warning.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(Error::InvalidArgument(
                "k must be at least 1".into(),
            ));
        }

        let query_vector = embedding::embed_batched(
            self.embedder.as_ref(),
            &[query.to_string()],
            1,
        )?
        .pop()
        .ok_or_else(|| {
            Error::EmbeddingUnavailable("no vector for the query".into())
        })?;

        let state = self.snapshot();
        let neighbors = state.vectors.search(&query_vector, k)?;
        debug!(k, found = neighbors.len(), "vector search");

        let hits = neighbors
            .into_iter()
            .filter_map(|n| match join(&state, n.id) {
                Ok((text, doc)) => Some(SearchHit {
                    chunk_id: n.id,
                    text: text.to_string(),
                    document_id: doc.id,
                    filename: doc.filename.clone(),
                    distance: n.distance,
                }),
                Err(e) => {
                    warn!(chunk = n.id, "dropping search hit: {e}");
                    None
                }
            })
            .collect();
        Ok(hits)
    }

    /// Resolve a full document id or an unambiguous prefix.
    pub fn resolve(&self, reference: &str) -> Result<DocumentId> {
        self.snapshot().documents.resolve(reference)
    }

    /// Remove a document's chunks and vectors and mark it deleted. Returns
    /// the number of chunks removed.
    pub fn delete(&self, id: &DocumentId) -> Result<usize> {
        let _guard = self.writer.lock();
        let current = self.snapshot();

        match current.documents.get(id) {
            Some(doc) if doc.state == DocumentState::Indexed => {}
            _ => {
                return Err(Error::NotFound {
                    kind: "document",
                    name: id.to_string(),
                });
            }
        }

        let mut next = (*current).clone();
        next.generation += 1;
        let removed = next.chunks.delete_by_document(id);
        let dropped = next.vectors.remove(&removed);
        if dropped != removed.len() {
            return Err(Error::Consistency(format!(
                "removed {} chunks but {dropped} vectors for {id}",
                removed.len()
            )));
        }
        next.documents.mark_deleted(id, Utc::now())?;
        self.commit(&current, next)?;

        info!(document = %id, chunks = removed.len(), "document deleted");
        Ok(removed.len())
    }

    pub fn get_document(&self, id: &DocumentId) -> Option<Document> {
        self.snapshot().documents.get(id).cloned()
    }

    /// Registered documents ordered by upload time. Deleted ones are only
    /// included when asked for.
    pub fn list_documents(&self, include_deleted: bool) -> Vec<Document> {
        self.snapshot()
            .documents
            .list()
            .into_iter()
            .filter(|d| include_deleted || d.state != DocumentState::Deleted)
            .cloned()
            .collect()
    }

    /// A document's chunks as `(chunk_id, text)`, in id order.
    pub fn document_chunks(&self, id: &DocumentId) -> Vec<(u64, String)> {
        let state = self.snapshot();
        state
            .chunks
            .ids_for_document(id)
            .into_iter()
            .filter_map(|cid| {
                state.chunks.get(cid).map(|c| (cid, c.text.clone()))
            })
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.snapshot();
        IndexStats {
            documents: state.documents.count_in_state(DocumentState::Indexed),
            deleted_documents: state
                .documents
                .count_in_state(DocumentState::Deleted),
            chunks: state.chunks.len(),
            vectors: state.vectors.len(),
            dimension: state.vectors.dimension(),
            next_id: state.vectors.next_id(),
            generation: state.generation,
        }
    }

    /// Physically drop registry rows of deleted documents. Returns how many
    /// were removed.
    ///
    /// This erases the record that those documents ever existed: their ids,
    /// filenames and deletion times are gone from `list --all` and `show`.
    /// Chunk ids stay retired because the watermark is kept.
    pub fn prune_deleted(&self) -> Result<usize> {
        let _guard = self.writer.lock();
        let current = self.snapshot();

        let doomed: Vec<DocumentId> = current
            .documents
            .iter()
            .filter(|d| d.state.is_terminal())
            .map(|d| d.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let mut next = (*current).clone();
        next.generation += 1;
        for id in &doomed {
            next.documents.delete(id);
        }
        self.commit(&current, next)?;

        info!(removed = doomed.len(), "pruned deleted documents");
        Ok(doomed.len())
    }

    /// Make sure the published state is on disk.
    ///
    /// Commits already persist, so this only writes when the stored
    /// generation is behind, e.g. a fresh index that has never been saved.
    pub fn flush(&self) -> Result<()> {
        let Some(files) = &self.files else {
            return Ok(());
        };

        let _guard = self.writer.lock();
        let current = self.snapshot();
        if files.current_generation()? == Some(current.generation) {
            return Ok(());
        }

        let mut next = (*current).clone();
        next.generation += 1;
        self.commit(&current, next)?;
        debug!("index flushed");
        Ok(())
    }

    pub fn shutdown(self) -> Result<()> {
        self.flush()?;
        info!(generation = self.snapshot().generation, "index closed");
        Ok(())
    }

    fn prepare(&self, raw_text: &str, filename: &str) -> Result<Prepared> {
        let id = DocumentId::new_random();
        let mut job = Lifecycle::start(id);
        job.advance(DocumentState::Processing)?;
        debug!(document = %id, filename, state = %job.state(), "ingest started");

        let chunks = self.options.chunking.chunk(raw_text);
        if chunks.is_empty() {
            let err = Error::EmptyDocument(filename.to_string());
            fail_job(&mut job, filename, &err);
            return Err(err);
        }
        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
        debug!(document = %id, chunks = texts.len(), "chunked");

        let vectors = match embedding::embed_batched(
            self.embedder.as_ref(),
            &texts,
            self.options.batch_size,
        ) {
            Ok(vectors) => vectors,
            Err(e) => {
                fail_job(&mut job, filename, &e);
                return Err(e);
            }
        };

        Ok(Prepared {
            job,
            id,
            filename: filename.to_string(),
            total_chars: raw_text.chars().count(),
            texts,
            vectors,
        })
    }

    /// Verify, persist and publish `next`.
    fn commit(&self, current: &IndexState, next: IndexState) -> Result<()> {
        next.verify()?;

        if let Some(files) = &self.files
            && let Err(e) = files.save(&next)
        {
            self.compensate(files, current, next.generation);
            return Err(e);
        }

        let generation = next.generation;
        *self.state.write() = Arc::new(next);
        debug!(generation, "state published");
        Ok(())
    }

    /// After a failed save, put the disk back in line with `current` if the
    /// failed generation was already made current.
    fn compensate(
        &self,
        files: &StateFiles,
        current: &IndexState,
        failed: u64,
    ) {
        // An unreadable pointer is treated as possibly advanced.
        if let Ok(on_disk) = files.current_generation()
            && on_disk != Some(failed)
        {
            return;
        }

        let mut restored = current.clone();
        restored.generation = failed + 1;
        match files.save(&restored) {
            Ok(()) => {
                warn!(
                    generation = restored.generation,
                    "restored previous state after a failed commit"
                );
                *self.state.write() = Arc::new(restored);
            }
            Err(e) => {
                error!(
                    generation = failed,
                    "could not restore previous state on disk: {e}"
                );
            }
        }
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("options", &self.options)
            .field("model", &self.embedder.model_name())
            .finish_non_exhaustive()
    }
}

fn check_dimension(options: &IndexOptions, embedder: &dyn Embedder) -> Result<()> {
    if options.dimension == 0 {
        return Err(Error::Config("dimension must be at least 1".into()));
    }
    if embedder.dimension() != options.dimension {
        return Err(Error::Config(format!(
            "embedder {} produces {}-dimensional vectors but the index uses {}",
            embedder.model_name(),
            embedder.dimension(),
            options.dimension
        )));
    }
    Ok(())
}

/// Add a prepared document to the working copy of the state.
fn apply(state: &mut IndexState, prepared: &Prepared) -> Result<IngestOutcome> {
    let ids = state.vectors.add(&prepared.vectors)?;
    let start = ids.first().copied().unwrap_or(state.vectors.next_id());

    let batch: Vec<(String, DocumentId)> = prepared
        .texts
        .iter()
        .map(|t| (t.clone(), prepared.id))
        .collect();
    let chunk_ids = state.chunks.insert(start, &batch)?;
    if chunk_ids != ids {
        return Err(Error::Consistency(format!(
            "chunk ids {chunk_ids:?} differ from vector ids {ids:?}"
        )));
    }

    state.documents.create(NewDocument {
        id: Some(prepared.id),
        filename: prepared.filename.clone(),
        uploaded_at: Utc::now(),
        state: DocumentState::Indexed,
        chunk_count: ids.len(),
        total_chars: prepared.total_chars,
    })?;

    Ok(IngestOutcome {
        document_id: prepared.id,
        chunk_count: ids.len(),
    })
}

/// Resolve a vector id to its chunk text and an indexed owner.
fn join(state: &IndexState, id: u64) -> Result<(&str, &Document)> {
    let chunk = state.chunks.get(id).ok_or_else(|| {
        Error::Consistency(format!("vector {id} has no chunk"))
    })?;
    let doc = state.documents.get(&chunk.document_id).ok_or_else(|| {
        Error::Consistency(format!(
            "chunk {id} belongs to unknown document {}",
            chunk.document_id
        ))
    })?;
    if doc.state != DocumentState::Indexed {
        return Err(Error::Consistency(format!(
            "chunk {id} belongs to {} document {}",
            doc.state, doc.id
        )));
    }
    Ok((&chunk.text, doc))
}

fn fail_job(job: &mut Lifecycle, filename: &str, err: &Error) {
    // A job that already reached a terminal state has nothing to record.
    if job.advance(DocumentState::Failed).is_ok() {
        warn!(filename, state = %job.state(), "ingest failed: {err}");
    }
}

fn fail(prepared: &mut Prepared, err: &Error) {
    fail_job(&mut prepared.job, &prepared.filename, err);
}

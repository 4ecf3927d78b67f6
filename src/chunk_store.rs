use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
};

/// Text and owner of one chunk. The chunk's id is its vector's row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub text: String,
    pub document_id: DocumentId,
}

/// Maps chunk ids to their text and owning document.
///
/// Keys are allocated by the vector index; this store only accepts a batch
/// starting at or above its own watermark, which it then advances past the
/// batch so both id spaces move in lockstep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkStore {
    chunks: BTreeMap<u64, StoredChunk>,
    next_id: u64,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted entries.
    pub fn from_parts(
        chunks: impl IntoIterator<Item = (u64, StoredChunk)>,
        next_id: u64,
    ) -> Result<Self> {
        let chunks: BTreeMap<u64, StoredChunk> = chunks.into_iter().collect();
        if let Some((&last, _)) = chunks.last_key_value()
            && last >= next_id
        {
            return Err(Error::Consistency(format!(
                "chunk id {last} is at or above the watermark {next_id}"
            )));
        }
        Ok(Self { chunks, next_id })
    }

    /// Insert a batch whose ids start at `start_id`, the first id the vector
    /// index assigned to the same batch.
    pub fn insert(
        &mut self,
        start_id: u64,
        batch: &[(String, DocumentId)],
    ) -> Result<Vec<u64>> {
        if start_id < self.next_id {
            return Err(Error::Consistency(format!(
                "chunk batch starts at {start_id} but ids below {} are taken",
                self.next_id
            )));
        }

        let ids: Vec<u64> = (start_id..start_id + batch.len() as u64).collect();
        for (&id, (text, document_id)) in ids.iter().zip(batch) {
            self.chunks.insert(
                id,
                StoredChunk {
                    text: text.clone(),
                    document_id: *document_id,
                },
            );
        }
        self.next_id = start_id + batch.len() as u64;
        Ok(ids)
    }

    pub fn get(&self, id: u64) -> Option<&StoredChunk> {
        self.chunks.get(&id)
    }

    /// Remove every chunk owned by `document_id`, returning the removed ids.
    pub fn delete_by_document(&mut self, document_id: &DocumentId) -> Vec<u64> {
        let ids = self.ids_for_document(document_id);
        for id in &ids {
            self.chunks.remove(id);
        }
        ids
    }

    /// Chunk ids owned by `document_id`, ascending.
    pub fn ids_for_document(&self, document_id: &DocumentId) -> Vec<u64> {
        self.chunks
            .iter()
            .filter(|(_, chunk)| chunk.document_id == *document_id)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn count_for_document(&self, document_id: &DocumentId) -> usize {
        self.chunks
            .values()
            .filter(|chunk| chunk.document_id == *document_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.chunks.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &StoredChunk)> {
        self.chunks.iter().map(|(&id, chunk)| (id, chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(doc: DocumentId, texts: &[&str]) -> Vec<(String, DocumentId)> {
        texts.iter().map(|t| (t.to_string(), doc)).collect()
    }

    #[test]
    fn insert_and_get() {
        let mut store = ChunkStore::new();
        let doc = DocumentId::new_random();

        let ids = store.insert(0, &batch(doc, &["one", "two"])).unwrap();
        assert_eq!(ids, [0, 1]);
        assert_eq!(store.get(1).unwrap().text, "two");
        assert_eq!(store.get(1).unwrap().document_id, doc);
        assert!(store.get(2).is_none());
        assert_eq!(store.next_id(), 2);
    }

    #[test]
    fn insert_rejects_reused_offset() {
        let mut store = ChunkStore::new();
        let doc = DocumentId::new_random();
        store.insert(0, &batch(doc, &["a", "b", "c"])).unwrap();

        let err = store.insert(2, &batch(doc, &["d"])).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn delete_by_document_only_touches_owner() {
        let mut store = ChunkStore::new();
        let a = DocumentId::new_random();
        let b = DocumentId::new_random();
        store.insert(0, &batch(a, &["a1", "a2"])).unwrap();
        store.insert(2, &batch(b, &["b1"])).unwrap();
        store.insert(3, &batch(a, &["a3"])).unwrap();

        assert_eq!(store.delete_by_document(&a), [0, 1, 3]);
        assert_eq!(store.ids().collect::<Vec<_>>(), [2]);
        assert_eq!(store.count_for_document(&a), 0);
        assert_eq!(store.count_for_document(&b), 1);
        assert!(store.delete_by_document(&a).is_empty());

        // Deleted ids are not handed out again.
        assert_eq!(store.next_id(), 4);
    }

    #[test]
    fn from_parts_checks_watermark() {
        let doc = DocumentId::new_random();
        let chunk = StoredChunk {
            text: "x".into(),
            document_id: doc,
        };
        assert!(ChunkStore::from_parts([(5, chunk.clone())], 6).is_ok());
        assert!(matches!(
            ChunkStore::from_parts([(5, chunk)], 5),
            Err(Error::Consistency(_))
        ));
    }
}

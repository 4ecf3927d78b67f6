//! Document metadata and lifecycle.
//!
//! A document moves `uploading -> processing -> indexed` on success or ends
//! in `failed`. An indexed document can later become `deleted`. Both
//! `failed` and `deleted` are terminal.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Uploading,
    Processing,
    Indexed,
    Failed,
    Deleted,
}

impl DocumentState {
    pub fn can_transition_to(self, next: DocumentState) -> bool {
        use DocumentState::*;
        matches!(
            (self, next),
            (Uploading, Processing)
                | (Uploading, Failed)
                | (Processing, Indexed)
                | (Processing, Failed)
                | (Indexed, Deleted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentState::Failed | DocumentState::Deleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentState::Uploading => "uploading",
            DocumentState::Processing => "processing",
            DocumentState::Indexed => "indexed",
            DocumentState::Failed => "failed",
            DocumentState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle tracker for a document that is not registered yet.
///
/// Ingest jobs walk this through `uploading -> processing` while chunking
/// and embedding, so a bad transition is caught the same way as for a
/// registered document.
#[derive(Debug, Clone, Copy)]
pub struct Lifecycle {
    id: DocumentId,
    state: DocumentState,
}

impl Lifecycle {
    pub fn start(id: DocumentId) -> Self {
        Self {
            id,
            state: DocumentState::Uploading,
        }
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn advance(&mut self, next: DocumentState) -> Result<()> {
        self.state = transition(&self.id, self.state, next)?;
        Ok(())
    }
}

fn transition(
    id: &DocumentId,
    from: DocumentState,
    to: DocumentState,
) -> Result<DocumentState> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(Error::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub state: DocumentState,
    pub chunk_count: usize,
    pub total_chars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields supplied by the ingest path when registering a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Id the ingest job has been tracking; a fresh one is generated when
    /// `None`.
    pub id: Option<DocumentId>,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub state: DocumentState,
    pub chunk_count: usize,
    pub total_chars: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentRegistry {
    documents: HashMap<DocumentId, Document>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        Self {
            documents: documents.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    pub fn create(&mut self, new: NewDocument) -> Result<DocumentId> {
        let id = new.id.unwrap_or_else(DocumentId::new_random);
        if self.documents.contains_key(&id) {
            return Err(Error::Consistency(format!(
                "document {id} is already registered"
            )));
        }

        self.documents.insert(
            id,
            Document {
                id,
                filename: new.filename,
                uploaded_at: new.uploaded_at,
                state: new.state,
                chunk_count: new.chunk_count,
                total_chars: new.total_chars,
                deleted_at: None,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.get(id)
    }

    /// All documents ordered by upload time, then id.
    pub fn list(&self) -> Vec<&Document> {
        let mut docs: Vec<&Document> = self.documents.values().collect();
        docs.sort_by(|a, b| {
            a.uploaded_at.cmp(&b.uploaded_at).then(a.id.cmp(&b.id))
        });
        docs
    }

    pub fn update_state(
        &mut self,
        id: &DocumentId,
        state: DocumentState,
    ) -> Result<()> {
        let doc = self.get_mut(id)?;
        doc.state = transition(id, doc.state, state)?;
        Ok(())
    }

    /// Move an indexed document to `deleted`, dropping its chunk count.
    pub fn mark_deleted(
        &mut self,
        id: &DocumentId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let doc = self.get_mut(id)?;
        doc.state = transition(id, doc.state, DocumentState::Deleted)?;
        doc.chunk_count = 0;
        doc.deleted_at = Some(at);
        Ok(())
    }

    /// Physically remove a record.
    pub fn delete(&mut self, id: &DocumentId) -> Option<Document> {
        self.documents.remove(id)
    }

    /// Look a document up by full id or an unambiguous id prefix.
    pub fn resolve(&self, reference: &str) -> Result<DocumentId> {
        let reference = reference.trim().trim_start_matches('#');
        if let Ok(id) = reference.parse::<DocumentId>()
            && self.documents.contains_key(&id)
        {
            return Ok(id);
        }

        let mut matches =
            self.documents.keys().filter(|id| id.matches_prefix(reference));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(*id),
            (Some(_), Some(_)) => Err(Error::InvalidArgument(format!(
                "document reference '{reference}' is ambiguous"
            ))),
            (None, _) => Err(Error::NotFound {
                kind: "document",
                name: reference.to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn count_in_state(&self, state: DocumentState) -> usize {
        self.documents.values().filter(|d| d.state == state).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    fn get_mut(&mut self, id: &DocumentId) -> Result<&mut Document> {
        self.documents.get_mut(id).ok_or_else(|| Error::NotFound {
            kind: "document",
            name: id.to_string(),
        })
    }
}

//! Durable storage for [`IndexState`].
//!
//! Each commit writes a complete generation directory:
//!
//! ```text
//! state/
//!   CURRENT                 -> "gen-00000000000000000007"
//!   gen-00000000000000000007/
//!     vectors.dvvi
//!     chunks.json
//!     documents.json
//! ```
//!
//! Every file is written to a temporary sibling, fsynced and renamed into
//! place. The commit point is the rename of `CURRENT`; until then a reader
//! still sees the previous generation, and a crash leaves at most an
//! orphaned directory that the next save removes.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{
    chunk_store::{ChunkStore, StoredChunk},
    doc_id::DocumentId,
    error::{Error, Result},
    manager::IndexState,
    registry::{Document, DocumentRegistry},
    vector_index::VectorIndex,
};

const POINTER: &str = "CURRENT";
const GEN_PREFIX: &str = "gen-";
const VECTORS_FILE: &str = "vectors.dvvi";
const CHUNKS_FILE: &str = "chunks.json";
const DOCUMENTS_FILE: &str = "documents.json";

const CHUNKS_FORMAT: &str = "docvec-chunks";
const DOCUMENTS_FORMAT: &str = "docvec-documents";

/// Version written into both JSON artifacts.
pub const STATE_VERSION: u32 = 1;

/// Leading fields shared by the JSON artifacts, read before the body so a
/// newer layout is reported as a version mismatch rather than a parse error.
#[derive(Debug, Deserialize)]
struct Header {
    format: String,
    version: u32,
    generation: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    id: u64,
    text: String,
    document_id: DocumentId,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunksFile {
    format: String,
    version: u32,
    generation: u64,
    next_id: u64,
    chunks: Vec<ChunkRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DocumentsFile {
    format: String,
    version: u32,
    generation: u64,
    documents: Vec<Document>,
}

/// The on-disk home of the index state.
#[derive(Debug, Clone)]
pub struct StateFiles {
    root: PathBuf,
}

impl StateFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a committed generation exists.
    pub fn exists(&self) -> bool {
        self.root.join(POINTER).is_file()
    }

    /// Generation named by `CURRENT`, if any.
    pub fn current_generation(&self) -> Result<Option<u64>> {
        match fs::read_to_string(self.root.join(POINTER)) {
            Ok(s) => Ok(parse_generation_dir_name(s.trim())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `state` as a new generation and make it current.
    ///
    /// On error the previously committed generation stays current and the
    /// partially written directory is removed.
    pub fn save(&self, state: &IndexState) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|_| Error::DataDir(self.root.clone()))?;

        // Rewriting the current directory in place would break the
        // previous-state guarantee.
        if self.current_generation()? == Some(state.generation) {
            return Err(Error::Consistency(format!(
                "generation {} is already committed",
                state.generation
            )));
        }

        let name = generation_dir_name(state.generation);
        let dir = self.root.join(&name);

        if let Err(e) = write_generation(&dir, state) {
            if let Err(cleanup) = fs::remove_dir_all(&dir)
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!(
                    path = %dir.display(),
                    "could not remove partial generation: {cleanup}"
                );
            }
            return Err(e);
        }

        atomic_write(&self.root.join(POINTER), format!("{name}\n").as_bytes())?;
        debug!(generation = state.generation, "state committed");

        self.remove_stale_generations(&name);
        Ok(())
    }

    /// Load the current generation, or `None` when nothing was committed.
    pub fn load(&self) -> Result<Option<IndexState>> {
        let pointer = self.root.join(POINTER);
        let name = match fs::read_to_string(&pointer) {
            Ok(s) => s.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let generation = parse_generation_dir_name(&name).ok_or_else(|| {
            Error::CorruptState {
                artifact: "state pointer",
                reason: format!("'{name}' is not a generation name"),
            }
        })?;
        let dir = self.root.join(&name);

        let vectors_bytes =
            read_artifact(&dir, VECTORS_FILE, "vector index snapshot")?;
        let vectors = VectorIndex::restore(&vectors_bytes)?;

        let chunks_bytes = read_artifact(&dir, CHUNKS_FILE, "chunk store")?;
        let chunks_file: ChunksFile = parse_versioned(
            &chunks_bytes,
            "chunk store",
            CHUNKS_FORMAT,
            generation,
        )?;
        let chunks = ChunkStore::from_parts(
            chunks_file.chunks.into_iter().map(|r| {
                (
                    r.id,
                    StoredChunk {
                        text: r.text,
                        document_id: r.document_id,
                    },
                )
            }),
            chunks_file.next_id,
        )
        .map_err(|e| Error::CorruptState {
            artifact: "chunk store",
            reason: e.to_string(),
        })?;

        let documents_bytes =
            read_artifact(&dir, DOCUMENTS_FILE, "document registry")?;
        let documents_file: DocumentsFile = parse_versioned(
            &documents_bytes,
            "document registry",
            DOCUMENTS_FORMAT,
            generation,
        )?;
        let documents =
            DocumentRegistry::from_documents(documents_file.documents);

        let state = IndexState {
            vectors,
            chunks,
            documents,
            generation,
        };
        state.verify().map_err(|e| Error::CorruptState {
            artifact: "index state",
            reason: e.to_string(),
        })?;

        debug!(
            generation,
            vectors = state.vectors.len(),
            documents = state.documents.len(),
            "state loaded"
        );
        Ok(Some(state))
    }

    /// Remove every generation directory except `keep`. Failures only warn:
    /// the committed state is already in place.
    fn remove_stale_generations(&self, keep: &str) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("could not list {}: {e}", self.root.display());
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == keep || parse_generation_dir_name(&name).is_none() {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                warn!("could not remove stale generation {name}: {e}");
            }
        }
    }
}

fn write_generation(dir: &Path, state: &IndexState) -> Result<()> {
    if dir.exists() {
        // Left behind by an interrupted save of the same generation.
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;

    atomic_write(&dir.join(VECTORS_FILE), &state.vectors.snapshot())?;

    let chunks = ChunksFile {
        format: CHUNKS_FORMAT.to_string(),
        version: STATE_VERSION,
        generation: state.generation,
        next_id: state.chunks.next_id(),
        chunks: state
            .chunks
            .iter()
            .map(|(id, chunk)| ChunkRecord {
                id,
                text: chunk.text.clone(),
                document_id: chunk.document_id,
            })
            .collect(),
    };
    atomic_write(&dir.join(CHUNKS_FILE), &serde_json::to_vec(&chunks)?)?;

    let documents = DocumentsFile {
        format: DOCUMENTS_FORMAT.to_string(),
        version: STATE_VERSION,
        generation: state.generation,
        documents: state.documents.list().into_iter().cloned().collect(),
    };
    atomic_write(
        &dir.join(DOCUMENTS_FILE),
        &serde_json::to_vec_pretty(&documents)?,
    )?;

    Ok(())
}

fn read_artifact(
    dir: &Path,
    file: &str,
    artifact: &'static str,
) -> Result<Vec<u8>> {
    match fs::read(dir.join(file)) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::CorruptState {
                artifact,
                reason: format!("{} is missing", dir.join(file).display()),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_versioned<T: DeserializeOwned>(
    bytes: &[u8],
    artifact: &'static str,
    format: &str,
    generation: u64,
) -> Result<T> {
    let corrupt = |reason: String| Error::CorruptState { artifact, reason };

    let header: Header =
        serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
    if header.format != format {
        return Err(corrupt(format!(
            "format tag '{}', expected '{format}'",
            header.format
        )));
    }
    if header.version != STATE_VERSION {
        return Err(Error::IncompatibleStateVersion {
            artifact,
            found: header.version,
            expected: STATE_VERSION,
        });
    }
    if header.generation != generation {
        return Err(corrupt(format!(
            "generation {} does not match current generation {generation}",
            header.generation
        )));
    }

    serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))
}

fn generation_dir_name(generation: u64) -> String {
    format!("{GEN_PREFIX}{generation:020}")
}

fn parse_generation_dir_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(GEN_PREFIX)?;
    if digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Removes the temporary file on drop unless it was renamed into place.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Write `bytes` to `path` through a fsynced temporary sibling.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = TempFile {
        path: temporary_path(path),
        armed: true,
    };

    {
        let mut file = File::create(&tmp.path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp.path, path)?;
    tmp.armed = false;
    sync_parent_directory(path)?;
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut os = path.as_os_str().to_os_string();
    os.push(format!(".tmp.{}.{nanos}", std::process::id()));
    PathBuf::from(os)
}

fn sync_parent_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

use kdam::{BarExt, tqdm};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    error::Result,
    extract,
    manager::{IndexManager, IngestOutcome},
    text_util,
    walker::DiscoveredFile,
};

/// Documents per commit when ingesting many files.
pub const DEFAULT_COMMIT_BATCH: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct IndexedFile {
    pub filename: String,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub indexed: Vec<IndexedFile>,
    pub failed: Vec<FailedFile>,
}

impl IngestReport {
    pub fn total_chunks(&self) -> usize {
        self.indexed.iter().map(|f| f.outcome.chunk_count).sum()
    }
}

/// Read, clean and index `files`, committing every `commit_batch` files.
///
/// Files that cannot be read or produce no text are reported and skipped.
/// A failed commit aborts the run; earlier batches stay indexed.
pub fn ingest_files(
    manager: &IndexManager,
    files: &[DiscoveredFile],
    commit_batch: usize,
    show_progress: bool,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut pb = tqdm!(
        total = files.len(),
        desc = "Indexing",
        unit = " files",
        disable = !show_progress
    );

    for batch in files.chunks(commit_batch.max(1)) {
        // Read in parallel; each buffer is dropped once its text is built.
        let loaded: Vec<(String, Result<String>)> = batch
            .par_iter()
            .map(|file| {
                let filename = file.relative_path.to_string_lossy().to_string();
                let text = std::fs::read(&file.absolute_path)
                    .map_err(Into::into)
                    .and_then(|bytes| extract::extract_text(&bytes, &filename))
                    .map(|raw| text_util::clean_text(&raw));
                (filename, text)
            })
            .collect();

        let mut documents = Vec::with_capacity(loaded.len());
        for (filename, text) in loaded {
            match text {
                Ok(text) => documents.push((text, filename)),
                Err(e) => {
                    warn!(filename, "skipping file: {e}");
                    report.failed.push(FailedFile {
                        filename,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let filenames: Vec<String> =
            documents.iter().map(|(_, f)| f.clone()).collect();
        let results = manager.ingest_batch(documents)?;
        for (filename, result) in filenames.into_iter().zip(results) {
            match result {
                Ok(outcome) => {
                    report.indexed.push(IndexedFile { filename, outcome })
                }
                Err(e) => report.failed.push(FailedFile {
                    filename,
                    reason: e.to_string(),
                }),
            }
        }

        pb.update(batch.len())?;
    }

    if show_progress {
        pb.refresh()?;
        eprintln!();
    }

    debug!(
        indexed = report.indexed.len(),
        failed = report.failed.len(),
        chunks = report.total_chunks(),
        "ingest finished"
    );
    Ok(report)
}

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::{
    error::{Error, Result},
    extract,
};

/// A discovered document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the directory it was found in, or the file name
    /// for files named directly. Used as the document's filename.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

/// Decides which files inside a walked directory are picked up.
///
/// With no include patterns, text and PDF files are accepted.
/// Otherwise a file is accepted when its relative path matches any pattern.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Option<GlobSet>,
}

impl FileFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::default());
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                Error::InvalidArgument(format!(
                    "invalid glob pattern '{pattern}': {e}"
                ))
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| {
            Error::InvalidArgument(format!("invalid glob patterns: {e}"))
        })?;
        Ok(Self { include: Some(set) })
    }

    pub fn accepts(&self, relative_path: &Path) -> bool {
        match &self.include {
            Some(set) => set.is_match(relative_path),
            None => extract::has_default_extension(relative_path),
        }
    }
}

/// Expand files and directories into the documents to ingest.
///
/// Files named directly are always returned. Directories are walked
/// recursively, skipping hidden entries (names starting with `.`) and
/// files the filter rejects. Each directory's results are sorted.
pub fn discover(
    paths: &[PathBuf],
    filter: &FileFilter,
) -> Result<Vec<DiscoveredFile>> {
    let mut results = Vec::new();

    for path in paths {
        let metadata = std::fs::metadata(path).map_err(|e| {
            Error::InvalidArgument(format!("{}: {e}", path.display()))
        })?;

        if metadata.is_dir() {
            results.extend(discover_files(path, filter)?);
        } else {
            let absolute_path = path.canonicalize()?;
            let relative_path = path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| path.clone());
            results.push(DiscoveredFile {
                relative_path,
                absolute_path,
            });
        }
    }

    Ok(results)
}

/// Recursively walk a directory and discover eligible document files.
pub fn discover_files(
    root: &Path,
    filter: &FileFilter,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, filter, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    filter: &FileFilter,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();

        // Skip hidden files and directories.
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, filter, results)?;
        } else if file_type.is_symlink() {
            // Skip broken symlinks and links to directories, which could
            // loop back into the tree.
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            if resolved.is_file() && filter.accepts(&relative) {
                results.push(DiscoveredFile {
                    relative_path: relative,
                    absolute_path: resolved,
                });
            }
        } else if file_type.is_file() && filter.accepts(&relative) {
            results.push(DiscoveredFile {
                relative_path: relative,
                absolute_path: path.canonicalize()?,
            });
        }
    }

    Ok(())
}

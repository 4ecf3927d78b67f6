use std::path::Path;

use crate::error::{Error, Result};

/// Extensions a walked directory picks up as plain text when no include
/// globs are given.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

pub const PDF_EXTENSION: &str = "pdf";

const PDF_MAGIC: &[u8] = b"%PDF-";

const BOM: char = '\u{feff}';

/// Turn an uploaded file's bytes into text for ingest.
///
/// PDFs (by extension or by their `%PDF-` header) go through the PDF text
/// extractor. Everything else is read as UTF-8, so any file the walker
/// accepted through a glob or by name can be indexed.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String> {
    if is_pdf(bytes, filename) {
        return extract_pdf(bytes, filename);
    }

    let text = std::str::from_utf8(bytes).map_err(|e| Error::Extraction {
        filename: filename.to_string(),
        reason: format!("not valid UTF-8 ({e})"),
    })?;

    Ok(text.strip_prefix(BOM).unwrap_or(text).to_string())
}

/// Whether `path` has one of the extensions indexed by default.
pub fn has_default_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ext.eq_ignore_ascii_case(PDF_EXTENSION)
                || TEXT_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

fn is_pdf(bytes: &[u8], filename: &str) -> bool {
    bytes.starts_with(PDF_MAGIC)
        || Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(PDF_EXTENSION))
}

fn extract_pdf(bytes: &[u8], filename: &str) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| Error::Extraction {
        filename: filename.to_string(),
        reason: format!("PDF extraction failed ({e})"),
    })
}

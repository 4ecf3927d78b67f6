use serde::Serialize;

use crate::{doc_id::DocumentId, text_util};

/// One retrieved chunk joined with its owning document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: u64,
    pub text: String,
    pub document_id: DocumentId,
    pub filename: String,
    /// Squared Euclidean distance to the query; smaller is closer.
    pub distance: f32,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    result_count: usize,
    results: Vec<JsonHit<'a>>,
}

#[derive(Serialize)]
struct JsonHit<'a> {
    rank: usize,
    #[serde(flatten)]
    hit: &'a SearchHit,
}

/// Format results for human-readable terminal output.
pub fn format_human(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found.\n".to_string();
    }

    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "{:>3}. [{:.4}] {} #{} chunk {}\n",
            i + 1,
            hit.distance,
            hit.filename,
            hit.document_id.short(),
            hit.chunk_id
        ));
        out.push_str(&format!(
            "     {}\n",
            text_util::preview(&hit.text, text_util::DEFAULT_PREVIEW_CHARS)
        ));
    }
    out.push_str(&format!("\n{} result(s)\n", hits.len()));
    out
}

/// Format results as a JSON document.
pub fn format_json(hits: &[SearchHit], query: &str) -> serde_json::Result<String> {
    serde_json::to_string(&JsonOutput {
        query,
        result_count: hits.len(),
        results: hits
            .iter()
            .enumerate()
            .map(|(i, hit)| JsonHit { rank: i + 1, hit })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: u64, distance: f32) -> SearchHit {
        SearchHit {
            chunk_id,
            text: "gamma delta epsilon".into(),
            document_id: "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap(),
            filename: "greek.txt".into(),
            distance,
        }
    }

    #[test]
    fn human_output_lists_hits() {
        let out = format_human(&[hit(1, 0.0), hit(0, 0.5)]);
        assert!(out.contains("  1. [0.0000] greek.txt #67e55044 chunk 1"));
        assert!(out.contains("gamma delta epsilon"));
        assert!(out.ends_with("2 result(s)\n"));
    }

    #[test]
    fn human_output_empty() {
        assert_eq!(format_human(&[]), "No results found.\n");
    }

    #[test]
    fn json_output_shape() {
        let json = format_json(&[hit(1, 0.25)], "greek").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["query"], "greek");
        assert_eq!(value["result_count"], 1);
        assert_eq!(value["results"][0]["rank"], 1);
        assert_eq!(value["results"][0]["chunk_id"], 1);
        assert_eq!(
            value["results"][0]["document_id"],
            "67e55044-10b1-426f-9247-bb680e5fe0c8"
        );
        assert_eq!(value["results"][0]["distance"], 0.25);
    }
}

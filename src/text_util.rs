/// Default length of a preview in characters, before the ellipsis.
pub const DEFAULT_PREVIEW_CHARS: usize = 160;

/// Normalize extracted text before chunking.
///
/// Control characters are dropped (line breaks and tabs count as
/// whitespace), whitespace runs collapse to one space and the ends are
/// trimmed.
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else if c.is_control() {
            continue;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }

    out
}

/// Single-line preview of at most `max_chars` characters, with `...`
/// appended when anything was cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = clean_text(text);
    if flat.chars().count() <= max_chars {
        return flat;
    }

    let mut cut: String = flat.chars().take(max_chars).collect();
    // Prefer ending on a word boundary.
    if let Some(pos) = cut.rfind(' ')
        && pos > 0
    {
        cut.truncate(pos);
    }
    cut.push_str("...");
    cut
}

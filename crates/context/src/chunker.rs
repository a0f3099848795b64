//! Paragraph-boundary text splitting for plain-text ingestion.
//!
//! Paragraphs (separated by blank lines) are packed greedily into pieces of
//! at most `max_tokens` under the heuristic counter. A paragraph that alone
//! exceeds the limit is hard-split, preferring a newline or space near the
//! limit and always on a UTF-8 character boundary.

use crate::token::estimate_tokens;

const BYTES_PER_TOKEN: usize = 4;

/// Split `text` into chunk-sized pieces, in document order.
///
/// Blank input yields no pieces. Every piece is trimmed and non-empty.
pub fn split_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_bytes = max_tokens.max(1) * BYTES_PER_TOKEN;
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let joined_len = if buf.is_empty() {
            paragraph.len()
        } else {
            buf.len() + 2 + paragraph.len()
        };
        if joined_len > max_bytes && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if paragraph.len() > max_bytes {
            hard_split(paragraph, max_bytes, &mut pieces);
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(paragraph);
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    debug_assert!(pieces.iter().all(|p| estimate_tokens(p) <= max_tokens.max(1)));
    pieces
}

fn hard_split(mut remaining: &str, max_bytes: usize, pieces: &mut Vec<String>) {
    while !remaining.is_empty() {
        let mut cut = floor_char_boundary(remaining, max_bytes);
        if cut < remaining.len() {
            if let Some(ws) = remaining[..cut].rfind(['\n', ' ']).filter(|&ws| ws > 0) {
                cut = ws + 1;
            }
        }
        if cut == 0 {
            // A single character wider than the limit.
            cut = remaining
                .char_indices()
                .nth(1)
                .map_or(remaining.len(), |(i, _)| i);
        }

        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[cut..];
    }
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

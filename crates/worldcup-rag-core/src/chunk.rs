//! Multi-granularity text chunker.
//!
//! Splits text into overlapping [`Chunk`]s at every configured
//! [`ChunkLevel`] (small, medium, large by default). All levels are always
//! produced and indexed side by side: small chunks give precise single-fact
//! matches, large chunks keep enough neighbouring facts for comparison
//! questions.
//!
//! # Algorithm
//!
//! Sizes and overlaps are measured in characters.
//!
//! 1. If the text fits in `size`, emit it unsplit as the only chunk.
//! 2. Otherwise look for the last semantic boundary (paragraph, line,
//!    sentence terminator, `;`, `,`, whitespace) in the back half of the
//!    window and end the chunk right after it; fall back to a hard cut.
//! 3. Start the next chunk `overlap` characters before that end, moved
//!    forward to the next whitespace so it does not open mid-token.
//!
//! Each chunk is an exact slice of the input, and records how many leading
//! characters it shares with its predecessor, so [`reassemble`] rebuilds
//! the input losslessly.
//!
//! # Example
//!
//! ```rust
//! use worldcup_rag_core::chunk::{chunk_all, default_levels};
//!
//! let chunks = chunk_all("Quem foi campeão em 2022? Argentina.", &["2022-champion-03".into()], &default_levels());
//! assert_eq!(chunks.len(), 3); // one per level
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{Chunk, Granularity};

/// Separators tried in order of preference when ending a chunk.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "? ", "! ", "; ", ", ", " "];

/// One granularity level: target size and overlap, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLevel {
    #[serde(rename = "name")]
    pub granularity: Granularity,
    pub size: usize,
    pub overlap: usize,
}

/// Small 300/50, medium 800/150, large 1500/250.
pub fn default_levels() -> Vec<ChunkLevel> {
    vec![
        ChunkLevel {
            granularity: Granularity::Small,
            size: 300,
            overlap: 50,
        },
        ChunkLevel {
            granularity: Granularity::Medium,
            size: 800,
            overlap: 150,
        },
        ChunkLevel {
            granularity: Granularity::Large,
            size: 1500,
            overlap: 250,
        },
    ]
}

/// Chunk `text` at every level. `source_ids` is attached to every chunk.
pub fn chunk_all(text: &str, source_ids: &[String], levels: &[ChunkLevel]) -> Vec<Chunk> {
    levels
        .iter()
        .flat_map(|level| chunk_level(text, source_ids, level))
        .collect()
}

/// Chunk a document assembled from several statements. `spans` gives each
/// statement's id and character range in `text`; every chunk lists the ids
/// whose span it overlaps, in document order.
pub fn chunk_document(
    text: &str,
    spans: &[(String, std::ops::Range<usize>)],
    levels: &[ChunkLevel],
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for level in levels {
        for (start, end, overlap) in split_ranges(text, level) {
            let ids: Vec<String> = spans
                .iter()
                .filter(|(_, r)| r.start < end && start < r.end)
                .map(|(id, _)| id.clone())
                .collect();
            chunks.push(make_chunk(
                slice_chars(text, start, end),
                ids,
                level.granularity,
                start,
                overlap,
            ));
        }
    }
    chunks
}

/// Chunk `text` at a single level.
pub fn chunk_level(text: &str, source_ids: &[String], level: &ChunkLevel) -> Vec<Chunk> {
    split_ranges(text, level)
        .into_iter()
        .map(|(start, end, overlap)| {
            make_chunk(
                slice_chars(text, start, end),
                source_ids.to_vec(),
                level.granularity,
                start,
                overlap,
            )
        })
        .collect()
}

/// Rebuild the original text from one level's chunks, in order.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.extend(chunk.text.chars().skip(chunk.overlap));
    }
    out
}

/// Compute `(start, end, overlap)` character ranges for one level.
fn split_ranges(text: &str, level: &ChunkLevel) -> Vec<(usize, usize, usize)> {
    // bounds[i] is the byte offset of char i; the last entry is text.len()
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = bounds.len() - 1;
    let size = level.size.max(1);
    let overlap = level.overlap.min(size.saturating_sub(1));

    if n_chars <= size {
        return vec![(0, n_chars, 0)];
    }

    let mut ranges = Vec::new();
    let mut start = 0;
    let mut shared = 0;

    loop {
        let limit = start + size;
        if limit >= n_chars {
            ranges.push((start, n_chars, shared));
            break;
        }

        let end = find_break(text, &bounds, start + size / 2, limit).unwrap_or(limit);
        ranges.push((start, end, shared));

        let mut next = end.saturating_sub(overlap).max(start + 1);
        if next < end {
            next = skip_to_word(text, &bounds, next, end);
        }
        shared = end - next;
        start = next;
    }

    ranges
}

/// Last separator end in chars `[lo, hi)`, by separator preference.
fn find_break(text: &str, bounds: &[usize], lo: usize, hi: usize) -> Option<usize> {
    let window = &text[bounds[lo]..bounds[hi]];
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let byte = bounds[lo] + pos + sep.len();
            if let Ok(ch) = bounds.binary_search(&byte) {
                if ch > lo {
                    return Some(ch);
                }
            }
        }
    }
    None
}

/// Move `from` forward to just after the next whitespace before `end`.
/// Returns `end` when the remainder is a single token.
fn skip_to_word(text: &str, bounds: &[usize], from: usize, end: usize) -> usize {
    if from == 0 || is_space_at(text, bounds, from - 1) {
        return from;
    }
    (from..end)
        .find(|&i| is_space_at(text, bounds, i))
        .map(|i| i + 1)
        .unwrap_or(end)
}

fn is_space_at(text: &str, bounds: &[usize], ch: usize) -> bool {
    text[bounds[ch]..bounds[ch + 1]]
        .chars()
        .next()
        .is_some_and(char::is_whitespace)
}

fn slice_chars(text: &str, start: usize, end: usize) -> &str {
    let mut indices = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len()));
    let from = indices.nth(start).unwrap_or(text.len());
    let to = if end > start {
        indices.nth(end - start - 1).unwrap_or(text.len())
    } else {
        from
    };
    &text[from..to]
}

fn make_chunk(
    text: &str,
    source_statement_ids: Vec<String>,
    granularity: Granularity,
    offset: usize,
    overlap: usize,
) -> Chunk {
    Chunk {
        id: chunk_id(granularity, text),
        text: text.to_string(),
        source_statement_ids,
        granularity,
        byte_length: text.len(),
        offset,
        overlap,
    }
}

/// Deterministic chunk id: SHA-256 over granularity and text.
pub fn chunk_id(granularity: Granularity, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(granularity.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

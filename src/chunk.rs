//! Section-aware chunker for legal documents.
//!
//! Text is first cut into sections at legal headings (`Section 4.2`,
//! `Article IV`, `EXHIBIT A`, `12 GOVERNING LAW`, ...). Short sections
//! become a single chunk; long ones are split at clause bullets and
//! packed into chunks between `min_tokens` and `max_tokens`, each carrying
//! a word overlap from its predecessor.
//!
//! Token counts are estimates (`words / 0.75`), not tokenizer output.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Slack above `max_tokens` before a chunk is flushed unconditionally.
const FORCE_FLUSH_SLACK: usize = 200;
/// Headers of single-line sections are cut to this many characters.
const HEADER_MAX_CHARS: usize = 80;

static SECTION_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)^[ \t]*(?:Section\s+\d+(?:\.\d+)*|Article\s+[IVXLC]+\b|Clause\s+\d+(?:\.\d+)*|EXHIBIT\s+[A-Z]+\b|SCHEDULE\s+\w+|(?-i:[0-9]+(?:\.[0-9]+)*\s+[A-Z][A-Z ]{3,}))",
    )
    .expect("section boundary pattern is valid")
});

static BULLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:\([a-zA-Z0-9]+\)|\d+\.\d+|\d+\)|[ivxlcdm]+\))\s+")
        .expect("bullet pattern is valid")
});

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n+").expect("blank-run pattern is valid"));

static INLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("inline-space pattern is valid"));

/// A contiguous slice of a document starting at a legal heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub header: Option<String>,
    pub content: String,
}

/// Normalizes extracted text: at most one blank line between paragraphs,
/// single spaces within lines.
pub fn clean_text(text: &str) -> String {
    let text = BLANK_RUNS.replace_all(text, "\n\n");
    let text = INLINE_SPACE.replace_all(&text, " ");
    text.trim().to_string()
}

pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    ((words as f64 / 0.75) as usize).max(1)
}

/// Splits text at section headings. Text before the first heading is kept
/// as a header-less preamble section.
pub fn split_sections(text: &str) -> Vec<Section> {
    let mut starts: Vec<usize> = SECTION_BOUNDARY.find_iter(text).map(|m| m.start()).collect();
    let Some(&first) = starts.first() else {
        return vec![Section {
            header: None,
            content: text.trim().to_string(),
        }];
    };

    let mut sections = Vec::new();
    let preamble = text[..first].trim();
    if !preamble.is_empty() {
        sections.push(Section {
            header: None,
            content: preamble.to_string(),
        });
    }

    starts.push(text.len());
    for window in starts.windows(2) {
        let content = text[window[0]..window[1]].trim();
        if content.is_empty() {
            continue;
        }
        let header = match content.find('\n') {
            Some(end) => content[..end].trim().to_string(),
            None => content.chars().take(HEADER_MAX_CHARS).collect(),
        };
        sections.push(Section {
            header: Some(header),
            content: content.to_string(),
        });
    }
    sections
}

/// Splits one long section into overlapping chunks.
pub fn chunk_section(section: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let parts: Vec<&str> = BULLET.split(section).collect();
    let parts = if parts.len() <= 1 { vec![section] } else { parts };

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let part_tokens = estimate_tokens(part);

        if current_tokens + part_tokens > cfg.max_tokens && !current.is_empty() {
            flush(&mut chunks, &mut current);
            let overlap = chunks
                .last()
                .map(|last| tail_words(last, cfg.overlap_tokens))
                .unwrap_or_default();
            current_tokens = part_tokens;
            if !overlap.is_empty() {
                current_tokens += estimate_tokens(&overlap);
                current.push(overlap);
            }
            current.push(part.to_string());
        } else {
            current.push(part.to_string());
            current_tokens += part_tokens;
        }

        if current_tokens > cfg.max_tokens + FORCE_FLUSH_SLACK {
            flush(&mut chunks, &mut current);
            current_tokens = 0;
        }
    }
    flush(&mut chunks, &mut current);

    let mut merged: Vec<String> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some(prev)
                if estimate_tokens(prev) < cfg.min_tokens
                    && estimate_tokens(&chunk) < cfg.min_tokens =>
            {
                prev.push(' ');
                prev.push_str(&chunk);
            }
            _ => merged.push(chunk),
        }
    }
    merged
}

fn flush(chunks: &mut Vec<String>, current: &mut Vec<String>) {
    let text = current.join(" ");
    let text = text.trim();
    if !text.is_empty() {
        chunks.push(text.to_string());
    }
    current.clear();
}

/// The last `n` words of `text`, or all of it when shorter.
fn tail_words(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= n {
        return text.to_string();
    }
    words[words.len() - n..].join(" ")
}

/// Chunks a whole document. Indices are contiguous from 0 across sections.
/// Empty text yields no chunks.
pub fn chunk_document(
    file_upload_id: &str,
    filename: &str,
    text: &str,
    cfg: &ChunkingConfig,
) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for (section_index, section) in split_sections(text).into_iter().enumerate() {
        let pieces = if estimate_tokens(&section.content) <= cfg.section_max_tokens {
            vec![section.content.clone()]
        } else {
            chunk_section(&section.content, cfg)
        };

        for (clause_index, piece) in pieces.into_iter().enumerate() {
            out.push(make_chunk(
                file_upload_id,
                out.len() as i64,
                section.header.clone(),
                section_index as i64,
                clause_index as i64,
                piece,
            ));
        }
    }

    tracing::debug!(file = filename, chunks = out.len(), "chunked document");
    out
}

fn make_chunk(
    file_upload_id: &str,
    chunk_index: i64,
    section_header: Option<String>,
    section_index: i64,
    clause_index: i64,
    text: String,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        file_upload_id: file_upload_id.to_string(),
        chunk_index,
        section_header,
        section_index,
        clause_index,
        chunk_tokens: estimate_tokens(&text) as i64,
        text,
        hash,
    }
}

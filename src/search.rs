//! Full-text search over analysis summaries and redline issues.
//!
//! Both FTS5 tables are queried with the same match expression and the hits
//! merged by BM25 rank (negated so higher is better).

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    Summary,
    Redline,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub kind: HitKind,
    pub analysis_id: String,
    pub filename: String,
    pub snippet: String,
    pub score: f64,
}

/// Quotes each whitespace-separated term so user input never reaches the
/// FTS5 query parser as syntax. Terms are ANDed.
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term))
        .collect::<Vec<_>>()
        .join(" ")
}

pub async fn search(pool: &SqlitePool, query: &str, limit: Option<i64>) -> Result<Vec<SearchHit>> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        bail!("limit must be between 1 and {}", MAX_LIMIT);
    }
    let expr = fts_query(query);
    if expr.is_empty() {
        return Ok(Vec::new());
    }

    let mut hits = Vec::new();

    let rows = sqlx::query(
        r#"
        SELECT analysis_fts.analysis_id, fu.original_filename, analysis_fts.rank AS rank,
               snippet(analysis_fts, 1, '>>>', '<<<', '...', 32) AS snippet
        FROM analysis_fts
        JOIN document_analysis da ON da.id = analysis_fts.analysis_id
        JOIN file_uploads fu ON fu.id = da.file_upload_id
        WHERE analysis_fts MATCH ?
        ORDER BY analysis_fts.rank
        LIMIT ?
        "#,
    )
    .bind(&expr)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    for row in rows {
        let rank: f64 = row.get("rank");
        hits.push(SearchHit {
            kind: HitKind::Summary,
            analysis_id: row.get("analysis_id"),
            filename: row.get("original_filename"),
            snippet: row.get("snippet"),
            score: -rank,
        });
    }

    let rows = sqlx::query(
        r#"
        SELECT redlines_fts.analysis_id, fu.original_filename, redlines_fts.rank AS rank,
               snippet(redlines_fts, 2, '>>>', '<<<', '...', 32) AS snippet
        FROM redlines_fts
        JOIN document_analysis da ON da.id = redlines_fts.analysis_id
        JOIN file_uploads fu ON fu.id = da.file_upload_id
        WHERE redlines_fts MATCH ?
        ORDER BY redlines_fts.rank
        LIMIT ?
        "#,
    )
    .bind(&expr)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    for row in rows {
        let rank: f64 = row.get("rank");
        hits.push(SearchHit {
            kind: HitKind::Redline,
            analysis_id: row.get("analysis_id"),
            filename: row.get("original_filename"),
            snippet: row.get("snippet"),
            score: -rank,
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit as usize);
    Ok(hits)
}

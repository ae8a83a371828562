//! Persistence and retrieval of analysis results.
//!
//! A folder run is stored as one completed `full_pipeline` job under a
//! synthetic deal (`Pipeline Run <id8>`) of a company named after the
//! folder. Each analyzed file gets its own `file_uploads` row in the
//! `pipeline_upload` bucket at `pipeline/{id8}/{name}`, a
//! `document_analysis` row, its redlines, common grounds, chunks and a
//! `vector_metadata` row. Upload rows created by `upload_file` are never
//! touched by a folder run, even when the run read the same object.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::migrate::NOW;
use crate::models::{
    Classification, CommonGround, ContractType, DetectedType, DocumentResult, JobStatus, Redline,
    Severity, UploadStatus,
};
use crate::pipeline::{PipelineRun, ProcessedFile};
use crate::records;

pub const PIPELINE_JOB_TYPE: &str = "full_pipeline";
pub const PIPELINE_DEAL_TYPE: &str = "pipeline_processing";
/// `file_uploads.gcs_bucket` of rows written by folder runs.
pub const PIPELINE_BUCKET: &str = "pipeline_upload";
/// Value of `vector_metadata.index_name` for chunks stored in SQLite.
pub const CHUNK_INDEX_NAME: &str = "chunks";

/// A stored folder run, as returned by `GET /pipeline/results/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPipeline {
    pub pipeline_id: String,
    pub company_name: Option<String>,
    pub deal_name: Option<String>,
    pub status: String,
    pub created_at: String,
    pub results: BTreeMap<String, DocumentResult>,
}

/// `acme_corp_123` → `Acme Corp`; the last path segment is used.
pub fn company_name_from_folder(folder: &str) -> String {
    let last = folder
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let stem = match last.rfind('_') {
        Some(idx) if idx + 1 < last.len() && last[idx + 1..].bytes().all(|b| b.is_ascii_digit()) => {
            &last[..idx]
        }
        _ => last,
    };
    let name = title_case(&stem.replace('_', " "));
    if name.trim().is_empty() {
        "Unknown Company".to_string()
    } else {
        name
    }
}

/// Upper-cases the first letter of each alphabetic run, lower-cases the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Stores a folder run in one transaction and returns the pipeline id
/// (the id of its `full_pipeline` job).
pub async fn store_pipeline_results(
    pool: &SqlitePool,
    bucket: &str,
    folder: &str,
    run: &PipelineRun,
) -> Result<String> {
    let pipeline_id = Uuid::new_v4().to_string();
    let company_name = company_name_from_folder(folder);
    let deal_name = format!("Pipeline Run {}", &pipeline_id[..8]);

    let mut tx = pool.begin().await?;
    let (company_id, _) = records::get_or_create_company(&mut *tx, &company_name).await?;
    let (deal_id, _) =
        records::get_or_create_deal(&mut *tx, &company_id, &deal_name, Some(PIPELINE_DEAL_TYPE))
            .await?;

    let metadata = serde_json::json!({
        "bucket": bucket,
        "folder": folder,
        "deal_id": deal_id,
        "summary": run.report.summary,
    });
    let status = if run.report.status == "failed" {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    };
    sqlx::query(&format!(
        "INSERT INTO processing_jobs (id, file_upload_id, job_type, status, started_at, completed_at, error_message, metadata) \
         VALUES (?, NULL, ?, ?, {NOW}, {NOW}, ?, ?)"
    ))
    .bind(&pipeline_id)
    .bind(PIPELINE_JOB_TYPE)
    .bind(status.as_str())
    .bind(run.report.errors.first())
    .bind(metadata.to_string())
    .execute(&mut *tx)
    .await?;

    for file in &run.files {
        let upload_id = insert_pipeline_upload(&mut *tx, &deal_id, bucket, file, &pipeline_id).await?;
        store_document_analysis(&mut *tx, &upload_id, Some(&pipeline_id), file).await?;
    }

    tx.commit().await.context("committing pipeline results")?;
    tracing::info!(pipeline_id = %pipeline_id, files = run.files.len(), "stored pipeline results");
    Ok(pipeline_id)
}

fn pipeline_object_path(pipeline_id: &str, result_key: &str) -> String {
    format!("pipeline/{}/{}", &pipeline_id[..8], result_key)
}

/// Records a file of a folder run under the run's own path. Where the
/// bytes came from is kept in the row's metadata.
async fn insert_pipeline_upload(
    conn: &mut SqliteConnection,
    deal_id: &str,
    source_bucket: &str,
    file: &ProcessedFile,
    pipeline_id: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let metadata = serde_json::json!({
        "source": "pipeline",
        "pipeline_id": pipeline_id,
        "source_bucket": source_bucket,
        "source_path": file.object_path,
    });
    sqlx::query(
        r#"
        INSERT INTO file_uploads (id, deal_id, original_filename, gcs_bucket, gcs_path, file_size, mime_type, file_hash, upload_status, metadata)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(deal_id)
    .bind(&file.filename)
    .bind(PIPELINE_BUCKET)
    .bind(pipeline_object_path(pipeline_id, &file.result_key))
    .bind(file.size as i64)
    .bind(&file.mime_type)
    .bind(&file.file_hash)
    .bind(UploadStatus::Completed.as_str())
    .bind(metadata.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(id)
}

/// Writes the analysis of one file: `document_analysis`, redlines, common
/// grounds, chunks (replacing any previous chunks of the upload) and
/// `vector_metadata`. Returns the analysis id.
pub async fn store_document_analysis(
    conn: &mut SqliteConnection,
    file_upload_id: &str,
    processing_job_id: Option<&str>,
    file: &ProcessedFile,
) -> Result<String> {
    let analysis_id = Uuid::new_v4().to_string();
    let analysis = &file.analysis;
    let classification = &analysis.classification;

    sqlx::query(
        r#"
        INSERT INTO document_analysis (
            id, file_upload_id, processing_job_id, detected_type, extraction_engine,
            pages_processed, extraction_confidence, document_type, classification_confidence,
            key_topics, summary, word_count, character_count, contract_type,
            processing_log, warnings, errors, metadata
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&analysis_id)
    .bind(file_upload_id)
    .bind(processing_job_id)
    .bind(file.detected_type.as_str())
    .bind(file.extraction_engine.as_str())
    .bind(file.pages_processed as i64)
    .bind(1.0_f64)
    .bind(classification.kind.as_str())
    .bind(classification.confidence)
    .bind(serde_json::to_string(&classification.key_topics)?)
    .bind(&analysis.summary)
    .bind(file.word_count as i64)
    .bind(file.character_count as i64)
    .bind(analysis.contract_type.as_str())
    .bind(serde_json::to_string(&file.processing_log)?)
    .bind(serde_json::to_string(&file.warnings)?)
    .bind("[]")
    .bind(serde_json::json!({ "classification": classification }).to_string())
    .execute(&mut *conn)
    .await?;

    for redline in &analysis.redlines {
        sqlx::query(
            "INSERT INTO redlines (id, document_analysis_id, issue_description, severity, clause_reference, recommendation, category) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&analysis_id)
        .bind(&redline.issue)
        .bind(redline.severity.as_str())
        .bind(&redline.clause)
        .bind(&redline.recommendation)
        .bind(&redline.category)
        .execute(&mut *conn)
        .await?;
    }

    for ground in &analysis.common_grounds {
        sqlx::query(
            "INSERT INTO common_grounds (id, document_analysis_id, area, description, leverage, category) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&analysis_id)
        .bind(&ground.area)
        .bind(&ground.description)
        .bind(&ground.leverage)
        .bind(&ground.category)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query("DELETE FROM chunks WHERE file_upload_id = ?")
        .bind(file_upload_id)
        .execute(&mut *conn)
        .await?;
    for chunk in &file.chunks {
        sqlx::query(
            "INSERT INTO chunks (id, file_upload_id, chunk_index, section_header, section_index, clause_index, chunk_tokens, text, hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(file_upload_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.section_header)
        .bind(chunk.section_index)
        .bind(chunk.clause_index)
        .bind(chunk.chunk_tokens)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *conn)
        .await?;
    }

    let chunk_ids: Vec<&str> = file.chunks.iter().map(|c| c.id.as_str()).collect();
    sqlx::query(
        "INSERT INTO vector_metadata (id, document_analysis_id, vector_ids, chunk_count, embedding_model, index_name) \
         VALUES (?, ?, ?, ?, NULL, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&analysis_id)
    .bind(serde_json::to_string(&chunk_ids)?)
    .bind(file.chunks.len() as i64)
    .bind(CHUNK_INDEX_NAME)
    .execute(&mut *conn)
    .await?;

    Ok(analysis_id)
}

#[derive(sqlx::FromRow)]
struct AnalysisRow {
    id: String,
    original_filename: String,
    gcs_path: String,
    summary: Option<String>,
    document_type: Option<String>,
    classification_confidence: Option<f64>,
    key_topics: String,
    contract_type: Option<String>,
    extraction_engine: Option<String>,
    detected_type: Option<String>,
    metadata: String,
    chunk_count: Option<i64>,
}

/// Loads the `DocumentResult` of every analysis attached to `job_id`.
/// Folder runs are keyed as they were in the run's report; other
/// analyses by original filename.
pub async fn load_job_results(
    pool: &SqlitePool,
    job_id: &str,
) -> Result<BTreeMap<String, DocumentResult>> {
    let rows: Vec<AnalysisRow> = sqlx::query_as(
        r#"
        SELECT da.id, fu.original_filename, fu.gcs_path, da.summary, da.document_type,
               da.classification_confidence, da.key_topics, da.contract_type,
               da.extraction_engine, da.detected_type, da.metadata, vm.chunk_count
        FROM document_analysis da
        JOIN file_uploads fu ON da.file_upload_id = fu.id
        LEFT JOIN vector_metadata vm ON vm.document_analysis_id = da.id
        WHERE da.processing_job_id = ?
        ORDER BY fu.original_filename
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    let run_prefix = job_id.get(..8).map(|id8| format!("pipeline/{}/", id8));
    let mut results = BTreeMap::new();
    for row in rows {
        let redlines: Vec<(String, String, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT issue_description, severity, clause_reference, recommendation, category \
                 FROM redlines WHERE document_analysis_id = ? ORDER BY rowid",
            )
            .bind(&row.id)
            .fetch_all(pool)
            .await?;
        let grounds: Vec<(String, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT area, description, leverage, category \
                 FROM common_grounds WHERE document_analysis_id = ? ORDER BY rowid",
            )
            .bind(&row.id)
            .fetch_all(pool)
            .await?;

        let contract_type = parse_or(row.contract_type.as_deref(), ContractType::Unknown);
        let classification = stored_classification(&row).unwrap_or_else(|| Classification {
            kind: parse_or(row.document_type.as_deref(), ContractType::Unknown),
            confidence: row.classification_confidence.unwrap_or(0.0),
            subtype: None,
            key_topics: serde_json::from_str(&row.key_topics).unwrap_or_default(),
        });

        let result = DocumentResult {
            summary: row.summary.clone().unwrap_or_default(),
            classification,
            redlines: redlines
                .into_iter()
                .map(|(issue, severity, clause, recommendation, category)| Redline {
                    issue,
                    severity: parse_or(Some(&severity), Severity::Medium),
                    clause: clause.unwrap_or_default(),
                    recommendation: recommendation.unwrap_or_default(),
                    category: category.unwrap_or_else(crate::models::default_category),
                })
                .collect(),
            common_grounds: grounds
                .into_iter()
                .map(|(area, description, leverage, category)| CommonGround {
                    area,
                    description: description.unwrap_or_default(),
                    leverage: leverage.unwrap_or_default(),
                    category: category.unwrap_or_else(crate::models::default_category),
                })
                .collect(),
            contract_type,
            extraction_engine: row
                .extraction_engine
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            chunks_created: row.chunk_count.unwrap_or(0).max(0) as usize,
            file_type: parse_or(row.detected_type.as_deref(), DetectedType::Unknown),
        };
        let key = run_prefix
            .as_deref()
            .and_then(|prefix| row.gcs_path.strip_prefix(prefix))
            .map(str::to_string)
            .unwrap_or(row.original_filename);
        results.insert(key, result);
    }
    Ok(results)
}

fn stored_classification(row: &AnalysisRow) -> Option<Classification> {
    let meta: serde_json::Value = serde_json::from_str(&row.metadata).ok()?;
    serde_json::from_value(meta.get("classification")?.clone()).ok()
}

fn parse_or<T: FromStr>(value: Option<&str>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Reassembles a stored folder run. `None` if no pipeline job has this id.
pub async fn get_pipeline_results(pool: &SqlitePool, pipeline_id: &str) -> Result<Option<StoredPipeline>> {
    let job: Option<(String, Option<String>, String, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT pj.status, pj.started_at, pj.created_at, c.name, d.deal_name
        FROM processing_jobs pj
        LEFT JOIN deals d ON d.id = json_extract(pj.metadata, '$.deal_id')
        LEFT JOIN companies c ON c.id = d.company_id
        WHERE pj.id = ? AND pj.job_type = ?
        "#,
    )
    .bind(pipeline_id)
    .bind(PIPELINE_JOB_TYPE)
    .fetch_optional(pool)
    .await?;

    let Some((status, started_at, created_at, company_name, deal_name)) = job else {
        return Ok(None);
    };

    Ok(Some(StoredPipeline {
        pipeline_id: pipeline_id.to_string(),
        company_name,
        deal_name,
        status,
        created_at: started_at.unwrap_or(created_at),
        results: load_job_results(pool, pipeline_id).await?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{run_pipeline, tests::test_context};

    #[test]
    fn company_name_derivation() {
        assert_eq!(company_name_from_folder("clients/acme_corp_123"), "Acme Corp");
        assert_eq!(company_name_from_folder("globex/"), "Globex");
        assert_eq!(company_name_from_folder("big_deal_v2"), "Big Deal V2");
        assert_eq!(company_name_from_folder("initech_2024_07"), "Initech 2024");
        assert_eq!(company_name_from_folder(""), "Unknown Company");
    }

    #[tokio::test]
    async fn pipeline_results_round_trip_through_storage() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = test_context(tmp.path()).await;
        ctx.store
            .put(
                "b",
                "acme_corp_7/vendor_msa.txt",
                b"Section 1 Services\nThis agreement shall automatically renew.\nSection 2 Fees\nPayment within 30 days.",
                "text/plain",
            )
            .await
            .unwrap();

        let run = run_pipeline(&ctx, "b", "acme_corp_7").await.unwrap();
        let id = store_pipeline_results(&ctx.pool, "b", "acme_corp_7", &run)
            .await
            .unwrap();

        let stored = get_pipeline_results(&ctx.pool, &id).await.unwrap().unwrap();
        assert_eq!(stored.company_name.as_deref(), Some("Acme Corp"));
        assert_eq!(stored.deal_name, Some(format!("Pipeline Run {}", &id[..8])));
        assert_eq!(stored.status, "completed");
        assert_eq!(stored.results, run.report.results);

        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(chunks, 2);
    }

    #[tokio::test]
    async fn folder_run_leaves_existing_uploads_with_their_deal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = test_context(tmp.path()).await;
        let receipt = crate::upload::upload_file(
            &ctx,
            crate::upload::UploadRequest {
                filename: "a_nda.txt".to_string(),
                bytes: b"Mutual confidentiality.".to_vec(),
                company_name: "Acme".to_string(),
                deal_name: "Q3".to_string(),
                tags: Vec::new(),
                deal_type: None,
                bucket: None,
            },
        )
        .await
        .unwrap();
        let folder = receipt.gcs_path.rsplit_once('/').unwrap().0.to_string();

        for _ in 0..2 {
            let run = run_pipeline(&ctx, "client-context", &folder).await.unwrap();
            store_pipeline_results(&ctx.pool, "client-context", &folder, &run)
                .await
                .unwrap();
        }

        let status = crate::upload::get_upload_status(&ctx.pool, &receipt.file_upload_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.company_name.as_deref(), Some("Acme"));
        assert_eq!(status.deal_name.as_deref(), Some("Q3"));
        assert_eq!(status.gcs_path, receipt.gcs_path);

        let pipeline_rows: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM file_uploads WHERE gcs_bucket = ?")
                .bind(PIPELINE_BUCKET)
                .fetch_one(&ctx.pool)
                .await
                .unwrap();
        assert_eq!(pipeline_rows, 2);
    }

    #[tokio::test]
    async fn duplicate_names_survive_storage() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = test_context(tmp.path()).await;
        for path in ["f/nda.txt", "f/old/nda.txt"] {
            ctx.store
                .put("b", path, b"Mutual confidentiality.", "text/plain")
                .await
                .unwrap();
        }
        let run = run_pipeline(&ctx, "b", "f").await.unwrap();
        let id = store_pipeline_results(&ctx.pool, "b", "f", &run).await.unwrap();

        let stored = get_pipeline_results(&ctx.pool, &id).await.unwrap().unwrap();
        assert_eq!(stored.results, run.report.results);
        assert!(stored.results.contains_key("nda.txt (2)"));
    }

    #[tokio::test]
    async fn unknown_pipeline_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = test_context(tmp.path()).await;
        assert!(get_pipeline_results(&ctx.pool, "missing").await.unwrap().is_none());
    }
}

//! Document pipeline orchestration.
//!
//! Each stored file goes through: download → detect → extract → clean →
//! chunk → analyze. [`run_pipeline`] does this for every object under a
//! bucket folder; [`process_upload`] does it for one recorded upload and
//! drives its processing job and upload status.
//!
//! A bad file never aborts a run. Skips and failures become entries in
//! the report's `warnings` / `errors`, and the remaining files continue.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::analysis::{self, Analysis, AnalysisInput, Analyzer};
use crate::chunk;
use crate::config::Config;
use crate::db;
use crate::detect::{self, Disposition};
use crate::extract::{self, ExtractionEngine};
use crate::migrate;
use crate::models::{Chunk, DetectedType, DocumentResult, JobStatus, PipelineReport, UploadStatus};
use crate::records;
use crate::results;
use crate::storage::{self, ObjectStore};

/// Everything a request handler or CLI command needs to run operations.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub store: Arc<dyn ObjectStore>,
    pub analyzer: Arc<dyn Analyzer>,
}

impl AppContext {
    /// Opens the database (applying migrations) and builds the configured
    /// store and analyzer.
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::migrate_pool(&pool).await?;
        let store = storage::create_store(&config.storage)?;
        let analyzer = analysis::create_analyzer(&config.analysis)?;
        Ok(Self::new(config, pool, store, analyzer))
    }

    pub fn new(
        config: Config,
        pool: SqlitePool,
        store: Arc<dyn ObjectStore>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            store,
            analyzer,
        }
    }
}

/// One file that made it through every stage.
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub filename: String,
    /// Key of this file in the report's `results`; differs from
    /// `filename` when another file of the run has the same name.
    pub result_key: String,
    pub object_path: String,
    pub size: u64,
    pub file_hash: String,
    pub mime_type: String,
    pub detected_type: DetectedType,
    pub extraction_engine: ExtractionEngine,
    pub pages_processed: usize,
    pub word_count: usize,
    pub character_count: usize,
    pub chunks: Vec<Chunk>,
    pub analysis: Analysis,
    pub processing_log: Vec<String>,
    pub warnings: Vec<String>,
}

impl ProcessedFile {
    pub fn to_result(&self) -> DocumentResult {
        DocumentResult {
            summary: self.analysis.summary.clone(),
            classification: self.analysis.classification.clone(),
            redlines: self.analysis.redlines.clone(),
            common_grounds: self.analysis.common_grounds.clone(),
            contract_type: self.analysis.contract_type,
            extraction_engine: self.extraction_engine.as_str().to_string(),
            chunks_created: self.chunks.len(),
            file_type: self.detected_type,
        }
    }
}

/// Output of [`run_pipeline`]: the results payload plus the per-file
/// detail needed to persist it.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub report: PipelineReport,
    pub files: Vec<ProcessedFile>,
}

/// Outcome of [`process_upload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProcessing {
    pub file_upload_id: String,
    pub processing_job_id: String,
    pub analysis_id: Option<String>,
    pub report: PipelineReport,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn file_name_of(object_path: &str) -> &str {
    object_path.rsplit('/').next().unwrap_or(object_path)
}

/// Runs the pipeline over every object under `folder` in `bucket`.
pub async fn run_pipeline(ctx: &AppContext, bucket: &str, folder: &str) -> Result<PipelineRun> {
    let mut report = PipelineReport::new();
    let mut files = Vec::new();
    let prefix = storage::folder_prefix(folder);
    let location = format!("{}/{}", ctx.store.describe(bucket), prefix);

    report.log(format!("Starting folder processing for {}", location));

    let objects = match ctx.store.list(bucket, &prefix).await {
        Ok(objects) => objects,
        Err(e) => {
            report.status = "failed".to_string();
            report.error(format!("Failed to list {}: {:#}", location, e));
            return Ok(PipelineRun { report, files });
        }
    };
    if objects.is_empty() {
        report.status = "failed".to_string();
        report.error(format!("No files found in folder: {}", location));
        return Ok(PipelineRun { report, files });
    }
    report.log(format!("Found {} file(s)", objects.len()));

    let mut downloaded = 0usize;
    for object in &objects {
        let filename = file_name_of(&object.path).to_string();
        let bytes = match ctx.store.get(bucket, &object.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                report.error(format!("Failed to download {}: {:#}", filename, e));
                continue;
            }
        };
        downloaded += 1;

        let upload_id = uuid::Uuid::new_v4().to_string();
        if let Some(mut file) =
            process_bytes(ctx, &upload_id, &filename, &object.path, bytes, &mut report).await
        {
            report.summary.chunks_created += file.chunks.len();
            file.result_key = report.insert_result(&filename, file.to_result());
            files.push(file);
        }
    }

    report.summary.files_processed = downloaded;
    report.summary.documents_analyzed = report.results.len();
    report.log(format!(
        "Pipeline completed: {} file(s), {} chunk(s), {} document(s) analyzed",
        report.summary.files_processed,
        report.summary.chunks_created,
        report.summary.documents_analyzed
    ));
    Ok(PipelineRun { report, files })
}

/// Processes one stored upload now. Returns `None` if the upload does not
/// exist.
///
/// The upload's newest pending job is used, or a new `file_processing`
/// job is created. Job and upload statuses end `completed` when the file
/// was analyzed and `failed` otherwise.
pub async fn process_upload(ctx: &AppContext, file_upload_id: &str) -> Result<Option<UploadProcessing>> {
    let row: Option<(String, String, String)> = sqlx::query_as(
        "SELECT original_filename, gcs_bucket, gcs_path FROM file_uploads WHERE id = ?",
    )
    .bind(file_upload_id)
    .fetch_optional(&ctx.pool)
    .await?;
    let Some((filename, bucket, object_path)) = row else {
        return Ok(None);
    };

    let mut conn = ctx.pool.acquire().await?;
    let pending: Option<String> = sqlx::query_scalar(
        "SELECT id FROM processing_jobs WHERE file_upload_id = ? AND status = 'pending' \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(file_upload_id)
    .fetch_optional(&mut *conn)
    .await?;
    let job_id = match pending {
        Some(id) => id,
        None => records::create_processing_job(&mut conn, Some(file_upload_id), "file_processing").await?,
    };

    records::update_job_status(&mut conn, &job_id, JobStatus::Running, None).await?;
    records::set_upload_status(&mut conn, file_upload_id, UploadStatus::Processing).await?;
    drop(conn);

    let target = UploadTarget {
        file_upload_id,
        job_id: &job_id,
        filename: &filename,
        bucket: &bucket,
        object_path: &object_path,
    };
    match run_upload_job(ctx, &target).await {
        Ok((analysis_id, report)) => Ok(Some(UploadProcessing {
            file_upload_id: file_upload_id.to_string(),
            processing_job_id: job_id,
            analysis_id,
            report,
        })),
        Err(e) => {
            let reason = format!("{:#}", e);
            if let Err(mark) = mark_failed(&ctx.pool, &job_id, file_upload_id, &reason).await {
                tracing::error!(job_id = %job_id, error = %mark, "could not mark job failed");
            }
            Err(e)
        }
    }
}

#[derive(Clone, Copy)]
struct UploadTarget<'a> {
    file_upload_id: &'a str,
    job_id: &'a str,
    filename: &'a str,
    bucket: &'a str,
    object_path: &'a str,
}

/// Everything after the job went `running`. Any error returned here
/// leaves the job for the caller to mark failed.
async fn run_upload_job(
    ctx: &AppContext,
    target: &UploadTarget<'_>,
) -> Result<(Option<String>, PipelineReport)> {
    let UploadTarget {
        file_upload_id,
        job_id,
        filename,
        bucket,
        object_path,
    } = *target;

    let mut report = PipelineReport::new();
    report.log(format!("Processing upload {} ({})", file_upload_id, filename));

    let processed = match ctx.store.get(bucket, object_path).await {
        Ok(bytes) => {
            report.summary.files_processed = 1;
            process_bytes(ctx, file_upload_id, filename, object_path, bytes, &mut report).await
        }
        Err(e) => {
            report.error(format!("Failed to download {}: {:#}", filename, e));
            None
        }
    };

    let Some(file) = processed else {
        let reason = report
            .errors
            .last()
            .or(report.warnings.last())
            .cloned()
            .unwrap_or_else(|| "file produced no analysis".to_string());
        mark_failed(&ctx.pool, job_id, file_upload_id, &reason).await?;
        report.status = "failed".to_string();
        return Ok((None, report));
    };

    let mut tx = ctx.pool.begin().await?;
    let analysis_id = results::store_document_analysis(&mut *tx, file_upload_id, Some(job_id), &file)
        .await
        .context("storing document analysis")?;
    records::update_job_status(&mut *tx, job_id, JobStatus::Completed, None).await?;
    records::set_upload_status(&mut *tx, file_upload_id, UploadStatus::Completed).await?;
    tx.commit().await?;

    report.summary.chunks_created = file.chunks.len();
    report.summary.documents_analyzed = 1;
    report.insert_result(filename, file.to_result());
    Ok((Some(analysis_id), report))
}

async fn mark_failed(pool: &SqlitePool, job_id: &str, file_upload_id: &str, reason: &str) -> Result<()> {
    let mut conn = pool.acquire().await?;
    records::update_job_status(&mut conn, job_id, JobStatus::Failed, Some(reason)).await?;
    records::set_upload_status(&mut conn, file_upload_id, UploadStatus::Failed).await?;
    Ok(())
}

/// Runs detect → extract → chunk → analyze on one downloaded file.
/// Returns `None` when the file is skipped or fails; the reason is in
/// `report`.
async fn process_bytes(
    ctx: &AppContext,
    file_upload_id: &str,
    filename: &str,
    object_path: &str,
    bytes: Vec<u8>,
    report: &mut PipelineReport,
) -> Option<ProcessedFile> {
    let log_start = report.processing_log.len();
    let warn_start = report.warnings.len();

    let size = bytes.len() as u64;
    let file_hash = sha256_hex(&bytes);
    let mime_type = detect::guess_mime(filename).to_string();

    if size > ctx.config.limits.max_file_bytes {
        report.warn(format!("File {} too large: {} bytes", filename, size));
    }
    if detect::coarse_type(&mime_type) == DetectedType::Unknown {
        report.warn(format!("Unknown file type for {}: {}", filename, mime_type));
    }

    let detection = detect::refine(&bytes, filename, &mime_type);
    let detected_type = detection.detected_type;
    report.log(format!("Processed {}: {}, {} bytes", filename, detected_type, size));

    match Disposition::from(detected_type) {
        Disposition::Skip => {
            report.warn(format!("Skipping {}: {}", filename, detected_type));
            return None;
        }
        Disposition::Ocr if detected_type == DetectedType::Image => {
            report.warn(format!("ocr_unavailable:{}", filename));
            return None;
        }
        Disposition::Ocr => {
            report.warn(format!(
                "ocr_failed:{}:no OCR engine available, falling back to text extraction",
                filename
            ));
        }
        Disposition::Extract | Disposition::Excel => {}
    }

    let extraction = match extract::extract_document(&bytes, detected_type) {
        Ok(extraction) => extraction,
        Err(e) => {
            report.warn(format!("extraction_failed:{}:{}", filename, e));
            return None;
        }
    };
    drop(bytes);

    let text = chunk::clean_text(&extraction.text);
    report.log(format!(
        "Extracted {} characters from {} using {}",
        text.chars().count(),
        filename,
        extraction.engine.as_str()
    ));

    let chunks = chunk::chunk_document(file_upload_id, filename, &text, &ctx.config.chunking);
    report.log(format!("Created {} chunks for {}", chunks.len(), filename));

    let input = AnalysisInput {
        filename,
        text: &text,
        chunk_count: chunks.len(),
    };
    let analysis = match ctx.analyzer.analyze(&input).await {
        Ok(analysis) => analysis,
        Err(e) => {
            report.error(format!("analysis_failed:{}:{:#}", filename, e));
            return None;
        }
    };
    for warning in &analysis.warnings {
        report.warn(warning.clone());
    }
    report.log(format!(
        "Analyzed {} with {}: {} ({} redlines)",
        filename,
        ctx.analyzer.name(),
        analysis.contract_type,
        analysis.redlines.len()
    ));

    Some(ProcessedFile {
        filename: filename.to_string(),
        result_key: filename.to_string(),
        object_path: object_path.to_string(),
        size,
        file_hash,
        mime_type,
        detected_type,
        extraction_engine: extraction.engine,
        pages_processed: extraction.pages_processed,
        word_count: text.split_whitespace().count(),
        character_count: text.chars().count(),
        chunks,
        analysis,
        processing_log: report.processing_log[log_start..].to_vec(),
        warnings: report.warnings[warn_start..].to_vec(),
    })
}

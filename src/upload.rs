//! File uploads: store the bytes, record the upload, queue processing.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::detect;
use crate::migrate::NOW;
use crate::models::UploadStatus;
use crate::pipeline::{sha256_hex, AppContext};
use crate::records;
use crate::storage;

pub const UPLOAD_JOB_TYPE: &str = "file_upload";
pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Invalid(String),
    #[error("file is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for UploadError {
    fn from(e: sqlx::Error) -> Self {
        Self::Internal(e.into())
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub company_name: String,
    pub deal_name: String,
    pub tags: Vec<String>,
    pub deal_type: Option<String>,
    /// Defaults to `storage.default_bucket`.
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub status: String,
    pub file_upload_id: String,
    pub processing_job_id: String,
    pub company_id: String,
    pub deal_id: String,
    pub gcs_path: String,
    pub filename: String,
    pub file_size: u64,
    pub file_hash: String,
    pub is_new_company: bool,
    pub is_new_deal: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UploadStatusView {
    pub file_upload_id: String,
    pub filename: String,
    pub gcs_bucket: String,
    pub gcs_path: String,
    pub file_size: i64,
    pub file_hash: String,
    pub upload_status: String,
    pub processing_status: Option<String>,
    pub company_name: Option<String>,
    pub deal_name: Option<String>,
    pub uploaded_at: String,
    pub processing_started_at: Option<String>,
    pub processing_completed_at: Option<String>,
    pub error_message: Option<String>,
    #[sqlx(skip)]
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UploadSummary {
    pub id: String,
    pub original_filename: String,
    pub gcs_path: String,
    pub file_size: i64,
    pub upload_status: String,
    pub created_at: String,
    pub company_name: Option<String>,
    pub deal_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UploadFilter {
    pub company_name: Option<String>,
    pub deal_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadList {
    pub uploads: Vec<UploadSummary>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Splits a comma-separated tag list, dropping blanks.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stores a file for a company/deal, creating either if needed, and queues
/// a pending `file_upload` job.
///
/// Re-uploading the same filename to the same deal replaces the stored
/// object and resets the existing upload row to `uploaded`. A failure
/// after the object is written leaves it in place; the next upload of
/// the same name overwrites it.
pub async fn upload_file(ctx: &AppContext, req: UploadRequest) -> Result<UploadReceipt, UploadError> {
    let company_name = req.company_name.trim();
    let deal_name = req.deal_name.trim();
    if company_name.is_empty() {
        return Err(UploadError::Invalid("company_name must not be empty".into()));
    }
    if deal_name.is_empty() {
        return Err(UploadError::Invalid("deal_name must not be empty".into()));
    }
    let filename = storage::sanitize_filename(&req.filename);
    if filename.is_empty() {
        return Err(UploadError::Invalid("filename must not be empty".into()));
    }
    if req.bytes.is_empty() {
        return Err(UploadError::Invalid("file is empty".into()));
    }
    let size = req.bytes.len() as u64;
    let limit = ctx.config.limits.max_file_bytes;
    if size > limit {
        return Err(UploadError::TooLarge { size, limit });
    }

    let bucket = req
        .bucket
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(ctx.config.storage.default_bucket.as_str())
        .to_string();
    let deal_type = req
        .deal_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let mime = detect::guess_mime(&filename);
    let file_hash = sha256_hex(&req.bytes);

    // The object store write must not run under the SQLite write lock.
    let mut tx = ctx.pool.begin().await?;
    let (company_id, is_new_company) = records::get_or_create_company(&mut *tx, company_name).await?;
    let (deal_id, is_new_deal) =
        records::get_or_create_deal(&mut *tx, &company_id, deal_name, deal_type).await?;
    tx.commit().await?;

    let gcs_path = storage::object_path(&company_id, &deal_id, &filename);
    ctx.store
        .put(&bucket, &gcs_path, &req.bytes, mime)
        .await
        .with_context(|| format!("uploading to {}/{}", ctx.store.describe(&bucket), gcs_path))?;

    let metadata = serde_json::json!({
        "content_type": mime,
        "file_size": size,
        "upload_source": "api",
        "uploaded_at": chrono::Utc::now().to_rfc3339(),
    });
    let mut tx = ctx.pool.begin().await?;
    sqlx::query(&format!(
        r#"
        INSERT INTO file_uploads (id, deal_id, original_filename, gcs_bucket, gcs_path, file_size, mime_type, file_hash, upload_status, metadata)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(gcs_bucket, gcs_path) DO UPDATE SET
            file_size = excluded.file_size,
            mime_type = excluded.mime_type,
            file_hash = excluded.file_hash,
            upload_status = excluded.upload_status,
            metadata = excluded.metadata,
            updated_at = {NOW}
        "#
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(&deal_id)
    .bind(&filename)
    .bind(&bucket)
    .bind(&gcs_path)
    .bind(size as i64)
    .bind(mime)
    .bind(&file_hash)
    .bind(UploadStatus::Uploaded.as_str())
    .bind(metadata.to_string())
    .execute(&mut *tx)
    .await?;

    let file_upload_id: String =
        sqlx::query_scalar("SELECT id FROM file_uploads WHERE gcs_bucket = ? AND gcs_path = ?")
            .bind(&bucket)
            .bind(&gcs_path)
            .fetch_one(&mut *tx)
            .await?;

    let tag_ids = records::ensure_tags(&mut *tx, &req.tags).await?;
    records::link_tags(&mut *tx, &file_upload_id, &tag_ids).await?;
    let processing_job_id =
        records::create_processing_job(&mut *tx, Some(&file_upload_id), UPLOAD_JOB_TYPE).await?;
    tx.commit().await?;

    tracing::info!(
        file_upload_id = %file_upload_id,
        company = company_name,
        deal = deal_name,
        bytes = size,
        "stored upload"
    );

    Ok(UploadReceipt {
        status: "success".to_string(),
        file_upload_id,
        processing_job_id,
        company_id,
        deal_id,
        gcs_path,
        filename,
        file_size: size,
        file_hash,
        is_new_company,
        is_new_deal,
        message: "File uploaded successfully and queued for processing".to_string(),
    })
}

/// Upload row joined with its newest processing job, company, deal and tags.
pub async fn get_upload_status(
    pool: &SqlitePool,
    file_upload_id: &str,
) -> anyhow::Result<Option<UploadStatusView>> {
    let view: Option<UploadStatusView> = sqlx::query_as(
        r#"
        SELECT fu.id AS file_upload_id,
               fu.original_filename AS filename,
               fu.gcs_bucket, fu.gcs_path, fu.file_size, fu.file_hash, fu.upload_status,
               pj.status AS processing_status,
               c.name AS company_name,
               d.deal_name,
               fu.created_at AS uploaded_at,
               pj.started_at AS processing_started_at,
               pj.completed_at AS processing_completed_at,
               pj.error_message
        FROM file_uploads fu
        LEFT JOIN processing_jobs pj ON pj.id = (
            SELECT id FROM processing_jobs
            WHERE file_upload_id = fu.id
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
        )
        LEFT JOIN deals d ON fu.deal_id = d.id
        LEFT JOIN companies c ON d.company_id = c.id
        WHERE fu.id = ?
        "#,
    )
    .bind(file_upload_id)
    .fetch_optional(pool)
    .await?;

    let Some(mut view) = view else {
        return Ok(None);
    };
    view.tags = sqlx::query_scalar(
        "SELECT t.name FROM file_tags t JOIN file_upload_tags ut ON ut.tag_id = t.id \
         WHERE ut.file_upload_id = ? ORDER BY t.name",
    )
    .bind(file_upload_id)
    .fetch_all(pool)
    .await?;
    Ok(Some(view))
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Lists uploads newest first. Filters are case-insensitive substring
/// matches on company and deal names.
pub async fn list_uploads(
    pool: &SqlitePool,
    filter: &UploadFilter,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<UploadList, UploadError> {
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let offset = offset.unwrap_or(0);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(UploadError::Invalid(format!(
            "limit must be between 1 and {}",
            MAX_LIST_LIMIT
        )));
    }
    if offset < 0 {
        return Err(UploadError::Invalid("offset must be >= 0".into()));
    }

    let mut conditions = Vec::new();
    let mut params = Vec::new();
    if let Some(company) = filter.company_name.as_deref().filter(|s| !s.is_empty()) {
        conditions.push("c.name LIKE ? ESCAPE '\\'");
        params.push(like_pattern(company));
    }
    if let Some(deal) = filter.deal_name.as_deref().filter(|s| !s.is_empty()) {
        conditions.push("d.deal_name LIKE ? ESCAPE '\\'");
        params.push(like_pattern(deal));
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let from = format!(
        "FROM file_uploads fu \
         LEFT JOIN deals d ON fu.deal_id = d.id \
         LEFT JOIN companies c ON d.company_id = c.id \
         {}",
        where_clause
    );

    let count_sql = format!("SELECT COUNT(*) {}", from);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let total_count = count_query.fetch_one(pool).await?;

    let list_sql = format!(
        "SELECT fu.id, fu.original_filename, fu.gcs_path, fu.file_size, fu.upload_status, \
                fu.created_at, c.name AS company_name, d.deal_name \
         {} ORDER BY fu.created_at DESC, fu.rowid DESC LIMIT ? OFFSET ?",
        from
    );
    let mut list_query = sqlx::query_as::<_, UploadSummary>(&list_sql);
    for p in &params {
        list_query = list_query.bind(p);
    }
    let uploads = list_query.bind(limit).bind(offset).fetch_all(pool).await?;

    Ok(UploadList {
        uploads,
        total_count,
        limit,
        offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::test_context;

    fn request(company: &str, deal: &str, filename: &str) -> UploadRequest {
        UploadRequest {
            filename: filename.to_string(),
            bytes: b"Mutual NDA text".to_vec(),
            company_name: company.to_string(),
            deal_name: deal.to_string(),
            tags: vec!["nda".into(), "urgent".into()],
            deal_type: Some("nda".into()),
            bucket: None,
        }
    }

    /// Local store whose `put` needs a pool connection of its own.
    struct PoolCheckingStore {
        inner: crate::storage::LocalStore,
        pool: SqlitePool,
    }

    #[async_trait::async_trait]
    impl crate::storage::ObjectStore for PoolCheckingStore {
        fn describe(&self, bucket: &str) -> String {
            self.inner.describe(bucket)
        }

        async fn put(&self, bucket: &str, path: &str, bytes: &[u8], mime: &str) -> anyhow::Result<()> {
            let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM companies")
                .fetch_one(&self.pool);
            tokio::time::timeout(std::time::Duration::from_secs(2), count)
                .await
                .map_err(|_| anyhow::anyhow!("database busy during object write"))??;
            self.inner.put(bucket, path, bytes, mime).await
        }

        async fn get(&self, bucket: &str, path: &str) -> anyhow::Result<Vec<u8>> {
            self.inner.get(bucket, path).await
        }

        async fn list(&self, bucket: &str, prefix: &str) -> anyhow::Result<Vec<crate::storage::ObjectInfo>> {
            self.inner.list(bucket, prefix).await
        }
    }

    #[test]
    fn parse_tags_drops_blanks() {
        assert_eq!(parse_tags("a, b,,c , "), vec!["a", "b", "c"]);
        assert!(parse_tags("").is_empty());
    }

    #[tokio::test]
    async fn upload_records_file_and_pending_job() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = test_context(tmp.path()).await;
        let receipt = upload_file(&ctx, request("Acme", "Q3", "nda.txt")).await.unwrap();

        assert!(receipt.is_new_company && receipt.is_new_deal);
        assert_eq!(
            receipt.gcs_path,
            format!("companies/{}/deals/{}/files/nda.txt", receipt.company_id, receipt.deal_id)
        );
        let stored = ctx.store.get("client-context", &receipt.gcs_path).await.unwrap();
        assert_eq!(stored, b"Mutual NDA text");

        let status = get_upload_status(&ctx.pool, &receipt.file_upload_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.upload_status, "uploaded");
        assert_eq!(status.processing_status.as_deref(), Some("pending"));
        assert_eq!(status.company_name.as_deref(), Some("Acme"));
        assert_eq!(status.tags, vec!["nda", "urgent"]);
        assert_eq!(status.file_hash, receipt.file_hash);
    }

    #[tokio::test]
    async fn second_upload_reuses_company_and_deal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = test_context(tmp.path()).await;
        let first = upload_file(&ctx, request("Acme", "Q3", "a.txt")).await.unwrap();
        let second = upload_file(&ctx, request("  Acme ", "Q3", "b.txt")).await.unwrap();
        assert_eq!(first.company_id, second.company_id);
        assert_eq!(first.deal_id, second.deal_id);
        assert!(!second.is_new_company && !second.is_new_deal);
        assert_ne!(first.file_upload_id, second.file_upload_id);
    }

    #[tokio::test]
    async fn object_write_runs_outside_the_database_transaction() {
        let tmp = tempfile::TempDir::new().unwrap();
        let base = test_context(tmp.path()).await;
        let store = PoolCheckingStore {
            inner: crate::storage::LocalStore::new(
                base.config.storage.root.clone(),
                globset::GlobSet::empty(),
            ),
            pool: base.pool.clone(),
        };
        let ctx = AppContext::new(
            (*base.config).clone(),
            base.pool.clone(),
            std::sync::Arc::new(store),
            base.analyzer.clone(),
        );

        let receipt = upload_file(&ctx, request("Acme", "Q3", "nda.txt")).await.unwrap();
        assert!(get_upload_status(&ctx.pool, &receipt.file_upload_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn validation_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = test_context(tmp.path()).await;
        let err = upload_file(&ctx, request(" ", "Q3", "a.txt")).await.unwrap_err();
        assert!(matches!(err, UploadError::Invalid(_)));

        let mut empty = request("Acme", "Q3", "a.txt");
        empty.bytes.clear();
        assert!(matches!(
            upload_file(&ctx, empty).await.unwrap_err(),
            UploadError::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = test_context(tmp.path()).await;
        upload_file(&ctx, request("Acme Corp", "Q3", "a.txt")).await.unwrap();
        upload_file(&ctx, request("Acme Corp", "Q4", "b.txt")).await.unwrap();
        upload_file(&ctx, request("Globex", "Q3", "c.txt")).await.unwrap();

        let filter = UploadFilter {
            company_name: Some("acme".into()),
            deal_name: None,
        };
        let page = list_uploads(&ctx.pool, &filter, Some(1), Some(0)).await.unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.uploads.len(), 1);
        assert_eq!(page.uploads[0].original_filename, "b.txt");

        let all = list_uploads(&ctx.pool, &UploadFilter::default(), None, None)
            .await
            .unwrap();
        assert_eq!(all.total_count, 3);
        assert_eq!(all.limit, DEFAULT_LIST_LIMIT);

        assert!(list_uploads(&ctx.pool, &filter, Some(0), None).await.is_err());
        assert!(list_uploads(&ctx.pool, &filter, Some(101), None).await.is_err());
        assert!(list_uploads(&ctx.pool, &filter, None, Some(-1)).await.is_err());
    }
}

//! Row-level helpers shared by uploads, the pipeline and result storage.
//!
//! Every function takes a `&mut SqliteConnection` so it can run on a
//! pooled connection or inside an open transaction (`&mut *tx`).

use anyhow::{Context, Result};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::migrate::NOW;
use crate::models::{JobStatus, UploadStatus};

/// Returns the company id and whether the row was created by this call.
pub async fn get_or_create_company(conn: &mut SqliteConnection, name: &str) -> Result<(String, bool)> {
    let inserted = sqlx::query("INSERT INTO companies (id, name) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .execute(&mut *conn)
        .await?
        .rows_affected()
        > 0;

    let id: String = sqlx::query_scalar("SELECT id FROM companies WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("company '{}' vanished after upsert", name))?;
    Ok((id, inserted))
}

/// Returns the deal id and whether the row was created by this call.
/// An existing deal keeps its original `deal_type`.
pub async fn get_or_create_deal(
    conn: &mut SqliteConnection,
    company_id: &str,
    deal_name: &str,
    deal_type: Option<&str>,
) -> Result<(String, bool)> {
    let inserted = sqlx::query(
        "INSERT INTO deals (id, company_id, deal_name, deal_type) VALUES (?, ?, ?, ?) \
         ON CONFLICT(company_id, deal_name) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(company_id)
    .bind(deal_name)
    .bind(deal_type)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;

    let id: String = sqlx::query_scalar("SELECT id FROM deals WHERE company_id = ? AND deal_name = ?")
        .bind(company_id)
        .bind(deal_name)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("deal '{}' vanished after upsert", deal_name))?;
    Ok((id, inserted))
}

/// Ensures a tag row exists for each name and returns their ids in order.
pub async fn ensure_tags(conn: &mut SqliteConnection, names: &[String]) -> Result<Vec<String>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        sqlx::query("INSERT INTO file_tags (id, name) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .execute(&mut *conn)
            .await?;
        let id: String = sqlx::query_scalar("SELECT id FROM file_tags WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
        ids.push(id);
    }
    Ok(ids)
}

pub async fn link_tags(conn: &mut SqliteConnection, file_upload_id: &str, tag_ids: &[String]) -> Result<()> {
    for tag_id in tag_ids {
        sqlx::query(
            "INSERT INTO file_upload_tags (file_upload_id, tag_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(file_upload_id)
        .bind(tag_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Creates a `pending` job. `file_upload_id` is `None` for folder runs.
pub async fn create_processing_job(
    conn: &mut SqliteConnection,
    file_upload_id: Option<&str>,
    job_type: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO processing_jobs (id, file_upload_id, job_type, status) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(file_upload_id)
        .bind(job_type)
        .bind(JobStatus::Pending.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(id)
}

/// Moves a job to `status`. `running` stamps `started_at`; terminal states
/// stamp `completed_at` and record `error`.
pub async fn update_job_status(
    conn: &mut SqliteConnection,
    job_id: &str,
    status: JobStatus,
    error: Option<&str>,
) -> Result<()> {
    let sql = match status {
        JobStatus::Running => format!(
            "UPDATE processing_jobs SET status = ?, started_at = {NOW}, updated_at = {NOW} WHERE id = ?"
        ),
        JobStatus::Completed | JobStatus::Failed => format!(
            "UPDATE processing_jobs SET status = ?, completed_at = {NOW}, error_message = ?, updated_at = {NOW} WHERE id = ?"
        ),
        JobStatus::Pending => {
            format!("UPDATE processing_jobs SET status = ?, updated_at = {NOW} WHERE id = ?")
        }
    };

    let mut query = sqlx::query(&sql).bind(status.as_str());
    if matches!(status, JobStatus::Completed | JobStatus::Failed) {
        query = query.bind(error);
    }
    let result = query.bind(job_id).execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        anyhow::bail!("processing job not found: {}", job_id);
    }
    Ok(())
}

pub async fn set_upload_status(
    conn: &mut SqliteConnection,
    file_upload_id: &str,
    status: UploadStatus,
) -> Result<()> {
    let result = sqlx::query(&format!(
        "UPDATE file_uploads SET upload_status = ?, updated_at = {NOW} WHERE id = ?"
    ))
    .bind(status.as_str())
    .bind(file_upload_id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        anyhow::bail!("file upload not found: {}", file_upload_id);
    }
    Ok(())
}

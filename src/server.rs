//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner |
//! | `GET`  | `/health` | Health check with database status |
//! | `POST` | `/pipeline/process` | Run the pipeline over a bucket folder and store the results |
//! | `POST` | `/upload/file` | Multipart file upload |
//! | `POST` | `/upload/{id}/process` | Process a stored upload now |
//! | `GET`  | `/upload/status/{id}` | Upload and processing status |
//! | `GET`  | `/uploads` | List uploads, filtered and paginated |
//! | `GET`  | `/pipeline/results/{id}` | Stored results of a pipeline run |
//! | `GET`  | `/search` | Full-text search over summaries and redlines |
//! | `GET`  | `/api/endpoints` | This table, as JSON |
//!
//! # Error Contract
//!
//! ```json
//! { "status": "error", "message": "Invalid request", "detail": "company_name is required" }
//! ```
//!
//! Validation failures are `400`, oversized uploads `413`, missing rows
//! `404`, everything else `500`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! can be served from anywhere.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db;
use crate::pipeline::{self, AppContext};
use crate::results;
use crate::search;
use crate::upload::{self, UploadError, UploadFilter, UploadRequest};

/// Multipart framing on top of the file itself.
const BODY_SLACK_BYTES: usize = 64 * 1024;

const ENDPOINTS: &[(&str, &str)] = &[
    ("GET /", "Service banner"),
    ("GET /health", "Health check with database status"),
    (
        "POST /pipeline/process",
        "Run the pipeline over bucket_name/folder_path and store the results",
    ),
    (
        "POST /upload/file",
        "Upload a file (multipart: file, company_name, deal_name, file_tags?, deal_type?, bucket_name?)",
    ),
    ("POST /upload/{id}/process", "Process a stored upload now"),
    ("GET /upload/status/{id}", "Upload and processing status"),
    (
        "GET /uploads",
        "List uploads (company_name?, deal_name?, limit 1-100, offset)",
    ),
    ("GET /pipeline/results/{id}", "Stored results of a pipeline run"),
    ("GET /search", "Search summaries and redlines (q, limit?)"),
    ("GET /api/endpoints", "This list"),
];

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn serve(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("dealdesk API listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the router with CORS, request tracing and a body limit sized to
/// `[limits].max_file_bytes`.
pub fn router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = usize::try_from(ctx.config.limits.max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(BODY_SLACK_BYTES);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/pipeline/process", post(handle_pipeline_process))
        .route("/pipeline/results/{id}", get(handle_pipeline_results))
        .route("/upload/file", post(handle_upload))
        .route("/upload/{id}/process", post(handle_process_upload))
        .route("/upload/status/{id}", get(handle_upload_status))
        .route("/uploads", get(handle_list_uploads))
        .route("/search", get(handle_search))
        .route("/api/endpoints", get(handle_endpoints))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

// ============ Error response ============

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    TooLarge(String),
    #[error("{message}: {detail}")]
    Internal { message: String, detail: String },
}

impl ApiError {
    /// Wraps an unexpected failure under a short operation label.
    fn internal(message: &str) -> impl FnOnce(anyhow::Error) -> ApiError + '_ {
        move |err| ApiError::Internal {
            message: message.to_string(),
            detail: format!("{:#}", err),
        }
    }

    fn from_upload(message: &str) -> impl FnOnce(UploadError) -> ApiError + '_ {
        move |err| match err {
            UploadError::Invalid(msg) => ApiError::BadRequest(msg),
            e @ UploadError::TooLarge { .. } => ApiError::TooLarge(e.to_string()),
            UploadError::Internal(e) => ApiError::internal(message)(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, detail) = match self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "Invalid request".to_string(), detail)
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "Not found".to_string(), detail),
            ApiError::TooLarge(detail) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "File too large".to_string(), detail)
            }
            ApiError::Internal { message, detail } => {
                tracing::error!("{}: {}", message, detail);
                (StatusCode::INTERNAL_SERVER_ERROR, message, detail)
            }
        };
        let body = ErrorBody {
            status: "error",
            message,
            detail,
        };
        (status, Json(body)).into_response()
    }
}

// ============ GET / and /health ============

async fn handle_root() -> Json<Value> {
    Json(json!({
        "message": "dealdesk",
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_health(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "dealdesk-api",
        "database": db::health(&ctx.pool).await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

// ============ POST /pipeline/process ============

#[derive(Debug, Deserialize)]
struct PipelineForm {
    bucket_name: String,
    folder_path: String,
}

async fn handle_pipeline_process(
    State(ctx): State<AppContext>,
    Form(form): Form<PipelineForm>,
) -> Result<Json<Value>, ApiError> {
    let bucket = form.bucket_name.trim();
    let folder = form.folder_path.trim();
    if bucket.is_empty() || folder.is_empty() {
        return Err(ApiError::BadRequest(
            "bucket_name and folder_path are required".to_string(),
        ));
    }

    let run = pipeline::run_pipeline(&ctx, bucket, folder)
        .await
        .map_err(ApiError::internal("Pipeline execution failed"))?;
    if run.report.status != "success" {
        return Err(ApiError::Internal {
            message: "Pipeline processing failed".to_string(),
            detail: run
                .report
                .errors
                .first()
                .cloned()
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }

    let pipeline_id = results::store_pipeline_results(&ctx.pool, bucket, folder, &run)
        .await
        .map_err(ApiError::internal("Failed to store pipeline results"))?;

    let report = run.report;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Pipeline completed successfully for gs://{}/{}", bucket, folder),
        "pipeline_id": pipeline_id,
        "summary": report.summary,
        "results": report.results,
        "processing_log": report.processing_log,
        "errors": report.errors,
        "warnings": report.warnings,
    })))
}

async fn handle_pipeline_results(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<results::StoredPipeline>, ApiError> {
    results::get_pipeline_results(&ctx.pool, &id)
        .await
        .map_err(ApiError::internal("Failed to get pipeline results"))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Pipeline results not found: {}", id)))
}

// ============ POST /upload/file ============

async fn handle_upload(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<upload::UploadReceipt>, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut company_name = String::new();
    let mut deal_name = String::new();
    let mut tags = Vec::new();
    let mut deal_type = None;
    let mut bucket = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            file = Some((filename, bytes.to_vec()));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        match name.as_str() {
            "company_name" => company_name = value,
            "deal_name" => deal_name = value,
            "file_tags" => tags = upload::parse_tags(&value),
            "deal_type" => deal_type = non_blank(value),
            "bucket_name" => bucket = non_blank(value),
            other => tracing::debug!("ignoring multipart field '{}'", other),
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("file is required".to_string()))?;
    let receipt = upload::upload_file(
        &ctx,
        UploadRequest {
            filename,
            bytes,
            company_name,
            deal_name,
            tags,
            deal_type,
            bucket,
        },
    )
    .await
    .map_err(ApiError::from_upload("File upload failed"))?;

    if ctx.config.analysis.process_on_upload {
        spawn_processing(ctx.clone(), receipt.file_upload_id.clone());
    }

    Ok(Json(receipt))
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn spawn_processing(ctx: AppContext, file_upload_id: String) {
    tokio::spawn(async move {
        match pipeline::process_upload(&ctx, &file_upload_id).await {
            Ok(Some(done)) => tracing::info!(
                "background processing of {} finished: {}",
                file_upload_id,
                done.report.status
            ),
            Ok(None) => tracing::warn!("upload {} vanished before processing", file_upload_id),
            Err(e) => tracing::error!("background processing of {} failed: {:#}", file_upload_id, e),
        }
    });
}

// ============ Upload status and listing ============

async fn handle_process_upload(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<pipeline::UploadProcessing>, ApiError> {
    pipeline::process_upload(&ctx, &id)
        .await
        .map_err(ApiError::internal("Failed to process upload"))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("File upload not found: {}", id)))
}

async fn handle_upload_status(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<upload::UploadStatusView>, ApiError> {
    upload::get_upload_status(&ctx.pool, &id)
        .await
        .map_err(ApiError::internal("Failed to get upload status"))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("File upload not found: {}", id)))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    company_name: Option<String>,
    deal_name: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn handle_list_uploads(
    State(ctx): State<AppContext>,
    Query(params): Query<ListParams>,
) -> Result<Json<upload::UploadList>, ApiError> {
    let filter = UploadFilter {
        company_name: params.company_name,
        deal_name: params.deal_name,
    };
    upload::list_uploads(&ctx.pool, &filter, params.limit, params.offset)
        .await
        .map(Json)
        .map_err(ApiError::from_upload("Failed to list uploads"))
}

// ============ GET /search ============

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<i64>,
}

async fn handle_search(
    State(ctx): State<AppContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    if params.q.trim().is_empty() {
        return Err(ApiError::BadRequest("q must not be empty".to_string()));
    }
    if let Some(limit) = params.limit {
        if !(1..=search::MAX_LIMIT).contains(&limit) {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {}",
                search::MAX_LIMIT
            )));
        }
    }

    let hits = search::search(&ctx.pool, &params.q, params.limit)
        .await
        .map_err(ApiError::internal("Search failed"))?;
    Ok(Json(json!({ "query": params.q, "results": hits })))
}

// ============ GET /api/endpoints ============

async fn handle_endpoints() -> Json<Value> {
    let endpoints: serde_json::Map<String, Value> = ENDPOINTS
        .iter()
        .map(|(route, description)| (route.to_string(), json!({ "description": description })))
        .collect();
    Json(json!({
        "api_name": "dealdesk",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "description": "Contract intake and analysis: upload, extract, chunk, classify, redline",
        "endpoints": endpoints,
        "supported_file_types": [
            "PDF (text; scanned PDFs fall back to text extraction)",
            "Word documents (.docx)",
            "PowerPoint decks (.pptx)",
            "Excel spreadsheets (.xlsx)",
            "Text files (.txt, .md, .csv)",
        ],
    }))
}

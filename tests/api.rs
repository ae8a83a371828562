use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tower::ServiceExt;

use dealdesk::client::{ApiClient, ClientError, UploadFields};
use dealdesk::config::load_config;
use dealdesk::pipeline::AppContext;
use dealdesk::server::router;
use dealdesk::session::{PendingFile, RemoteSubmitter, UploadSession};

const BOUNDARY: &str = "dealdesk-test-boundary";

async fn setup_context(max_file_bytes: u64) -> (TempDir, AppContext) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let config_path = root.join("dealdesk.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{root}/data/dealdesk.sqlite"

[storage]
root = "{root}/buckets"

[limits]
max_file_bytes = {max_file_bytes}

[server]
bind = "127.0.0.1:0"
"#,
            root = root.display(),
        ),
    )
    .unwrap();

    let ctx = AppContext::from_config(load_config(&config_path).unwrap())
        .await
        .unwrap();
    (tmp, ctx)
}

async fn setup(max_file_bytes: u64) -> (TempDir, Router) {
    let (tmp, ctx) = setup_context(max_file_bytes).await;
    (tmp, router(ctx))
}

/// Serves the router on an ephemeral local port and returns its base URL.
async fn serve(ctx: AppContext) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(ctx)).await.unwrap();
    });
    format!("http://{addr}")
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                 Content-Type: text/plain\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_multipart(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload/file")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn write_folder(root: &Path) {
    let folder = root.join("buckets/client-context/globex_7");
    fs::create_dir_all(&folder).unwrap();
    fs::write(
        folder.join("globex_nda.txt"),
        "NON-DISCLOSURE AGREEMENT\n\n1. Confidentiality\nThe recipient shall hold all confidential information in strict confidence.",
    )
    .unwrap();
}

#[tokio::test]
async fn banner_health_and_endpoints() {
    let (_tmp, app) = setup(1024 * 1024).await;

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "dealdesk");
    assert_eq!(body["status"], "operational");

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");

    let (_, body) = send(&app, get("/api/endpoints")).await;
    assert!(body["endpoints"]["GET /search"].is_object());
    assert!(body["endpoints"]["POST /upload/file"].is_object());
}

#[tokio::test]
async fn upload_status_and_process() {
    let (_tmp, app) = setup(1024 * 1024).await;

    let body = multipart_body(
        &[
            ("company_name", "Initech"),
            ("deal_name", "Renewal"),
            ("file_tags", "nda, urgent"),
        ],
        Some((
            "initech_nda.txt",
            b"Each party shall keep the other's confidential information secret.".as_slice(),
        )),
    );
    let (status, receipt) = send(&app, post_multipart(body)).await;
    assert_eq!(status, StatusCode::OK, "{}", receipt);
    assert_eq!(receipt["status"], "success");
    assert_eq!(receipt["is_new_company"], true);
    let id = receipt["file_upload_id"].as_str().unwrap().to_string();

    let (status, view) = send(&app, get(&format!("/upload/status/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["upload_status"], "uploaded");
    assert_eq!(view["processing_status"], "pending");

    let request = Request::builder()
        .method("POST")
        .uri(format!("/upload/{id}/process"))
        .body(Body::empty())
        .unwrap();
    let (status, done) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", done);
    assert!(done["analysis_id"].is_string());
    assert_eq!(
        done["report"]["results"]["initech_nda.txt"]["classification"]["type"],
        "nda"
    );

    let (_, view) = send(&app, get(&format!("/upload/status/{id}"))).await;
    assert_eq!(view["upload_status"], "completed");

    let (status, list) = send(&app, get("/uploads?company_name=INITECH")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total_count"], 1);
    assert_eq!(list["limit"], 50);
}

#[tokio::test]
async fn validation_errors_are_400() {
    let (_tmp, app) = setup(1024 * 1024).await;

    let body = multipart_body(&[("deal_name", "Renewal")], Some(("a.txt", b"hello".as_slice())));
    let (status, body) = send(&app, post_multipart(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Invalid request");

    let body = multipart_body(&[("company_name", "A"), ("deal_name", "B")], None);
    let (status, _) = send(&app, post_multipart(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/uploads?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, get("/uploads?limit=101")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/search?q=")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_upload_is_413() {
    let (_tmp, app) = setup(16).await;

    let body = multipart_body(
        &[("company_name", "A"), ("deal_name", "B")],
        Some(("big.txt", [b'x'; 64].as_slice())),
    );
    let (status, body) = send(&app, post_multipart(body)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn missing_rows_are_404() {
    let (_tmp, app) = setup(1024 * 1024).await;

    let (status, body) = send(&app, get("/upload/status/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
    assert!(body["detail"].as_str().unwrap().contains("nope"));

    let (status, _) = send(&app, get("/pipeline/results/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("POST")
        .uri("/upload/nope/process")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pipeline_process_then_results_and_search() {
    let (tmp, app) = setup(1024 * 1024).await;
    write_folder(tmp.path());

    let request = Request::builder()
        .method("POST")
        .uri("/pipeline/process")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("bucket_name=client-context&folder_path=globex_7"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "success");
    assert_eq!(body["summary"]["files_processed"], 1);
    assert_eq!(body["summary"]["documents_analyzed"], 1);
    let pipeline_id = body["pipeline_id"].as_str().unwrap().to_string();

    let (status, stored) = send(&app, get(&format!("/pipeline/results/{pipeline_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["company_name"], "Globex");
    assert!(stored["results"]["globex_nda.txt"].is_object());

    let (status, hits) = send(&app, get("/search?q=recipient")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits["results"][0]["filename"], "globex_nda.txt");
}

#[tokio::test]
async fn empty_folder_is_500() {
    let (_tmp, app) = setup(1024 * 1024).await;

    let request = Request::builder()
        .method("POST")
        .uri("/pipeline/process")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("bucket_name=client-context&folder_path=nobody"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Pipeline processing failed");
}

#[tokio::test]
async fn remote_submit_reports_only_the_submitted_files() {
    let (_tmp, ctx) = setup_context(1024 * 1024).await;
    let base_url = serve(ctx).await;
    let submitter = RemoteSubmitter::new(ApiClient::new(&base_url).unwrap(), "client-context");

    let mut first = UploadSession::new("Initech", "Renewal");
    first.add_files([PendingFile::new(
        "a_nda.txt",
        b"1. Confidentiality\nThe recipient shall keep all information confidential.".to_vec(),
    )]);
    first.submit(&submitter).await.unwrap();
    let report = first.results.unwrap();
    assert_eq!(report.summary.files_processed, 1);
    assert!(report.results.contains_key("a_nda.txt"));

    let mut second = UploadSession::new("Initech", "Renewal");
    second.add_files([PendingFile::new(
        "b_msa.txt",
        b"1. Services\nProvider shall perform the services described in each order.".to_vec(),
    )]);
    let note = second.submit(&submitter).await.unwrap();
    let report = second.results.unwrap();
    assert_eq!(report.status, "success");
    assert_eq!(report.summary.files_processed, 1);
    assert_eq!(report.results.keys().collect::<Vec<_>>(), vec!["b_msa.txt"]);
    assert!(note.message.starts_with("Processed 1 file(s)"));
}

#[tokio::test]
async fn remote_validation_error_maps_to_server_error() {
    let (_tmp, ctx) = setup_context(1024 * 1024).await;
    let client = ApiClient::new(&serve(ctx).await).unwrap();
    let fields = UploadFields {
        company_name: " ".into(),
        deal_name: "Renewal".into(),
        ..UploadFields::default()
    };

    let err = client
        .upload_file("nda.txt", b"text".to_vec(), &fields)
        .await
        .unwrap_err();
    match err {
        ClientError::Server { status, .. } => assert_eq!(status, 400),
        other => panic!("unexpected error: {other}"),
    }
}

//! Typed client for the dealdesk HTTP API.

use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use crate::detect;
use crate::pipeline::UploadProcessing;
use crate::upload::UploadReceipt;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("invalid response body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Form fields sent alongside an uploaded file.
#[derive(Debug, Clone, Default)]
pub struct UploadFields {
    pub company_name: String,
    pub deal_name: String,
    pub tags: Vec<String>,
    pub deal_type: Option<String>,
    pub bucket_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        let resp = self.client.get(self.url("/health")).send().await?;
        decode(resp).await
    }

    pub async fn upload_file(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        fields: &UploadFields,
    ) -> Result<UploadReceipt, ClientError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(detect::guess_mime(filename))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("company_name", fields.company_name.clone())
            .text("deal_name", fields.deal_name.clone());
        if !fields.tags.is_empty() {
            form = form.text("file_tags", fields.tags.join(","));
        }
        if let Some(deal_type) = &fields.deal_type {
            form = form.text("deal_type", deal_type.clone());
        }
        if let Some(bucket) = &fields.bucket_name {
            form = form.text("bucket_name", bucket.clone());
        }

        tracing::debug!("uploading {} to {}", filename, self.base_url);
        let resp = self
            .client
            .post(self.url("/upload/file"))
            .multipart(form)
            .send()
            .await?;
        decode(resp).await
    }

    /// Runs the pipeline over one stored upload (`POST /upload/{id}/process`).
    pub async fn process_upload(&self, id: &str) -> Result<UploadProcessing, ClientError> {
        let resp = self
            .client
            .post(self.url(&format!("/upload/{}/process", id)))
            .send()
            .await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(ClientError::Server {
            status: status.as_u16(),
            body,
        });
    }
    Ok(serde_json::from_str(&body)?)
}

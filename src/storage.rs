//! Object storage for uploaded files.
//!
//! Files live in buckets under an object path. Two backends implement
//! [`ObjectStore`]:
//!
//! - **[`LocalStore`]**: each bucket is a directory under `storage.root`.
//! - **[`GcsStore`]**: Google Cloud Storage JSON API over HTTPS, bearer
//!   token from `GCS_ACCESS_TOKEN`. Listing follows `nextPageToken`;
//!   downloads retry with exponential backoff.
//!
//! Uploaded files are laid out as
//! `companies/{company_id}/deals/{deal_id}/files/{filename}`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::StorageConfig;

/// Metadata for a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object path within the bucket.
    pub path: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable location, e.g. `gs://bucket` or `file:///data/bucket`.
    fn describe(&self, bucket: &str) -> String;

    async fn put(&self, bucket: &str, path: &str, bytes: &[u8], mime: &str) -> Result<()>;

    async fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;

    /// Lists objects under `prefix`, sorted by path. Folder placeholders are omitted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>>;
}

/// Instantiates the configured backend.
pub fn create_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let excludes = build_globset(&config.exclude_globs)?;
    match config.backend.as_str() {
        "local" => Ok(Arc::new(LocalStore::new(config.root.clone(), excludes))),
        "gcs" => Ok(Arc::new(GcsStore::from_env(
            config.endpoint_url.clone(),
            excludes,
        )?)),
        other => bail!("Unknown storage backend: {}", other),
    }
}

/// Object path for an uploaded file.
pub fn object_path(company_id: &str, deal_id: &str, filename: &str) -> String {
    format!(
        "companies/{}/deals/{}/files/{}",
        company_id,
        deal_id,
        sanitize_filename(filename)
    )
}

/// Keeps only the final path component of a client-supplied filename.
pub fn sanitize_filename(filename: &str) -> String {
    let last = filename
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("");
    match last.trim() {
        "" | "." | ".." => "upload.bin".to_string(),
        name => name.to_string(),
    }
}

/// Normalizes a folder into a listing prefix ending in `/` (empty stays empty).
pub fn folder_prefix(folder: &str) -> String {
    let trimmed = folder.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

// ============ Local filesystem ============

pub struct LocalStore {
    root: PathBuf,
    excludes: GlobSet,
}

impl LocalStore {
    pub fn new(root: PathBuf, excludes: GlobSet) -> Self {
        Self { root, excludes }
    }

    /// The directory of `bucket`. Bucket names are a single normal path
    /// component, so they never leave `root`.
    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        let mut components = Path::new(bucket).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !bucket.contains(['/', '\\']) => {
                Ok(self.root.join(bucket))
            }
            _ => bail!("invalid bucket name: {:?}", bucket),
        }
    }

    fn resolve(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            bail!("invalid object location: {}/{}", bucket, path);
        }
        Ok(self.bucket_dir(bucket)?.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn describe(&self, bucket: &str) -> String {
        format!("file://{}", self.root.join(bucket).display())
    }

    async fn put(&self, bucket: &str, path: &str, bytes: &[u8], _mime: &str) -> Result<()> {
        let target = self.resolve(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        tracing::debug!(bucket, path, bytes = bytes.len(), "stored object");
        Ok(())
    }

    async fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(bucket, path)?;
        tokio::fs::read(&target)
            .await
            .with_context(|| format!("Object not found: {}/{}", bucket, path))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let bucket_root = self.bucket_dir(bucket)?;
        if !bucket_root.exists() {
            bail!("Bucket does not exist: {}", bucket_root.display());
        }

        let excludes = self.excludes.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<ObjectInfo>> {
            let mut objects = Vec::new();
            for entry in WalkDir::new(&bucket_root) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&bucket_root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                if !rel.starts_with(&prefix) || excludes.is_match(&rel) {
                    continue;
                }
                objects.push(ObjectInfo {
                    path: rel,
                    size: entry.metadata()?.len(),
                });
            }
            objects.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(objects)
        })
        .await?
    }
}

// ============ Google Cloud Storage ============

const GCS_DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const GCS_DOWNLOAD_ATTEMPTS: u32 = 3;

pub struct GcsStore {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    excludes: GlobSet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsListResponse {
    #[serde(default)]
    items: Vec<GcsObject>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct GcsObject {
    name: String,
    /// GCS reports sizes as decimal strings.
    #[serde(default)]
    size: Option<String>,
}

impl GcsStore {
    pub fn from_env(endpoint: Option<String>, excludes: GlobSet) -> Result<Self> {
        let token = std::env::var("GCS_ACCESS_TOKEN")
            .context("GCS_ACCESS_TOKEN environment variable not set")?;
        Ok(Self::new(token, endpoint, excludes))
    }

    pub fn new(token: String, endpoint: Option<String>, excludes: GlobSet) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint
                .unwrap_or_else(|| GCS_DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            token,
            excludes,
        }
    }

    async fn download_once(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/storage/v1/b/{}/o/{}?alt=media",
            self.endpoint,
            uri_encode(bucket),
            uri_encode(path)
        );
        let resp = self.client.get(&url).bearer_auth(&self.token).send().await?;
        if !resp.status().is_success() {
            bail!(
                "GCS download failed (HTTP {}) for gs://{}/{}",
                resp.status(),
                bucket,
                path
            );
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn describe(&self, bucket: &str) -> String {
        format!("gs://{}", bucket)
    }

    async fn put(&self, bucket: &str, path: &str, bytes: &[u8], mime: &str) -> Result<()> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.endpoint,
            uri_encode(bucket),
            uri_encode(path)
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Content-Type", mime)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to upload gs://{}/{}: {}", bucket, path, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "GCS upload failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }
        tracing::info!(bucket, path, bytes = bytes.len(), "uploaded object to GCS");
        Ok(())
    }

    async fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let mut last_err = None;
        for attempt in 0..GCS_DOWNLOAD_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            }
            match self.download_once(bucket, path).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::warn!(bucket, path, attempt, error = %e, "GCS download failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("GCS download failed after retries")))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/storage/v1/b/{}/o?prefix={}",
                self.endpoint,
                uri_encode(bucket),
                uri_encode(prefix)
            );
            if let Some(ref token) = page_token {
                url.push_str(&format!("&pageToken={}", uri_encode(token)));
            }

            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to list gs://{}/{}: {}", bucket, prefix, e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "GCS list failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let page: GcsListResponse = resp.json().await?;
            for item in page.items {
                if item.name.ends_with('/') || self.excludes.is_match(&item.name) {
                    continue;
                }
                let size = item
                    .size
                    .as_deref()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(0);
                objects.push(ObjectInfo {
                    path: item.name,
                    size,
                });
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn object_path_uses_company_deal_layout() {
        assert_eq!(
            object_path("c1", "d1", "../../etc/passwd"),
            "companies/c1/deals/d1/files/passwd"
        );
        assert_eq!(sanitize_filename("C:\\docs\\NDA.pdf"), "NDA.pdf");
        assert_eq!(sanitize_filename(".."), "upload.bin");
    }

    #[test]
    fn folder_prefix_normalizes_slashes() {
        assert_eq!(folder_prefix("/acme_1/"), "acme_1/");
        assert_eq!(folder_prefix("a/b"), "a/b/");
        assert_eq!(folder_prefix(""), "");
    }

    #[test]
    fn uri_encode_escapes_slashes() {
        assert_eq!(uri_encode("a/b c.pdf"), "a%2Fb%20c.pdf");
    }

    #[tokio::test]
    async fn local_store_put_get_list() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().to_path_buf(), build_globset(&[]).unwrap());

        store
            .put("bucket", "deal/b.txt", b"beta", "text/plain")
            .await
            .unwrap();
        store
            .put("bucket", "deal/a.txt", b"alpha!", "text/plain")
            .await
            .unwrap();
        store
            .put("bucket", "other/c.txt", b"c", "text/plain")
            .await
            .unwrap();

        assert_eq!(store.get("bucket", "deal/a.txt").await.unwrap(), b"alpha!");

        let listed = store.list("bucket", "deal/").await.unwrap();
        assert_eq!(
            listed,
            vec![
                ObjectInfo {
                    path: "deal/a.txt".into(),
                    size: 6
                },
                ObjectInfo {
                    path: "deal/b.txt".into(),
                    size: 4
                },
            ]
        );
    }

    #[tokio::test]
    async fn local_store_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().to_path_buf(), build_globset(&[]).unwrap());
        assert!(store.get("bucket", "../secret").await.is_err());
        assert!(store.put("..", "x", b"x", "text/plain").await.is_err());
    }

    #[tokio::test]
    async fn local_store_list_rejects_bucket_outside_root() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("outside.txt"), b"x").unwrap();
        let store = LocalStore::new(tmp.path().join("buckets"), build_globset(&[]).unwrap());
        store.put("b", "f/in.txt", b"x", "text/plain").await.unwrap();

        for bucket in ["..", ".", "", "b/..", "../buckets"] {
            let err = store.list(bucket, "").await.unwrap_err();
            assert!(err.to_string().contains("invalid bucket name"), "{}", bucket);
        }
        assert_eq!(store.list("b", "").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_store_applies_excludes() {
        let tmp = TempDir::new().unwrap();
        let excludes = build_globset(&["**/.DS_Store".to_string()]).unwrap();
        let store = LocalStore::new(tmp.path().to_path_buf(), excludes);
        store.put("b", "f/.DS_Store", b"x", "").await.unwrap();
        store.put("b", "f/nda.txt", b"x", "").await.unwrap();
        let listed = store.list("b", "f/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "f/nda.txt");
    }
}

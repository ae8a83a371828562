//! Client-side upload session.
//!
//! Holds the files a user has picked for a company/deal, submits them
//! through a [`Submitter`], and tracks which view (upload form or results)
//! is showing. The zero-file guard lives here, so an empty submission
//! never reaches a submitter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

use crate::analysis::mock;
use crate::client::{ApiClient, UploadFields};
use crate::models::PipelineReport;

/// A file picked for upload but not yet submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl PendingFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    #[default]
    Upload,
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
}

/// A user-facing message produced by a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Notification {
    fn success(title: &str, message: String) -> Self {
        Self {
            kind: NotificationKind::Success,
            title: title.to_string(),
            message,
        }
    }

    fn error(title: &str, message: String) -> Self {
        Self {
            kind: NotificationKind::Error,
            title: title.to_string(),
            message,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("no files selected")]
    NoFiles,
    #[error("{0}")]
    Failed(String),
}

impl SubmitError {
    pub fn notification(&self) -> Notification {
        match self {
            SubmitError::NoFiles => Notification::error(
                "No files selected",
                "Please select at least one file to upload.".to_string(),
            ),
            SubmitError::Failed(message) => Notification::error("Processing failed", message.clone()),
        }
    }
}

/// What a submitter receives: the pending files plus the deal metadata.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub files: &'a [PendingFile],
    pub company_name: &'a str,
    pub deal_name: &'a str,
    pub tags: &'a [String],
    pub deal_type: Option<&'a str>,
}

#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, submission: Submission<'_>) -> Result<PipelineReport>;
}

/// Returns the deterministic mock payload without any I/O.
pub struct SimulatedSubmitter;

#[async_trait]
impl Submitter for SimulatedSubmitter {
    async fn submit(&self, submission: Submission<'_>) -> Result<PipelineReport> {
        let names: Vec<&str> = submission.files.iter().map(|f| f.name.as_str()).collect();
        Ok(mock::simulate(&names))
    }
}

/// Uploads each file to a running server and processes each upload on
/// its own, so the combined report covers exactly the submitted files
/// even when the deal already holds earlier uploads.
pub struct RemoteSubmitter {
    client: ApiClient,
    bucket: String,
}

impl RemoteSubmitter {
    pub fn new(client: ApiClient, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl Submitter for RemoteSubmitter {
    async fn submit(&self, submission: Submission<'_>) -> Result<PipelineReport> {
        let fields = UploadFields {
            company_name: submission.company_name.to_string(),
            deal_name: submission.deal_name.to_string(),
            tags: submission.tags.to_vec(),
            deal_type: submission.deal_type.map(str::to_string),
            bucket_name: Some(self.bucket.clone()),
        };

        let mut upload_ids = Vec::with_capacity(submission.files.len());
        for file in submission.files {
            let receipt = self
                .client
                .upload_file(&file.name, file.bytes.clone(), &fields)
                .await
                .with_context(|| format!("Upload of {} failed", file.name))?;
            tracing::info!("uploaded {} as {}", file.name, receipt.file_upload_id);
            upload_ids.push(receipt.file_upload_id);
        }

        let mut combined: Option<PipelineReport> = None;
        for id in &upload_ids {
            let done = self
                .client
                .process_upload(id)
                .await
                .with_context(|| format!("Processing of upload {} failed", id))?;
            match combined.as_mut() {
                Some(report) => report.merge(done.report),
                None => combined = Some(done.report),
            }
        }
        combined.context("No files were uploaded")
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadSession {
    pub pending: Vec<PendingFile>,
    pub company: String,
    pub deal: String,
    pub tags: Vec<String>,
    pub deal_type: Option<String>,
    pub view: View,
    pub results: Option<PipelineReport>,
    pub processing: bool,
}

impl UploadSession {
    pub fn new(company: impl Into<String>, deal: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            deal: deal.into(),
            ..Self::default()
        }
    }

    pub fn add_files(&mut self, files: impl IntoIterator<Item = PendingFile>) {
        self.pending.extend(files);
    }

    /// Removes and returns the file at `index`; out of range is a no-op.
    pub fn remove_file(&mut self, index: usize) -> Option<PendingFile> {
        if index < self.pending.len() {
            Some(self.pending.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Sends every pending file to `submitter`.
    ///
    /// On success the report is stored and the results view shown. On
    /// failure the session is left as it was, pending files included.
    pub async fn submit(&mut self, submitter: &dyn Submitter) -> Result<Notification, SubmitError> {
        if self.pending.is_empty() {
            return Err(SubmitError::NoFiles);
        }

        self.processing = true;
        let outcome = submitter
            .submit(Submission {
                files: &self.pending,
                company_name: &self.company,
                deal_name: &self.deal,
                tags: &self.tags,
                deal_type: self.deal_type.as_deref(),
            })
            .await;
        self.processing = false;

        match outcome {
            Ok(report) => {
                let message = format!(
                    "Processed {} file(s), created {} chunks",
                    report.summary.files_processed, report.summary.chunks_created
                );
                self.results = Some(report);
                self.view = View::Results;
                Ok(Notification::success("Processing complete", message))
            }
            Err(e) => Err(SubmitError::Failed(format!("{:#}", e))),
        }
    }

    pub fn show_results(&mut self) {
        self.view = View::Results;
    }

    pub fn show_upload(&mut self) {
        self.view = View::Upload;
    }

    /// Back to an empty upload form.
    pub fn reset(&mut self) {
        self.view = View::Upload;
        self.results = None;
        self.pending.clear();
        self.processing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Submitter for Recording {
        async fn submit(&self, submission: Submission<'_>) -> Result<PipelineReport> {
            let names: Vec<String> = submission.files.iter().map(|f| f.name.clone()).collect();
            self.calls.lock().unwrap().push(names.clone());
            Ok(mock::simulate(&names))
        }
    }

    struct Failing;

    #[async_trait]
    impl Submitter for Failing {
        async fn submit(&self, _submission: Submission<'_>) -> Result<PipelineReport> {
            anyhow::bail!("connection refused")
        }
    }

    fn files(names: &[&str]) -> Vec<PendingFile> {
        names
            .iter()
            .map(|n| PendingFile::new(*n, b"x".to_vec()))
            .collect()
    }

    #[tokio::test]
    async fn empty_submission_is_rejected_without_calling_submitter() {
        let recording = Recording::default();
        let mut session = UploadSession::new("Acme", "Q3");

        let err = session.submit(&recording).await.unwrap_err();
        assert_eq!(err, SubmitError::NoFiles);
        assert_eq!(err.notification().kind, NotificationKind::Error);
        assert_eq!(err.notification().title, "No files selected");
        assert!(recording.calls.lock().unwrap().is_empty());
        assert_eq!(session.view, View::Upload);
        assert!(!session.processing);
    }

    #[tokio::test]
    async fn removed_file_is_excluded_from_submission() {
        let recording = Recording::default();
        let mut session = UploadSession::new("Acme", "Q3");
        session.add_files(files(&["a_nda.pdf", "b.docx", "c_msa.txt"]));

        let removed = session.remove_file(1).unwrap();
        assert_eq!(removed.name, "b.docx");
        assert!(session.remove_file(5).is_none());

        let note = session.submit(&recording).await.unwrap();
        assert_eq!(note.kind, NotificationKind::Success);
        assert_eq!(
            recording.calls.lock().unwrap().as_slice(),
            &[vec!["a_nda.pdf".to_string(), "c_msa.txt".to_string()]]
        );
        let report = session.results.as_ref().unwrap();
        assert_eq!(report.summary.files_processed, 2);
        assert_eq!(report.summary.chunks_created, 20);
        assert_eq!(session.view, View::Results);
    }

    #[tokio::test]
    async fn submitter_error_becomes_failure_notification() {
        let mut session = UploadSession::new("Acme", "Q3");
        session.add_files(files(&["a.pdf"]));

        let err = session.submit(&Failing).await.unwrap_err();
        let note = err.notification();
        assert_eq!(note.kind, NotificationKind::Error);
        assert!(note.message.contains("connection refused"));
        assert_eq!(session.view, View::Upload);
        assert!(session.results.is_none());
        assert_eq!(session.pending.len(), 1);
        assert!(!session.processing);
    }

    #[tokio::test]
    async fn view_toggles_are_idempotent_and_reset_restores_upload() {
        let mut session = UploadSession::new("Acme", "Q3");
        session.add_files(files(&["deal.pdf"]));
        session.submit(&SimulatedSubmitter).await.unwrap();

        session.show_results();
        session.show_results();
        assert_eq!(session.view, View::Results);
        session.show_upload();
        session.show_upload();
        assert_eq!(session.view, View::Upload);
        assert!(session.results.is_some());

        session.reset();
        assert_eq!(session.view, View::Upload);
        assert!(session.results.is_none());
        assert!(session.pending.is_empty());
    }
}

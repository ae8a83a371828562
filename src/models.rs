//! Core data models.
//!
//! Status enums mirror the `CHECK` constraints in [`crate::migrate`]; the
//! serde types are the wire shapes of the results payload returned by the
//! pipeline and the HTTP API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => anyhow::bail!(concat!("invalid ", stringify!($name), ": '{}'"), other),
                }
            }
        }
    };
}

string_enum!(
    /// Lifecycle of a deal.
    DealStatus {
        Active => "active",
        Completed => "completed",
        Cancelled => "cancelled",
    }
);

string_enum!(
    /// Lifecycle of a stored file.
    UploadStatus {
        Uploaded => "uploaded",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
);

string_enum!(
    JobStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
);

string_enum!(
    Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

string_enum!(
    /// Refined file type assigned by [`crate::detect`].
    DetectedType {
        PdfText => "pdf_text",
        PdfScanned => "pdf_scanned",
        Word => "word",
        Excel => "excel",
        Text => "text",
        Image => "image",
        Unknown => "unknown",
        Encrypted => "encrypted",
        Corrupted => "corrupted",
    }
);

string_enum!(
    ContractType {
        Nda => "nda",
        Msa => "msa",
        Dpa => "dpa",
        CompanyProfile => "company_profile",
        HistoricalData => "historical_data",
        Playbook => "playbook",
        Other => "other",
        Unknown => "unknown",
    }
);

impl ContractType {
    /// Agreement types that always get a baseline legal review.
    pub fn is_agreement(&self) -> bool {
        matches!(self, Self::Nda | Self::Msa | Self::Dpa)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub kind: ContractType,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub key_topics: Vec<String>,
}

/// An identified contractual issue with a recommended remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redline {
    pub issue: String,
    pub severity: Severity,
    #[serde(default)]
    pub clause: String,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default = "default_category")]
    pub category: String,
}

/// A contractual area of likely mutual agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonGround {
    pub area: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub leverage: String,
    #[serde(default = "default_category")]
    pub category: String,
}

pub fn default_category() -> String {
    "general".to_string()
}

/// Per-file entry of [`PipelineReport::results`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub summary: String,
    pub classification: Classification,
    pub redlines: Vec<Redline>,
    pub common_grounds: Vec<CommonGround>,
    pub contract_type: ContractType,
    #[serde(default = "unknown_string")]
    pub extraction_engine: String,
    pub chunks_created: usize,
    #[serde(default = "unknown_detected")]
    pub file_type: DetectedType,
}

fn unknown_string() -> String {
    "unknown".to_string()
}

fn unknown_detected() -> DetectedType {
    DetectedType::Unknown
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub files_processed: usize,
    pub chunks_created: usize,
    pub documents_analyzed: usize,
}

/// Results payload: `{status, summary, results, processing_log, errors, warnings}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub status: String,
    pub summary: PipelineSummary,
    pub results: BTreeMap<String, DocumentResult>,
    #[serde(default)]
    pub processing_log: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl PipelineReport {
    pub fn new() -> Self {
        Self {
            status: "success".to_string(),
            summary: PipelineSummary::default(),
            results: BTreeMap::new(),
            processing_log: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.processing_log.push(message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.errors.push(message);
    }

    /// Adds a per-file result and returns the key it was stored under.
    /// A name already present gets a ` (2)`, ` (3)`, ... suffix.
    pub fn insert_result(&mut self, filename: &str, result: DocumentResult) -> String {
        let mut key = filename.to_string();
        let mut n = 2;
        while self.results.contains_key(&key) {
            key = format!("{} ({})", filename, n);
            n += 1;
        }
        self.results.insert(key.clone(), result);
        key
    }

    /// Folds another report into this one: counts add up, results and
    /// messages are appended. The merged status is `failed` only when
    /// both sides failed.
    pub fn merge(&mut self, other: PipelineReport) {
        let this_failed = self.status == "failed";
        self.summary.files_processed += other.summary.files_processed;
        self.summary.chunks_created += other.summary.chunks_created;
        self.summary.documents_analyzed += other.summary.documents_analyzed;
        for (name, result) in other.results {
            self.insert_result(&name, result);
        }
        self.processing_log.extend(other.processing_log);
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.status = if this_failed && other.status == "failed" {
            "failed".to_string()
        } else {
            "success".to_string()
        };
    }
}

impl Default for PipelineReport {
    fn default() -> Self {
        Self::new()
    }
}

/// A section-aware chunk of extracted document text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub file_upload_id: String,
    pub chunk_index: i64,
    pub section_header: Option<String>,
    pub section_index: i64,
    pub clause_index: i64,
    pub chunk_tokens: i64,
    pub text: String,
    pub hash: String,
}

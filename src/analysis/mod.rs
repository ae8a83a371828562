//! Document analysis providers.
//!
//! An [`Analyzer`] turns extracted document text into a summary, a
//! [`Classification`], redlines and common grounds. Three providers exist:
//!
//! - **[`mock::MockAnalyzer`]**: deterministic canned output, used for demos
//!   and the simulated upload round trip.
//! - **[`heuristic::HeuristicAnalyzer`]**: offline keyword analysis.
//! - **[`anthropic::AnthropicAnalyzer`]**: calls the Anthropic Messages API
//!   and falls back to the heuristic provider when the call fails.
//!
//! Use [`create_analyzer`] to pick one from configuration.

pub mod anthropic;
pub mod heuristic;
pub mod mock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::AnalysisConfig;
use crate::models::{Classification, CommonGround, ContractType, Redline, Severity};

/// Text handed to an analyzer for one document.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub filename: &'a str,
    pub text: &'a str,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub summary: String,
    pub classification: Classification,
    pub contract_type: ContractType,
    pub redlines: Vec<Redline>,
    pub common_grounds: Vec<CommonGround>,
    /// Non-fatal problems hit while analyzing (e.g. a provider fallback).
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Provider name as it appears in configuration.
    fn name(&self) -> &str;

    async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<Analysis>;
}

/// Classifies a document by case-insensitive substrings of its filename.
pub fn classify_filename(filename: &str) -> ContractType {
    let name = filename.to_lowercase();
    if name.contains("nda") {
        ContractType::Nda
    } else if name.contains("msa") {
        ContractType::Msa
    } else if name.contains("dpa") {
        ContractType::Dpa
    } else if name.contains("company") {
        ContractType::CompanyProfile
    } else if name.contains("historical") {
        ContractType::HistoricalData
    } else if name.contains("risk") || name.contains("playbook") {
        ContractType::Playbook
    } else {
        ContractType::Other
    }
}

/// Redline added to every agreement that gets no specific findings.
pub fn standard_review_redline() -> Redline {
    Redline {
        issue: "Standard contract review required".to_string(),
        severity: Severity::Medium,
        clause: "general".to_string(),
        recommendation: "Review with legal team for company-specific requirements".to_string(),
        category: crate::models::default_category(),
    }
}

pub fn baseline_common_ground() -> CommonGround {
    CommonGround {
        area: "Document processing completed".to_string(),
        description: "Document was successfully extracted and processed".to_string(),
        leverage: "Use as baseline for further analysis".to_string(),
        category: crate::models::default_category(),
    }
}

/// Instantiates the analyzer named by `analysis.provider`.
///
/// # Errors
///
/// Unknown providers, and `anthropic` without a model or without
/// `ANTHROPIC_API_KEY` in the environment.
pub fn create_analyzer(config: &AnalysisConfig) -> Result<Arc<dyn Analyzer>> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(mock::MockAnalyzer)),
        "heuristic" => Ok(Arc::new(heuristic::HeuristicAnalyzer)),
        "anthropic" => Ok(Arc::new(anthropic::AnthropicAnalyzer::new(config)?)),
        other => bail!("Unknown analysis provider: {}", other),
    }
}

//! Deterministic canned analysis.
//!
//! [`simulate`] builds the full results payload for a list of filenames
//! without touching storage, extraction or the database. Every file gets
//! ten chunks, confidence 0.95 and the same summary, redlines and common
//! grounds; only the classification follows the filename.

use anyhow::Result;
use async_trait::async_trait;

use super::{Analysis, AnalysisInput, Analyzer};
use crate::detect;
use crate::models::{
    Classification, CommonGround, ContractType, DocumentResult, PipelineReport, Redline, Severity,
};

pub const CHUNKS_PER_FILE: usize = 10;
pub const CONFIDENCE: f64 = 0.95;
pub const ENGINE: &str = "mock";

pub struct MockAnalyzer;

#[async_trait]
impl Analyzer for MockAnalyzer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<Analysis> {
        let doc = document(input.filename);
        Ok(Analysis {
            summary: doc.summary,
            classification: doc.classification,
            contract_type: doc.contract_type,
            redlines: doc.redlines,
            common_grounds: doc.common_grounds,
            warnings: Vec::new(),
        })
    }
}

/// `nda` or `msa` by case-insensitive filename match, `other` otherwise.
///
/// Narrower than [`super::classify_filename`] on purpose: the simulated
/// payload only ever reports these three types.
pub fn classify(filename: &str) -> ContractType {
    let name = filename.to_lowercase();
    if name.contains("nda") {
        ContractType::Nda
    } else if name.contains("msa") {
        ContractType::Msa
    } else {
        ContractType::Other
    }
}

/// Canned result for one file.
pub fn document(filename: &str) -> DocumentResult {
    let kind = classify(filename);
    DocumentResult {
        summary: format!(
            "{} is a commercial agreement covering confidentiality, liability allocation and termination rights.",
            filename
        ),
        classification: Classification {
            kind,
            confidence: CONFIDENCE,
            subtype: None,
            key_topics: vec![
                "confidentiality".to_string(),
                "liability".to_string(),
                "termination".to_string(),
            ],
        },
        redlines: vec![
            Redline {
                issue: "Liability is uncapped for the receiving party".to_string(),
                severity: Severity::High,
                clause: "Limitation of Liability".to_string(),
                recommendation: "Cap aggregate liability at twelve months of fees".to_string(),
                category: "liability".to_string(),
            },
            Redline {
                issue: "Termination for convenience requires 90 days notice".to_string(),
                severity: Severity::Medium,
                clause: "Term and Termination".to_string(),
                recommendation: "Reduce the notice period to 30 days".to_string(),
                category: "termination".to_string(),
            },
        ],
        common_grounds: vec![CommonGround {
            area: "Mutual confidentiality".to_string(),
            description: "Both parties accept reciprocal confidentiality obligations".to_string(),
            leverage: "Offer a shorter survival period in exchange for a liability cap"
                .to_string(),
            category: "confidentiality".to_string(),
        }],
        contract_type: kind,
        extraction_engine: ENGINE.to_string(),
        chunks_created: CHUNKS_PER_FILE,
        file_type: detect::coarse_type(detect::guess_mime(filename)),
    }
}

/// Builds the results payload for `filenames` as if they had been processed.
pub fn simulate<S: AsRef<str>>(filenames: &[S]) -> PipelineReport {
    let mut report = PipelineReport::new();
    let n = filenames.len();

    report.log(format!("Received {} file(s)", n));
    for name in filenames {
        report.insert_result(name.as_ref(), document(name.as_ref()));
    }
    report.log(format!("Extracted text from {} document(s)", n));
    report.log(format!("Created {} chunks", n * CHUNKS_PER_FILE));
    report.log(format!("Analyzed {} document(s)", n));

    report.summary.files_processed = n;
    report.summary.chunks_created = n * CHUNKS_PER_FILE;
    report.summary.documents_analyzed = n;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectedType;

    #[test]
    fn summary_counts_scale_with_files() {
        for n in [0usize, 1, 3, 7] {
            let names: Vec<String> = (0..n).map(|i| format!("doc{}.pdf", i)).collect();
            let report = simulate(&names);
            assert_eq!(report.summary.files_processed, n);
            assert_eq!(report.summary.chunks_created, 10 * n);
            assert_eq!(report.summary.documents_analyzed, n);
            assert_eq!(report.results.len(), n);
            assert_eq!(report.status, "success");
        }
    }

    #[test]
    fn classification_follows_filename() {
        let report = simulate(&["Acme-NDA.pdf", "big_MSA.docx", "notes.txt", "Msa-nda.pdf"]);
        assert_eq!(report.results["Acme-NDA.pdf"].classification.kind, ContractType::Nda);
        assert_eq!(report.results["big_MSA.docx"].classification.kind, ContractType::Msa);
        assert_eq!(report.results["notes.txt"].classification.kind, ContractType::Other);
        assert_eq!(report.results["Msa-nda.pdf"].contract_type, ContractType::Nda);
    }

    #[test]
    fn table_is_narrower_than_filename_classifier() {
        let report = simulate(&["acme_dpa.pdf", "company_profile.pdf"]);
        assert_eq!(report.results["acme_dpa.pdf"].contract_type, ContractType::Other);
        assert_eq!(report.results["company_profile.pdf"].contract_type, ContractType::Other);
        assert_eq!(crate::analysis::classify_filename("acme_dpa.pdf"), ContractType::Dpa);
    }

    #[test]
    fn same_name_twice_keeps_both_entries() {
        let report = simulate(&["deal_nda.pdf", "deal_nda.pdf"]);
        assert_eq!(report.summary.files_processed, 2);
        assert_eq!(report.results.len(), 2);
        assert!(report.results.contains_key("deal_nda.pdf (2)"));
    }

    #[test]
    fn every_file_gets_fixed_confidence_and_chunks() {
        let report = simulate(&["a.pdf"]);
        let doc = &report.results["a.pdf"];
        assert_eq!(doc.classification.confidence, CONFIDENCE);
        assert_eq!(doc.chunks_created, CHUNKS_PER_FILE);
        assert_eq!(doc.file_type, DetectedType::PdfText);
        assert!(!report.processing_log.is_empty());
    }

    #[tokio::test]
    async fn analyzer_matches_simulated_document() {
        let analysis = MockAnalyzer
            .analyze(&AnalysisInput {
                filename: "x_nda.pdf",
                text: "ignored",
                chunk_count: 3,
            })
            .await
            .unwrap();
        assert_eq!(analysis.contract_type, ContractType::Nda);
        assert_eq!(analysis.redlines, document("x_nda.pdf").redlines);
    }
}

//! Offline keyword analysis.
//!
//! Classification comes from the filename first and from keyword scoring
//! over the text when the filename says nothing. Redlines and common
//! grounds come from small phrase tables; agreements with no specific
//! finding get the standard review redline.

use anyhow::Result;
use async_trait::async_trait;

use super::{
    baseline_common_ground, classify_filename, standard_review_redline, Analysis, AnalysisInput,
    Analyzer,
};
use crate::models::{Classification, CommonGround, ContractType, Redline, Severity};

pub const CONFIDENCE: f64 = 0.5;
const SUMMARY_SENTENCES: usize = 3;
const SUMMARY_MAX_CHARS: usize = 600;

/// Phrases that vote for a contract type when the filename is silent.
const TYPE_KEYWORDS: &[(ContractType, &[&str])] = &[
    (
        ContractType::Nda,
        &["non-disclosure", "nondisclosure", "confidential information", "receiving party"],
    ),
    (
        ContractType::Msa,
        &["master services", "master service agreement", "statement of work", "service levels"],
    ),
    (
        ContractType::Dpa,
        &["data processing", "personal data", "sub-processor", "data controller"],
    ),
    (
        ContractType::Playbook,
        &["playbook", "fallback position", "preferred position", "risk rating"],
    ),
];

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("confidentiality", &["confidential"]),
    ("indemnification", &["indemnif"]),
    ("limitation of liability", &["limitation of liability", "liability cap", "aggregate liability"]),
    ("termination", &["terminat"]),
    ("governing law", &["governing law", "jurisdiction"]),
    ("payment terms", &["invoice", "payment", "fees"]),
    ("intellectual property", &["intellectual property", "license"]),
    ("data protection", &["personal data", "gdpr", "data protection"]),
    ("warranties", &["warrant"]),
    ("non-solicitation", &["non-solicit", "solicit"]),
];

struct RedlineRule {
    phrases: &'static [&'static str],
    issue: &'static str,
    severity: Severity,
    clause: &'static str,
    recommendation: &'static str,
    category: &'static str,
}

const REDLINE_RULES: &[RedlineRule] = &[
    RedlineRule {
        phrases: &["unlimited liability", "without limitation of liability"],
        issue: "Liability appears to be uncapped",
        severity: Severity::High,
        clause: "Limitation of Liability",
        recommendation: "Negotiate an aggregate cap tied to fees paid",
        category: "liability",
    },
    RedlineRule {
        phrases: &["automatically renew", "auto-renew", "automatic renewal"],
        issue: "Agreement renews automatically",
        severity: Severity::Medium,
        clause: "Term and Renewal",
        recommendation: "Require written notice or opt-in for renewal",
        category: "term",
    },
    RedlineRule {
        phrases: &["in perpetuity", "perpetual"],
        issue: "Obligations survive indefinitely",
        severity: Severity::Medium,
        clause: "Term",
        recommendation: "Limit survival to a fixed number of years",
        category: "term",
    },
    RedlineRule {
        phrases: &["sole discretion"],
        issue: "Counterparty decides unilaterally at its sole discretion",
        severity: Severity::Low,
        clause: "general",
        recommendation: "Replace with a reasonableness standard",
        category: "general",
    },
    RedlineRule {
        phrases: &["exclusive jurisdiction"],
        issue: "Disputes are bound to an exclusive forum",
        severity: Severity::Low,
        clause: "Governing Law",
        recommendation: "Confirm the forum is acceptable or propose a neutral venue",
        category: "disputes",
    },
];

const COMMON_GROUND_RULES: &[(&str, &[&str], &str, &str)] = &[
    (
        "Mutual obligations",
        &["mutual", "each party"],
        "The agreement imposes reciprocal obligations",
        "Trade symmetric terms for concessions elsewhere",
    ),
    (
        "Defined term",
        &["term of", "for a period of"],
        "Duration is fixed and explicit",
        "Anchor renewal discussions on the agreed period",
    ),
];

pub struct HeuristicAnalyzer;

#[async_trait]
impl Analyzer for HeuristicAnalyzer {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<Analysis> {
        Ok(analyze_text(input.filename, input.text))
    }
}

/// Synchronous core of [`HeuristicAnalyzer`]; also the fallback of the
/// remote providers.
pub fn analyze_text(filename: &str, text: &str) -> Analysis {
    let lower = text.to_lowercase();
    let contract_type = match classify_filename(filename) {
        ContractType::Other => classify_text(&lower),
        known => known,
    };

    let key_topics: Vec<String> = TOPIC_KEYWORDS
        .iter()
        .filter(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(topic, _)| topic.to_string())
        .collect();

    let mut redlines: Vec<Redline> = REDLINE_RULES
        .iter()
        .filter(|rule| rule.phrases.iter().any(|p| lower.contains(p)))
        .map(|rule| Redline {
            issue: rule.issue.to_string(),
            severity: rule.severity,
            clause: rule.clause.to_string(),
            recommendation: rule.recommendation.to_string(),
            category: rule.category.to_string(),
        })
        .collect();
    if redlines.is_empty() && contract_type.is_agreement() {
        redlines.push(standard_review_redline());
    }

    let mut common_grounds = vec![baseline_common_ground()];
    common_grounds.extend(
        COMMON_GROUND_RULES
            .iter()
            .filter(|(_, needles, _, _)| needles.iter().any(|n| lower.contains(n)))
            .map(|(area, _, description, leverage)| CommonGround {
                area: area.to_string(),
                description: description.to_string(),
                leverage: leverage.to_string(),
                category: crate::models::default_category(),
            }),
    );

    Analysis {
        summary: summarize(text),
        classification: Classification {
            kind: contract_type,
            confidence: CONFIDENCE,
            subtype: Some("heuristic".to_string()),
            key_topics,
        },
        contract_type,
        redlines,
        common_grounds,
        warnings: Vec::new(),
    }
}

/// Highest keyword score wins; no hits means `other`.
fn classify_text(lower: &str) -> ContractType {
    TYPE_KEYWORDS
        .iter()
        .map(|(kind, needles)| {
            let score: usize = needles.iter().map(|n| lower.matches(n).count()).sum();
            (*kind, score)
        })
        .filter(|(_, score)| *score > 0)
        .max_by_key(|(_, score)| *score)
        .map(|(kind, _)| kind)
        .unwrap_or(ContractType::Other)
}

/// The leading sentences of the text, whitespace-normalized.
fn summarize(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::new();
    for (count, sentence) in flat.split_inclusive(['.', '!', '?']).enumerate() {
        if count == SUMMARY_SENTENCES || out.len() + sentence.len() > SUMMARY_MAX_CHARS {
            break;
        }
        out.push_str(sentence);
    }
    if out.is_empty() {
        out = flat.chars().take(SUMMARY_MAX_CHARS).collect();
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_wins_over_text() {
        let a = analyze_text("acme_msa.pdf", "This Non-Disclosure Agreement...");
        assert_eq!(a.contract_type, ContractType::Msa);
        assert_eq!(a.classification.confidence, CONFIDENCE);
    }

    #[test]
    fn text_keywords_classify_unnamed_files() {
        let text = "The Receiving Party shall protect Confidential Information. \
                    Confidential Information excludes public data.";
        let a = analyze_text("contract_final.pdf", text);
        assert_eq!(a.contract_type, ContractType::Nda);
        assert!(a.classification.key_topics.contains(&"confidentiality".to_string()));
    }

    #[test]
    fn agreements_without_findings_get_standard_review() {
        let a = analyze_text("nda.txt", "Plain words only.");
        assert_eq!(a.redlines, vec![standard_review_redline()]);
        assert_eq!(a.common_grounds[0], baseline_common_ground());
    }

    #[test]
    fn non_agreements_without_findings_have_no_redlines() {
        let a = analyze_text("Company Overview.pdf", "We build rockets.");
        assert_eq!(a.contract_type, ContractType::CompanyProfile);
        assert!(a.redlines.is_empty());
    }

    #[test]
    fn risky_phrases_raise_redlines() {
        let a = analyze_text(
            "msa.pdf",
            "This agreement shall automatically renew. Supplier accepts unlimited liability.",
        );
        let severities: Vec<Severity> = a.redlines.iter().map(|r| r.severity).collect();
        assert_eq!(severities, vec![Severity::High, Severity::Medium]);
    }

    #[test]
    fn summary_takes_leading_sentences() {
        let s = summarize("One.  Two!\nThree? Four.");
        assert_eq!(s, "One. Two! Three?");
    }
}

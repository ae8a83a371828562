//! Anthropic Messages API provider.
//!
//! Two prompts run per document: the first asks for a summary and a
//! classification, the second for redlines and common grounds given that
//! summary. Replies must be JSON, optionally inside a fenced block.
//!
//! Retry strategy matches the other HTTP clients in this crate: 429 and
//! 5xx responses and network errors are retried with exponential backoff,
//! other 4xx responses fail at once. When every attempt fails the document
//! is analyzed by [`super::heuristic`] instead and a warning is recorded.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{heuristic, Analysis, AnalysisInput, Analyzer};
use crate::config::AnalysisConfig;
use crate::models::{Classification, CommonGround, ContractType, Redline};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 2048;
/// Characters of document text sent with each prompt.
const MAX_PROMPT_CHARS: usize = 60_000;

pub struct AnthropicAnalyzer {
    model: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl AnthropicAnalyzer {
    /// # Errors
    ///
    /// Returns an error if `analysis.model` is unset or `ANTHROPIC_API_KEY`
    /// is not in the environment.
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("analysis.model required for anthropic provider"))?;
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return reply_text(&json);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, "anthropic request failed, retrying");
                        last_err = Some(anyhow!("Anthropic API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("Anthropic API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Anthropic request failed after retries")))
    }

    async fn analyze_remote(&self, input: &AnalysisInput<'_>) -> Result<Analysis> {
        let text = truncate_chars(input.text, MAX_PROMPT_CHARS);

        let reply = self.complete(&classification_prompt(text)).await?;
        let phrased: PhraserReply =
            serde_json::from_str(extract_json(&reply)?).context("invalid classification JSON")?;

        let reply = self
            .complete(&review_prompt(
                text,
                phrased.classification.kind,
                &phrased.summary,
            ))
            .await?;
        let review: ReviewReply =
            serde_json::from_str(extract_json(&reply)?).context("invalid review JSON")?;

        Ok(Analysis {
            summary: phrased.summary,
            contract_type: phrased.classification.kind,
            classification: phrased.classification,
            redlines: review.redlines,
            common_grounds: review.common_grounds,
            warnings: Vec::new(),
        })
    }
}

#[async_trait]
impl Analyzer for AnthropicAnalyzer {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<Analysis> {
        match self.analyze_remote(input).await {
            Ok(analysis) => Ok(analysis),
            Err(e) => {
                tracing::warn!(file = input.filename, error = %e, "falling back to heuristic analysis");
                let mut analysis = heuristic::analyze_text(input.filename, input.text);
                analysis.classification.subtype = Some("fallback_classification".to_string());
                analysis
                    .warnings
                    .push(format!("analysis_failed:{}:{}", input.filename, e));
                Ok(analysis)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PhraserReply {
    #[serde(default)]
    summary: String,
    classification: Classification,
}

#[derive(Debug, Deserialize)]
struct ReviewReply {
    #[serde(default)]
    redlines: Vec<Redline>,
    #[serde(default)]
    common_grounds: Vec<CommonGround>,
}

fn classification_prompt(text: &str) -> String {
    format!(
        r#"You are a document analysis expert. Analyze the provided document and return ONLY a JSON response.

Document: {text}

Return ONLY this JSON format with no additional text or explanations:
{{
    "summary": "document summary",
    "classification": {{
        "type": "nda|msa|dpa|company_profile|historical_data|playbook|other",
        "confidence": 0.0,
        "subtype": "specific document subtype if applicable",
        "key_topics": ["topic1", "topic2"]
    }}
}}"#
    )
}

fn review_prompt(text: &str, kind: ContractType, summary: &str) -> String {
    format!(
        r#"You are a legal contract analysis expert. Analyze the document and return ONLY a JSON response.

Document: {text}
Document Type: {kind}
Summary: {summary}

Return ONLY this JSON format with no additional text or explanations:
{{
    "redlines": [
        {{
            "issue": "description of the issue",
            "severity": "low|medium|high",
            "clause": "relevant clause or section",
            "recommendation": "suggested negotiation approach"
        }}
    ],
    "common_grounds": [
        {{
            "area": "area of agreement",
            "description": "why this is good",
            "leverage": "how to use this in negotiations"
        }}
    ]
}}"#
    )
}

/// Concatenated `text` blocks of a Messages API response.
fn reply_text(json: &serde_json::Value) -> Result<String> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid Anthropic response: missing content array"))?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        bail!("Invalid Anthropic response: no text content");
    }
    Ok(text)
}

/// The outermost JSON object in a reply, fenced or bare.
fn extract_json(reply: &str) -> Result<&str> {
    let start = reply
        .find('{')
        .ok_or_else(|| anyhow!("no JSON object in reply"))?;
    let end = reply
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| anyhow!("unterminated JSON object in reply"))?;
    Ok(&reply[start..=end])
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

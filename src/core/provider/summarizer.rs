//! Transcript summarization collaborator.
//!
//! Fire-and-forget with respect to webhook handling: a summarization failure
//! is logged and the owning meeting still completes. The model response is
//! parsed with a strict-then-lenient chain that tags the result instead of
//! throwing past the boundary.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::types::MeetingSummary;

#[async_trait]
pub trait TranscriptSummarizer: Send + Sync {
    async fn summarize(&self, transcript_text: &str) -> Result<MeetingSummary>;
}

/// Result of parsing a model response: either a usable summary or the raw
/// text kept for the log line. Never an Err — unparseable output is an
/// expected shape, not an exception.
#[derive(Debug)]
pub enum ParseOutcome {
    Parsed(MeetingSummary),
    Unparseable(String),
}

/// Strict parse first; if the model wrapped the JSON in prose or a code
/// fence, retry on the outermost brace-delimited slice.
pub fn parse_summary_response(raw: &str) -> ParseOutcome {
    if let Ok(summary) = serde_json::from_str::<MeetingSummary>(raw) {
        return ParseOutcome::Parsed(summary);
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Ok(summary) = serde_json::from_str::<MeetingSummary>(&raw[start..=end]) {
                return ParseOutcome::Parsed(summary);
            }
        }
    }
    ParseOutcome::Unparseable(raw.to_string())
}

/// Stand-in when no summarizer is configured. Meetings still complete, they
/// just never get a summary attached.
pub struct DisabledSummarizer;

#[async_trait]
impl TranscriptSummarizer for DisabledSummarizer {
    async fn summarize(&self, _transcript_text: &str) -> Result<MeetingSummary> {
        Err(anyhow!("summarization is disabled"))
    }
}

const SUMMARY_PROMPT: &str = "Summarize this meeting transcript. Respond with JSON only: \
{\"summary\": string, \"wins\": [string], \"support_areas\": [string]}";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    content: String,
}

/// OpenAI-compatible chat endpoint client.
pub struct HttpSummarizer {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
}

impl HttpSummarizer {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        })
    }
}

#[async_trait]
impl TranscriptSummarizer for HttpSummarizer {
    async fn summarize(&self, transcript_text: &str) -> Result<MeetingSummary> {
        let prompt = format!("{SUMMARY_PROMPT}\n\n{transcript_text}");
        let req = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "summarizer API error ({}): {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }

        let parsed: ChatResponse = res.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("summarizer returned no choices"))?;

        match parse_summary_response(&content) {
            ParseOutcome::Parsed(summary) => Ok(summary),
            ParseOutcome::Unparseable(raw) => Err(anyhow!(
                "summarizer response was not parseable as a summary: {}",
                raw.chars().take(200).collect::<String>()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_json_parses() {
        let raw = r#"{"summary": "Short call.", "wins": ["shipped"], "support_areas": []}"#;
        match parse_summary_response(raw) {
            ParseOutcome::Parsed(s) => {
                assert_eq!(s.summary, "Short call.");
                assert_eq!(s.wins, vec!["shipped"]);
            }
            ParseOutcome::Unparseable(_) => panic!("expected strict parse"),
        }
    }

    #[test]
    fn fenced_json_parses_leniently() {
        let raw = "Here is the summary:\n```json\n{\"summary\": \"ok\", \"wins\": [], \"support_areas\": [\"onboarding\"]}\n```";
        match parse_summary_response(raw) {
            ParseOutcome::Parsed(s) => assert_eq!(s.support_areas, vec!["onboarding"]),
            ParseOutcome::Unparseable(_) => panic!("expected lenient parse"),
        }
    }

    #[test]
    fn prose_is_tagged_unparseable_not_an_error() {
        match parse_summary_response("The meeting went well.") {
            ParseOutcome::Unparseable(raw) => assert!(raw.contains("went well")),
            ParseOutcome::Parsed(_) => panic!("expected unparseable"),
        }
    }
}

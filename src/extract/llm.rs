//! LLM-backed extractor
//!
//! Sends the file to an OpenAI-compatible chat-completions endpoint and asks
//! for a JSON symbol list. The model is free-form, so everything it returns is
//! validated and then run through the same post-filter as the regex extractor.
//! Any failure yields an empty list.

use super::{ExtractorId, SymbolExtractor};
use crate::symbol::{ExtractedSymbol, SymbolKind};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Characters of source sent to the model.
const MAX_CODE_CHARS: usize = 50_000;

const PROMPT_TEMPLATE: &str = r#"Extract all functions, methods, classes, structs, interfaces, types, and enums from the code below.

Rules:
1. Return ONLY valid JSON in this exact format: {"symbols": [...]}
2. Each symbol: {"name": string, "kind": "function|method|class|struct|interface|type|enum", "startLine": number, "endLine": number, "signature": string}
3. Line numbers are 1-indexed and inclusive
4. Never include control-flow statements (if, for, while, switch, case, return, ...)
5. Only named declarations

Language: {language}

Code:
{code}"#;

/// Chat-completions backed extractor.
pub struct LlmExtractor {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl LlmExtractor {
    pub const ID: ExtractorId = ExtractorId::new("llm", 1);

    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn build_request(&self, content: &str, language: &str) -> ChatRequest {
        let code: String = content.chars().take(MAX_CODE_CHARS).collect();
        let prompt = PROMPT_TEMPLATE
            .replace("{language}", language)
            .replace("{code}", &code);

        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: 16_000,
            temperature: 0.1,
            stream: false,
        }
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, String> {
        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("{}: {}", status, body));
        }

        let body: ChatResponse = resp.json().await.map_err(|e| e.to_string())?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "empty completion".to_string())
    }
}

#[async_trait]
impl SymbolExtractor for LlmExtractor {
    fn id(&self) -> ExtractorId {
        Self::ID
    }

    async fn extract_raw(&self, content: &str, language: &str) -> Vec<ExtractedSymbol> {
        if self.api_key.is_empty() {
            warn!("LLM extractor has no API key, returning no symbols");
            return Vec::new();
        }

        let request = self.build_request(content, language);
        debug!("Extracting symbols via {} ({} chars, {})", self.model, content.len(), language);

        match self.complete(&request).await {
            Ok(reply) => parse_reply(&reply),
            Err(e) => {
                warn!("LLM extraction failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct SymbolList {
    #[serde(default)]
    symbols: Vec<LlmSymbol>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmSymbol {
    name: Option<String>,
    kind: Option<String>,
    start_line: Option<usize>,
    end_line: Option<usize>,
    signature: Option<String>,
}

fn fenced_json() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```").ok())
        .as_ref()
}

/// Parse a model reply: bare JSON, or JSON inside a fenced code block.
///
/// Entries with a missing name, an unknown kind or no start line are dropped.
pub(crate) fn parse_reply(reply: &str) -> Vec<ExtractedSymbol> {
    let parsed: Option<SymbolList> = serde_json::from_str(reply.trim()).ok().or_else(|| {
        fenced_json()
            .and_then(|re| re.captures(reply))
            .and_then(|caps| caps.get(1))
            .and_then(|body| serde_json::from_str(body.as_str()).ok())
    });

    let Some(list) = parsed else {
        warn!("Could not parse LLM reply as a symbol list");
        return Vec::new();
    };

    list.symbols
        .into_iter()
        .filter_map(|s| {
            let name = s.name?;
            let kind: SymbolKind = s.kind?.parse().ok()?;
            let start = s.start_line?;
            let end = s.end_line.unwrap_or(start).max(start);
            let symbol = ExtractedSymbol::new(name, kind, start, end);
            Some(match s.signature {
                Some(sig) if !sig.is_empty() => symbol.with_signature(sig),
                _ => symbol,
            })
        })
        .collect()
}

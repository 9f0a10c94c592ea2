use crate::chat::{ChatTransport, TextStream};
use crate::types::chat::{Content, GenerateContentRequest, GenerateContentResponse};
use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

pub const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Streaming text chat over `streamGenerateContent` with server-sent events.
pub struct GeminiChat {
    client: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl GeminiChat {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: BASE_URL.to_string(),
            api_key: SecretString::from(api_key.to_string()),
            model: model.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl ChatTransport for GeminiChat {
    async fn stream_reply(
        &self,
        history: &[Content],
        system_instruction: &str,
    ) -> anyhow::Result<TextStream> {
        let body = GenerateContentRequest {
            system_instruction: Some(Content::instruction(system_instruction)),
            contents: history.to_vec(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("alt", "sse")])
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Failed to reach the chat endpoint")?
            .error_for_status()
            .context("Chat endpoint rejected the request")?;

        let deltas = response
            .bytes_stream()
            .scan(SseLines::default(), |lines, chunk| {
                let items: Vec<anyhow::Result<String>> = match chunk {
                    Ok(bytes) => lines
                        .push(&bytes)
                        .iter()
                        .filter_map(|data| parse_delta(data).transpose())
                        .collect(),
                    Err(e) => vec![Err(anyhow::Error::new(e).context("Chat stream interrupted"))],
                };
                futures::future::ready(Some(futures::stream::iter(items)))
            })
            .flatten();
        Ok(Box::pin(deltas))
    }
}

/// Splits an event stream into the payloads of its `data:` lines.
///
/// Every event of this endpoint is a single JSON document on one line.
#[derive(Debug, Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

fn parse_delta(data: &str) -> anyhow::Result<Option<String>> {
    let chunk: GenerateContentResponse =
        serde_json::from_str(data).context("Failed to parse chat chunk")?;
    Ok(chunk.text())
}

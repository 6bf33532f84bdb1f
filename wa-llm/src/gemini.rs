//! Gemini adapter (Generative Language API, image-capable).

use crate::client::{ChatHandle, ModelSelection, ProviderAdapter};
use crate::error::{LlmError, Result, is_rate_limit_signal};
use crate::sse::decode_sse;
use crate::types::{FragmentStream, HistoryEntry, Payload, PayloadPart, ProviderKind};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that end a reply without usable text.
const BLOCKING_FINISH_REASONS: [&str; 5] = [
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

pub struct GeminiAdapter {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(http: reqwest::Client, api_key: Option<String>, base_url: Option<&str>) -> Self {
        Self {
            http,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url
                .unwrap_or(DEFAULT_GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            LlmError::Configuration("GOOGLE_API_KEY is not configured".to_string())
        })
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn open_session(
        &self,
        selection: &ModelSelection,
        history: Vec<HistoryEntry>,
    ) -> Result<ChatHandle> {
        self.api_key()?;
        Ok(ChatHandle::new(selection.id.clone(), None, history))
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %handle.model()))]
    async fn send(&self, handle: &ChatHandle, payload: Payload) -> Result<FragmentStream> {
        let api_key = self.api_key()?;
        let req = GeminiRequest::new(handle, &payload);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url,
            handle.model()
        );
        tracing::debug!(
            history_entries = handle.history().len(),
            payload_parts = payload.parts.len(),
            has_image = payload.has_image(),
            "gemini request assembled"
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("gemini", status.as_u16(), &body));
        }

        let sse = decode_sse(response.bytes_stream());
        let stream = sse.filter_map(|event| async move {
            match event {
                Ok(event) => fragment_from_chunk(&event.data).transpose(),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

impl GeminiRequest {
    fn new(handle: &ChatHandle, payload: &Payload) -> Self {
        let mut contents: Vec<GeminiContent> = handle
            .history()
            .iter()
            .map(|entry| GeminiContent {
                role: entry.role.to_string(),
                parts: vec![GeminiPart::Text {
                    text: entry.text.clone(),
                }],
            })
            .collect();

        contents.push(GeminiContent {
            role: "user".to_string(),
            parts: payload.parts.iter().map(to_gemini_part).collect(),
        });

        Self { contents }
    }
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

fn to_gemini_part(part: &PayloadPart) -> GeminiPart {
    match part {
        PayloadPart::Text(text) => GeminiPart::Text { text: text.clone() },
        PayloadPart::Image(image) => GeminiPart::InlineData {
            inline_data: GeminiBlob {
                mime_type: image.mime_type().to_string(),
                data: image.to_base64(),
            },
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default)]
    error: Option<GeminiStreamError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiStreamError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Text increment carried by one SSE chunk, if any.
fn fragment_from_chunk(data: &str) -> Result<Option<String>> {
    let chunk: GeminiStreamChunk = serde_json::from_str(data).map_err(|e| {
        LlmError::Transport(format!("gemini chunk json error={e} data={data}"))
    })?;

    if let Some(err) = chunk.error {
        let status = err.status.unwrap_or_default();
        let message = format!("gemini stream error status={status}: {}", err.message);
        if err.code == Some(429) || is_rate_limit_signal(&status) {
            return Err(LlmError::RateLimit(message));
        }
        return Err(LlmError::Transport(message));
    }

    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(LlmError::Transport(format!(
            "gemini blocked the prompt: {reason}"
        )));
    }

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(None);
    };

    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| p.thought != Some(true))
        .filter_map(|p| p.text)
        .collect();

    if !text.is_empty() {
        return Ok(Some(text));
    }

    if let Some(reason) = candidate.finish_reason {
        if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) {
            return Err(LlmError::Transport(format!(
                "gemini stopped the reply: finish_reason={reason}"
            )));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageData;

    fn handle() -> ChatHandle {
        ChatHandle::new(
            "gemini-2.5-flash",
            None,
            vec![
                HistoryEntry {
                    role: "user",
                    text: "hi".to_string(),
                },
                HistoryEntry {
                    role: "model",
                    text: "hello".to_string(),
                },
            ],
        )
    }

    #[test]
    fn request_wraps_history_as_single_part_entries() {
        let payload = Payload {
            parts: vec![PayloadPart::Text("next".to_string())],
        };
        let value = serde_json::to_value(GeminiRequest::new(&handle(), &payload)).expect("json");
        assert_eq!(
            value,
            serde_json::json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "hi"}]},
                    {"role": "model", "parts": [{"text": "hello"}]},
                    {"role": "user", "parts": [{"text": "next"}]},
                ]
            })
        );
    }

    #[test]
    fn image_is_appended_after_text_as_inline_data() {
        let image = ImageData::new("image/png", vec![1u8, 2, 3]).expect("png");
        let payload = Payload {
            parts: vec![
                PayloadPart::Text("what is this".to_string()),
                PayloadPart::Image(image),
            ],
        };
        let value = serde_json::to_value(GeminiRequest::new(&handle(), &payload)).expect("json");
        let live = &value["contents"][2]["parts"];
        assert_eq!(live[0]["text"], "what is this");
        assert_eq!(live[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(live[1]["inlineData"]["data"], "AQID");
    }

    #[test]
    fn chunk_text_parts_are_joined_and_thoughts_skipped() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"plan","thought":true},{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(fragment_from_chunk(data).expect("ok").as_deref(), Some("Hello"));
    }

    #[test]
    fn usage_only_chunk_has_no_fragment() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":""}]},"finishReason":"STOP"}],"usageMetadata":{"candidatesTokenCount":3}}"#;
        assert_eq!(fragment_from_chunk(data).expect("ok"), None);
    }

    #[test]
    fn mid_stream_resource_exhausted_is_rate_limit() {
        let data = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = fragment_from_chunk(data).expect_err("rate limited");
        assert_eq!(err.kind(), crate::ErrorKind::RateLimit);
    }

    #[test]
    fn safety_stop_without_text_is_transport_error() {
        let data = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let err = fragment_from_chunk(data).expect_err("blocked");
        assert_eq!(err.kind(), crate::ErrorKind::Transport);
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn open_session_without_key_is_configuration_error() {
        let adapter = GeminiAdapter::new(reqwest::Client::new(), None, None);
        let err = adapter
            .open_session(&ModelSelection::new("gemini-2.5-flash", "Gemini"), vec![])
            .expect_err("missing key");
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }
}

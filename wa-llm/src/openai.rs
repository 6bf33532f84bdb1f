use crate::client::{ChatHandle, ModelSelection, ProviderAdapter};
use crate::error::{LlmError, Result, is_rate_limit_signal};
use crate::sse::decode_sse;
use crate::types::{FragmentStream, HistoryEntry, Payload, PayloadPart, ProviderKind};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    persona: bool,
}

impl OpenAiAdapter {
    pub fn new(
        http: reqwest::Client,
        api_key: Option<String>,
        base_url: Option<&str>,
        persona: bool,
    ) -> Self {
        Self {
            http,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url
                .unwrap_or(DEFAULT_OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            persona,
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            LlmError::Configuration("OPENAI_API_KEY is not configured".to_string())
        })
    }
}

/// One-line system persona derived from the selected label.
pub fn persona_line(label: &str) -> String {
    let label = label.trim();
    let label = if label.is_empty() { "an AI model" } else { label };
    format!("You are a helpful work assistant running on {label}. Answer clearly and concisely.")
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn open_session(
        &self,
        selection: &ModelSelection,
        history: Vec<HistoryEntry>,
    ) -> Result<ChatHandle> {
        self.api_key()?;
        let system = self.persona.then(|| persona_line(&selection.label));
        Ok(ChatHandle::new(selection.id.clone(), system, history))
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %handle.model()))]
    async fn send(&self, handle: &ChatHandle, payload: Payload) -> Result<FragmentStream> {
        let api_key = self.api_key()?;
        let req = OpenAiChatRequest::new(handle, &payload)?;
        tracing::debug!(
            messages = req.messages.len(),
            has_system = handle.system().is_some(),
            "openai request assembled"
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("openai", status.as_u16(), &body));
        }

        let sse = Box::pin(decode_sse(response.bytes_stream()));
        let stream = futures_util::stream::unfold((sse, false), |(mut sse, done)| async move {
            if done {
                return None;
            }
            loop {
                let event = match sse.as_mut().next().await? {
                    Ok(event) => event,
                    Err(e) => return Some((Err(e), (sse, true))),
                };
                if event.data.trim() == "[DONE]" {
                    return None;
                }
                match fragment_from_chunk(&event.data) {
                    Ok(Some(fragment)) => return Some((Ok(fragment), (sse, false))),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), (sse, true))),
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

impl OpenAiChatRequest {
    fn new(handle: &ChatHandle, payload: &Payload) -> Result<Self> {
        if payload.has_image() {
            return Err(LlmError::Validation(
                "openai adapter does not accept image input".to_string(),
            ));
        }

        let mut messages = Vec::with_capacity(handle.history().len() + 2);
        if let Some(system) = handle.system() {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.extend(handle.history().iter().map(|entry| OpenAiMessage {
            role: entry.role.to_string(),
            content: entry.text.clone(),
        }));
        let text = payload
            .parts
            .iter()
            .filter_map(|part| match part {
                PayloadPart::Text(text) => Some(text.as_str()),
                PayloadPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        messages.push(OpenAiMessage {
            role: "user".to_string(),
            content: text,
        });

        Ok(Self {
            model: handle.model().to_string(),
            messages,
            stream: true,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    error: Option<OpenAiStreamError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

fn fragment_from_chunk(data: &str) -> Result<Option<String>> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(data).map_err(|e| {
        LlmError::Transport(format!("openai chunk json error={e} data={data}"))
    })?;

    if let Some(err) = chunk.error {
        let code = err.code.or(err.kind).unwrap_or_default();
        let message = format!("openai stream error code={code}: {}", err.message);
        if is_rate_limit_signal(&code) {
            return Err(LlmError::RateLimit(message));
        }
        return Err(LlmError::Transport(message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|content| !content.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageData;

    #[test]
    fn request_uses_flat_role_content_pairs_with_persona() {
        let adapter = OpenAiAdapter::new(reqwest::Client::new(), Some("sk".to_string()), None, true);
        let selection = ModelSelection::new("gpt-4o", "GPT-4o");
        let handle = adapter
            .open_session(
                &selection,
                vec![
                    HistoryEntry {
                        role: "user",
                        text: "hi".to_string(),
                    },
                    HistoryEntry {
                        role: "assistant",
                        text: "hello".to_string(),
                    },
                ],
            )
            .expect("session");
        let payload = Payload {
            parts: vec![PayloadPart::Text("next".to_string())],
        };
        let value =
            serde_json::to_value(OpenAiChatRequest::new(&handle, &payload).expect("request"))
                .expect("json");
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["stream"], true);
        let messages = value["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], persona_line("GPT-4o"));
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3], serde_json::json!({"role": "user", "content": "next"}));
    }

    #[test]
    fn persona_can_be_disabled() {
        let adapter =
            OpenAiAdapter::new(reqwest::Client::new(), Some("sk".to_string()), None, false);
        let handle = adapter
            .open_session(&ModelSelection::new("gpt-4o", "GPT-4o"), vec![])
            .expect("session");
        assert!(handle.system().is_none());
    }

    #[test]
    fn persona_is_one_line() {
        assert!(!persona_line("GPT-4o mini").contains('\n'));
        assert!(persona_line("GPT-4o mini").contains("GPT-4o mini"));
    }

    #[test]
    fn image_payload_is_a_contract_violation() {
        let handle = ChatHandle::new("gpt-4o", None, vec![]);
        let payload = Payload {
            parts: vec![
                PayloadPart::Text("x".to_string()),
                PayloadPart::Image(ImageData::new("image/png", vec![1u8]).expect("png")),
            ],
        };
        let err = OpenAiChatRequest::new(&handle, &payload).expect_err("rejected");
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[test]
    fn delta_chunks_yield_non_empty_fragments() {
        let role_only = r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#;
        assert_eq!(fragment_from_chunk(role_only).expect("ok"), None);
        let delta = r#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(fragment_from_chunk(delta).expect("ok").as_deref(), Some("Hi"));
        let finish = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(fragment_from_chunk(finish).expect("ok"), None);
    }

    #[test]
    fn mid_stream_quota_error_is_rate_limit() {
        let data = r#"{"error":{"message":"You exceeded your quota","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        let err = fragment_from_chunk(data).expect_err("quota");
        assert_eq!(err.kind(), crate::ErrorKind::RateLimit);
    }
}

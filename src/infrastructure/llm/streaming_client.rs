use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::application::ports::{LlmClient, LlmClientError, LlmTokenStream};
use crate::domain::{ContentType, DocumentContent};
use crate::presentation::config::LlmSettings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// OpenAI-compatible chat completions client (OpenAI, LM Studio, Azure
/// deployments). Streaming uses server-sent events.
pub struct StreamingLlmClient {
    client: Client,
    provider: String,
    base_url: String,
    api_key: String,
    model: String,
    vision_model: String,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: FileData },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
struct FileData {
    filename: String,
    file_data: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl StreamingLlmClient {
    fn build_messages(&self, prompt: &str, context: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(context.to_string()),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Text(prompt.to_string()),
            },
        ]
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.provider == "azure" {
            request.header("api-key", &self.api_key)
        } else {
            request.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    async fn send(
        &self,
        body: &ChatCompletionRequest<'_>,
    ) -> Result<reqwest::Response, LlmClientError> {
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(body);
        let response = self.apply_auth(request).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmClientError::Timeout
            } else {
                LlmClientError::ApiRequestFailed(e.to_string())
            }
        })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmClientError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // 4xx other than 429 will not succeed on retry.
            if status.is_client_error() {
                return Err(LlmClientError::InvalidResponse(format!(
                    "HTTP {}: {}",
                    status, body
                )));
            }
            return Err(LlmClientError::ApiRequestFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        Ok(response)
    }

    async fn complete_messages(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, LlmClientError> {
        let request_body = ChatCompletionRequest {
            model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: None,
        };

        let completion_response: ChatCompletionResponse = self
            .send(&request_body)
            .await?
            .json()
            .await
            .map_err(|e| LlmClientError::InvalidResponse(e.to_string()))?;

        completion_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmClientError::InvalidResponse("empty choices".to_string()))
    }
}

/// Turns a document into the user content parts of a vision request.
fn document_parts(
    instructions: &str,
    document: &DocumentContent,
) -> Result<Vec<ContentPart>, LlmClientError> {
    let mut parts = vec![ContentPart::Text {
        text: instructions.to_string(),
    }];
    let data_uri = || {
        format!(
            "data:{};base64,{}",
            document.content_type.as_mime(),
            BASE64.encode(&document.data)
        )
    };

    match document.content_type {
        ContentType::Png | ContentType::Jpeg | ContentType::Webp => {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl { url: data_uri() },
            });
        }
        ContentType::Pdf => {
            parts.push(ContentPart::File {
                file: FileData {
                    filename: document
                        .filename
                        .clone()
                        .unwrap_or_else(|| "invoice.pdf".to_string()),
                    file_data: data_uri(),
                },
            });
        }
        ContentType::Text => {
            let text = String::from_utf8(document.data.clone()).map_err(|e| {
                LlmClientError::UnsupportedDocument(format!("text document is not UTF-8: {}", e))
            })?;
            parts.push(ContentPart::Text {
                text: format!("Document:\n{}", text),
            });
        }
    }
    Ok(parts)
}

/// Extracts delta tokens from complete SSE lines in `buffer`, leaving any
/// trailing partial line in place. Returns true once `[DONE]` is seen.
fn drain_sse_lines(buffer: &mut String, tokens: &mut Vec<String>) -> bool {
    while let Some(newline) = buffer.find('\n') {
        let line: String = buffer.drain(..=newline).collect();
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return true;
        }
        if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(data)
            && let Some(content) = chunk.choices.into_iter().next().and_then(|c| c.delta.content)
            && !content.is_empty()
        {
            tokens.push(content);
        }
    }
    false
}

#[async_trait]
impl LlmClient for StreamingLlmClient {
    #[tracing::instrument(skip(self, prompt, context), fields(model = %self.model))]
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, LlmClientError> {
        let messages = self.build_messages(prompt, context);
        self.complete_messages(&self.model, messages).await
    }

    #[tracing::instrument(skip(self, prompt, context), fields(model = %self.model))]
    async fn complete_stream(
        &self,
        prompt: &str,
        context: &str,
    ) -> Result<LlmTokenStream, LlmClientError> {
        let request_body = ChatCompletionRequest {
            model: &self.model,
            messages: self.build_messages(prompt, context),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: Some(true),
        };

        let mut bytes = self.send(&request_body).await?.bytes_stream();
        let token_stream = async_stream::stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                        let mut tokens = Vec::new();
                        let done = drain_sse_lines(&mut buffer, &mut tokens);
                        for token in tokens {
                            yield Ok(token);
                        }
                        if done {
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(LlmClientError::ApiRequestFailed(e.to_string()));
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(token_stream))
    }

    #[tracing::instrument(
        skip(self, instructions, document),
        fields(model = %self.vision_model, content_type = ?document.content_type, bytes = document.data.len())
    )]
    async fn analyze_document(
        &self,
        instructions: &str,
        document: &DocumentContent,
    ) -> Result<String, LlmClientError> {
        let messages = vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(
                    "You read invoices and answer with JSON only.".to_string(),
                ),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Parts(document_parts(instructions, document)?),
            },
        ];
        self.complete_messages(&self.vision_model, messages).await
    }
}

pub fn create_streaming_llm_client(
    settings: &LlmSettings,
) -> Result<StreamingLlmClient, LlmClientError> {
    let base_url = match settings.provider.as_str() {
        "openai" => settings
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string(),
        "lmstudio" => settings
            .base_url
            .clone()
            .ok_or_else(|| {
                LlmClientError::InvalidResponse(
                    "base_url required for lmstudio provider".to_string(),
                )
            })?
            .trim_end_matches('/')
            .to_string(),
        "azure" => {
            let endpoint = settings.azure_endpoint.as_ref().ok_or_else(|| {
                LlmClientError::InvalidResponse(
                    "azure_endpoint required for azure provider".to_string(),
                )
            })?;
            format!(
                "{}/openai/deployments/{}",
                endpoint.trim_end_matches('/'),
                settings.chat_model
            )
        }
        _ => {
            return Err(LlmClientError::InvalidResponse(format!(
                "unknown provider: {}",
                settings.provider
            )));
        }
    };

    // Bounds the silence between streamed chunks, not the whole answer.
    let client = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(Duration::from_secs(settings.read_timeout_secs.max(1)))
        .build()
        .map_err(|e| LlmClientError::ApiRequestFailed(e.to_string()))?;

    Ok(StreamingLlmClient {
        client,
        provider: settings.provider.clone(),
        base_url,
        api_key: settings.api_key.clone(),
        model: settings.chat_model.clone(),
        vision_model: settings
            .vision_model
            .clone()
            .unwrap_or_else(|| settings.chat_model.clone()),
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
    })
}

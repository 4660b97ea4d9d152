use crate::config::Settings;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::{ChatRequest, LlmClient, Provider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embed_model: String,
    max_tokens: u32,
    retries: u32,
}

impl OpenAiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_openai_api_key()?.to_string();
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let chat_model =
            std::env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string());
        let embed_model =
            std::env::var("OPENAI_EMBED_MODEL").unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string());
        let max_tokens = std::env::var("OPENAI_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let retries = std::env::var("OPENAI_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            chat_model,
            embed_model,
            max_tokens,
            retries,
        })
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        Ok(headers)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// POSTs a JSON body with bounded retries and exponential backoff.
    /// Transient transport errors and 429/5xx responses are retried; other
    /// HTTP failures surface immediately as diagnostics errors.
    async fn post_json<Req: Serialize, Res: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        stage: &'static str,
        req: &Req,
    ) -> anyhow::Result<Res> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.post_once(path, stage, req).await {
                Ok(res) => return Ok(res),
                Err(err) => {
                    let retryable = err
                        .downcast_ref::<LlmDiagnosticsError>()
                        .map_or(true, |d| d.stage == "http_retryable");
                    if !retryable || attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "OpenAI request failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn post_once<Req: Serialize, Res: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        stage: &'static str,
        req: &Req,
    ) -> anyhow::Result<Res> {
        let res = self
            .http
            .post(self.url(path))
            .headers(self.headers()?)
            .json(req)
            .send()
            .await
            .map_err(|e| LlmDiagnosticsError {
                provider: Provider::OpenAi,
                stage: "http_retryable",
                detail: format!("transport: {e}"),
                raw_output: None,
                raw_response_json: None,
            })?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read OpenAI response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err(LlmDiagnosticsError {
                provider: Provider::OpenAi,
                stage: if retryable { "http_retryable" } else { "http" },
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        serde_json::from_str::<Res>(&text).map_err(|e| {
            LlmDiagnosticsError {
                provider: Provider::OpenAi,
                stage,
                detail: format!("decode: {e}"),
                raw_output: Some(text),
                raw_response_json: None,
            }
            .into()
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn generate(&self, req: ChatRequest) -> anyhow::Result<String> {
        let body = ChatCompletionRequest {
            model: self.chat_model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: req.system,
                },
                Message {
                    role: "user",
                    content: req.user,
                },
            ],
            temperature: req.temperature,
            max_tokens: Some(req.max_tokens.unwrap_or(self.max_tokens)),
            response_format: req.json_response.then(|| ResponseFormat {
                format_type: "json_object",
            }),
        };

        let res: ChatCompletionResponse = self
            .post_json("/v1/chat/completions", "chat", &body)
            .await?;
        let content = res
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(content.trim().to_string())
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingsRequest {
            model: self.embed_model.clone(),
            input: texts.to_vec(),
        };
        let res: EmbeddingsResponse = self.post_json("/v1/embeddings", "embed", &body).await?;

        let mut data = res.data;
        data.sort_by_key(|d| d.index);
        anyhow::ensure!(
            data.len() == texts.len(),
            "embeddings count mismatch: expected {}, got {}",
            texts.len(),
            data.len()
        );
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingObject>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingObject {
    index: usize,
    embedding: Vec<f32>,
}

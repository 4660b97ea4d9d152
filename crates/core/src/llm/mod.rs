pub mod error;
pub mod json;
pub mod openai;

#[derive(Debug, Clone, Copy)]
pub enum Provider {
    OpenAi,
}

/// One chat-completion request at the collaborator boundary. Callers must
/// not assume determinism of the output.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    /// Ask the provider for a JSON-object response.
    pub json_response: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_response: true,
            temperature: Some(0.3),
            max_tokens: None,
        }
    }
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn generate(&self, req: ChatRequest) -> anyhow::Result<String>;

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatRequest, ChatResponse, ModelInfo, ProviderError, StreamEvent};

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn validate_credentials(
        &self,
        api_key: &str,
        base_url: &str,
    ) -> Result<Vec<ModelInfo>, ProviderError>;

    async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream the reply into `tx`. Implementations send `Token` events and
    /// finish with exactly one `Done` or `Error`, unless the request fails
    /// before streaming starts, in which case the error is returned instead.
    async fn stream_message(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError>;
}

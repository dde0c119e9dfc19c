use anyhow::Result;
use async_trait::async_trait;

/// Text-in, text-out model provider. Transport, auth and provider quirks stay
/// behind this trait; callers bound every call with their own timeout.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

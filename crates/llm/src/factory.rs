//! Config-driven client construction.

use crate::claude::ClaudeClient;
use crate::openai_compat::OpenAiCompatClient;
use ferrocode_core::error::LlmError;
use ferrocode_core::llm::{LlmClient, LlmConfig, LlmProvider};
use std::sync::Arc;

/// Create a client for the given configuration.
pub fn create_client(config: LlmConfig) -> std::result::Result<Arc<dyn LlmClient>, LlmError> {
    if config.model.is_empty() {
        return Err(LlmError::NotConfigured(format!(
            "no model configured for provider {}",
            config.provider
        )));
    }

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAi => Arc::new(OpenAiCompatClient::openai(config)),
        LlmProvider::DeepSeek => Arc::new(OpenAiCompatClient::deepseek(config)),
        LlmProvider::Ollama => Arc::new(OpenAiCompatClient::ollama(config)),
        LlmProvider::Claude => Arc::new(ClaudeClient::new(config)),
    };

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: LlmProvider) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: "key".into(),
            base_url: String::new(),
            model: "some-model".into(),
            max_tokens: 2048,
            temperature: 0.5,
        }
    }

    #[test]
    fn creates_client_per_provider() {
        for provider in [
            LlmProvider::OpenAi,
            LlmProvider::DeepSeek,
            LlmProvider::Claude,
            LlmProvider::Ollama,
        ] {
            let client = create_client(config(provider)).unwrap();
            assert_eq!(client.provider(), provider);
        }
    }

    #[test]
    fn missing_model_is_an_error() {
        let mut cfg = config(LlmProvider::OpenAi);
        cfg.model = String::new();
        let err = match create_client(cfg) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, LlmError::NotConfigured(_)));
    }
}

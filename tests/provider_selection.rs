//! Provider registry and configuration-time validation scenarios.

use std::sync::Arc;

use async_trait::async_trait;

use kubepilot::llm::providers::bedrock::BedrockClient;
use kubepilot::llm::registry::{self, ProviderUri};
use kubepilot::llm::{
    Chat, ChatResponse, Client, CompletionRequest, CompletionResponse, LlmError,
};

#[derive(Debug)]
struct NullClient;

#[async_trait]
impl Client for NullClient {
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(vec!["null-model".to_string()])
    }

    async fn generate_completion(
        &self,
        _request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            text: String::new(),
            usage: None,
        })
    }

    fn start_chat(&self, _system_prompt: &str, _model: &str) -> Result<Box<dyn Chat>, LlmError> {
        Err(LlmError::unsupported("chat"))
    }

    fn supports_tools(&self, _model: &str) -> bool {
        false
    }

    fn supports_streaming(&self, _model: &str) -> bool {
        false
    }
}

// The registry is process-global, so its lifecycle rules are covered by
// one sequential test.
#[tokio::test]
async fn registry_lifecycle() {
    registry::reset_for_tests();

    registry::register("nullprov", |_uri| Ok(Arc::new(NullClient) as Arc<dyn Client>))
        .expect("registers");
    // Duplicate ids are rejected.
    let err = registry::register("nullprov", |_uri| Ok(Arc::new(NullClient) as Arc<dyn Client>))
        .unwrap_err();
    assert!(err.to_string().contains("already registered"));

    // Lookup succeeds for a bare id and freezes the registry.
    let client = registry::new_client("nullprov").expect("builds");
    assert_eq!(client.list_models().await.unwrap(), vec!["null-model"]);
    let err = registry::register("latecomer", |_uri| Ok(Arc::new(NullClient) as Arc<dyn Client>))
        .unwrap_err();
    assert!(err.to_string().contains("after registry was first used"));

    // Unknown scheme is a configuration error.
    let err = registry::new_client("no-such-provider").unwrap_err();
    assert!(err.to_string().contains("not registered"));

    // Empty id with no LLM_CLIENT set names the env var in the error.
    std::env::remove_var("LLM_CLIENT");
    let err = registry::new_client("").unwrap_err();
    assert!(err.to_string().contains("LLM_CLIENT"));

    registry::reset_for_tests();
}

// S6 plus credential priority. AWS_* variables are process-global, so
// every case lives in this one sequential test.
#[test]
fn bedrock_configuration_validation() {
    std::env::remove_var("AWS_REGION");
    std::env::remove_var("AWS_BEARER_TOKEN_BEDROCK");
    std::env::remove_var("AWS_ACCESS_KEY_ID");
    std::env::remove_var("AWS_SECRET_ACCESS_KEY");

    // No credentials at all: constructor reports them missing.
    let bare = ProviderUri::parse("bedrock").expect("parses");
    let err = BedrockClient::from_uri(&bare).unwrap_err();
    assert!(err.to_string().contains("credentials missing"), "{err}");

    // A bearer token alone is sufficient; default region applies.
    std::env::set_var("AWS_BEARER_TOKEN_BEDROCK", "test-token");
    let client = BedrockClient::from_uri(&bare).expect("bearer token suffices");
    assert_eq!(client.region(), "us-west-2");

    // S6: URI region disagreeing with AWS_REGION fails before any
    // network call, with an error containing "mismatch".
    std::env::set_var("AWS_REGION", "eu-west-1");
    let uri = ProviderUri::parse("bedrock://bedrock.us-east-1.amazonaws.com").expect("parses");
    let err = BedrockClient::from_uri(&uri).unwrap_err();
    assert!(err.to_string().contains("mismatch"), "{err}");

    std::env::remove_var("AWS_REGION");
    std::env::remove_var("AWS_BEARER_TOKEN_BEDROCK");
}

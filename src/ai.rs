use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;

use crate::error::InvocationCause;
use crate::models::ApiBinding;

// --- Client trait ---

/// Request/response access to an external NLP/LLM provider.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        binding: &ApiBinding,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, InvocationCause>;
}

/// Read the secret behind a binding's credential reference from the environment.
///
/// Errors never echo the reference or the secret.
pub fn resolve_credential(binding: &ApiBinding) -> Result<Option<String>, InvocationCause> {
    resolve_credential_with(binding, |var| env::var(var).ok())
}

fn resolve_credential_with<F>(binding: &ApiBinding, lookup: F) -> Result<Option<String>, InvocationCause>
where
    F: Fn(&str) -> Option<String>,
{
    match &binding.credential_ref {
        None => Ok(None),
        Some(var) => match lookup(var) {
            Some(secret) if !secret.trim().is_empty() => Ok(Some(secret.trim().to_string())),
            _ => Err(InvocationCause::RejectedInput(
                "credential for this agent is not available".to_string(),
            )),
        },
    }
}

// --- OpenAI-compatible HTTP client ---

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    #[serde(flatten)]
    parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Default)]
pub struct HttpCompletionClient {
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

fn transport(err: reqwest::Error) -> InvocationCause {
    if err.is_timeout() {
        InvocationCause::Timeout
    } else {
        // without_url keeps query-string credentials out of the message
        InvocationCause::Transport(err.without_url().to_string())
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        binding: &ApiBinding,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, InvocationCause> {
        if binding.endpoint.trim().is_empty() {
            return Err(InvocationCause::RejectedInput(
                "agent has no API endpoint configured".to_string(),
            ));
        }

        let request = ChatRequest {
            model: binding.model_name.clone(),
            max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            parameters: binding.parameters.clone(),
        };

        let mut builder = self
            .client
            .post(&binding.endpoint)
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(secret) = resolve_credential(binding)? {
            builder = builder.bearer_auth(secret);
        }

        let response = builder.send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let snippet: String = error_text.chars().take(200).collect();
            let message = format!("provider returned {}: {}", status, snippet);
            // 429 and 5xx are worth retrying; other 4xx mean the request itself was bad
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                InvocationCause::Transport(message)
            } else {
                InvocationCause::RejectedInput(message)
            });
        }

        let api_response: ChatResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                InvocationCause::RejectedInput("unparseable provider response".to_string())
            } else {
                transport(e)
            }
        })?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| InvocationCause::RejectedInput("empty provider response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(credential_ref: Option<&str>) -> ApiBinding {
        ApiBinding {
            endpoint: "https://api.example.com/v1/chat/completions".to_string(),
            credential_ref: credential_ref.map(String::from),
            model_name: "gpt-4o".to_string(),
            parameters: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_resolve_credential_without_reference() {
        assert_eq!(resolve_credential(&binding(None)).unwrap(), None);
    }

    #[test]
    fn test_resolve_credential_missing_secret_is_not_echoed() {
        let err = resolve_credential_with(&binding(Some("SCOUT_TEST_MISSING_KEY")), |_| None)
            .unwrap_err();
        assert!(matches!(err, InvocationCause::RejectedInput(_)));
        assert!(!err.to_string().contains("SCOUT_TEST_MISSING_KEY"));

        let blank = resolve_credential_with(&binding(Some("KEY")), |_| Some("  ".to_string()));
        assert!(blank.is_err());
    }

    #[test]
    fn test_resolve_credential_reads_named_variable() {
        let lookup = |var: &str| (var == "SCOUT_TEST_PRESENT_KEY").then(|| " sk-test \n".to_string());
        let secret = resolve_credential_with(&binding(Some("SCOUT_TEST_PRESENT_KEY")), lookup).unwrap();
        assert_eq!(secret.as_deref(), Some("sk-test"));
        assert!(resolve_credential_with(&binding(Some("OTHER_KEY")), lookup).is_err());
    }

    #[test]
    fn test_request_flattens_binding_parameters() {
        let mut parameters = serde_json::Map::new();
        parameters.insert("temperature".to_string(), serde_json::json!(0.2));
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            max_tokens: 128,
            messages: vec![],
            parameters,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["temperature"], serde_json::json!(0.2));
        assert_eq!(body["max_tokens"], serde_json::json!(128));
    }

    #[tokio::test]
    async fn test_empty_endpoint_is_rejected() {
        let client = HttpCompletionClient::new();
        let mut b = binding(None);
        b.endpoint = String::new();
        let err = client.complete(&b, "hello", 10).await.unwrap_err();
        assert!(matches!(err, InvocationCause::RejectedInput(_)));
    }
}

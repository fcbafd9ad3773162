//! OpenAI-compatible chat client implementing [`LlmService`].
//!
//! The model is forced through a single `update_code` function tool whose
//! arguments are a [`ReplacementsResult`]. Transport failures and non-2xx
//! responses are errors; anything the model says that does not parse is an
//! empty result carrying the reason in its commit message.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use bumpfix_core::ReplacementsResult;

use crate::config::LlmConfig;
use crate::error::EngineError;
use crate::services::{ChatMessage, LlmService};

pub const DEFAULT_MODEL: &str = "gpt-4-turbo-preview";
pub const UPDATE_CODE_TOOL: &str = "update_code";

pub struct OpenAiCompatibleLlm {
    client: reqwest::Client,
    endpoint: String,
    provider: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatibleLlm {
    pub fn new(llm: &LlmConfig) -> Result<Self, EngineError> {
        let provider = llm.provider.clone().unwrap_or_else(|| "openai".to_string());
        let base_url = match provider.as_str() {
            "openai" => llm
                .api_base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            "openrouter" => llm
                .api_base_url
                .clone()
                .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            "openai_compatible" => llm.api_base_url.clone().ok_or_else(|| {
                EngineError::Config(
                    "openai_compatible provider requires LLM_API_BASE_URL".to_string(),
                )
            })?,
            other => {
                return Err(EngineError::Config(format!(
                    "unsupported provider '{}': use openai, openrouter or openai_compatible",
                    other
                )))
            }
        };

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            provider,
            model: llm.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: llm.api_key.clone().unwrap_or_default(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, messages: &[ChatMessage], temperature: f64) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "tools": [update_code_tool()],
            "tool_choice": {
                "type": "function",
                "function": { "name": UPDATE_CODE_TOOL }
            }
        })
    }
}

#[async_trait]
impl LlmService for OpenAiCompatibleLlm {
    async fn get_replacements(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<ReplacementsResult, EngineError> {
        let mut req = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(messages, temperature));

        if self.provider == "openrouter" {
            req = req.header("X-Title", "bumpfix");
        }

        let response = req
            .send()
            .await
            .map_err(|err| EngineError::Provider(format!("provider request failed: {}", err)))?;

        let status = response.status();
        let body_text = response.text().await.map_err(|err| {
            EngineError::Provider(format!("provider response read failed: {}", err))
        })?;

        if !status.is_success() {
            return Err(EngineError::Provider(format!(
                "provider request failed ({}): {}",
                status, body_text
            )));
        }

        Ok(parse_chat_response(&body_text))
    }
}

/// The `update_code` function tool definition.
pub fn update_code_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": UPDATE_CODE_TOOL,
            "description": "Update the code to fix the code block",
            "parameters": {
                "type": "object",
                "properties": {
                    "replacements": {
                        "type": "array",
                        "description": "An array of code sections to update in the block. If there are no changes to be made, this array MUST be empty.",
                        "items": {
                            "type": "object",
                            "required": ["oldCode", "newCode", "reason"],
                            "properties": {
                                "oldCode": {
                                    "type": "string",
                                    "description": "The old lines of code. Be sure to add lines before and after to disambiguate the change."
                                },
                                "newCode": {
                                    "type": "string",
                                    "description": "The new lines of code to replace oldCode in the block. This MUST be different from the code being replaced."
                                },
                                "reason": {
                                    "type": "string",
                                    "description": "A brief explanation of the change. Describe the class, function, or variable the change is related to."
                                }
                            }
                        }
                    },
                    "commitMessage": {
                        "type": "string",
                        "description": "A short commit message representing the change, using conventional commit format."
                    }
                },
                "required": ["replacements", "commitMessage"]
            }
        }
    })
}

/// Extracts the first tool call's arguments from a chat completion body.
pub fn parse_chat_response(body: &str) -> ReplacementsResult {
    let parsed: OpenAiCompatibleChatResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(error = %err, "provider response parse failed");
            return ReplacementsResult::empty(format!("provider response parse failed: {}", err));
        }
    };

    let Some(call) = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.tool_calls)
        .and_then(|calls| calls.into_iter().next())
    else {
        tracing::warn!("provider response has no tool call");
        return ReplacementsResult::empty("no tool called in model response");
    };

    match serde_json::from_str::<ReplacementsResult>(&call.function.arguments) {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(
                tool = %call.function.name,
                error = %err,
                "tool call arguments did not parse"
            );
            ReplacementsResult::empty(format!("invalid tool call arguments: {}", err))
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiCompatibleChatResponse {
    choices: Vec<OpenAiCompatibleChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompatibleChoice {
    message: OpenAiCompatibleMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompatibleMessage {
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiCompatibleToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompatibleToolCall {
    function: OpenAiCompatibleFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompatibleFunction {
    #[serde(default)]
    name: String,
    arguments: String,
}

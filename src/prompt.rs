use serde::Serialize;

use crate::options::CallOptions;
use crate::token_counter::TokenCounter;

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub const COMPLETIONS_PATH: &str = "/v1/completions";

/// Hard context-window ceiling for instruct-family models; the completion
/// allowance is whatever the encoded prompt leaves of it.
pub const INSTRUCT_CONTEXT_TOKENS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Chat,
    Instruct,
}

impl ModelFamily {
    /// Unrecognized identifiers default to the chat family.
    pub fn classify(model: &str) -> Self {
        if model.to_lowercase().contains("instruct") {
            ModelFamily::Instruct
        } else {
            ModelFamily::Chat
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// A composed completion request, shaped for the target model family.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PromptRequest {
    Chat(ChatRequest),
    Instruct(InstructRequest),
}

impl PromptRequest {
    /// Build the request body for `model` from an instruction prompt and
    /// the budgeted user prompt. Pure; no side effects.
    pub fn compose(system_prompt: &str, prompt: &str, model: &str, opts: &CallOptions) -> Self {
        match ModelFamily::classify(model) {
            ModelFamily::Instruct => {
                let full_prompt = format!("{system_prompt}\n{prompt}");
                let prompt_tokens = TokenCounter::new().count_tokens(&full_prompt);
                PromptRequest::Instruct(InstructRequest {
                    model: model.to_string(),
                    prompt: full_prompt,
                    max_tokens: INSTRUCT_CONTEXT_TOKENS.saturating_sub(prompt_tokens),
                    temperature: opts.temperature,
                    top_p: opts.top_p,
                    user: opts.user.clone(),
                })
            }
            ModelFamily::Chat => PromptRequest::Chat(ChatRequest {
                model: model.to_string(),
                messages: vec![
                    ChatMessage {
                        role: "system".to_string(),
                        content: system_prompt.to_string(),
                    },
                    ChatMessage {
                        role: "user".to_string(),
                        content: prompt.to_string(),
                    },
                ],
                temperature: opts.temperature,
                top_p: opts.top_p,
                user: opts.user.clone(),
            }),
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            PromptRequest::Chat(_) => CHAT_COMPLETIONS_PATH,
            PromptRequest::Instruct(_) => COMPLETIONS_PATH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_model_family() {
        assert_eq!(
            ModelFamily::classify("gpt-3.5-turbo-instruct"),
            ModelFamily::Instruct
        );
        assert_eq!(ModelFamily::classify("gpt-3.5-turbo"), ModelFamily::Chat);
        assert_eq!(ModelFamily::classify("gpt-4"), ModelFamily::Chat);
        // unknown identifiers get the chat shape
        assert_eq!(ModelFamily::classify("some-new-model"), ModelFamily::Chat);
    }

    #[test]
    fn test_chat_request_shape() {
        let request = PromptRequest::compose("system text", "user text", "gpt-4", &CallOptions::default());
        assert_eq!(request.path(), CHAT_COMPLETIONS_PATH);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "system text");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "user text");
        assert!(body.get("temperature").is_none());
        assert!(body.get("top_p").is_none());
        assert!(body.get("user").is_none());
    }

    #[test]
    fn test_instruct_request_caps_output_tokens() {
        let opts = CallOptions::default();
        let request =
            PromptRequest::compose("system", "a longer user prompt", "gpt-3.5-turbo-instruct", &opts);
        assert_eq!(request.path(), COMPLETIONS_PATH);
        let PromptRequest::Instruct(instruct) = &request else {
            panic!("expected instruct shape");
        };
        assert_eq!(instruct.prompt, "system\na longer user prompt");
        let used = TokenCounter::new().count_tokens(&instruct.prompt);
        assert_eq!(instruct.max_tokens, INSTRUCT_CONTEXT_TOKENS - used);
    }

    #[test]
    fn test_sampling_options_pass_through() {
        let opts = CallOptions {
            temperature: Some(0.5),
            top_p: Some(1.0),
            user: Some("tester".to_string()),
            ..Default::default()
        };
        let request = PromptRequest::compose("s", "u", "gpt-4", &opts);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["top_p"], 1.0);
        assert_eq!(body["user"], "tester");
    }
}

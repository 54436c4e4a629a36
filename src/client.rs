use std::time::{Duration, Instant};

use base64::Engine;
use rand::RngCore;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::errors::{Error, Result};
use crate::prompt::PromptRequest;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const EMBEDDINGS_PATH: &str = "/v1/embeddings";
pub const MODELS_PATH: &str = "/v1/models";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(90);

/// Total attempts for a rate-limited request: the first call plus four
/// retries, with a fixed pause in between. No jitter, no backoff growth.
const RATE_LIMIT_ATTEMPTS: u32 = 5;
const RATE_LIMIT_PAUSE: Duration = Duration::from_secs(1);

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Completion envelope returned by the chat and instruct endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingEnvelope {
    #[serde(default)]
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    #[serde(default)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsEnvelope {
    #[serde(default)]
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub owned_by: String,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

/// A decoded envelope plus the wall-clock time of the whole exchange,
/// first attempt to last.
#[derive(Debug)]
pub struct Timed<T> {
    pub data: T,
    pub elapsed: Duration,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_token: String,
}

impl ApiClient {
    pub fn new(api_token: &str, base_api_url: Option<&str>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        let base_url = Url::parse(base_api_url.unwrap_or(DEFAULT_BASE_URL))?;
        Ok(ApiClient {
            http,
            base_url,
            api_token: api_token.to_string(),
        })
    }

    pub async fn completion(&self, request: &PromptRequest) -> Result<Timed<Envelope>> {
        let body = serde_json::to_value(request)?;
        self.execute(request.path(), Some(&body)).await
    }

    pub async fn embeddings(
        &self,
        model: &str,
        input: &str,
        user: Option<&str>,
    ) -> Result<Timed<EmbeddingEnvelope>> {
        let body = serde_json::to_value(EmbeddingsRequest { model, input, user })?;
        self.execute(EMBEDDINGS_PATH, Some(&body)).await
    }

    pub async fn models(&self) -> Result<Timed<ModelsEnvelope>> {
        self.execute(MODELS_PATH, None).await
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Timed<T>> {
        let url = self.base_url.join(path)?;
        let request_id = new_request_id();
        if let Some(payload) = body {
            tracing::debug!(%request_id, %url, payload = %payload, "sending API request");
        } else {
            tracing::debug!(%request_id, %url, "sending API request");
        }

        let started = Instant::now();
        let mut attempt = 0u32;
        let data = loop {
            attempt += 1;
            let builder = match body {
                Some(payload) => self.http.post(url.clone()).json(payload),
                None => self.http.get(url.clone()),
            };
            let response = builder.bearer_auth(&self.api_token).send().await?;
            let status = response.status();
            let data: Value = response.json().await?;

            if !status.is_success() {
                if status == StatusCode::TOO_MANY_REQUESTS && attempt < RATE_LIMIT_ATTEMPTS {
                    tracing::debug!(%request_id, attempt, "rate limited, pausing before retry");
                    tokio::time::sleep(RATE_LIMIT_PAUSE).await;
                    continue;
                }
                return Err(api_error(&data, status));
            }

            // An error object inside a successful envelope still means
            // failure, whatever the transport status said.
            if data.get("error").map_or(false, |e| !e.is_null()) {
                return Err(api_error(&data, status));
            }

            break data;
        };
        let elapsed = started.elapsed();

        tracing::debug!(%request_id, ?elapsed, output = %data, "API response");
        Ok(Timed {
            data: serde_json::from_value(data)?,
            elapsed,
        })
    }
}

fn api_error(data: &Value, status: StatusCode) -> Error {
    let error = data.get("error");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| error.and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "Failed to run API request".to_string());
    let code = error.and_then(|e| e.get("code")).and_then(|code| match code {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    });
    Error::Api {
        message,
        code,
        status: Some(status.as_u16()),
    }
}

fn new_request_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

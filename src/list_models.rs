use std::cmp::Ordering;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::client::{ApiClient, ModelEntry};
use crate::errors::Result;
use crate::options::CallOptions;

/// Owners whose models are internal and never useful to callers.
const INTERNAL_OWNERS: [&str; 1] = ["openai-dev"];

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    /// Human-readable name derived from the id, e.g. `GPT-3.5 Turbo 16K`.
    pub name: String,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub models: Vec<ModelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

lazy_static! {
    static ref DATE_SUFFIX: Regex = Regex::new(r"-\d{4,}$").unwrap();
    static ref WORD_START: Regex = Regex::new(r"^.| .").unwrap();
    static ref HD_WORD: Regex = Regex::new(r"(?i)\bhd\b").unwrap();
    static ref KILO_WORD: Regex = Regex::new(r"(?i)\b\d+k\b").unwrap();
    static ref LEADING_FAMILY: Regex = Regex::new(r"(?i)^(gpt|tts) ").unwrap();
}

/// List the models the token can use, most relevant first.
pub async fn list_models(api_token: &str, opts: &CallOptions) -> Result<ModelList> {
    let client = ApiClient::new(api_token, opts.base_api_url.as_deref())?;
    let timed = client.models().await?;

    let mut entries: Vec<ModelEntry> = timed
        .data
        .data
        .into_iter()
        .filter(|entry| !INTERNAL_OWNERS.contains(&entry.owned_by.as_str()))
        .collect();
    entries.sort_by(compare_models);

    let models = entries
        .into_iter()
        .map(|entry| ModelInfo {
            name: display_name(&entry.id),
            id: entry.id,
            owned_by: entry.owned_by,
        })
        .collect();

    Ok(ModelList {
        models,
        elapsed_ms: opts.verbose.then_some(timed.elapsed.as_millis() as u64),
    })
}

/// GPT-family first, ids without a trailing date stamp before dated ones,
/// non-preview before preview, lexicographic within each band.
fn compare_models(a: &ModelEntry, b: &ModelEntry) -> Ordering {
    let a_gpt = a.id.starts_with("gpt");
    let b_gpt = b.id.starts_with("gpt");
    if a_gpt != b_gpt {
        return if a_gpt { Ordering::Less } else { Ordering::Greater };
    }

    let a_dated = DATE_SUFFIX.is_match(&a.id);
    let b_dated = DATE_SUFFIX.is_match(&b.id);
    if a_dated != b_dated {
        return if a_dated { Ordering::Greater } else { Ordering::Less };
    }

    let a_preview = a.id.contains("-preview");
    let b_preview = b.id.contains("-preview");
    if a_preview != b_preview {
        return if a_preview { Ordering::Greater } else { Ordering::Less };
    }

    a.id.cmp(&b.id)
}

fn display_name(id: &str) -> String {
    let name = id.replace('-', " ");
    let name = WORD_START.replace_all(&name, |caps: &Captures| caps[0].to_uppercase());
    let name = HD_WORD.replace_all(&name, |caps: &Captures| caps[0].to_uppercase());
    let name = KILO_WORD.replace_all(&name, |caps: &Captures| caps[0].to_uppercase());
    let name = name.replace("Dall E", "Dall-E");
    let name = match name.strip_prefix("Whisper ") {
        Some(rest) => format!("Whisper-{rest}"),
        None => name,
    };
    LEADING_FAMILY
        .replace(&name, |caps: &Captures| format!("{}-", caps[1].to_uppercase()))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(id: &str) -> ModelEntry {
        ModelEntry {
            id: id.to_string(),
            owned_by: "openai".to_string(),
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(display_name("gpt-4"), "GPT-4");
        assert_eq!(display_name("gpt-3.5-turbo-16k"), "GPT-3.5 Turbo 16K");
        assert_eq!(display_name("dall-e-3"), "Dall-E 3");
        assert_eq!(display_name("whisper-1"), "Whisper-1");
        assert_eq!(display_name("tts-1-hd"), "TTS-1 HD");
        assert_eq!(display_name("text-embedding-ada-002"), "Text Embedding Ada 002");
    }

    #[test]
    fn test_model_ordering() {
        let mut entries = vec![
            entry("davinci-002"),
            entry("gpt-4"),
            entry("gpt-3.5-turbo-0125"),
            entry("gpt-4-1106-preview"),
            entry("whisper-1"),
            entry("gpt-4-turbo"),
        ];
        entries.sort_by(compare_models);
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "gpt-4",
                "gpt-4-turbo",
                "gpt-4-1106-preview",
                "gpt-3.5-turbo-0125",
                "davinci-002",
                "whisper-1",
            ]
        );
    }

    #[tokio::test]
    async fn test_list_models_filters_internal_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": "gpt-4", "owned_by": "openai"},
                    {"id": "internal-tool", "owned_by": "openai-dev"},
                    {"id": "whisper-1", "owned_by": "openai-internal"}
                ]
            })))
            .mount(&server)
            .await;

        let opts = CallOptions {
            base_api_url: Some(server.uri()),
            ..Default::default()
        };
        let list = list_models("token", &opts).await.unwrap();
        let ids: Vec<&str> = list.models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["gpt-4", "whisper-1"]);
        assert_eq!(list.models[0].name, "GPT-4");
        assert_eq!(list.models[1].name, "Whisper-1");
        assert_eq!(list.elapsed_ms, None);
    }
}

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Header keys whose repeated occurrences carry stale upstream hops; only
/// the first value seen is meaningful for analysis.
pub const AUTH_TRACE_HEADERS: [&str; 4] = [
    "authentication-results",
    "arc-authentication-results",
    "arc-message-signature",
    "arc-seal",
];

/// Header whitelist shared by the summary and risk features.
pub const DEFAULT_ALLOWED_HEADERS: [&str; 10] = [
    "from",
    "to",
    "cc",
    "bcc",
    "subject",
    "mime-version",
    "authentication-results",
    "date",
    "content-type",
    "list-id",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Lowercase header field name, e.g. `mime-version`.
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Header {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(
        default,
        rename = "contentType",
        skip_serializing_if = "Option::is_none"
    )]
    pub content_type: Option<String>,
}

/// A parsed email message as delivered by the parsing collaborator.
/// Header order matches the original message; keys are lowercase.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Message {
    pub headers: Vec<Header>,
    pub attachments: Vec<Attachment>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
}

impl Message {
    /// Body text used for analysis: the plain-text part when present, with
    /// a fallback to the HTML part rendered as text when the HTML carries
    /// at least as much content.
    pub fn body_text(&self) -> String {
        let text = self.text.as_deref().unwrap_or("").to_string();
        if let Some(html) = self.html.as_deref() {
            if text.is_empty() || html.len() >= text.len() {
                return html2text::from_read(html.as_bytes(), 80);
            }
        }
        text
    }
}

/// Whitelisted projection of a [`Message`] that gets serialized into the
/// prompt. `text` is filled in by the budget fitter.
#[derive(Debug, Clone, Serialize)]
pub struct ContentPayload {
    pub headers: Vec<Header>,
    pub attachments: Vec<Attachment>,
    pub text: String,
}

impl ContentPayload {
    pub fn from_message(message: &Message, allowed_headers: &[String]) -> Self {
        let mut header_seen = HashSet::new();
        let headers = message
            .headers
            .iter()
            .filter(|header| allowed_headers.iter().any(|allowed| *allowed == header.key))
            .filter(|header| {
                if AUTH_TRACE_HEADERS.contains(&header.key.as_str()) {
                    header_seen.insert(header.key.clone())
                } else {
                    true
                }
            })
            .cloned()
            .collect();

        let attachments = message
            .attachments
            .iter()
            .filter(|attachment| attachment.filename.is_some() || attachment.content_type.is_some())
            .cloned()
            .collect();

        ContentPayload {
            headers,
            attachments,
            text: String::new(),
        }
    }

    /// Clone of the payload with the candidate body text filled in, ready
    /// for serialization into the prompt.
    pub fn with_text(&self, text: &str) -> Self {
        ContentPayload {
            headers: self.headers.clone(),
            attachments: self.attachments.clone(),
            text: text.to_string(),
        }
    }
}

/// Union of the caller's extra headers with the default whitelist,
/// lowercased and de-duplicated, caller's entries first.
pub fn merge_allowed_headers(defaults: &[&str], extra: Option<&[String]>) -> Vec<String> {
    let Some(extra) = extra else {
        return defaults.iter().map(|header| header.to_string()).collect();
    };

    let mut merged = Vec::new();
    let mut seen = HashSet::new();
    for header in extra
        .iter()
        .map(|header| header.trim().to_lowercase())
        .chain(defaults.iter().map(|header| header.to_string()))
    {
        if !header.is_empty() && seen.insert(header.clone()) {
            merged.push(header);
        }
    }
    merged
}

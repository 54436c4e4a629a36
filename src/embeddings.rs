use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::client::ApiClient;
use crate::errors::Result;
use crate::message::Message;
use crate::options::CallOptions;
use crate::token_counter::TokenCounter;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Default token size of one chunk, header block included.
pub const DEFAULT_CHUNK_SIZE: usize = 400;

/// Every chunk carries at least this many tokens of body text, however
/// large the shared header block gets.
pub const MIN_CHUNK_BODY_TOKENS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct ChunkEmbedding {
    pub chunk: String,
    pub embedding: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingsResult {
    pub model: String,
    pub embeddings: Vec<ChunkEmbedding>,
}

/// Splits one message into self-describing chunks: every chunk repeats a
/// compact header block (from/to/subject/date/attachments) so it can be
/// embedded and later retrieved independently of its siblings.
pub struct Embedder {
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    date: Option<String>,
    attachments: Vec<String>,
    text: String,
    chunk_size: usize,
}

lazy_static! {
    static ref QUOTED_LINE: Regex = Regex::new(r"(?m)^\s*>.*$").unwrap();
    static ref WS_ONLY_LINE: Regex = Regex::new(r"(?m)^[ \t]+$").unwrap();
    static ref BLANK_RUN: Regex = Regex::new(r"\n{2,}").unwrap();
}

impl Embedder {
    pub fn new(message: &Message, chunk_size: usize) -> Self {
        let mut from_values: Vec<String> = Vec::new();
        let mut to_values: Vec<String> = Vec::new();
        let mut subject = message
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|subject| !subject.is_empty())
            .map(str::to_string);
        let mut date = None;

        for header in &message.headers {
            match header.key.as_str() {
                "from" => from_values.push(collapse_whitespace(&header.value)),
                // recipients of every kind end up on one "to" line
                "to" | "cc" | "bcc" => to_values.push(collapse_whitespace(&header.value)),
                "subject" => {
                    if subject.is_none() {
                        let value = header.value.trim();
                        if !value.is_empty() {
                            subject = Some(value.to_string());
                        }
                    }
                }
                "date" => {
                    if date.is_none() {
                        date = DateTime::parse_from_rfc2822(header.value.trim())
                            .ok()
                            .map(|parsed| parsed.with_timezone(&Utc).to_rfc2822());
                    }
                }
                _ => {}
            }
        }

        let attachments = message
            .attachments
            .iter()
            .filter_map(|attachment| attachment.filename.as_deref())
            .map(collapse_whitespace)
            .filter(|filename| !filename.is_empty())
            .collect();

        Embedder {
            from: join_nonempty(from_values),
            to: join_nonempty(to_values),
            subject,
            date,
            attachments,
            text: prepare_text(&message.body_text()),
            chunk_size,
        }
    }

    fn header_block(&self) -> String {
        let mut lines = Vec::new();
        if let Some(from) = &self.from {
            lines.push(format!("from: {from}"));
        }
        if let Some(to) = &self.to {
            lines.push(format!("to: {to}"));
        }
        if let Some(subject) = &self.subject {
            lines.push(format!("subject: {subject}"));
        }
        if let Some(date) = &self.date {
            lines.push(format!("date: {date}"));
        }
        if !self.attachments.is_empty() {
            lines.push(format!("attachments: {}", self.attachments.join(" ; ")));
        }
        format!("{}\n\n", lines.join("\n"))
    }

    /// Ordered chunks, each prefixed with the shared header block.
    pub fn chunks(&self) -> Vec<String> {
        let counter = TokenCounter::new();
        let prefix = self.header_block();
        let prefix_tokens = counter.count_tokens(&prefix);
        let body_budget = body_token_budget(prefix_tokens, self.chunk_size);

        if self.text.is_empty() {
            return vec![prefix];
        }

        let tokens = counter.encode(&self.text);
        let mut chunks = Vec::new();
        let mut pos = 0;
        while pos < tokens.len() {
            let mut end = (pos + body_budget).min(tokens.len());
            // a token slice may end mid-character; shrink until it decodes
            let piece = loop {
                match counter.decode(&tokens[pos..end]) {
                    Some(piece) => break piece,
                    None if end > pos + 1 => end -= 1,
                    None => break String::new(),
                }
            };
            chunks.push(format!("{prefix}{piece}"));
            pos = end;
        }
        chunks
    }
}

fn body_token_budget(prefix_tokens: usize, chunk_size: usize) -> usize {
    (prefix_tokens + MIN_CHUNK_BODY_TOKENS).max(chunk_size) - prefix_tokens
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn join_nonempty(values: Vec<String>) -> Option<String> {
    let values: Vec<String> = values.into_iter().filter(|value| !value.is_empty()).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(" ; "))
    }
}

fn prepare_text(text: &str) -> String {
    let text = text.trim().replace("\r\n", "\n");
    let text = QUOTED_LINE.replace_all(&text, "");
    let text = WS_ONLY_LINE.replace_all(&text, "");
    BLANK_RUN.replace_all(&text, "\n\n").trim().to_string()
}

/// Generate embeddings for one message, one sequential API call per
/// chunk. Chunk order in the result matches chunk order in the message.
pub async fn generate_embeddings(
    message: &Message,
    api_token: &str,
    opts: &CallOptions,
) -> Result<EmbeddingsResult> {
    let model = opts
        .gpt_model
        .as_deref()
        .unwrap_or(DEFAULT_EMBEDDING_MODEL)
        .to_string();
    let chunk_size = opts.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
    let client = ApiClient::new(api_token, opts.base_api_url.as_deref())?;

    let embedder = Embedder::new(message, chunk_size);
    let mut embeddings = Vec::new();
    for chunk in embedder.chunks() {
        let timed = client
            .embeddings(&model, &chunk, opts.user.as_deref())
            .await?;
        let embedding = timed
            .data
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .unwrap_or_default();
        embeddings.push(ChunkEmbedding {
            chunk,
            embedding,
            elapsed_ms: opts
                .verbose
                .then_some(timed.elapsed.as_millis() as u64),
        });
    }

    Ok(EmbeddingsResult { model, embeddings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Attachment, Header};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_message(text: &str) -> Message {
        Message {
            headers: vec![
                Header::new("from", "James  <james@example.com>"),
                Header::new("to", "Andris <andris@example.com>"),
                Header::new("cc", "Carol <carol@example.com>"),
                Header::new("subject", "Hello"),
                Header::new("date", "Sun, 1 Oct 2023 06:30:26 +0200"),
            ],
            attachments: vec![Attachment {
                filename: Some("invoice final.pdf".to_string()),
                content_type: Some("application/pdf".to_string()),
            }],
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_header_block_shape() {
        let embedder = Embedder::new(&sample_message("body"), DEFAULT_CHUNK_SIZE);
        let block = embedder.header_block();
        assert!(block.starts_with("from: James <james@example.com>\n"));
        assert!(block.contains("to: Andris <andris@example.com> ; Carol <carol@example.com>\n"));
        assert!(block.contains("subject: Hello\n"));
        // rendered in UTC
        assert!(block.contains("date: Sun, 1 Oct 2023 04:30:26 +0000"));
        assert!(block.contains("attachments: invoice final.pdf"));
        assert!(block.ends_with("\n\n"));
    }

    #[test]
    fn test_every_chunk_carries_the_header_block() {
        let text = "All work and no play makes Jack a dull boy. ".repeat(200);
        let embedder = Embedder::new(&sample_message(&text), DEFAULT_CHUNK_SIZE);
        let chunks = embedder.chunks();
        assert!(chunks.len() > 1);
        let prefix = embedder.header_block();
        for chunk in &chunks {
            assert!(chunk.starts_with(&prefix));
        }
    }

    #[test]
    fn test_chunks_cover_whole_body_in_order() {
        let text = "All work and no play makes Jack a dull boy. ".repeat(200);
        let embedder = Embedder::new(&sample_message(&text), DEFAULT_CHUNK_SIZE);
        let prefix = embedder.header_block();
        let rebuilt: String = embedder
            .chunks()
            .iter()
            .map(|chunk| &chunk[prefix.len()..])
            .collect();
        assert_eq!(rebuilt, prepare_text(&text));
    }

    #[test]
    fn test_empty_body_yields_single_header_chunk() {
        let embedder = Embedder::new(&sample_message(""), DEFAULT_CHUNK_SIZE);
        let chunks = embedder.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], embedder.header_block());
    }

    #[test]
    fn test_body_budget_never_below_minimum() {
        for prefix_tokens in [0, 10, 150, 200, 399, 400, 1000, 5000] {
            for chunk_size in [1, 100, DEFAULT_CHUNK_SIZE, 2048] {
                assert!(
                    body_token_budget(prefix_tokens, chunk_size) >= MIN_CHUNK_BODY_TOKENS,
                    "prefix {prefix_tokens}, chunk_size {chunk_size}"
                );
            }
        }
    }

    #[test]
    fn test_large_chunk_size_reaches_past_minimum() {
        assert_eq!(body_token_budget(100, 2048), 2048 - 100);
    }

    #[test]
    fn test_prepare_text_strips_quoted_lines() {
        let text = "Reply text\r\n\r\n> quoted line\n> more quoting\n\n\n\nRest of it";
        assert_eq!(prepare_text(text), "Reply text\n\nRest of it");
    }

    #[tokio::test]
    async fn test_generate_embeddings_sequential_per_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.5, 0.25, -1.0]}]
            })))
            .mount(&server)
            .await;

        let text = "All work and no play makes Jack a dull boy. ".repeat(200);
        let opts = CallOptions {
            base_api_url: Some(server.uri()),
            ..Default::default()
        };
        let result = generate_embeddings(&sample_message(&text), "token", &opts).await.unwrap();

        assert_eq!(result.model, DEFAULT_EMBEDDING_MODEL);
        assert!(result.embeddings.len() > 1);
        for entry in &result.embeddings {
            assert_eq!(entry.embedding, vec![0.5, 0.25, -1.0]);
            assert!(entry.chunk.starts_with("from: "));
        }
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), result.embeddings.len());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::{fit_to_budget, MAX_PROMPT_TOKENS};
use crate::client::ApiClient;
use crate::errors::{Error, Result};
use crate::options::CallOptions;
use crate::prompt::PromptRequest;
use crate::response::{assistant_output, parse_delimited, parse_embedded_json};

pub const DEFAULT_QUERY_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_QUESTION_MODEL: &str = "gpt-3.5-turbo-instruct";

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an automated system designed to extract and provide information based on stored emails.";

const SCHEMA_PROMPT: &str = r#"**Input Information:**

- **Question Format:** The query is presented using the JSON schema: `{"question":"What was the date of our last meeting?"}`

- **Email Context:** We are provided with a series of emails to analyze.

  - **Email Structure:** Each email is divided into two sections: a header and its content. These sections are separated by an empty line.

  - **Email Content:** This pertains exclusively to the plain text of the email. No attachments or their contents are provided.

  - **Sample Header:**
    ```
    - EMAIL #1:
    From: James <james@example.com>
    To: Andris <andris@example.com>
    Subject: Hello
    Message-ID: <example@value>
    Date: 1 Oct 2023 06:30:26 +0200
    Attachments: image.png, invoice.pdf
    ```

    - Every header starts with the string `- EMAIL #` followed by the email sequence number
    - **Mandatory Field:** Every email will contain a unique Message-ID.
    - **Date Field:** Represents the timestamp when the email was sent.
    - **Attachments:** This field, when present, lists the names of attachments included with the email, separated by commas.

**Output Guidelines:**

1. Your objective is to sift through the email context and pinpoint the answer that best addresses the given query.
2. If no email matches the query criteria, or if the match is ambiguous, refrain from providing an answer.
3. Limit your sources strictly to the provided email context. External references are not to be utilized.
4. Format your response as follows:
   - Start with `Answer:` followed by the relevant information.
   - On a new line, begin with `Message-ID:` and cite the unique Message-ID(s) of the emails you sourced your answer from.
5. Ensure that the Message-ID is never embedded within the main body of your response.
6. Avoid including any additional commentary or annotations."#;

const QUESTION_PROMPT_HEAD: &str = r#"Instructions:

You are analyzing user questions regarding email retrieval from a database. From the user's query, determine:

1. **Order Preference**:
   - Retrieve older emails first ('older_first').
   - Retrieve newer emails first ('newer_first').
   - If no specific order is discernible from the query, identify the most relevant email ('best_match'), based on keywords or subjects that closely align with the user's question.

2. **Time Constraints**:
   - Identify the starting point for the query ('start_time').
   - Identify when to stop the query ('end_time')."#;

const QUESTION_PROMPT_TAIL: &str = r#"**Output Guidelines**:

- For terms implying a near-future context (e.g., "next", "newest", "upcoming"), opt for the 'newer_first' ordering.
- For terms implying a distant past (e.g., "first", "oldest"), use the 'older_first' ordering.
- If the user's query does not provide a clear time frame, or if the system's confidence in deducing a timeframe is below 70%, exclude 'start_time' and 'end_time' from the output.
- If the deduced 'end_time' aligns with current time, omit the 'end_time'.
- For unspecified time zones, timestamps should follow the 'YYYY-MM-DD hh:mm:ss' format.
- If only the date is known, use the 'YYYY-MM-DD' format.
- Assume the week starts on Monday.
- Your response should be structured in JSON, strictly adhering to the schema:
  ```
  {
    "ordering": "",
    "start_time": "",
    "end_time": ""
  }
  ```
- Example Queries and Responses:
  - **Query**: "When is the next conference event?"
    **Response**: `{"ordering":"newer_first"}`
  - **Query**: "What did James write to me about last Friday?" (assuming that current time is "2023-10-02")
    **Response**: `{"ordering":"best_match", "start_time": "2023-09-29", "end_time": "2023-09-30"}`
  - **Query**: "When did I receive my first Amazon invoice?"
    **Response**: `{"ordering":"older_first"}`

**User's Query**:
Process the user question:"#;

fn question_prompt(now: DateTime<Utc>) -> String {
    format!(
        "{QUESTION_PROMPT_HEAD}\n\n**Context**:\n\n- The current time is '{}'.\n\n{QUESTION_PROMPT_TAIL}",
        now.to_rfc2822()
    )
}

/// Answer to a question over embedded context chunks.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub id: Option<String>,
    pub tokens: Option<u64>,
    pub model: String,
    pub answer: String,
    #[serde(rename = "messageId")]
    pub message_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub characters_removed: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrdering {
    OlderFirst,
    NewerFirst,
    BestMatch,
}

/// Interpreted retrieval plan for a user question: preferred ordering and
/// optional time bounds, used to drive a later embedding search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryIntent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub ordering: Option<QueryOrdering>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

/// Answer `question` against a precomputed block of embedded context
/// chunks. The context block is budget-fitted; the question is not.
pub async fn embeddings_query(
    api_token: &str,
    question: &str,
    context_chunks: &str,
    opts: &CallOptions,
) -> Result<QueryAnswer> {
    let question = question.trim();
    if question.is_empty() {
        return Err(Error::EmptyInput("question"));
    }

    let system_prompt = opts
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
        .trim();
    let max_tokens = opts.max_tokens.unwrap_or(MAX_PROMPT_TOKENS);
    let model = opts.gpt_model.as_deref().unwrap_or(DEFAULT_QUERY_MODEL);

    let question_json = serde_json::json!({ "question": question }).to_string();
    let fitted = fit_to_budget(
        |candidate| {
            format!("{SCHEMA_PROMPT}\n\nInput:\n{question_json}\n\nContext emails:\n\n{candidate}\n")
        },
        context_chunks.trim(),
        max_tokens,
    )?;

    let request = PromptRequest::compose(system_prompt, &fitted.prompt, model, opts);
    let client = ApiClient::new(api_token, opts.base_api_url.as_deref())?;
    let timed = client.completion(&request).await?;

    let parsed = parse_delimited(&assistant_output(&timed.data));
    Ok(QueryAnswer {
        id: timed.data.id.clone(),
        tokens: timed.data.usage.as_ref().and_then(|usage| usage.total_tokens),
        model: model.to_string(),
        answer: parsed.answer,
        message_ids: parsed.message_ids,
        elapsed_ms: opts.verbose.then_some(timed.elapsed.as_millis() as u64),
        characters_removed: opts.verbose.then_some(fitted.characters_removed),
    })
}

/// Interpret a retrieval question: ordering preference plus optional time
/// bounds, as strict JSON. Does not touch the email context at all.
pub async fn question_query(
    question: &str,
    api_token: &str,
    opts: &CallOptions,
) -> Result<QueryIntent> {
    let question = question.trim();
    if question.is_empty() {
        return Err(Error::EmptyInput("question"));
    }

    let system_prompt = opts
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
        .trim();
    let model = opts.gpt_model.as_deref().unwrap_or(DEFAULT_QUESTION_MODEL);

    let prompt = format!("{}\n{question}\n", question_prompt(Utc::now()));

    // interpretation wants near-deterministic output
    let mut call_opts = opts.clone();
    call_opts.temperature = Some(opts.temperature.unwrap_or(0.2));

    let request = PromptRequest::compose(system_prompt, &prompt, model, &call_opts);
    let client = ApiClient::new(api_token, opts.base_api_url.as_deref())?;
    let timed = client.completion(&request).await?;

    let output = assistant_output(&timed.data);
    let values = parse_embedded_json(&output)?;
    let mut intent: QueryIntent = serde_json::from_value(values).map_err(|cause| Error::OutputParse {
        text: output.clone(),
        cause: Some(cause),
    })?;

    intent.id = timed.data.id.clone();
    intent.tokens = timed.data.usage.as_ref().and_then(|usage| usage.total_tokens);
    intent.model = model.to_string();
    if opts.verbose {
        intent.elapsed_ms = Some(timed.elapsed.as_millis() as u64);
    }
    Ok(intent)
}

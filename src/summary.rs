use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::budget::{fit_to_budget, MAX_PROMPT_TOKENS};
use crate::client::ApiClient;
use crate::errors::{Error, Result};
use crate::message::{merge_allowed_headers, ContentPayload, Message, DEFAULT_ALLOWED_HEADERS};
use crate::options::CallOptions;
use crate::prompt::PromptRequest;
use crate::response::{assistant_output, parse_embedded_json};
use crate::risk::RiskAssessment;

pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-3.5-turbo";

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "I want you to act as an executive assistant that processes emails for reporting.";

pub const DEFAULT_USER_PROMPT: &str = r#"Instructions:
- You are an executive assistant scanning incoming emails to report what is important and what is not, and also to inform about obvious fraud attempts.
- Describe the sentiment of the email using one word. Use either "positive", "neutral", or "negative". Include this value in the response as a "sentiment" property.
- Generate a one-sentence summary of the email. Include this value in the response as a "summary" property.
- Does it seem like the sender of the email would expect a reply to this email? Include this information in the response as a "shouldReply" property with the value "true" if they expect it and "false" if not.
- If this email is a reply to a previous email or a forwarded email, then extract the text content that only the email's sender wrote, and include this as a "replyText" property in the response.
- Do not include message signatures in the extracted reply text
- If the email text mentions events, return these events as separate event objects in an "events" array
- In the event object include the following properties
  - "description" property that describes the event in English
  - "location" property that defines the expected location of the event
  - "startTime" property that includes a timestamp without a timezone for the start of the event
  - "endTime" property that includes a timestamp without timezone for the expected end of the event if there is high confidence for the value
  - "type" property that includes a keyword that describes the type of the event.
    - "event" is a regular calendar event
    - "meeting" is a scheduled meeting
    - "appointment" is a scheduled appointment
    - "task" if the event describes a task that needs to be completed by the due date
    - "general" describes a generic event, like a fair or a competition
- If the email text mentions actions that the recipient must take, return these actions as separate action objects in an "actions" array
- In the action object, include the following properties
  - "description" property that summarises the action in English
  - "dueDate" property that includes a timestamp without a timezone for the due date of the action
- Do not include the event in the "events" array if the confidence for it being an event is low
- Generate a security analysis of the email and store the security analysis in "riskAssessment" property as an object value.
- The "riskAssessment" object should include the following properties
  - "risk" property that contains a risk score for the email using the following scale: 1 - 5 (where 1 is low risk, and 5 is high risk), taking into account what may happen if a user acts by the instructions given in the email.
  - "assessment" property, a single-sentence assessment text that includes details about issues that increase the risk score. Do not disclose details that decrease the risk score or do not affect it.
- Your security analysis should contain (but is not limited to) the following risk factors:
  - Does the email include links with domain names that contain typos or homoglyphs that might mislead the user about the actual target of the link
  - Does the sender address of the email not seem to match the persona or organization the sender email claims to be
  - Does the email promise the user an extremely good financial outcome
  - Does the email promise unclaimed money or goods
  - Does the email offer a vague business opportunity with no specific details
  - Does the email suggest there is a severe penalty if the user does not act as requested
  - Does the email claim that there are technical issues with the user's email account
  - Does the email offer services or activities that are not suitable for underage persons
  - Does the sender's email look like a throwaway address
  - Does the sender's email look like it might be spoofed
  - Does the email contain attachments where the name of the attachment might be misleading and suggest a different file format than is actually used
  - Does the email contain attachments that might be executable files
- Always return the response in English

Facts:

- An email might contain an "authentication-results" result header that indicates if the message passed SPF, DKIM, ARC, and DMARC checks
- Having a valid SPF, DKIM, and DMARC increases the chances that the sender domain name is not spoofed
- For valid SPF, the "authentication-results" header must include "spf=pass"
- For valid DKIM, the "authentication-results" header must include "dkim=pass"
- For valid DMARC, the "authentication-results" header must include "dmarc=pass"
- For valid ARC, the "authentication-results" header must include "arc=pass"
- Throwaway email addresses might contain a word or a name and more than one number in the username of the email address
- Throwaway email addresses might use a randomly generated or hex text string as the username of the email address
- Throwaway email addresses might use free email services like gmail.com, outlook.com, hotmail.com, yahoo.com, aol.com, etc
- An email is a reply to a previous email only if it includes an "in-reply-to" header
- An email is a forwarded email only if it includes the "references" header but not the "in-reply-to" header
- The email structure includes a property "headers" that contains an array of header values.
- For timestamps without a timezone, use the "YYYY-MM-DD hh:mm:ss" format
- For timestamps without known time, use the "YYYY-MM-DD" format
- If the email uses relative dates, then use the date from the "date" header as the base value to calculate actual dates"#;

const SCHEMA_PROMPT: &str = r#"Input facts:

- An email consists of message headers, an attachments list, and text content
- The email to analyze is formatted in a JSON format using the following schema:

```
{
  "headers": [{"key": <Header-Name>, "value": <Header-Value>}],
  "attachments": [{"filename": "<File-Name>", "contentType": "<File-Type>"}],
  "subject": "<Subject>",
  "text": "<Plaintext-Content>"
}
```

  - "<Header-Name>" defines the name part of a header line, e.g., "MIME-Version"
  - "<Header-Value>" defines the value part of a header line, e.g., "1.0"
  - "<File-Name>" defines the file name of the attachment, e.g., "document.pdf"
  - "<File-Type>" defines the file content type of the attachment, e.g., "application/pdf"
  - "<Subject>" defines the subject line of the email, e.g., "Sending documents."
  - "<Plaintext-Content>" defines the email body formatted as plaintext, e.g., "Documents are attached."

Output facts:

- You do not comment or explain anything
- Respond with a JSON formatted structure. Do not write any other explanations

Analyze the following email:"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailEvent {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// One of "event", "meeting", "appointment", "task", "general"; kept
    /// as text so unlisted keywords survive.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAction {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "crate::response::bool_or_string")]
    pub should_reply: Option<bool>,
    #[serde(default)]
    pub reply_text: Option<String>,
    #[serde(default)]
    pub risk_assessment: Option<RiskAssessment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EmailEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<EmailAction>,
    /// Anything else the model decided to include.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters_removed: Option<usize>,
}

/// Summarize one email: sentiment, one-sentence summary, reply
/// expectation, extracted events and actions, and a risk assessment.
pub async fn generate_summary(
    message: &Message,
    api_token: &str,
    opts: &CallOptions,
) -> Result<SummaryResult> {
    let max_tokens = opts.max_tokens.unwrap_or(MAX_PROMPT_TOKENS);
    let model = opts.gpt_model.as_deref().unwrap_or(DEFAULT_SUMMARY_MODEL);
    let system_prompt = opts
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
        .trim();
    let user_prompt = opts
        .user_prompt
        .as_deref()
        .unwrap_or(DEFAULT_USER_PROMPT)
        .trim();

    let allowed = merge_allowed_headers(&DEFAULT_ALLOWED_HEADERS, opts.allowed_headers.as_deref());
    let payload = ContentPayload::from_message(message, &allowed);

    let fitted = fit_to_budget(
        |candidate| {
            let content = payload.with_text(candidate);
            let body = serde_json::to_string(&content).expect("payload serializes");
            format!("{user_prompt}\n{SCHEMA_PROMPT}\n\n{body}")
        },
        &message.body_text(),
        max_tokens,
    )?;

    let request = PromptRequest::compose(system_prompt, &fitted.prompt, model, opts);
    let client = ApiClient::new(api_token, opts.base_api_url.as_deref())?;
    let timed = client.completion(&request).await?;

    let output = assistant_output(&timed.data);
    let values = parse_embedded_json(&output)?;
    let mut result: SummaryResult =
        serde_json::from_value(values).map_err(|cause| Error::OutputParse {
            text: output.clone(),
            cause: Some(cause),
        })?;

    // API-provided metadata always wins over anything the model may have
    // written into the same field names.
    result.id = timed.data.id.clone();
    result.tokens = timed.data.usage.as_ref().and_then(|usage| usage.total_tokens);
    result.model = model.to_string();
    if opts.verbose {
        result.elapsed_ms = Some(timed.elapsed.as_millis() as u64);
        result.characters_removed = Some(fitted.characters_removed);
    }
    Ok(result)
}

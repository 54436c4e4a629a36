use serde::{Deserialize, Serialize};

use crate::budget::{fit_to_budget, MAX_PROMPT_TOKENS};
use crate::client::ApiClient;
use crate::errors::{Error, Result};
use crate::message::{merge_allowed_headers, ContentPayload, Message, DEFAULT_ALLOWED_HEADERS};
use crate::options::CallOptions;
use crate::prompt::PromptRequest;
use crate::response::{assistant_output, parse_embedded_json};

pub const DEFAULT_RISK_MODEL: &str = "gpt-3.5-turbo";

const SYSTEM_PROMPT: &str = "I want you to act as are an IT security expert that monitors emails for suspicious and risky activity.";

const USER_PROMPT: &str = r#"Instructions:
- You are an IT security expert scanning incoming emails to detect and block fraud attempts.
- Your task is to monitor and analyze incoming emails, which consist of the message headers, a list of attachments, and text content
- Your analysis should contain (but is not limited to) the following risk factors:
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
- Provide a risk score for the email using the following scale: 1 - 5 (where 1 is low risk, and 5 is high risk), taking into account what may happen if a user acts by the instructions given in the email.
- Provide a short single-sentence assessment text that includes details about issues that increase the risk score, do not disclose details that decrease the risk score or do not affect it.
- Respond with a JSON formatted structure with a numeric risk score as "risk" property and the assessment as the "assessment" property. Do not write any other explanations.

Facts:
- An email consists of message headers, an attachments list, and text content
- An email might contain an "authentication-results" result header that indicates if the message passed SPF, DKIM, ARC, and DMARC checks
- Having a valid SPF, DKIM, and DMARC increases the chances that the sender domain name is not spoofed
- For valid SPF, the "authentication-results" header must include "spf=pass"
- For valid DKIM, the "authentication-results" header must include "dkim=pass"
- For valid DMARC, the "authentication-results" header must include "dmarc=pass"
- For valid ARC, the "authentication-results" header must include "arc=pass"
- Throwaway email addresses might contain a word or a name and more than one number in the username of the email address
- Throwaway email addresses might use a randomly generated or hex text string as the username of the email address
- Throwaway email addresses might use free email services like gmail.com, outlook.com, hotmail.com, yahoo.com, aol.com, etc
- The email to analyze is formatted in a JSON format
- The email structure includes a property "headers" that contains an array of header values.
- Each header contains two properties, "key" as the header field key name and "value" as the header value without the key prefix
- The email structure includes a property "attachments" that contains an array of attachments.
- Each attachment includes a "filename" property that describes the file name, "contentType" property that describes the Content-Type value of the attachment
- The email includes a "text" property for the text content

Analyze the following email:"#;

/// Security assessment of one email. Also embedded in summary results as
/// the `riskAssessment` sub-object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 1 (low) to 5 (high); -1 when the model's value could not be
    /// coerced to a number.
    #[serde(
        default = "crate::response::default_risk",
        deserialize_with = "crate::response::risk_score"
    )]
    pub risk: i64,
    #[serde(default)]
    pub assessment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub model: String,
    #[serde(
        default = "crate::response::default_risk",
        deserialize_with = "crate::response::risk_score"
    )]
    pub risk: i64,
    #[serde(default)]
    pub assessment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters_removed: Option<usize>,
}

/// Score one email for fraud risk.
pub async fn risk_analysis(
    message: &Message,
    api_token: &str,
    opts: &CallOptions,
) -> Result<RiskResult> {
    let max_tokens = opts.max_tokens.unwrap_or(MAX_PROMPT_TOKENS);
    let model = opts.gpt_model.as_deref().unwrap_or(DEFAULT_RISK_MODEL);
    let system_prompt = opts.system_prompt.as_deref().unwrap_or(SYSTEM_PROMPT).trim();
    let user_prompt = opts.user_prompt.as_deref().unwrap_or(USER_PROMPT).trim();

    let allowed = merge_allowed_headers(&DEFAULT_ALLOWED_HEADERS, opts.allowed_headers.as_deref());
    let payload = ContentPayload::from_message(message, &allowed);

    let fitted = fit_to_budget(
        |candidate| {
            let content = payload.with_text(candidate);
            let body = serde_json::to_string(&content).expect("payload serializes");
            format!("{user_prompt}\n\n{body}")
        },
        &message.body_text(),
        max_tokens,
    )?;

    let request = PromptRequest::compose(system_prompt, &fitted.prompt, model, opts);
    let client = ApiClient::new(api_token, opts.base_api_url.as_deref())?;
    let timed = client.completion(&request).await?;

    let output = assistant_output(&timed.data);
    let values = parse_embedded_json(&output)?;
    let mut result: RiskResult = serde_json::from_value(values).map_err(|cause| Error::OutputParse {
        text: output.clone(),
        cause: Some(cause),
    })?;

    result.id = timed.data.id.clone();
    result.tokens = timed.data.usage.as_ref().and_then(|usage| usage.total_tokens);
    result.model = model.to_string();
    if opts.verbose {
        result.elapsed_ms = Some(timed.elapsed.as_millis() as u64);
        result.characters_removed = Some(fitted.characters_removed);
    }
    Ok(result)
}

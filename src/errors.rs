use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// The prompt template alone exceeds the token budget, so no amount of
    /// payload trimming can make the request fit.
    #[error("prompt too long, removed {characters_removed} characters")]
    PromptTooLong {
        characters_removed: usize,
        original_length: usize,
        max_tokens: usize,
    },

    #[error("{0} not provided")]
    EmptyInput(&'static str),

    /// Non-success response from the completion API, or an `error` object
    /// inside an otherwise successful envelope.
    #[error("API request failed: {message}")]
    Api {
        message: String,
        code: Option<String>,
        status: Option<u16>,
    },

    /// The model's textual output could not be interpreted as the expected
    /// shape. Carries the raw text for diagnosis.
    #[error("failed to parse output from the completion API")]
    OutputParse {
        text: String,
        #[source]
        cause: Option<serde_json::Error>,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Decode(#[from] serde_json::Error),

    #[error("invalid API base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
}

/// Caller-tunable knobs recognized uniformly across the public entry
/// points. Unset fields fall back to per-feature defaults.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Model identifier, e.g. `gpt-4` or `text-embedding-ada-002`.
    pub gpt_model: Option<String>,
    /// Token budget for the rendered prompt.
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Opaque end-user tag forwarded to the API.
    pub user: Option<String>,
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
    /// Extra header names merged into the default whitelist.
    pub allowed_headers: Option<Vec<String>>,
    /// Token size of one embedding chunk, header block included.
    pub chunk_size: Option<usize>,
    pub base_api_url: Option<String>,
    /// Include timing and trim diagnostics in results.
    pub verbose: bool,
}

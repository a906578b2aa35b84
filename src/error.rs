use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid lexicon pattern for tag '{tag}': {source}")]
    Lexicon {
        tag: String,
        #[source]
        source: regex::Error,
    },

    #[error("Required input file not found: {0}")]
    MissingFile(String),

    #[error("Malformed row {line} in {path}: {source}")]
    Row {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Environment variable {name} unavailable: {source}")]
    Env {
        name: String,
        #[source]
        source: std::env::VarError,
    },
}

/// Failure reported by an external classifier call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("API error: {0}")]
    Api(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

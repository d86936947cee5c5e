use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum XenoError {
    #[error("invalid API key (HTTP 401), credential rejected for this run")]
    InvalidApiKey,

    #[error("rate limit exhausted after {waits} cooldown waits: {context}")]
    RateLimitExceeded { waits: u32, context: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("cache miss: {0}")]
    CacheMiss(String),

    #[error("invalid response payload: {0}")]
    PayloadParse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing API key: set \"api_key\" in the config or XENO_CANTO_API_KEY")]
    MissingApiKey,

    #[error("per_page must be within 50..=500, got {0}")]
    InvalidPerPage(u32),

    #[error("invalid species name: {0}")]
    InvalidSpeciesName(String),

    #[error("failed to read species list: {0}")]
    SpeciesList(String),

    #[error("failed to write summary: {0}")]
    Summary(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

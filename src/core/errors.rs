use thiserror::Error;

#[derive(Error, Debug)]
pub enum BitexError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("No plugin installed for exchange '{exchange}' and no auth available for a private request")]
    MissingPlugin { exchange: String },

    #[error("Private request to '{exchange}' requires credentials, but the session has none")]
    MissingCredentials { exchange: String },

    #[error("No auth object installed on this session")]
    MissingAuth,

    #[error("Projection '{projection}' is not implemented for exchange '{exchange}'")]
    UnimplementedProjection {
        projection: &'static str,
        exchange: String,
    },

    #[error("Plugin validation failed for '{exchange}': {reason}")]
    PluginValidation { exchange: String, reason: String },

    #[error("No connection adapter found for '{0}'")]
    NoAdapter(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),
}

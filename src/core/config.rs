use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;

/// API key/secret pair handed to a plugin's auth provider.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: Secret<String>,
    pub secret_key: Secret<String>,
}

// Never expose secrets in serialization
impl Serialize for Credentials {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Credentials", 2)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("secret_key", "[REDACTED]")?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Credentials {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct CredentialsHelper {
            api_key: String,
            secret_key: String,
        }

        let helper = CredentialsHelper::deserialize(deserializer)?;
        Ok(Self::new(helper.api_key, helper.secret_key))
    }
}

impl Credentials {
    #[must_use]
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
        }
    }

    /// Read credentials for an exchange from the environment
    ///
    /// Expected environment variables:
    /// - `{EXCHANGE}_API_KEY` (e.g., `KRAKEN_API_KEY`)
    /// - `{EXCHANGE}_SECRET_KEY` (e.g., `KRAKEN_SECRET_KEY`)
    pub fn from_env(exchange_prefix: &str) -> Result<Self, ConfigError> {
        let prefix = env_prefix(exchange_prefix);
        let api_key_var = format!("{}_API_KEY", prefix);
        let secret_key_var = format!("{}_SECRET_KEY", prefix);

        let api_key = env::var(&api_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_key_var))?;

        let secret_key = env::var(&secret_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(secret_key_var))?;

        Ok(Self::new(api_key, secret_key))
    }

    /// Load a `.env` file (if present) and then read credentials from the environment.
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(exchange_prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(exchange_prefix, ".env")
    }

    /// Same as [`Credentials::from_env_file`], with a custom file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(
        exchange_prefix: &str,
        env_file_path: &str,
    ) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // No file, fall through to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(exchange_prefix)
    }

    /// Check that both halves of the pair are non-empty
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.secret_key.expose_secret().is_empty()
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get secret key (use carefully - exposes secret)
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

/// Exchange names may contain scheme characters that are not valid in
/// variable names (`.`, `+`, `-`).
fn env_prefix(exchange: &str) -> String {
    exchange
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Session-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Key/secret handed to a plugin's auth provider on the first private request
    #[serde(default)]
    pub credentials: Option<Credentials>,
    /// Fall back to `{EXCHANGE}_API_KEY`/`{EXCHANGE}_SECRET_KEY` when no auth is set
    #[serde(default = "default_trust_env")]
    pub trust_env: bool,
    /// Default request timeout; `None` leaves the transport's own behavior in place
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_trust_env() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("bitex/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            trust_env: default_trust_env(),
            timeout_seconds: None,
            user_agent: default_user_agent(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn credentials(mut self, api_key: String, secret_key: String) -> Self {
        self.credentials = Some(Credentials::new(api_key, secret_key));
        self
    }

    #[must_use]
    pub const fn trust_env(mut self, trust_env: bool) -> Self {
        self.trust_env = trust_env;
        self
    }

    #[must_use]
    pub const fn timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Check if this configuration carries usable credentials
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials.as_ref().is_some_and(Credentials::is_complete)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

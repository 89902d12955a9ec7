use crate::core::errors::BitexError;
use crate::core::request::PreparedRequest;
use base64::engine::general_purpose;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Credential-signing object installed on a session or passed per call
///
/// Plugins supply their own implementation through the auth provider of
/// their descriptor. `sign` runs as the last step of request preparation,
/// after the URL, headers and body are final.
pub trait Auth: Send + Sync + fmt::Debug {
    /// API key this auth object signs with
    fn key(&self) -> &str;

    /// API secret this auth object signs with
    fn secret(&self) -> &str;

    /// Add authentication material (headers, query parameters, body fields)
    /// to the prepared request
    fn sign(&self, request: &mut PreparedRequest) -> Result<(), BitexError>;
}

/// HTTP Basic authentication, used by the base plugin
pub struct BasicAuth {
    key: Secret<String>,
    secret: Secret<String>,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth").finish_non_exhaustive()
    }
}

impl BasicAuth {
    pub fn new(key: String, secret: String) -> Self {
        Self {
            key: Secret::new(key),
            secret: Secret::new(secret),
        }
    }

    /// Auth provider signature expected by plugin descriptors
    pub fn provider(key: &str, secret: &str) -> Arc<dyn Auth> {
        Arc::new(Self::new(key.to_string(), secret.to_string()))
    }
}

impl Auth for BasicAuth {
    fn key(&self) -> &str {
        self.key.expose_secret()
    }

    fn secret(&self) -> &str {
        self.secret.expose_secret()
    }

    fn sign(&self, request: &mut PreparedRequest) -> Result<(), BitexError> {
        let token = general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.key.expose_secret(),
            self.secret.expose_secret()
        ));
        let mut value = HeaderValue::from_str(&format!("Basic {}", token))
            .map_err(|e| BitexError::AuthError(format!("Invalid basic auth header: {}", e)))?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// Hex-encoded HMAC-SHA256 of `payload`, a building block for plugin signers
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String, BitexError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BitexError::AuthError(format!("Invalid secret key: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

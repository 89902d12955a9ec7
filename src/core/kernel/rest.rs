use crate::core::errors::BitexError;
use crate::core::request::PreparedRequest;
use crate::core::types::{SendOptions, Verify};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{redirect, Certificate, Client, Identity, Proxy};
use std::fmt;
use std::time::Duration;
use tracing::{instrument, trace};

/// Body of a raw transport response
pub enum RawBody {
    /// Fully read into memory
    Buffered(Bytes),
    /// Still on the wire; produced when `SendOptions::stream` is set
    Streaming(BoxStream<'static, Result<Bytes, reqwest::Error>>),
}

impl fmt::Debug for RawBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

impl Default for RawBody {
    fn default() -> Self {
        Self::Buffered(Bytes::new())
    }
}

/// Transport-level response as handed over by an adapter
#[derive(Debug, Default)]
pub struct RawResponse {
    /// `None` when the transport reported no status
    pub status: Option<u16>,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: RawBody,
}

impl RawResponse {
    /// Buffered response with the given status and body
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status: Some(status),
            body: RawBody::Buffered(body.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Connection adapter mounted on a session for a URL prefix
///
/// The adapter performs the actual network round-trip. It never retries,
/// and transport errors are returned unchanged.
#[async_trait]
pub trait HttpAdapter: Send + Sync {
    /// Send a prepared request
    ///
    /// # Arguments
    /// * `request` - The fully prepared request (URL, headers, body, auth applied)
    /// * `options` - Transport options forwarded from the caller
    async fn send(
        &self,
        request: &PreparedRequest,
        options: &SendOptions,
    ) -> Result<RawResponse, BitexError>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "adapter"
    }
}

/// Configuration for the reqwest adapter
#[derive(Clone, Debug)]
pub struct AdapterConfig {
    /// Default request timeout in seconds; per-request timeouts take precedence
    pub timeout_seconds: Option<u64>,
    /// User agent string to include in requests
    pub user_agent: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: None,
            user_agent: format!("bitex/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl AdapterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default request timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating reqwest adapter instances
pub struct AdapterBuilder {
    config: AdapterConfig,
}

impl AdapterBuilder {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    /// Build the adapter and its shared HTTP client
    pub fn build(self) -> Result<ReqwestAdapter, BitexError> {
        let client = client_builder(&self.config)
            .build()
            .map_err(|e| BitexError::InvalidParameters(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ReqwestAdapter {
            client,
            config: self.config,
        })
    }
}

fn client_builder(config: &AdapterConfig) -> reqwest::ClientBuilder {
    let mut builder = Client::builder().user_agent(&config.user_agent);
    if let Some(timeout) = config.timeout_seconds {
        builder = builder.timeout(Duration::from_secs(timeout));
    }
    builder
}

/// `HttpAdapter` backed by reqwest
#[derive(Clone)]
pub struct ReqwestAdapter {
    client: Client,
    config: AdapterConfig,
}

impl fmt::Debug for ReqwestAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReqwestAdapter {
    /// Create an adapter with the default configuration
    pub fn new() -> Result<Self, BitexError> {
        AdapterBuilder::new(AdapterConfig::default()).build()
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Shared client for plain requests; a dedicated one when the options
    /// change connection-level behavior (proxies, TLS, redirects).
    fn client_for(&self, options: &SendOptions) -> Result<Client, BitexError> {
        if options.uses_default_client() {
            return Ok(self.client.clone());
        }

        let mut builder = client_builder(&self.config);

        if !options.allow_redirects {
            builder = builder.redirect(redirect::Policy::none());
        }

        for (scheme, proxy_url) in &options.proxies {
            let proxy = match scheme.as_str() {
                "http" => Proxy::http(proxy_url),
                "https" => Proxy::https(proxy_url),
                _ => Proxy::all(proxy_url),
            }
            .map_err(|e| {
                BitexError::InvalidParameters(format!("Invalid proxy '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        match &options.verify {
            Verify::Enabled => {}
            Verify::Disabled => builder = builder.danger_accept_invalid_certs(true),
            Verify::CaBundle(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    BitexError::InvalidParameters(format!(
                        "Failed to read CA bundle '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                let certificate = Certificate::from_pem(&pem)?;
                builder = builder.add_root_certificate(certificate);
            }
        }

        if let Some(path) = &options.cert {
            let pem = std::fs::read(path).map_err(|e| {
                BitexError::InvalidParameters(format!(
                    "Failed to read client certificate '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            // PEM identities are only understood by the rustls backend
            builder = builder.use_rustls_tls().identity(Identity::from_pem(&pem)?);
        }

        builder
            .build()
            .map_err(|e| BitexError::InvalidParameters(format!("Failed to build HTTP client: {}", e)))
    }
}

#[async_trait]
impl HttpAdapter for ReqwestAdapter {
    #[instrument(
        skip(self, request, options),
        fields(exchange = request.exchange.as_deref().unwrap_or("-"), method = %request.method, url = %request.url)
    )]
    async fn send(
        &self,
        request: &PreparedRequest,
        options: &SendOptions,
    ) -> Result<RawResponse, BitexError> {
        let client = self.client_for(options)?;
        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        trace!(status = %status, final_url = %response.url(), "Response received");

        let headers = response.headers().clone();
        let body = if options.stream {
            RawBody::Streaming(response.bytes_stream().boxed())
        } else {
            RawBody::Buffered(response.bytes().await?)
        };

        Ok(RawResponse {
            status: Some(status.as_u16()),
            reason: status.canonical_reason().map(str::to_string),
            headers,
            body,
        })
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}

use crate::core::config::{Credentials, SessionConfig};
use crate::core::errors::BitexError;
use crate::core::kernel::{AdapterBuilder, AdapterConfig, Auth, HttpAdapter};
use crate::core::request::{PreparedRequest, Request, RequestPipeline, SessionSettings};
use crate::core::response::{BitexResponse, ResponseBuilder};
use crate::core::shorthand::{self, Endpoint};
use crate::core::types::{BodyFields, CookieJar, Hooks, Params, SendOptions, Verify};
use crate::plugins::PluginRegistry;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Per-call settings for [`Session::request`] and the named operations
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the operation's default verb
    pub method: Option<Method>,
    /// Exchange name, for requests to absolute URLs
    pub exchange: Option<String>,
    /// Marks the call as needing exchange auth
    pub private: bool,
    pub params: Params,
    pub data: BodyFields,
    pub json: Option<Value>,
    pub headers: HeaderMap,
    pub cookies: CookieJar,
    pub auth: Option<Arc<dyn Auth>>,
    pub hooks: Hooks,
    pub send: SendOptions,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    #[must_use]
    pub const fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name, value);
        self
    }

    #[must_use]
    pub fn auth(mut self, auth: Arc<dyn Auth>) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut BitexResponse) + Send + Sync + 'static,
    {
        self.hooks.on_response(hook);
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.send.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn proxy(mut self, scheme: impl Into<String>, url: impl Into<String>) -> Self {
        self.send.proxies.insert(scheme.into(), url.into());
        self
    }

    #[must_use]
    pub const fn stream(mut self, stream: bool) -> Self {
        self.send.stream = stream;
        self
    }

    #[must_use]
    pub fn verify(mut self, verify: Verify) -> Self {
        self.send.verify = verify;
        self
    }

    #[must_use]
    pub fn cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.send.cert = Some(path.into());
        self
    }

    #[must_use]
    pub const fn allow_redirects(mut self, allow: bool) -> Self {
        self.send.allow_redirects = allow;
        self
    }

    fn into_request(self, method: Method, url: &str) -> (Request, SendOptions) {
        let request = Request {
            method: self.method.unwrap_or(method),
            url: url.to_string(),
            exchange: self.exchange,
            private: self.private,
            params: self.params,
            data: self.data,
            json: self.json,
            headers: self.headers,
            cookies: self.cookies,
            auth: self.auth,
            hooks: self.hooks,
        };
        (request, self.send)
    }
}

/// Multi-exchange HTTP session
///
/// Holds the session-level defaults merged into every request, the default
/// auth object and one transport adapter per URL prefix. URLs may be plain
/// `http(s)` URLs or shorthand URLs such as `kraken://XBTUSD/ticker`.
pub struct Session {
    registry: Arc<PluginRegistry>,
    settings: SessionSettings,
    adapters: Vec<(String, Arc<dyn HttpAdapter>)>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("exchanges", &self.registry.exchanges())
            .field(
                "adapters",
                &self.adapters.iter().map(|(prefix, _)| prefix).collect::<Vec<_>>(),
            )
            .field("auth", &self.settings.auth.is_some())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session over the global plugin registry with a reqwest adapter for
    /// `http://` and `https://`
    pub fn new(auth: Option<Arc<dyn Auth>>) -> Result<Self, BitexError> {
        let mut session = Self::from_config(SessionConfig::default())?;
        session.settings.auth = auth;
        Ok(session)
    }

    pub fn from_config(config: SessionConfig) -> Result<Self, BitexError> {
        let mut adapter_config = AdapterConfig::new().with_user_agent(config.user_agent);
        if let Some(timeout) = config.timeout_seconds {
            adapter_config = adapter_config.with_timeout(timeout);
        }
        let adapter: Arc<dyn HttpAdapter> = Arc::new(AdapterBuilder::new(adapter_config).build()?);

        let settings = SessionSettings {
            credentials: config.credentials.filter(Credentials::is_complete),
            trust_env: config.trust_env,
            ..SessionSettings::default()
        };

        let mut session = Self {
            registry: PluginRegistry::global(),
            settings,
            adapters: Vec::new(),
        };
        session.mount("https://", adapter.clone());
        session.mount("http://", adapter);
        Ok(session)
    }

    /// Use `registry` instead of the global one
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Mount `adapter` for every URL starting with `prefix`; replaces any
    /// adapter mounted on the same prefix
    pub fn mount(&mut self, prefix: &str, adapter: Arc<dyn HttpAdapter>) {
        let prefix = prefix.to_ascii_lowercase();
        self.adapters.retain(|(mounted, _)| *mounted != prefix);
        self.adapters.push((prefix, adapter));
        self.adapters
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
    }

    /// Adapter with the longest prefix matching `url`
    pub fn get_adapter(&self, url: &str) -> Result<Arc<dyn HttpAdapter>, BitexError> {
        let lower = url.to_ascii_lowercase();
        self.adapters
            .iter()
            .find(|(prefix, _)| lower.starts_with(prefix.as_str()))
            .map(|(_, adapter)| adapter.clone())
            .ok_or_else(|| BitexError::NoAdapter(url.to_string()))
    }

    pub fn auth(&self) -> Option<&Arc<dyn Auth>> {
        self.settings.auth.as_ref()
    }

    pub fn set_auth(&mut self, auth: Option<Arc<dyn Auth>>) {
        self.settings.auth = auth;
    }

    /// API key of the installed auth object
    pub fn key(&self) -> Result<&str, BitexError> {
        self.settings
            .auth
            .as_deref()
            .map(|auth| auth.key())
            .ok_or(BitexError::MissingAuth)
    }

    /// API secret of the installed auth object
    pub fn secret(&self) -> Result<&str, BitexError> {
        self.settings
            .auth
            .as_deref()
            .map(|auth| auth.secret())
            .ok_or(BitexError::MissingAuth)
    }

    /// Credentials handed to a plugin's auth provider on the first private
    /// request that finds no auth
    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.settings.credentials = credentials;
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.settings.headers
    }

    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.settings.params
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.settings.cookies
    }

    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.settings.cookies
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.settings.hooks
    }

    /// Run the request through the pipeline. Auth built from the session's
    /// credentials becomes the session's default auth.
    pub fn prepare_request(&mut self, request: Request) -> Result<PreparedRequest, BitexError> {
        let preparation = RequestPipeline::new(&self.registry).prepare(request, &self.settings)?;
        if let Some(auth) = preparation.installed_auth {
            debug!(
                exchange = preparation.prepared.exchange.as_deref().unwrap_or("-"),
                "Installed plugin auth on session"
            );
            self.settings.auth = Some(auth);
        }
        Ok(preparation.prepared)
    }

    /// Send a prepared request through the adapter mounted for its URL
    pub async fn send(
        &mut self,
        prepared: PreparedRequest,
        options: &SendOptions,
    ) -> Result<BitexResponse, BitexError> {
        let adapter = self.get_adapter(prepared.url.as_str())?;
        let raw = adapter.send(&prepared, options).await?;

        let hooks = prepared.hooks.clone();
        let mut response =
            ResponseBuilder::new(&self.registry).build(Arc::new(prepared), raw, adapter);
        hooks.dispatch(&mut response);
        self.settings.cookies.update(&response.cookies);
        Ok(response)
    }

    /// Prepare and send a request to an absolute or shorthand URL
    #[instrument(skip(self, options), fields(exchange = options.exchange.as_deref().unwrap_or("-")))]
    pub async fn request(
        &mut self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        let (request, send_options) = options.into_request(method, url);
        let prepared = self.prepare_request(request)?;
        self.send(prepared, &send_options).await
    }

    async fn endpoint(
        &mut self,
        exchange: &str,
        instrument: &str,
        endpoint: Endpoint,
        query: &[(&str, &str)],
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        let url = shorthand::build(exchange, instrument, endpoint, query);
        let (request, send_options) = options.into_request(endpoint.default_method(), &url);
        let prepared = self.prepare_request(request)?;
        self.send(prepared, &send_options).await
    }

    /// Latest ticker of `instrument`
    pub async fn ticker(
        &mut self,
        exchange: &str,
        instrument: &str,
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        self.endpoint(exchange, instrument, Endpoint::Ticker, &[], options)
            .await
    }

    /// Order book of `instrument`
    pub async fn orderbook(
        &mut self,
        exchange: &str,
        instrument: &str,
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        self.endpoint(exchange, instrument, Endpoint::Book, &[], options)
            .await
    }

    /// Recent trades of `instrument`
    pub async fn trades(
        &mut self,
        exchange: &str,
        instrument: &str,
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        self.endpoint(exchange, instrument, Endpoint::Trades, &[], options)
            .await
    }

    pub async fn new_order(
        &mut self,
        exchange: &str,
        instrument: &str,
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        self.endpoint(exchange, instrument, Endpoint::NewOrder, &[], options)
            .await
    }

    pub async fn cancel_order(
        &mut self,
        exchange: &str,
        instrument: &str,
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        self.endpoint(exchange, instrument, Endpoint::CancelOrder, &[], options)
            .await
    }

    pub async fn order_status(
        &mut self,
        exchange: &str,
        instrument: &str,
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        self.endpoint(exchange, instrument, Endpoint::OrderStatus, &[], options)
            .await
    }

    /// Wallet balance of `currency`
    pub async fn wallet(
        &mut self,
        exchange: &str,
        currency: &str,
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        self.endpoint(exchange, currency, Endpoint::Wallet, &[], options)
            .await
    }

    /// Withdraw `amount` of `currency`; the amount travels in the shorthand query
    pub async fn withdraw(
        &mut self,
        exchange: &str,
        currency: &str,
        amount: &str,
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        self.endpoint(
            exchange,
            currency,
            Endpoint::Withdraw,
            &[("amount", amount)],
            options,
        )
        .await
    }

    /// Deposit address of `currency`
    pub async fn deposit(
        &mut self,
        exchange: &str,
        currency: &str,
        options: RequestOptions,
    ) -> Result<BitexResponse, BitexError> {
        self.endpoint(exchange, currency, Endpoint::Deposit, &[], options)
            .await
    }
}

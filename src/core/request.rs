use crate::core::config::{Credentials, ConfigError};
use crate::core::errors::BitexError;
use crate::core::kernel::Auth;
use crate::core::shorthand::ShorthandResolver;
use crate::core::types::{merge_body, merge_headers, merge_params, BodyFields, CookieJar, Hooks, Params};
use crate::plugins::{PluginDescriptor, PluginRegistry};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use reqwest::{Method, Url};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// A request as issued by the caller, before any plugin has seen it
#[derive(Clone)]
pub struct Request {
    pub method: Method,
    /// Absolute or shorthand URL
    pub url: String,
    /// Exchange the request is addressed to; derived from the shorthand
    /// scheme when left unset
    pub exchange: Option<String>,
    /// Whether the endpoint needs signed credentials
    pub private: bool,
    pub params: Params,
    /// Form-encoded body fields
    pub data: BodyFields,
    /// JSON body; takes precedence over `data` when set
    pub json: Option<Value>,
    pub headers: HeaderMap,
    pub cookies: CookieJar,
    /// Call-level auth, beats the session default
    pub auth: Option<Arc<dyn Auth>>,
    pub hooks: Hooks,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("exchange", &self.exchange)
            .field("private", &self.private)
            .field("params", &self.params)
            .field("auth", &self.auth.is_some())
            .finish_non_exhaustive()
    }
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            exchange: None,
            private: false,
            params: Params::new(),
            data: BodyFields::new(),
            json: None,
            headers: HeaderMap::new(),
            cookies: CookieJar::new(),
            auth: None,
            hooks: Hooks::new(),
        }
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
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}

/// A request ready for the transport: absolute URL, final headers, encoded
/// body and applied auth
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub exchange: Option<String>,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub cookies: CookieJar,
    pub hooks: Hooks,
}

impl PreparedRequest {
    pub fn new(exchange: Option<String>, method: Method, url: Url) -> Self {
        Self {
            exchange,
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            cookies: CookieJar::new(),
            hooks: Hooks::new(),
        }
    }
}

/// Merged inputs handed to a [`RequestBuilder`]
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub method: Method,
    pub url: String,
    pub params: Params,
    pub data: BodyFields,
    pub json: Option<Value>,
    pub headers: HeaderMap,
    pub cookies: CookieJar,
    pub auth: Option<Arc<dyn Auth>>,
    pub hooks: Hooks,
}

/// Turns merged request parts into a [`PreparedRequest`]
///
/// Plugins override `prepare` when an exchange needs a different URL layout
/// or body encoding; the default covers plain REST APIs.
pub trait RequestBuilder: Send + Sync {
    /// Exchange this builder was created for
    fn exchange(&self) -> Option<&str>;

    fn prepare(&self, parts: RequestParts) -> Result<PreparedRequest, BitexError> {
        prepare_default(self.exchange().map(str::to_string), parts)
    }
}

/// Request builder of the base plugin
#[derive(Debug, Clone, Default)]
pub struct BaseRequestBuilder {
    exchange: Option<String>,
}

impl BaseRequestBuilder {
    pub fn new(exchange: Option<String>) -> Self {
        Self { exchange }
    }

    /// Request factory signature expected by plugin descriptors
    pub fn provider(exchange: &str) -> Box<dyn RequestBuilder> {
        Box::new(Self::new(Some(exchange.to_string())))
    }
}

impl RequestBuilder for BaseRequestBuilder {
    fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }
}

/// Default preparation: parse the URL, append params, set the `Cookie`
/// header, encode the body and finally let the auth object sign.
pub fn prepare_default(
    exchange: Option<String>,
    parts: RequestParts,
) -> Result<PreparedRequest, BitexError> {
    let mut url = Url::parse(&parts.url).map_err(|source| BitexError::InvalidUrl {
        url: parts.url.clone(),
        source,
    })?;
    if !parts.params.is_empty() {
        url.query_pairs_mut().extend_pairs(&parts.params);
    }

    let mut prepared = PreparedRequest::new(exchange, parts.method, url);
    prepared.headers = parts.headers;

    if let Some(cookie) = parts.cookies.header_value() {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| BitexError::InvalidParameters(format!("Invalid cookie value: {}", e)))?;
        prepared.headers.insert(COOKIE, value);
    }
    prepared.cookies = parts.cookies;
    prepared.hooks = parts.hooks;

    if let Some(json) = &parts.json {
        prepared.body = Some(Bytes::from(serde_json::to_vec(json)?));
        set_content_type(&mut prepared.headers, "application/json");
    } else if !parts.data.is_empty() {
        prepared.body = Some(Bytes::from(encode_form(&parts.data)));
        set_content_type(&mut prepared.headers, "application/x-www-form-urlencoded");
    }

    if let Some(auth) = &parts.auth {
        auth.sign(&mut prepared)?;
    }

    Ok(prepared)
}

fn set_content_type(headers: &mut HeaderMap, content_type: &'static str) {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

/// Form-encode body fields; strings go out verbatim, other values as JSON text
pub fn encode_form(fields: &BodyFields) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields {
        match value {
            Value::String(s) => serializer.append_pair(key, s),
            other => serializer.append_pair(key, &other.to_string()),
        };
    }
    serializer.finish()
}

/// Session-level defaults merged into every request
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub headers: HeaderMap,
    pub params: Params,
    pub cookies: CookieJar,
    pub hooks: Hooks,
    /// Default auth object; installed explicitly or after the first private request
    pub auth: Option<Arc<dyn Auth>>,
    /// Key/secret pair for a plugin's auth provider
    pub credentials: Option<Credentials>,
    /// Read `{EXCHANGE}_API_KEY`/`{EXCHANGE}_SECRET_KEY` when no auth is set
    pub trust_env: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            params: Params::new(),
            cookies: CookieJar::new(),
            hooks: Hooks::new(),
            auth: None,
            credentials: None,
            trust_env: true,
        }
    }
}

/// Output of [`RequestPipeline::prepare`]
#[derive(Debug)]
pub struct Preparation {
    pub prepared: PreparedRequest,
    /// Auth built from the session's credentials by the plugin's auth
    /// provider; the session stores it as its new default
    pub installed_auth: Option<Arc<dyn Auth>>,
}

/// Builds prepared requests from caller requests and session settings
#[derive(Debug, Clone, Copy)]
pub struct RequestPipeline<'a> {
    registry: &'a PluginRegistry,
}

impl<'a> RequestPipeline<'a> {
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self { registry }
    }

    #[instrument(
        skip(self, request, settings),
        fields(exchange = tracing::field::Empty, method = %request.method, url = %request.url)
    )]
    pub fn prepare(
        &self,
        request: Request,
        settings: &SessionSettings,
    ) -> Result<Preparation, BitexError> {
        let Request {
            method,
            url,
            exchange,
            private,
            params,
            mut data,
            mut json,
            headers,
            cookies,
            auth,
            hooks,
        } = request;

        let cookies = settings.cookies.merged(&cookies);

        let resolution = ShorthandResolver::new(self.registry).resolve(&url);
        let exchange = exchange.or_else(|| resolution.exchange().map(str::to_string));
        if let Some(name) = &exchange {
            tracing::Span::current().record("exchange", name.as_str());
        }

        if let Some(plugin_body) = resolution.body {
            match &mut json {
                Some(Value::Object(fields)) => merge_body(fields, plugin_body),
                _ => merge_body(&mut data, plugin_body),
            }
        }

        let plugin = exchange.as_deref().and_then(|name| self.registry.get(name));
        let builder: Box<dyn RequestBuilder> = match (plugin, exchange.as_deref()) {
            (Some(descriptor), Some(name)) => descriptor.new_request_builder(name),
            _ => {
                trace!("No plugin for request, using base request builder");
                Box::new(BaseRequestBuilder::new(exchange.clone()))
            }
        };

        // A private request on a session without auth installs the plugin's
        // auth even when the call brings its own.
        let installed_auth = if private && settings.auth.is_none() {
            plugin.and_then(|descriptor| install_auth(descriptor, settings))
        } else {
            None
        };
        let auth = auth
            .or_else(|| settings.auth.clone())
            .or_else(|| installed_auth.clone())
            .or_else(|| self.env_auth(exchange.as_deref(), settings));

        if private && auth.is_none() {
            let exchange = exchange.unwrap_or_default();
            return Err(if plugin.is_some() {
                BitexError::MissingCredentials { exchange }
            } else {
                BitexError::MissingPlugin { exchange }
            });
        }

        let parts = RequestParts {
            method,
            url: resolution.url,
            params: merge_params(&params, &settings.params),
            data,
            json,
            headers: merge_headers(&headers, &settings.headers),
            cookies,
            auth,
            hooks: Hooks::merge(&hooks, &settings.hooks),
        };

        let prepared = builder.prepare(parts)?;
        trace!(url = %prepared.url, "Request prepared");

        Ok(Preparation {
            prepared,
            installed_auth,
        })
    }

    fn env_auth(&self, exchange: Option<&str>, settings: &SessionSettings) -> Option<Arc<dyn Auth>> {
        if !settings.trust_env {
            return None;
        }
        let exchange = exchange?;
        match Credentials::from_env(exchange) {
            Ok(credentials) if credentials.is_complete() => {
                debug!(exchange = %exchange, "Using credentials from environment");
                Some(
                    self.registry
                        .lookup(exchange)
                        .new_auth(credentials.api_key(), credentials.secret_key()),
                )
            }
            Ok(_) => None,
            Err(ConfigError::MissingEnvironmentVariable(var)) => {
                trace!(variable = %var, "No credentials in environment");
                None
            }
            Err(e) => {
                debug!(error = %e, "Ignoring environment credentials");
                None
            }
        }
    }
}

fn install_auth(descriptor: &PluginDescriptor, settings: &SessionSettings) -> Option<Arc<dyn Auth>> {
    let credentials = settings.credentials.as_ref().filter(|c| c.is_complete())?;
    debug!(exchange = %descriptor.exchange(), "Installing plugin auth from session credentials");
    Some(descriptor.new_auth(credentials.api_key(), credentials.secret_key()))
}

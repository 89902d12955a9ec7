use crate::core::response::BitexResponse;
use reqwest::header::HeaderMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Ordered query parameters
pub type Params = Vec<(String, String)>;

/// Body fields, either form-encoded or embedded in a JSON object
pub type BodyFields = Map<String, Value>;

/// `(timestamp, label, value)` row produced by [`BitexResponse::triples`]
pub type Triple = (String, String, Value);

/// Flattened `label -> value` mapping produced by [`BitexResponse::key_value_dict`]
pub type KeyValuePairs = Map<String, Value>;

/// Merge query parameters. Keys present in `request` replace the session's
/// value in place; new keys are appended in request order.
pub fn merge_params(request: &[(String, String)], session: &[(String, String)]) -> Params {
    let mut merged: Params = session.to_vec();
    for (key, value) in request {
        match merged.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1.clone_from(value),
            None => merged.push((key.clone(), value.clone())),
        }
    }
    merged
}

/// Merge header maps; every header name present in `request` replaces all
/// session values for that name.
pub fn merge_headers(request: &HeaderMap, session: &HeaderMap) -> HeaderMap {
    let mut merged = session.clone();
    for name in request.keys() {
        merged.remove(name);
        for value in request.get_all(name) {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

/// Merge body fields supplied by a plugin into the caller's fields. The
/// caller's value wins on collision.
pub fn merge_body(caller: &mut BodyFields, plugin: BodyFields) {
    for (key, value) in plugin {
        if caller.contains_key(&key) {
            tracing::debug!(field = %key, "Caller body field shadows plugin-supplied value");
            continue;
        }
        caller.insert(key, value);
    }
}

/// Simple name/value cookie jar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.cookies.remove(name)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy every cookie of `other` into this jar, overwriting on collision.
    pub fn update(&mut self, other: &Self) {
        for (name, value) in &other.cookies {
            self.cookies.insert(name.clone(), value.clone());
        }
    }

    /// Return a new jar with `overrides` layered on top of `self`.
    #[must_use]
    pub fn merged(&self, overrides: &Self) -> Self {
        let mut merged = self.clone();
        merged.update(overrides);
        merged
    }

    /// Store the `name=value` pair of every `Set-Cookie` header.
    /// Cookie attributes (path, domain, expiry) are not tracked.
    pub fn extract_from_headers(&mut self, headers: &HeaderMap) {
        for header in headers.get_all(reqwest::header::SET_COOKIE) {
            let Ok(raw) = header.to_str() else {
                tracing::trace!("Skipping non-ASCII Set-Cookie header");
                continue;
            };
            let pair = raw.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    self.insert(name, value.trim().trim_matches('"'));
                }
            }
        }
    }

    /// Render the jar as a `Cookie` request header value
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CookieJar {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut jar = Self::new();
        for (name, value) in iter {
            jar.insert(name, value);
        }
        jar
    }
}

/// Callback run against every response after it has been built
pub type ResponseHook = Arc<dyn Fn(&mut BitexResponse) + Send + Sync>;

/// Response hooks attached to a request or session
#[derive(Clone, Default)]
pub struct Hooks {
    response: Vec<ResponseHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("response", &self.response.len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_response<F>(&mut self, hook: F)
    where
        F: Fn(&mut BitexResponse) + Send + Sync + 'static,
    {
        self.response.push(Arc::new(hook));
    }

    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }

    pub fn len(&self) -> usize {
        self.response.len()
    }

    /// Call-level hooks replace session hooks when any are given.
    pub fn merge(request: &Self, session: &Self) -> Self {
        if request.is_empty() {
            session.clone()
        } else {
            request.clone()
        }
    }

    pub fn dispatch(&self, response: &mut BitexResponse) {
        for hook in &self.response {
            hook(response);
        }
    }
}

/// TLS certificate verification mode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Verify {
    #[default]
    Enabled,
    Disabled,
    /// Trust the PEM-encoded CA certificates in this file
    CaBundle(PathBuf),
}

/// Transport-level options, forwarded unchanged to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    pub timeout: Option<Duration>,
    pub allow_redirects: bool,
    /// Scheme (`http`, `https`, `all`) to proxy URL
    pub proxies: BTreeMap<String, String>,
    pub stream: bool,
    pub verify: Verify,
    /// PEM file holding a client certificate and its private key
    pub cert: Option<PathBuf>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            allow_redirects: true,
            proxies: BTreeMap::new(),
            stream: false,
            verify: Verify::Enabled,
            cert: None,
        }
    }
}

impl SendOptions {
    /// Whether these options can be served by a shared, default-configured client
    pub fn uses_default_client(&self) -> bool {
        self.allow_redirects
            && self.proxies.is_empty()
            && self.verify == Verify::Enabled
            && self.cert.is_none()
    }
}

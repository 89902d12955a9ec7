//! Shorthand URLs: `<exchange>://<instrument>/<endpoint>[?query]`.
//!
//! The shorthand lets callers address any exchange the same way, e.g.
//! `kraken://XBTUSD/ticker` or `bitfinex://BTC/wallet/withdraw?amount=0.5`.
//! A plugin may expand it into the exchange's real REST URL; if it doesn't,
//! the shorthand is handed to the transport unchanged.

use crate::core::types::{BodyFields, Params};
use crate::plugins::PluginRegistry;
use regex::Regex;
use reqwest::Method;
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, trace};

const SHORTHAND_PATTERN: &str = r"^(?P<exchange>[A-Za-z][A-Za-z0-9+.\-]*)://(?P<instrument>[^/?#\s]+)/(?P<endpoint>ticker|book|trades|order/new|order/cancel|order/status|wallet/withdraw|wallet/deposit|wallet)(?:\?(?P<query>[^#]*))?$";

const EXCHANGE_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9+.\-]*$";

fn shorthand_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SHORTHAND_PATTERN).expect("shorthand pattern compiles"))
}

fn exchange_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(EXCHANGE_NAME_PATTERN).expect("exchange name pattern compiles"))
}

/// Whether `name` can serve as the scheme of a shorthand URL.
/// `http` and `https` are reserved for absolute URLs.
pub fn is_exchange_name(name: &str) -> bool {
    exchange_name_regex().is_match(name)
        && !name.eq_ignore_ascii_case("http")
        && !name.eq_ignore_ascii_case("https")
}

/// Endpoints addressable through the shorthand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Ticker,
    Book,
    Trades,
    NewOrder,
    CancelOrder,
    OrderStatus,
    Wallet,
    Withdraw,
    Deposit,
}

impl Endpoint {
    /// Path segment(s) as they appear in the shorthand
    pub const fn path(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Book => "book",
            Self::Trades => "trades",
            Self::NewOrder => "order/new",
            Self::CancelOrder => "order/cancel",
            Self::OrderStatus => "order/status",
            Self::Wallet => "wallet",
            Self::Withdraw => "wallet/withdraw",
            Self::Deposit => "wallet/deposit",
        }
    }

    /// First path segment (`order`, `wallet`, ...)
    pub fn resource(self) -> &'static str {
        self.path().split('/').next().unwrap_or_default()
    }

    /// Second path segment, if the endpoint has one (`new`, `withdraw`, ...)
    pub fn action(self) -> Option<&'static str> {
        self.path().split_once('/').map(|(_, action)| action)
    }

    /// Verb used by the session's named operation for this endpoint
    pub fn default_method(self) -> Method {
        match self {
            Self::NewOrder => Method::POST,
            Self::CancelOrder => Method::DELETE,
            Self::Withdraw => Method::PUT,
            _ => Method::GET,
        }
    }

    fn from_path(path: &str) -> Option<Self> {
        Some(match path {
            "ticker" => Self::Ticker,
            "book" => Self::Book,
            "trades" => Self::Trades,
            "order/new" => Self::NewOrder,
            "order/cancel" => Self::CancelOrder,
            "order/status" => Self::OrderStatus,
            "wallet" => Self::Wallet,
            "wallet/withdraw" => Self::Withdraw,
            "wallet/deposit" => Self::Deposit,
            _ => return None,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Fields of a URL that matched the shorthand grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShorthandMatch {
    pub exchange: String,
    pub instrument: String,
    pub endpoint: Endpoint,
    /// Decoded query-string parameters, in order
    pub params: Params,
}

impl ShorthandMatch {
    /// Parse `url` against the shorthand grammar
    pub fn parse(url: &str) -> Option<Self> {
        let captures = shorthand_regex().captures(url)?;
        let exchange = captures.name("exchange")?.as_str();
        if !is_exchange_name(exchange) {
            return None;
        }
        let endpoint = Endpoint::from_path(captures.name("endpoint")?.as_str())?;
        let params = captures
            .name("query")
            .map(|query| {
                url::form_urlencoded::parse(query.as_str().as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            exchange: exchange.to_string(),
            instrument: captures.name("instrument")?.as_str().to_string(),
            endpoint,
            params,
        })
    }

    /// Value of the query parameter `key`, if present
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Build a shorthand URL
pub fn build(exchange: &str, instrument: &str, endpoint: Endpoint, query: &[(&str, &str)]) -> String {
    let mut url = format!("{}://{}/{}", exchange, instrument, endpoint.path());
    if !query.is_empty() {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish();
        url.push('?');
        url.push_str(&encoded);
    }
    url
}

/// Outcome of resolving a URL
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// URL to hand to the request builder
    pub url: String,
    /// Body fields supplied by the plugin, to be merged under the caller's
    pub body: Option<BodyFields>,
    /// Parsed shorthand, if the URL matched the grammar
    pub shorthand: Option<ShorthandMatch>,
}

impl Resolution {
    fn passthrough(url: &str, shorthand: Option<ShorthandMatch>) -> Self {
        Self {
            url: url.to_string(),
            body: None,
            shorthand,
        }
    }

    /// Exchange named by the shorthand, if the URL was one
    pub fn exchange(&self) -> Option<&str> {
        self.shorthand.as_ref().map(|m| m.exchange.as_str())
    }
}

/// Expands shorthand URLs through the matching plugin
#[derive(Debug, Clone, Copy)]
pub struct ShorthandResolver<'a> {
    registry: &'a PluginRegistry,
}

impl<'a> ShorthandResolver<'a> {
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self { registry }
    }

    /// Resolve `url`. URLs outside the shorthand grammar pass straight
    /// through without consulting any plugin.
    pub fn resolve(&self, url: &str) -> Resolution {
        let Some(mut shorthand) = ShorthandMatch::parse(url) else {
            trace!(url = %url, "Not a shorthand URL, passing through");
            return Resolution::passthrough(url, None);
        };

        let descriptor = self.registry.lookup(&shorthand.exchange);
        shorthand.instrument =
            descriptor.format_instrument_for(&shorthand.instrument, &shorthand.exchange);

        match descriptor.plugin().expand_shorthand(&shorthand) {
            Some(expanded) => {
                debug!(
                    exchange = %shorthand.exchange,
                    endpoint = %shorthand.endpoint,
                    url = %expanded.url,
                    "Expanded shorthand URL"
                );
                Resolution {
                    url: expanded.url,
                    body: expanded.body,
                    shorthand: Some(shorthand),
                }
            }
            None => {
                debug!(exchange = %shorthand.exchange, "Plugin declined shorthand, passing through");
                Resolution::passthrough(url, Some(shorthand))
            }
        }
    }
}

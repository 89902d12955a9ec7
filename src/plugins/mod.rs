//! Exchange plugins.
//!
//! A plugin teaches bitex about one exchange. It announces the exchange name
//! together with three factories (auth provider, request builder, response
//! format) and may implement any of the optional hooks:
//!
//! - `expand_shorthand`: turn `exchange://instrument/endpoint` into a real URL
//! - `format_instrument_for`: bitex notation to exchange notation
//! - `format_instrument_from`: exchange notation back to bitex notation
//!
//! Plugins are discovered at first use of the registry. Register one with
//! [`register_plugin!`](crate::register_plugin):
//!
//! ```rust,no_run
//! use bitex::core::kernel::BasicAuth;
//! use bitex::core::request::BaseRequestBuilder;
//! use bitex::core::response::BaseResponseFormat;
//! use bitex::core::shorthand::ShorthandMatch;
//! use bitex::plugins::{ExpandedUrl, Plugin, PluginAnnouncement};
//!
//! struct UberEx;
//!
//! impl Plugin for UberEx {
//!     fn announce(&self) -> Option<PluginAnnouncement> {
//!         Some(PluginAnnouncement::new(
//!             "uberex",
//!             BasicAuth::provider,
//!             BaseRequestBuilder::provider,
//!             BaseResponseFormat::provider,
//!         ))
//!     }
//!
//!     fn expand_shorthand(&self, shorthand: &ShorthandMatch) -> Option<ExpandedUrl> {
//!         Some(ExpandedUrl::new(format!(
//!             "https://api.uberex.com/v1/{}/{}",
//!             shorthand.instrument,
//!             shorthand.endpoint.path()
//!         )))
//!     }
//! }
//!
//! static UBEREX: UberEx = UberEx;
//! bitex::register_plugin!(UBEREX);
//! # fn main() {}
//! ```

pub mod base;
pub mod registry;

pub use base::BasePlugin;
pub use registry::PluginRegistry;

use crate::core::errors::BitexError;
use crate::core::kernel::Auth;
use crate::core::request::RequestBuilder;
use crate::core::response::ResponseFormat;
use crate::core::shorthand::{is_exchange_name, ShorthandMatch};
use crate::core::types::BodyFields;
use std::fmt;
use std::sync::Arc;

/// Builds the exchange's auth object from a key/secret pair
pub type AuthFactory = fn(key: &str, secret: &str) -> Arc<dyn Auth>;

/// Builds the exchange's request builder; receives the exchange name
pub type RequestFactory = fn(exchange: &str) -> Box<dyn RequestBuilder>;

/// Builds the exchange's response format
pub type ResponseFactory = fn() -> Box<dyn ResponseFormat>;

/// Result of a successful shorthand expansion
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedUrl {
    pub url: String,
    /// Fields to merge into the outgoing body; caller fields win on collision
    pub body: Option<BodyFields>,
}

impl ExpandedUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: None,
        }
    }

    pub fn with_body(url: impl Into<String>, body: BodyFields) -> Self {
        Self {
            url: url.into(),
            body: Some(body),
        }
    }
}

/// Hook surface every exchange plugin implements
///
/// Only `announce` is required. For the optional hooks `None` means "defer
/// to the default behavior" and is never treated as a failure.
pub trait Plugin: Send + Sync + 'static {
    /// Announce the exchange name and types, or `None` to stay unregistered
    fn announce(&self) -> Option<PluginAnnouncement>;

    /// Expand a parsed shorthand URL. `None` leaves the URL untouched.
    fn expand_shorthand(&self, _shorthand: &ShorthandMatch) -> Option<ExpandedUrl> {
        None
    }

    /// Convert a bitex instrument to the exchange's notation
    fn format_instrument_for(&self, _instrument: &str, _exchange: &str) -> Option<String> {
        None
    }

    /// Convert an exchange instrument back to bitex notation
    fn format_instrument_from(&self, _instrument: &str, _exchange: &str) -> Option<String> {
        None
    }
}

/// What a plugin announces; validated into a [`PluginDescriptor`]
#[derive(Clone)]
pub struct PluginAnnouncement {
    pub exchange: String,
    pub auth: Option<AuthFactory>,
    pub request: Option<RequestFactory>,
    pub response: Option<ResponseFactory>,
}

impl fmt::Debug for PluginAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginAnnouncement")
            .field("exchange", &self.exchange)
            .field("auth", &self.auth.is_some())
            .field("request", &self.request.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}

impl PluginAnnouncement {
    /// Announcement with all three factories supplied
    pub fn new(
        exchange: impl Into<String>,
        auth: AuthFactory,
        request: RequestFactory,
        response: ResponseFactory,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            auth: Some(auth),
            request: Some(request),
            response: Some(response),
        }
    }

    /// Turn the announcement into a descriptor. Fails unless the exchange
    /// name is usable as a shorthand scheme and every factory is present.
    pub fn validate(self, plugin: &'static dyn Plugin) -> Result<PluginDescriptor, BitexError> {
        let invalid = |reason: &str| BitexError::PluginValidation {
            exchange: self.exchange.clone(),
            reason: reason.to_string(),
        };

        if !is_exchange_name(&self.exchange) {
            return Err(invalid("exchange name is not a valid URL scheme"));
        }
        let auth = self.auth.ok_or_else(|| invalid("missing auth provider"))?;
        let request = self
            .request
            .ok_or_else(|| invalid("missing request builder"))?;
        let response = self
            .response
            .ok_or_else(|| invalid("missing response format"))?;

        Ok(PluginDescriptor {
            exchange: self.exchange,
            plugin,
            auth,
            request,
            response,
        })
    }
}

/// Validated, immutable plugin record stored in the registry
#[derive(Clone)]
pub struct PluginDescriptor {
    exchange: String,
    plugin: &'static dyn Plugin,
    auth: AuthFactory,
    request: RequestFactory,
    response: ResponseFactory,
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}

impl PluginDescriptor {
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn plugin(&self) -> &'static dyn Plugin {
        self.plugin
    }

    /// Instantiate the auth provider with a key/secret pair
    pub fn new_auth(&self, key: &str, secret: &str) -> Arc<dyn Auth> {
        (self.auth)(key, secret)
    }

    /// Instantiate the request builder for `exchange`
    pub fn new_request_builder(&self, exchange: &str) -> Box<dyn RequestBuilder> {
        (self.request)(exchange)
    }

    /// Instantiate the response format
    pub fn new_response_format(&self) -> Box<dyn ResponseFormat> {
        (self.response)()
    }

    /// Apply `format_instrument_for`, falling back to identity
    pub fn format_instrument_for(&self, instrument: &str, exchange: &str) -> String {
        self.plugin
            .format_instrument_for(instrument, exchange)
            .unwrap_or_else(|| instrument.to_string())
    }

    /// Apply `format_instrument_from`, falling back to identity
    pub fn format_instrument_from(&self, instrument: &str, exchange: &str) -> String {
        self.plugin
            .format_instrument_from(instrument, exchange)
            .unwrap_or_else(|| instrument.to_string())
    }
}

/// Entry collected by `inventory` for every registered plugin
pub struct PluginRegistration {
    pub plugin: &'static dyn Plugin,
}

impl PluginRegistration {
    pub const fn new(plugin: &'static dyn Plugin) -> Self {
        Self { plugin }
    }
}

inventory::collect!(PluginRegistration);

/// Register a plugin for discovery by the global registry.
///
/// The argument must be a `static` (or a constant expression) implementing
/// [`Plugin`].
///
/// ```rust,ignore
/// static KRAKEN: KrakenPlugin = KrakenPlugin;
/// bitex::register_plugin!(KRAKEN);
/// ```
#[macro_export]
macro_rules! register_plugin {
    ($plugin:expr) => {
        $crate::inventory::submit! {
            $crate::plugins::PluginRegistration::new(&$plugin)
        }
    };
}

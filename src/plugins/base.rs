//! Built-in fallback plugin.
//!
//! Registered under `"base"` in every registry. It supplies HTTP Basic auth,
//! the default request builder and a response format without projections,
//! and implements none of the optional hooks.

use super::{Plugin, PluginAnnouncement, PluginDescriptor};
use crate::core::kernel::BasicAuth;
use crate::core::request::BaseRequestBuilder;
use crate::core::response::BaseResponseFormat;

pub const BASE_EXCHANGE: &str = "base";

#[derive(Debug, Clone, Copy, Default)]
pub struct BasePlugin;

pub static BASE_PLUGIN: BasePlugin = BasePlugin;

impl Plugin for BasePlugin {
    fn announce(&self) -> Option<PluginAnnouncement> {
        Some(PluginAnnouncement::new(
            BASE_EXCHANGE,
            BasicAuth::provider,
            BaseRequestBuilder::provider,
            BaseResponseFormat::provider,
        ))
    }
}

impl PluginDescriptor {
    /// Descriptor of the built-in fallback plugin
    pub fn base() -> Self {
        Self {
            exchange: BASE_EXCHANGE.to_string(),
            plugin: &BASE_PLUGIN,
            auth: BasicAuth::provider,
            request: BaseRequestBuilder::provider,
            response: BaseResponseFormat::provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_announcement_matches_descriptor() {
        let announced = BASE_PLUGIN
            .announce()
            .unwrap()
            .validate(&BASE_PLUGIN)
            .unwrap();
        let base = PluginDescriptor::base();
        assert_eq!(announced.exchange(), base.exchange());
        assert_eq!(base.exchange(), "base");
    }

    #[test]
    fn test_base_hooks_are_defaults() {
        let base = PluginDescriptor::base();
        for instrument in ["BTCUSD", "btc-usd", "XBT/EUR", ""] {
            let there = base.format_instrument_for(instrument, "kraken");
            let back = base.format_instrument_from(&there, "kraken");
            assert_eq!(back, instrument);
        }

        let shorthand = crate::core::shorthand::ShorthandMatch::parse("kraken://BTCUSD/ticker")
            .unwrap();
        assert!(base.plugin().expand_shorthand(&shorthand).is_none());
    }
}

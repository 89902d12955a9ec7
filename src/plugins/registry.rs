use super::base::BASE_EXCHANGE;
use super::{Plugin, PluginDescriptor, PluginRegistration};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

static GLOBAL_REGISTRY: OnceLock<Arc<PluginRegistry>> = OnceLock::new();

/// Name-keyed table of validated plugin descriptors
///
/// Always contains the `"base"` fallback. Immutable once built, so a shared
/// reference can be read from any thread without synchronization.
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginDescriptor>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl PluginRegistry {
    /// Registry holding only the base descriptor
    pub fn empty() -> Self {
        let mut plugins = HashMap::new();
        plugins.insert(BASE_EXCHANGE.to_string(), PluginDescriptor::base());
        Self { plugins }
    }

    /// Process-wide registry, discovered on first access
    pub fn global() -> Arc<Self> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(Self::discover()))
            .clone()
    }

    /// Build a registry from every plugin registered with `register_plugin!`
    pub fn discover() -> Self {
        let registry = Self::from_descriptors(discover_plugins());
        info!(exchanges = ?registry.exchanges(), "Plugin registry initialized");
        registry
    }

    /// Build a registry from an explicit list of plugins, in order
    pub fn from_plugins<I>(plugins: I) -> Self
    where
        I: IntoIterator<Item = &'static dyn Plugin>,
    {
        Self::from_descriptors(collect_descriptors(plugins))
    }

    /// Index descriptors by exchange name on top of the base entry. Later
    /// descriptors replace earlier ones with the same name.
    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = PluginDescriptor>,
    {
        let mut registry = Self::empty();
        for descriptor in descriptors {
            let exchange = descriptor.exchange().to_string();
            if registry.plugins.insert(exchange.clone(), descriptor).is_some() {
                debug!(exchange = %exchange, "Plugin overrides an earlier registration");
            }
        }
        registry
    }

    /// Descriptor registered for `exchange`, falling back to `"base"`
    pub fn lookup(&self, exchange: &str) -> &PluginDescriptor {
        self.plugins
            .get(exchange)
            .unwrap_or_else(|| self.base())
    }

    /// Descriptor registered for `exchange`, if any plugin claims it
    pub fn get(&self, exchange: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(exchange)
    }

    pub fn contains(&self, exchange: &str) -> bool {
        self.plugins.contains_key(exchange)
    }

    /// The base descriptor (possibly overridden by a plugin named `"base"`)
    pub fn base(&self) -> &PluginDescriptor {
        static FALLBACK: OnceLock<PluginDescriptor> = OnceLock::new();
        self.plugins
            .get(BASE_EXCHANGE)
            .unwrap_or_else(|| FALLBACK.get_or_init(PluginDescriptor::base))
    }

    /// Names of all registered exchanges, sorted
    pub fn exchanges(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Announce and validate every plugin registered with `register_plugin!`.
pub fn discover_plugins() -> Vec<PluginDescriptor> {
    let mut plugins: Vec<&'static dyn Plugin> = Vec::new();
    for registration in inventory::iter::<PluginRegistration> {
        plugins.push(registration.plugin);
    }
    debug!(count = plugins.len(), "Scanned registered plugins");
    collect_descriptors(plugins)
}

/// Announce and validate `plugins` in order. Plugins announcing nothing are
/// skipped; invalid announcements are dropped with a warning.
pub fn collect_descriptors<I>(plugins: I) -> Vec<PluginDescriptor>
where
    I: IntoIterator<Item = &'static dyn Plugin>,
{
    let mut descriptors = Vec::new();
    for plugin in plugins {
        let Some(announcement) = plugin.announce() else {
            debug!("Plugin announced no descriptor, skipping");
            continue;
        };
        match announcement.validate(plugin) {
            Ok(descriptor) => {
                debug!(exchange = %descriptor.exchange(), "Plugin registered");
                descriptors.push(descriptor);
            }
            Err(e) => warn!(error = %e, "Dropping invalid plugin"),
        }
    }
    descriptors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::BitexError;
    use crate::core::kernel::BasicAuth;
    use crate::core::request::BaseRequestBuilder;
    use crate::core::response::{BaseResponseFormat, BitexResponse, ResponseFormat};
    use crate::core::types::{KeyValuePairs, Triple};
    use crate::plugins::PluginAnnouncement;

    struct Named(&'static str);

    impl Plugin for Named {
        fn announce(&self) -> Option<PluginAnnouncement> {
            Some(PluginAnnouncement::new(
                self.0,
                BasicAuth::provider,
                BaseRequestBuilder::provider,
                BaseResponseFormat::provider,
            ))
        }
    }

    struct Silent;

    impl Plugin for Silent {
        fn announce(&self) -> Option<PluginAnnouncement> {
            None
        }
    }

    struct Broken;

    impl Plugin for Broken {
        fn announce(&self) -> Option<PluginAnnouncement> {
            let mut announcement = Named("broken").announce()?;
            announcement.auth = None;
            Some(announcement)
        }
    }

    struct MarkedFormat;

    impl ResponseFormat for MarkedFormat {
        fn triples(&self, _response: &BitexResponse) -> Result<Vec<Triple>, BitexError> {
            Ok(vec![])
        }

        fn key_value_dict(&self, _response: &BitexResponse) -> Result<KeyValuePairs, BitexError> {
            Ok(KeyValuePairs::new())
        }
    }

    fn marked_format() -> Box<dyn ResponseFormat> {
        Box::new(MarkedFormat)
    }

    struct SecondKraken;

    impl Plugin for SecondKraken {
        fn announce(&self) -> Option<PluginAnnouncement> {
            Some(PluginAnnouncement::new(
                "kraken",
                BasicAuth::provider,
                BaseRequestBuilder::provider,
                marked_format,
            ))
        }
    }

    static KRAKEN: Named = Named("kraken");
    static BITSTAMP: Named = Named("bitstamp");
    static SILENT: Silent = Silent;
    static BROKEN: Broken = Broken;
    static SECOND_KRAKEN: SecondKraken = SecondKraken;

    #[test]
    fn test_empty_registry_has_base() {
        let registry = PluginRegistry::empty();
        assert_eq!(registry.exchanges(), vec!["base"]);
        assert_eq!(registry.base().exchange(), "base");
    }

    #[test]
    fn test_lookup_unknown_exchange_falls_back_to_base() {
        let registry = PluginRegistry::from_plugins([&KRAKEN as &dyn Plugin]);
        assert_eq!(registry.lookup("kraken").exchange(), "kraken");
        assert_eq!(registry.lookup("poloniex").exchange(), "base");
        assert!(registry.get("poloniex").is_none());
    }

    #[test]
    fn test_silent_and_broken_plugins_are_skipped() {
        let registry = PluginRegistry::from_plugins([
            &SILENT as &dyn Plugin,
            &BROKEN,
            &BITSTAMP,
        ]);
        assert_eq!(registry.exchanges(), vec!["base", "bitstamp"]);
        assert!(!registry.contains("broken"));
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = PluginRegistry::from_plugins([&KRAKEN as &dyn Plugin, &SECOND_KRAKEN]);
        let format = registry.lookup("kraken").new_response_format();
        let response = BitexResponse::new(format, registry.lookup("kraken").clone());
        assert!(response.triples().is_ok());
        assert_eq!(registry.len(), 2);
    }

    struct LowercaseBase;

    impl Plugin for LowercaseBase {
        fn announce(&self) -> Option<PluginAnnouncement> {
            Named("base").announce()
        }

        fn format_instrument_for(&self, instrument: &str, _exchange: &str) -> Option<String> {
            Some(instrument.to_lowercase())
        }
    }

    #[test]
    fn test_plugin_can_override_base() {
        static OTHER_BASE: LowercaseBase = LowercaseBase;
        let registry = PluginRegistry::from_plugins([&OTHER_BASE as &dyn Plugin]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.base().format_instrument_for("BTCUSD", "x"), "btcusd");
        assert_eq!(
            registry.lookup("unknown").format_instrument_for("BTCUSD", "unknown"),
            "btcusd"
        );
    }

    #[test]
    fn test_global_registry_is_memoized() {
        let first = PluginRegistry::global();
        let second = PluginRegistry::global();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.contains("base"));
    }
}

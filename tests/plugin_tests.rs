use async_trait::async_trait;
use bitex::core::kernel::{hmac_sha256_hex, Auth, HttpAdapter, RawResponse};
use bitex::core::request::BaseRequestBuilder;
use bitex::core::response::BaseResponseFormat;
use bitex::core::types::{BodyFields, KeyValuePairs, SendOptions, Triple};
use bitex::plugins::ExpandedUrl;
use bitex::{
    BitexError, BitexResponse, Endpoint, Plugin, PluginAnnouncement, PluginRegistry,
    PreparedRequest, Request, RequestOptions, ResponseFormat, Session, SessionConfig,
    ShorthandMatch,
};
use reqwest::header::HeaderValue;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

const UBEREX_API: &str = "https://api.uberex.test";

/// Signs `METHOD path` with HMAC-SHA256
#[derive(Debug)]
struct UberExAuth {
    key: String,
    secret: String,
}

impl UberExAuth {
    fn provider(key: &str, secret: &str) -> Arc<dyn Auth> {
        Arc::new(Self {
            key: key.to_string(),
            secret: secret.to_string(),
        })
    }
}

impl Auth for UberExAuth {
    fn key(&self) -> &str {
        &self.key
    }

    fn secret(&self) -> &str {
        &self.secret
    }

    fn sign(&self, request: &mut PreparedRequest) -> Result<(), BitexError> {
        let payload = format!("{} {}", request.method, request.url.path());
        let signature = hmac_sha256_hex(&self.secret, payload.as_bytes())?;
        let key = HeaderValue::from_str(&self.key)
            .map_err(|e| BitexError::AuthError(e.to_string()))?;
        let signature = HeaderValue::from_str(&signature)
            .map_err(|e| BitexError::AuthError(e.to_string()))?;
        request.headers.insert("x-uberex-key", key);
        request.headers.insert("x-uberex-signature", signature);
        Ok(())
    }
}

struct UberExFormat;

impl ResponseFormat for UberExFormat {
    fn triples(&self, response: &BitexResponse) -> Result<Vec<Triple>, BitexError> {
        let body: Value = response.json()?;
        let ts = response.received_timestamp();
        let pair = body["symbol"].as_str().unwrap_or_default();
        Ok(vec![
            (ts.clone(), "pair".to_string(), json!(response.instrument_from(pair))),
            (ts.clone(), "last".to_string(), body["last"].clone()),
            (ts.clone(), "received".to_string(), json!(ts)),
        ])
    }

    fn key_value_dict(&self, response: &BitexResponse) -> Result<KeyValuePairs, BitexError> {
        Ok(self
            .triples(response)?
            .into_iter()
            .map(|(_, label, value)| (label, value))
            .collect())
    }
}

fn uberex_format() -> Box<dyn ResponseFormat> {
    Box::new(UberExFormat)
}

struct UberEx;

impl Plugin for UberEx {
    fn announce(&self) -> Option<PluginAnnouncement> {
        Some(PluginAnnouncement::new(
            "uberex",
            UberExAuth::provider,
            BaseRequestBuilder::provider,
            uberex_format,
        ))
    }

    fn expand_shorthand(&self, shorthand: &ShorthandMatch) -> Option<ExpandedUrl> {
        let url = format!(
            "{}/api/{}/{}",
            UBEREX_API,
            shorthand.endpoint.path(),
            shorthand.instrument
        );
        if shorthand.endpoint != Endpoint::NewOrder {
            return Some(ExpandedUrl::new(url));
        }
        let mut body = BodyFields::new();
        body.insert("symbol".to_string(), json!(shorthand.instrument));
        body.insert("type".to_string(), json!("limit"));
        Some(ExpandedUrl::with_body(url, body))
    }

    fn format_instrument_for(&self, instrument: &str, _exchange: &str) -> Option<String> {
        Some(instrument.to_lowercase())
    }

    fn format_instrument_from(&self, instrument: &str, _exchange: &str) -> Option<String> {
        Some(instrument.to_uppercase())
    }
}

struct Unannounced;

impl Plugin for Unannounced {
    fn announce(&self) -> Option<PluginAnnouncement> {
        None
    }
}

struct Impostor;

impl Plugin for Impostor {
    fn announce(&self) -> Option<PluginAnnouncement> {
        Some(PluginAnnouncement::new(
            "https",
            UberExAuth::provider,
            BaseRequestBuilder::provider,
            BaseResponseFormat::provider,
        ))
    }
}

static UBEREX: UberEx = UberEx;
static UNANNOUNCED: Unannounced = Unannounced;
static IMPOSTOR: Impostor = Impostor;

bitex::register_plugin!(UBEREX);
bitex::register_plugin!(UNANNOUNCED);
bitex::register_plugin!(IMPOSTOR);

/// Replies with a canned ticker and remembers what it was sent
#[derive(Default)]
struct CannedAdapter {
    sent: Mutex<Vec<PreparedRequest>>,
}

impl CannedAdapter {
    fn last(&self) -> PreparedRequest {
        self.sent.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl HttpAdapter for CannedAdapter {
    async fn send(
        &self,
        request: &PreparedRequest,
        _options: &SendOptions,
    ) -> Result<RawResponse, BitexError> {
        self.sent.lock().unwrap().push(request.clone());
        Ok(RawResponse::new(200, r#"{"symbol": "btcusd", "last": "100.5"}"#))
    }

    fn name(&self) -> &str {
        "canned"
    }
}

fn create_test_session() -> (Session, Arc<CannedAdapter>) {
    let mut session = Session::from_config(SessionConfig::new().trust_env(false)).unwrap();
    let adapter = Arc::new(CannedAdapter::default());
    session.mount(UBEREX_API, adapter.clone());
    session.mount("kraken://", adapter.clone());
    (session, adapter)
}

#[cfg(test)]
mod plugin_tests {
    use super::*;

    #[test]
    fn test_global_registry_discovers_registered_plugins() {
        let registry = PluginRegistry::global();
        assert!(registry.contains("uberex"));
        assert!(registry.contains("base"));
        assert!(!registry.contains("https"));
        assert_eq!(registry.exchanges(), vec!["base", "uberex"]);
    }

    #[test]
    fn test_shorthand_expanded_with_formatted_instrument() {
        let (mut session, _) = create_test_session();
        let prepared = session
            .prepare_request(Request::new(Method::GET, "uberex://BTCUSD/ticker"))
            .unwrap();
        assert_eq!(prepared.url.as_str(), "https://api.uberex.test/api/ticker/btcusd");
        assert_eq!(prepared.exchange.as_deref(), Some("uberex"));
    }

    #[test]
    fn test_caller_fields_beat_plugin_fields() {
        let (mut session, _) = create_test_session();
        let request = Request::new(Method::POST, "uberex://BTCUSD/order/new")
            .data("type", "market")
            .data("amount", "0.1")
            .auth(UberExAuth::provider("k", "s"));
        let prepared = session.prepare_request(request).unwrap();

        let body = String::from_utf8(prepared.body.unwrap().to_vec()).unwrap();
        for field in ["amount=0.1", "symbol=btcusd", "type=market"] {
            assert!(body.contains(field), "{} missing from {}", field, body);
        }
        assert!(!body.contains("type=limit"));
    }

    #[tokio::test]
    async fn test_projections_from_registered_plugin() {
        let (mut session, _) = create_test_session();
        let response = session
            .ticker("uberex", "BTCUSD", RequestOptions::new())
            .await
            .unwrap();

        assert_eq!(response.exchange(), "uberex");
        assert_eq!(
            response.url.as_deref(),
            Some("https://api.uberex.test/api/ticker/btcusd")
        );
        let fields = response.key_value_dict().unwrap();
        assert_eq!(fields["pair"], "BTCUSD");
        assert_eq!(fields["last"], "100.5");
        assert_eq!(fields["received"], json!(response.received_timestamp()));

        let triples = response.triples().unwrap();
        assert!(triples.iter().all(|(ts, _, _)| *ts == response.received_timestamp()));
    }

    #[tokio::test]
    async fn test_private_request_installs_plugin_auth() {
        let (mut session, adapter) = create_test_session();
        session.set_credentials(Some(bitex::Credentials::new(
            "uber-key".to_string(),
            "uber-secret".to_string(),
        )));

        session
            .wallet("uberex", "BTC", RequestOptions::new().private(true))
            .await
            .unwrap();

        assert_eq!(session.key().unwrap(), "uber-key");
        assert_eq!(session.secret().unwrap(), "uber-secret");

        let sent = adapter.last();
        assert_eq!(sent.method, Method::GET);
        let expected = hmac_sha256_hex("uber-secret", b"GET /api/wallet/btc").unwrap();
        assert_eq!(sent.headers.get("x-uberex-key").unwrap(), "uber-key");
        assert_eq!(
            sent.headers.get("x-uberex-signature").unwrap(),
            expected.as_str()
        );
    }

    #[tokio::test]
    async fn test_private_request_without_credentials() {
        let (mut session, adapter) = create_test_session();
        let err = session
            .cancel_order("uberex", "BTCUSD", RequestOptions::new().private(true))
            .await
            .unwrap_err();
        assert!(matches!(err, BitexError::MissingCredentials { ref exchange } if exchange == "uberex"));
        assert!(adapter.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_exchange_uses_base_plugin() {
        let (mut session, adapter) = create_test_session();
        let response = session
            .orderbook("kraken", "XBTUSD", RequestOptions::new())
            .await
            .unwrap();

        assert_eq!(adapter.last().url.as_str(), "kraken://XBTUSD/book");
        assert_eq!(response.exchange(), "base");
        assert!(matches!(
            response.key_value_dict(),
            Err(BitexError::UnimplementedProjection { projection: "key_value_dict", .. })
        ));
        assert_eq!(response.instrument_from("XBTUSD"), "XBTUSD");
    }
}

use crate::core::errors::BitexError;
use crate::core::kernel::{HttpAdapter, RawBody, RawResponse};
use crate::core::request::PreparedRequest;
use crate::core::types::{CookieJar, KeyValuePairs, Triple};
use crate::plugins::{PluginDescriptor, PluginRegistry};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use encoding_rs::{Encoding, UTF_8};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Exchange-specific projections of a response body
///
/// Implementations must include a `received` entry equal to
/// [`BitexResponse::received_timestamp`] and should include a `pair` entry.
pub trait ResponseFormat: Send + Sync {
    /// `(timestamp, label, value)` rows
    fn triples(&self, response: &BitexResponse) -> Result<Vec<Triple>, BitexError> {
        Err(BitexError::UnimplementedProjection {
            projection: "triples",
            exchange: response.exchange().to_string(),
        })
    }

    /// Flat `label -> value` mapping
    fn key_value_dict(&self, response: &BitexResponse) -> Result<KeyValuePairs, BitexError> {
        Err(BitexError::UnimplementedProjection {
            projection: "key_value_dict",
            exchange: response.exchange().to_string(),
        })
    }
}

/// Response format of the base plugin; implements no projections
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseResponseFormat;

impl BaseResponseFormat {
    /// Response factory signature expected by plugin descriptors
    pub fn provider() -> Box<dyn ResponseFormat> {
        Box::new(Self)
    }
}

impl ResponseFormat for BaseResponseFormat {}

/// Response returned by every session request
pub struct BitexResponse {
    received: DateTime<Utc>,
    /// `None` when the transport reported no status
    pub status_code: Option<StatusCode>,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    /// Charset derived from `Content-Type`
    pub encoding: Option<String>,
    pub url: Option<String>,
    pub cookies: CookieJar,
    raw: RawBody,
    request: Option<Arc<PreparedRequest>>,
    connection: Option<Arc<dyn HttpAdapter>>,
    descriptor: PluginDescriptor,
    format: Box<dyn ResponseFormat>,
}

impl fmt::Debug for BitexResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitexResponse")
            .field("exchange", &self.exchange())
            .field("received", &self.received)
            .field("status_code", &self.status_code)
            .field("url", &self.url)
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

impl BitexResponse {
    /// Empty response bound to `descriptor`. The receive timestamp is taken
    /// before anything else happens.
    pub fn new(format: Box<dyn ResponseFormat>, descriptor: PluginDescriptor) -> Self {
        let received = Utc::now();
        Self {
            received,
            status_code: None,
            reason: None,
            headers: HeaderMap::new(),
            encoding: None,
            url: None,
            cookies: CookieJar::new(),
            raw: RawBody::default(),
            request: None,
            connection: None,
            descriptor,
            format,
        }
    }

    /// Time the response object was created
    pub fn received(&self) -> DateTime<Utc> {
        self.received
    }

    /// `received` as used in projections (RFC 3339, microsecond precision)
    pub fn received_timestamp(&self) -> String {
        self.received.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Exchange whose plugin built this response
    pub fn exchange(&self) -> &str {
        self.descriptor.exchange()
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Request that produced this response
    pub fn request(&self) -> Option<&PreparedRequest> {
        self.request.as_deref()
    }

    /// Adapter that carried the request
    pub fn connection(&self) -> Option<&Arc<dyn HttpAdapter>> {
        self.connection.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.status_code.is_some_and(|status| status.is_success())
    }

    pub fn triples(&self) -> Result<Vec<Triple>, BitexError> {
        self.format.triples(self)
    }

    pub fn key_value_dict(&self) -> Result<KeyValuePairs, BitexError> {
        self.format.key_value_dict(self)
    }

    /// Convert an exchange instrument back to bitex notation
    pub fn instrument_from(&self, instrument: &str) -> String {
        self.descriptor
            .format_instrument_from(instrument, self.descriptor.exchange())
    }

    /// Buffered body. Fails for streamed responses, read those with
    /// [`next_chunk`](Self::next_chunk).
    pub fn content(&self) -> Result<&Bytes, BitexError> {
        match &self.raw {
            RawBody::Buffered(bytes) => Ok(bytes),
            RawBody::Streaming(_) => Err(BitexError::InvalidParameters(
                "response body is streamed; read it with next_chunk".to_string(),
            )),
        }
    }

    /// Body decoded with the detected encoding. Unknown or missing labels
    /// fall back to UTF-8; malformed sequences become U+FFFD.
    pub fn text(&self) -> Result<String, BitexError> {
        let bytes = self.content()?;
        let encoding = self
            .encoding
            .as_deref()
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8);
        let (text, _, _) = encoding.decode(bytes);
        Ok(text.into_owned())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BitexError> {
        Ok(serde_json::from_slice(self.content()?)?)
    }

    /// Next chunk of the body. A buffered body is handed out whole on the
    /// first call.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, BitexError> {
        match &mut self.raw {
            RawBody::Streaming(stream) => Ok(stream.next().await.transpose()?),
            RawBody::Buffered(bytes) if bytes.is_empty() => Ok(None),
            RawBody::Buffered(bytes) => Ok(Some(std::mem::take(bytes))),
        }
    }
}

/// Charset of a response, derived from its `Content-Type` header.
/// Text types without a charset default to ISO-8859-1, JSON to UTF-8.
pub fn get_encoding_from_headers(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let mut parts = content_type.split(';');
    let mime = parts.next().unwrap_or_default().trim().to_ascii_lowercase();

    for param in parts {
        if let Some((key, value)) = param.split_once('=') {
            if key.trim().eq_ignore_ascii_case("charset") {
                return Some(value.trim().trim_matches(|c| c == '"' || c == '\'').to_string());
            }
        }
    }

    if mime.contains("text") {
        Some("ISO-8859-1".to_string())
    } else if mime.contains("application/json") {
        Some("utf-8".to_string())
    } else {
        None
    }
}

/// Builds [`BitexResponse`]s with the format of the request's exchange
#[derive(Debug, Clone, Copy)]
pub struct ResponseBuilder<'a> {
    registry: &'a PluginRegistry,
}

impl<'a> ResponseBuilder<'a> {
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self { registry }
    }

    pub fn build(
        &self,
        request: Arc<PreparedRequest>,
        raw: RawResponse,
        connection: Arc<dyn HttpAdapter>,
    ) -> BitexResponse {
        let descriptor = match request.exchange.as_deref() {
            Some(exchange) => self.registry.lookup(exchange),
            None => self.registry.base(),
        };
        let mut response = BitexResponse::new(descriptor.new_response_format(), descriptor.clone());

        response.status_code = raw.status.and_then(|status| StatusCode::from_u16(status).ok());
        response.reason = raw.reason;
        response.encoding = get_encoding_from_headers(&raw.headers);
        response.cookies.extract_from_headers(&raw.headers);
        response.headers = raw.headers;
        response.url = Some(request.url.to_string());
        response.raw = raw.body;
        response.request = Some(request);
        response.connection = Some(connection);

        trace!(
            exchange = %response.exchange(),
            status = ?response.status_code,
            "Response built"
        );
        response
    }
}

use bitex::core::kernel::BasicAuth;
use bitex::{BitexError, RequestOptions, Session, SessionConfig};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Session without environment lookups, over the reqwest adapter
fn create_test_session() -> Session {
    Session::from_config(SessionConfig::new().trust_env(false)).unwrap()
}

#[cfg(test)]
mod transport_tests {
    use super::*;

    #[tokio::test]
    async fn test_get_json_through_reqwest_adapter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ticker"))
            .and(query_param("pair", "XBTUSD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"last": "27000.1", "volume": "1200"}))
                    .insert_header("set-cookie", "sid=abc; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut session = create_test_session();
        let response = session
            .request(
                Method::GET,
                &format!("{}/ticker", server.uri()),
                RequestOptions::new().exchange("kraken").param("pair", "XBTUSD"),
            )
            .await
            .unwrap();

        assert_eq!(response.status_code, Some(StatusCode::OK));
        assert_eq!(response.reason.as_deref(), Some("OK"));
        assert_eq!(response.encoding.as_deref(), Some("utf-8"));
        assert!(response.url.as_deref().unwrap().ends_with("/ticker?pair=XBTUSD"));

        let body: Value = response.json().unwrap();
        assert_eq!(body["last"], "27000.1");

        let request = response.request().unwrap();
        assert_eq!(request.exchange.as_deref(), Some("kraken"));
        assert_eq!(response.connection().unwrap().name(), "reqwest");

        assert_eq!(response.cookies.get("sid"), Some("abc"));
        assert_eq!(session.cookies().get("sid"), Some("abc"));
    }

    #[tokio::test]
    async fn test_session_cookies_are_sent_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(204).insert_header("set-cookie", "sid=abc"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/account"))
            .and(header("cookie", "sid=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = create_test_session();
        session
            .request(Method::GET, &format!("{}/login", server.uri()), RequestOptions::new())
            .await
            .unwrap();
        let response = session
            .request(Method::GET, &format!("{}/account", server.uri()), RequestOptions::new())
            .await
            .unwrap();

        assert_eq!(response.status_code, Some(StatusCode::OK));
        assert_eq!(response.text().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_form_body_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            // base64("k:s")
            .and(header("authorization", "Basic azpz"))
            .and(body_string_contains("amount=1"))
            .and(body_string_contains("side=buy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = create_test_session();
        let response = session
            .request(
                Method::POST,
                &format!("{}/order", server.uri()),
                RequestOptions::new()
                    .private(true)
                    .auth(BasicAuth::provider("k", "s"))
                    .data("side", "buy")
                    .data("amount", 1),
            )
            .await
            .unwrap();

        let body: Value = response.json().unwrap();
        assert_eq!(body["id"], 7);
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let mut session = create_test_session();
        let response = session
            .request(Method::GET, &server.uri(), RequestOptions::new())
            .await
            .unwrap();

        assert_eq!(response.status_code, Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(response.reason.as_deref(), Some("Internal Server Error"));
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_redirects_can_be_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/new"),
            )
            .mount(&server)
            .await;

        let mut session = create_test_session();
        let response = session
            .request(
                Method::GET,
                &format!("{}/old", server.uri()),
                RequestOptions::new().allow_redirects(false),
            )
            .await
            .unwrap();

        assert_eq!(response.status_code, Some(StatusCode::FOUND));
        assert_eq!(response.headers.get("Location").unwrap(), "/new");
    }

    #[tokio::test]
    async fn test_streamed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("streamed payload"))
            .mount(&server)
            .await;

        let mut session = create_test_session();
        let mut response = session
            .request(Method::GET, &server.uri(), RequestOptions::new().stream(true))
            .await
            .unwrap();

        assert!(response.content().is_err());
        let mut body = Vec::new();
        while let Some(chunk) = response.next_chunk().await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"streamed payload");
    }

    #[tokio::test]
    async fn test_timeout_surfaces_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let mut session = create_test_session();
        let err = session
            .request(
                Method::GET,
                &server.uri(),
                RequestOptions::new().timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();

        match err {
            BitexError::HttpError(e) => assert!(e.is_timeout()),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_unmounted_scheme_has_no_adapter() {
        let mut session = create_test_session();
        let err = session
            .ticker("kraken", "XBTUSD", RequestOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BitexError::NoAdapter(ref url) if url == "kraken://XBTUSD/ticker"));
    }
}

use crate::error::{ConfigError, GelfError};
use crate::message::GelfMessage;
use crate::sink::LogSink;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;

/// Configuration for [`HttpSink`].
///
/// The sink POSTs each message as an uncompressed JSON document, which is
/// what Graylog's GELF HTTP input expects at `/gelf`.
#[derive(Clone, Debug)]
pub struct HttpConfig {
    /// Full endpoint URL, e.g. "http://127.0.0.1:12201/gelf"
    pub url: String,
    /// Per-request timeout; `None` waits for the server indefinitely.
    pub timeout: Option<Duration>,
}

impl HttpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// GELF HTTP implementation of [`LogSink`].
#[derive(Clone)]
pub struct HttpSink {
    client: Client,
    config: HttpConfig,
}

impl HttpSink {
    /// Construct a new sink instance using the provided configuration.
    ///
    /// **Parameters**
    /// - `config`: [`HttpConfig`] describing the target URL and timeout.
    ///
    /// **Returns**
    /// - A ready-to-use [`HttpSink`] that can be handed to
    ///   [`GelfHook::new`](crate::hook::GelfHook::new).
    /// - `Err(ConfigError::HttpClient)` if the HTTP client could not be built.
    pub fn new(config: HttpConfig) -> Result<Self, ConfigError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(ConfigError::HttpClient)?;
        Ok(Self { client, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl LogSink for HttpSink {
    async fn send(&self, message: &GelfMessage) -> Result<(), GelfError> {
        let body = serde_json::to_vec(message)?;
        let resp = self
            .client
            .post(&self.config.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(GelfError::HttpStatus {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn message() -> GelfMessage {
        GelfMessage {
            version: "1.1".into(),
            host: "testing.local".into(),
            short_message: "test message".into(),
            full_message: "test message\nsecond line".into(),
            timestamp: 1_700_000_000.5,
            level: 6,
            file: String::new(),
            line: 0,
            extra: BTreeMap::from([("_foo".to_string(), serde_json::json!("bar"))]),
        }
    }

    #[tokio::test]
    async fn posts_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gelf")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "host": "testing.local",
                "short_message": "test message",
                "_foo": "bar",
            })))
            .with_status(202)
            .create_async()
            .await;

        let sink = HttpSink::new(HttpConfig::new(format!("{}/gelf", server.url()))).unwrap();
        sink.send(&message()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_a_delivery_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/gelf")
            .with_status(500)
            .with_body("overloaded")
            .create_async()
            .await;

        let sink = HttpSink::new(HttpConfig::new(format!("{}/gelf", server.url()))).unwrap();
        match sink.send(&message()).await {
            Err(GelfError::HttpStatus { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported() {
        let sink = HttpSink::new(HttpConfig::new("http://127.0.0.1:1/gelf")).unwrap();
        assert!(matches!(sink.send(&message()).await, Err(GelfError::Http(_))));
    }
}

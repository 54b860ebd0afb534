// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collector transport.
//!
//! One POST per call: compact JSON, deflated at the fast level. The status
//! code is the only part of the response the caller sees. Retrying is the
//! agent's job.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::TransmitterError;
use crate::http::get_client;
use crate::VERSION;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
pub const CONTENT_ENCODING_GZIP: &str = "gzip";

#[async_trait]
pub trait Transmit: Send + Sync {
    /// Sends `payload` and returns the HTTP status code.
    async fn transmit(&self, payload: &Value) -> Result<u16, TransmitterError>;
}

pub struct Transmitter {
    uri: Url,
    client: reqwest::Client,
}

impl Transmitter {
    /// `action` is either a collector action such as `log_entries`, resolved
    /// against the configured endpoint, or a full URL.
    pub fn new(action: &str, config: Arc<Config>) -> Result<Self, TransmitterError> {
        let base_uri = if action.starts_with("http") {
            action.to_string()
        } else {
            format!("{}/1/{}", config.endpoint, action)
        };
        let uri = Url::parse_with_params(
            &base_uri,
            &[
                ("api_key", config.push_api_key.as_str()),
                ("name", config.name.as_str()),
                ("environment", config.env.as_str()),
                ("hostname", config.hostname.as_str()),
                ("gem_version", VERSION),
            ],
        )
        .map_err(|e| TransmitterError::InvalidUri(format!("{base_uri}: {e}")))?;

        Ok(Self {
            uri,
            client: get_client(&config),
        })
    }

    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn encode_payload(payload: &Value) -> Result<Vec<u8>, TransmitterError> {
        let json = serde_json::to_vec(payload)?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }
}

#[async_trait]
impl Transmit for Transmitter {
    async fn transmit(&self, payload: &Value) -> Result<u16, TransmitterError> {
        debug!("Transmitting payload to {}", self.uri.path());
        let body = Self::encode_payload(payload)?;
        let response = self
            .client
            .post(self.uri.clone())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(CONTENT_ENCODING, CONTENT_ENCODING_GZIP)
            .body(body)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::ZlibDecoder;
    use mockito::Matcher;
    use serde_json::json;

    use super::*;

    fn config(endpoint: &str) -> Arc<Config> {
        Arc::new(Config {
            push_api_key: "abc".to_string(),
            name: "TestApp".to_string(),
            env: "production".to_string(),
            hostname: "web-1".to_string(),
            endpoint: endpoint.to_string(),
            ..Config::default()
        })
    }

    #[test]
    fn test_uri() {
        let transmitter =
            Transmitter::new("log_entries", config("https://push.appsignal.com")).expect("valid uri");
        assert_eq!(
            transmitter.uri().as_str(),
            format!(
                "https://push.appsignal.com/1/log_entries?api_key=abc&name=TestApp&environment=production&hostname=web-1&gem_version={VERSION}"
            )
        );
    }

    #[test]
    fn test_full_url_action() {
        let transmitter = Transmitter::new(
            "http://collector.local/custom",
            config("https://push.appsignal.com"),
        )
        .expect("valid uri");
        assert_eq!(transmitter.uri().host_str(), Some("collector.local"));
        assert_eq!(transmitter.uri().path(), "/custom");
    }

    #[test]
    fn test_invalid_endpoint() {
        let result = Transmitter::new("log_entries", config("not a url"));
        assert!(matches!(result, Err(TransmitterError::InvalidUri(_))));
    }

    #[test]
    fn test_encode_payload() {
        let payload = json!([{"request_id": "1", "log_entry": {"action": "A#b"}}]);
        let encoded = Transmitter::encode_payload(&payload).expect("encodes");

        let mut decoded = String::new();
        ZlibDecoder::new(encoded.as_slice())
            .read_to_string(&mut decoded)
            .expect("decodes");
        assert_eq!(decoded, serde_json::to_string(&payload).expect("json"));
    }

    #[tokio::test]
    async fn test_transmit_returns_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/1/log_entries")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api_key".into(), "abc".into()),
                Matcher::UrlEncoded("environment".into(), "production".into()),
                Matcher::UrlEncoded("gem_version".into(), VERSION.into()),
            ]))
            .match_header("content-type", JSON_CONTENT_TYPE)
            .match_header("content-encoding", "gzip")
            .with_status(420)
            .create_async()
            .await;

        let transmitter = Transmitter::new("log_entries", config(&server.url())).expect("valid uri");
        let status = transmitter.transmit(&json!([])).await.expect("sent");

        assert_eq!(status, 420);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let transmitter =
            Transmitter::new("log_entries", config("http://127.0.0.1:1")).expect("valid uri");
        let result = transmitter.transmit(&json!([])).await;
        assert!(matches!(result, Err(TransmitterError::Http(_))));
    }
}

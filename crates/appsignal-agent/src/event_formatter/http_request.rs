// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::Url;

use crate::event_formatter::{BodyFormat, EventFormatter, FormattedEvent};
use crate::transaction::event::Payload;

pub const EVENT_NAMES: [&str; 2] = ["request.faraday", "request.net_http"];

/// Outbound HTTP calls: `METHOD scheme://host` as title, with the path
/// appended as body. Query strings never leave the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpRequestFormatter;

impl EventFormatter for HttpRequestFormatter {
    fn format(&self, payload: &Payload) -> Option<FormattedEvent> {
        let method = payload
            .get("method")
            .and_then(|method| method.as_str())
            .unwrap_or_default()
            .to_uppercase();
        let url = Url::parse(payload.get("url")?.as_str()?).ok()?;
        let host = url.host_str()?;
        let base = format!("{method} {}://{host}", url.scheme());
        let body = format!("{base}{}", url.path());
        Some(FormattedEvent::new(base, body, BodyFormat::Default))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_format() {
        let payload = json!({"method": "get", "url": "https://api.example.com/v1/users?token=secret"});
        let formatted = payload
            .as_object()
            .and_then(|payload| HttpRequestFormatter.format(payload));
        assert_eq!(
            formatted,
            Some(FormattedEvent::new(
                "GET https://api.example.com",
                "GET https://api.example.com/v1/users",
                BodyFormat::Default
            ))
        );
    }

    #[test]
    fn test_unparseable_url() {
        let payload = json!({"method": "post", "url": "not a url"});
        assert_eq!(
            payload
                .as_object()
                .and_then(|payload| HttpRequestFormatter.format(payload)),
            None
        );
    }
}

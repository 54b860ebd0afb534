// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::event_formatter::{BodyFormat, EventFormatter, FormattedEvent};
use crate::transaction::event::Payload;

pub const EVENT_NAMES: [&str; 2] = [
    "render_template.action_view",
    "render_partial.action_view",
];

/// Template identifier relative to the application root as title.
#[derive(Debug, Clone)]
pub struct RenderFormatter {
    root_path: String,
}

impl RenderFormatter {
    /// `root_path` is the application root including its trailing `/`.
    pub fn try_new(root_path: Option<String>) -> Result<Self, String> {
        match root_path {
            Some(root_path) if !root_path.is_empty() => Ok(Self { root_path }),
            _ => Err("application root path is not configured".to_string()),
        }
    }
}

impl EventFormatter for RenderFormatter {
    fn format(&self, payload: &Payload) -> Option<FormattedEvent> {
        let identifier = payload.get("identifier")?.as_str()?;
        let title = identifier.replacen(&self.root_path, "", 1);
        Some(FormattedEvent::new(title, "", BodyFormat::Default))
    }
}

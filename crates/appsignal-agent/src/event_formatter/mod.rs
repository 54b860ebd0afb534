// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event formatters.
//!
//! A formatter turns the payload of a finished event into a `(title, body,
//! body_format)` triple. Formatters are looked up by event name in an
//! [`EventFormatterRegistry`]; events without a formatter keep an empty title
//! and body.
//!
//! Built-in formatters:
//!
//! | Event name | Formatter |
//! |---|---|
//! | `sql.sequel`, `sql.active_record` | [`sql::SqlFormatter`] |
//! | `cache_*.active_support` | [`cache::CacheFormatter`] |
//! | `request.faraday`, `request.net_http` | [`http_request::HttpRequestFormatter`] |
//! | `render_template.action_view`, `render_partial.action_view` | [`view::RenderFormatter`] |

pub mod cache;
pub mod http_request;
pub mod sql;
pub mod view;

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::config::Config;
use crate::transaction::event::Payload;

/// How the collector should render an event body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyFormat {
    #[default]
    Default = 0,
    Sql = 1,
}

impl Serialize for BodyFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormattedEvent {
    pub title: String,
    pub body: String,
    pub body_format: BodyFormat,
}

impl FormattedEvent {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>, body_format: BodyFormat) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            body_format,
        }
    }
}

pub trait EventFormatter: Send + Sync {
    /// Returns `None` when the payload lacks what this formatter needs.
    fn format(&self, payload: &Payload) -> Option<FormattedEvent>;
}

/// Name → formatter table shared by every subscriber of a client.
#[derive(Default)]
pub struct EventFormatterRegistry {
    formatters: RwLock<HashMap<String, Arc<dyn EventFormatter>>>,
}

impl EventFormatterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in formatter registered.
    #[must_use]
    pub fn with_defaults(config: &Config) -> Self {
        let registry = Self::new();

        let sql: Arc<dyn EventFormatter> = Arc::new(sql::SqlFormatter);
        for name in sql::EVENT_NAMES {
            registry.register(name, Arc::clone(&sql));
        }

        let cache: Arc<dyn EventFormatter> = Arc::new(cache::CacheFormatter);
        for name in cache::EVENT_NAMES {
            registry.register(name, Arc::clone(&cache));
        }

        let http: Arc<dyn EventFormatter> = Arc::new(http_request::HttpRequestFormatter);
        for name in http_request::EVENT_NAMES {
            registry.register(name, Arc::clone(&http));
        }

        for name in view::EVENT_NAMES {
            registry.register_with(name, || {
                view::RenderFormatter::try_new(config.root_path_prefix())
                    .map(|formatter| Arc::new(formatter) as Arc<dyn EventFormatter>)
            });
        }

        registry
    }

    /// Registers `formatter` under `name`. An existing formatter for `name`
    /// is kept and a warning is logged.
    pub fn register(&self, name: &str, formatter: Arc<dyn EventFormatter>) -> bool {
        let mut formatters = self
            .formatters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if formatters.contains_key(name) {
            warn!("Formatter for '{}' already registered, not registering again", name);
            return false;
        }
        debug!("Registered event formatter for '{}'", name);
        formatters.insert(name.to_string(), formatter);
        true
    }

    /// Builds and registers a formatter. A failing `init` leaves `name`
    /// unregistered and logs a warning.
    pub fn register_with<F, E>(&self, name: &str, init: F) -> bool
    where
        F: FnOnce() -> Result<Arc<dyn EventFormatter>, E>,
        E: Display,
    {
        match init() {
            Ok(formatter) => self.register(name, formatter),
            Err(e) => {
                warn!(
                    "'{}' raised while initializing formatter for '{}', formatter unregistered",
                    e, name
                );
                self.unregister(name);
                false
            }
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.formatters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.formatters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Formats `payload` with the formatter registered for `name`.
    #[must_use]
    pub fn format(&self, name: &str, payload: &Payload) -> Option<FormattedEvent> {
        let formatter = self
            .formatters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()?;
        formatter.format(payload)
    }
}

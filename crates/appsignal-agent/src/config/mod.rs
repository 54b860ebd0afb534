// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration Module
//!
//! Settings are assembled from three layers, later ones overriding earlier ones:
//!
//! 1. **Defaults** - `Config::default()`
//! 2. **YAML file** - `config/appsignal.yml` under the application root, where
//!    each top-level key is an environment name (`production:`, `staging:`)
//!    and `default:` applies to all of them
//! 3. **Environment variables** - `APPSIGNAL_*`
//!
//! The environment is resolved before any source loads, from the caller's
//! value or `APPSIGNAL_APP_ENV`, `RAILS_ENV`, `RACK_ENV`.
//!
//! A source that fails to load is logged and skipped; the remaining sources
//! still apply. Monitoring is only switched on when `active` is set and a push
//! API key is present, see [`Config::is_active`].

pub mod env;
pub mod log_level;
pub mod yaml;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_aux::prelude::deserialize_bool_from_anything;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::{env::EnvConfigSource, log_level::LogLevel, yaml::YamlConfigSource};
use crate::proc::hostname::get_hostname;

pub use crate::error::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "https://push.appsignal.com";
pub const DEFAULT_SLOW_REQUEST_THRESHOLD: f64 = 200.0;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ENV: &str = "development";
pub const CONFIG_FILE: &str = "config/appsignal.yml";

/// Copies a set `Option<String>` source field onto a `String` config field.
#[macro_export]
macro_rules! merge_string {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if let Some(value) = &$source.$source_field {
            $config.$config_field.clone_from(value);
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field.clone_from(value);
        }
    };
}

/// Overrides an `Option<T>` config field when the source sets it.
#[macro_export]
macro_rules! merge_option {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if $source.$source_field.is_some() {
            $config.$config_field.clone_from(&$source.$source_field);
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if $source.$field.is_some() {
            $config.$field.clone_from(&$source.$field);
        }
    };
}

/// Copies a set `Option<T>` source field onto a plain `T` config field.
#[macro_export]
macro_rules! merge_option_to_value {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if let Some(value) = &$source.$source_field {
            $config.$config_field = value.clone();
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field = value.clone();
        }
    };
}

/// Overrides a list config field when the source list is non-empty.
#[macro_export]
macro_rules! merge_vec {
    ($config:expr, $source:expr, $field:ident) => {
        if !$source.$field.is_empty() {
            $config.$field.clone_from(&$source.$field);
        }
    };
}

#[allow(clippy::module_name_repetitions)]
pub trait ConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError>;
}

#[derive(Default)]
#[allow(clippy::module_name_repetitions)]
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    config: Config,
}

#[allow(clippy::module_name_repetitions)]
impl ConfigBuilder {
    /// Starts from `config` instead of the defaults. Used to seed the
    /// resolved environment and application root before sources load.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            sources: Vec::new(),
            config,
        }
    }

    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn build(&mut self) -> Config {
        let mut failed_sources = 0;
        for source in &self.sources {
            if let Err(e) = source.load(&mut self.config) {
                error!("Failed to load config: {}", e);
                failed_sources += 1;
            }
        }

        if !self.sources.is_empty() && failed_sources == self.sources.len() {
            debug!("No configuration source could be loaded, using defaults");
        }

        let endpoint = self.config.endpoint.trim().trim_end_matches('/');
        self.config.endpoint = if endpoint.is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            endpoint.to_string()
        };

        if self.config.hostname.trim().is_empty() {
            self.config.hostname = get_hostname();
        }

        // If `http_proxy` is not set, fall back to the `HTTPS_PROXY` environment variable
        if self.config.http_proxy.is_none() {
            if let Ok(https_proxy) = std::env::var("HTTPS_PROXY") {
                if !https_proxy.trim().is_empty() {
                    self.config.http_proxy = Some(https_proxy);
                }
            }
        }

        if self.config.flush_interval.is_zero() {
            warn!("flush_interval of 0 is not allowed, using the default");
            self.config.flush_interval = DEFAULT_FLUSH_INTERVAL;
        }

        if !self.config.slow_request_threshold.is_finite() || self.config.slow_request_threshold < 0.0
        {
            warn!(
                "Invalid slow_request_threshold {}, using the default",
                self.config.slow_request_threshold
            );
            self.config.slow_request_threshold = DEFAULT_SLOW_REQUEST_THRESHOLD;
        }

        self.config.clone()
    }
}

#[derive(Debug, PartialEq, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct Config {
    pub active: bool,
    pub push_api_key: String,
    pub name: String,
    pub env: String,
    /// Application root; stripped from view paths before they are sent.
    pub root_path: PathBuf,
    pub endpoint: String,
    pub hostname: String,
    /// Root events at or above this many milliseconds make a slow request.
    pub slow_request_threshold: f64,
    pub send_params: bool,
    /// Keys whose values are replaced before params leave the process.
    pub filter_parameters: Vec<String>,
    pub ca_file_path: Option<PathBuf>,
    pub http_proxy: Option<String>,
    pub log_level: LogLevel,
    pub flush_interval: Duration,
    pub flush_timeout: Duration,
    pub ignore_actions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            active: false,
            push_api_key: String::new(),
            name: String::new(),
            env: DEFAULT_ENV.to_string(),
            root_path: PathBuf::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            hostname: String::new(),
            slow_request_threshold: DEFAULT_SLOW_REQUEST_THRESHOLD,
            send_params: true,
            filter_parameters: Vec::new(),
            ca_file_path: None,
            http_proxy: None,
            log_level: LogLevel::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            ignore_actions: Vec::new(),
        }
    }
}

impl Config {
    /// Whether transactions should be collected and transmitted at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active && !self.push_api_key.trim().is_empty()
    }

    /// Root path prefix as it appears in view identifiers, with a trailing `/`.
    #[must_use]
    pub fn root_path_prefix(&self) -> Option<String> {
        let root = self.root_path.to_string_lossy();
        if root.is_empty() {
            return None;
        }
        Some(format!("{}/", root.trim_end_matches('/')))
    }
}

/// Resolves the environment name, preferring an explicit value over
/// `APPSIGNAL_APP_ENV`, `RAILS_ENV` and `RACK_ENV`.
#[must_use]
pub fn determine_env(initial_env: Option<&str>) -> String {
    if let Some(env) = initial_env.map(str::trim).filter(|env| !env.is_empty()) {
        return env.to_string();
    }
    ["APPSIGNAL_APP_ENV", "RAILS_ENV", "RACK_ENV"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|env| env.trim().to_string())
        .find(|env| !env.is_empty())
        .unwrap_or_else(|| DEFAULT_ENV.to_string())
}

/// Loads the configuration of the application rooted at `root_path`.
#[allow(clippy::module_name_repetitions)]
#[must_use]
pub fn get_config(root_path: &Path, initial_env: Option<&str>) -> Config {
    let seed = Config {
        env: determine_env(initial_env),
        root_path: root_path.to_path_buf(),
        ..Config::default()
    };
    ConfigBuilder::new(seed)
        .add_source(Box::new(YamlConfigSource {
            path: root_path.join(CONFIG_FILE),
        }))
        .add_source(Box::new(EnvConfigSource))
        .build()
}

pub fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        other => {
            error!(
                "Failed to parse value, expected a string, got: {}, ignoring",
                other
            );
            Ok(None)
        }
    }
}

pub fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s.trim().to_string()))
            }
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => {
            error!("Failed to parse value, expected a string or an integer, ignoring");
            Ok(None)
        }
    }
}

pub fn deserialize_optional_bool_from_anything<'de, D>(
    deserializer: D,
) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Value> = Option::deserialize(deserializer)?;

    match opt {
        None => Ok(None),
        Some(value) => match deserialize_bool_from_anything(value) {
            Ok(bool_result) => Ok(Some(bool_result)),
            Err(e) => {
                error!("Failed to parse bool value: {}, ignoring", e);
                Ok(None)
            }
        },
    }
}

/// Accepts either a sequence of strings or one comma-separated string.
pub fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Value::deserialize(deserializer)? {
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Array(values) => values
            .into_iter()
            .filter_map(|value| match value {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                other => {
                    error!("Failed to parse list entry {}, ignoring", other);
                    None
                }
            })
            .collect(),
        Value::Null => Vec::new(),
        other => {
            error!("Failed to parse list, got: {}, ignoring", other);
            Vec::new()
        }
    };
    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

pub fn deserialize_option_lossless<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<T>::deserialize(deserializer) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to deserialize optional value: {}, ignoring", e);
            Ok(None)
        }
    }
}

pub fn deserialize_optional_duration_from_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    let seconds = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match seconds {
        Some(seconds) if seconds.is_finite() && seconds >= 0.0 => {
            Ok(Some(Duration::from_secs_f64(seconds)))
        }
        _ => {
            error!("Failed to parse duration: expected a non-negative number of seconds, ignoring");
            Ok(None)
        }
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `config/appsignal.yml` source.
//!
//! Top-level keys are environment names. The section matching the resolved
//! environment is merged over the optional `default:` section:
//!
//! ```yaml
//! default:
//!   name: "My app"
//! production:
//!   active: true
//!   push_api_key: "00000000-0000-0000-0000-000000000000"
//!   ignore_actions:
//!     - "HealthController#show"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::Deserialize;
use tracing::debug;

use crate::{
    config::{
        deserialize_option_lossless, deserialize_optional_bool_from_anything,
        deserialize_optional_duration_from_seconds, deserialize_optional_string,
        deserialize_string_list, deserialize_string_or_int, log_level::LogLevel, Config,
        ConfigError, ConfigSource,
    },
    merge_option, merge_option_to_value, merge_string, merge_vec,
};

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfig {
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub active: Option<bool>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub push_api_key: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub name: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub endpoint: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub hostname: Option<String>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub slow_request_threshold: Option<f64>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub send_params: Option<bool>,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub filter_parameters: Vec<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub ca_file_path: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub http_proxy: Option<String>,
    pub log_level: Option<LogLevel>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub flush_interval: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub flush_timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub ignore_actions: Vec<String>,
}

fn merge_config(config: &mut Config, yaml_config: &YamlConfig) {
    merge_option_to_value!(config, yaml_config, active);
    merge_string!(config, yaml_config, push_api_key);
    merge_string!(config, yaml_config, name);
    merge_string!(config, yaml_config, endpoint);
    merge_string!(config, yaml_config, hostname);
    merge_option_to_value!(config, yaml_config, slow_request_threshold);
    merge_option_to_value!(config, yaml_config, send_params);
    merge_vec!(config, yaml_config, filter_parameters);
    if let Some(path) = &yaml_config.ca_file_path {
        config.ca_file_path = Some(PathBuf::from(path));
    }
    merge_option!(config, yaml_config, http_proxy);
    merge_option_to_value!(config, yaml_config, log_level);
    merge_option_to_value!(config, yaml_config, flush_interval);
    merge_option_to_value!(config, yaml_config, flush_timeout);
    merge_vec!(config, yaml_config, ignore_actions);
}

#[derive(Debug, PartialEq, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfigSource {
    pub path: PathBuf,
}

impl ConfigSource for YamlConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        if !self.path.exists() {
            debug!("No config file at {}, skipping", self.path.display());
            return Ok(());
        }

        let figment = Figment::new()
            .merge(Yaml::file(self.path.clone()).nested())
            .select(config.env.as_str());

        match figment.extract::<YamlConfig>() {
            Ok(yaml_config) => merge_config(config, &yaml_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "Failed to parse config from yaml file: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}

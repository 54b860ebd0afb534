// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `APPSIGNAL_*` environment variable source.

use std::path::PathBuf;
use std::time::Duration;

use figment::{providers::Env, Figment};
use serde::Deserialize;

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
pub struct EnvConfig {
    /// @env `APPSIGNAL_ACTIVE`
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub active: Option<bool>,
    /// @env `APPSIGNAL_PUSH_API_KEY`
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub push_api_key: Option<String>,
    /// @env `APPSIGNAL_APP_NAME`
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub app_name: Option<String>,
    /// @env `APPSIGNAL_PUSH_API_ENDPOINT`
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub push_api_endpoint: Option<String>,
    /// @env `APPSIGNAL_HOSTNAME`
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub hostname: Option<String>,
    /// @env `APPSIGNAL_SLOW_REQUEST_THRESHOLD`
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub slow_request_threshold: Option<f64>,
    /// @env `APPSIGNAL_SEND_PARAMS`
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub send_params: Option<bool>,
    /// @env `APPSIGNAL_FILTER_PARAMETERS`
    #[serde(deserialize_with = "deserialize_string_list")]
    pub filter_parameters: Vec<String>,
    /// @env `APPSIGNAL_CA_FILE_PATH`
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub ca_file_path: Option<String>,
    /// @env `APPSIGNAL_HTTP_PROXY`
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub http_proxy: Option<String>,
    /// @env `APPSIGNAL_LOG_LEVEL`
    pub log_level: Option<LogLevel>,
    /// @env `APPSIGNAL_FLUSH_INTERVAL`
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub flush_interval: Option<Duration>,
    /// @env `APPSIGNAL_FLUSH_TIMEOUT`
    #[serde(deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub flush_timeout: Option<Duration>,
    /// @env `APPSIGNAL_IGNORE_ACTIONS`
    #[serde(deserialize_with = "deserialize_string_list")]
    pub ignore_actions: Vec<String>,
}

fn merge_config(config: &mut Config, env_config: &EnvConfig) {
    merge_option_to_value!(config, env_config, active);
    merge_string!(config, env_config, push_api_key);
    merge_string!(config, name, env_config, app_name);
    merge_string!(config, endpoint, env_config, push_api_endpoint);
    merge_string!(config, env_config, hostname);
    merge_option_to_value!(config, env_config, slow_request_threshold);
    merge_option_to_value!(config, env_config, send_params);
    merge_vec!(config, env_config, filter_parameters);
    if let Some(path) = &env_config.ca_file_path {
        config.ca_file_path = Some(PathBuf::from(path));
    }
    merge_option!(config, env_config, http_proxy);
    merge_option_to_value!(config, env_config, log_level);
    merge_option_to_value!(config, env_config, flush_interval);
    merge_option_to_value!(config, env_config, flush_timeout);
    merge_vec!(config, env_config, ignore_actions);
}

#[derive(Debug, PartialEq, Clone, Copy)]
#[allow(clippy::module_name_repetitions)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Env::prefixed("APPSIGNAL_"));

        match figment.extract::<EnvConfig>() {
            Ok(env_config) => merge_config(config, &env_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "Failed to parse config from environment variables: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_config_overrides_with_environment_variables() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("APPSIGNAL_ACTIVE", "1");
            jail.set_env("APPSIGNAL_PUSH_API_KEY", "env-key");
            jail.set_env("APPSIGNAL_APP_NAME", "Storefront");
            jail.set_env("APPSIGNAL_PUSH_API_ENDPOINT", "http://localhost:8080");
            jail.set_env("APPSIGNAL_HOSTNAME", "worker-3");
            jail.set_env("APPSIGNAL_SLOW_REQUEST_THRESHOLD", "350.5");
            jail.set_env("APPSIGNAL_SEND_PARAMS", "false");
            jail.set_env("APPSIGNAL_FILTER_PARAMETERS", "password,secret");
            jail.set_env("APPSIGNAL_CA_FILE_PATH", "/tmp/ca.pem");
            jail.set_env("APPSIGNAL_LOG_LEVEL", "warn");
            jail.set_env("APPSIGNAL_FLUSH_TIMEOUT", "3");

            let mut config = Config::default();
            EnvConfigSource.load(&mut config).expect("env loads");

            assert!(config.active);
            assert_eq!(config.push_api_key, "env-key");
            assert_eq!(config.name, "Storefront");
            assert_eq!(config.endpoint, "http://localhost:8080");
            assert_eq!(config.hostname, "worker-3");
            assert!((config.slow_request_threshold - 350.5).abs() < f64::EPSILON);
            assert!(!config.send_params);
            assert_eq!(config.filter_parameters, vec!["password", "secret"]);
            assert_eq!(config.ca_file_path, Some(PathBuf::from("/tmp/ca.pem")));
            assert_eq!(config.log_level, LogLevel::Warn);
            assert_eq!(config.flush_timeout, Duration::from_secs(3));
            Ok(())
        });
    }

    #[test]
    fn test_unset_variables_keep_previous_values() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            let mut config = Config {
                push_api_key: "from-yaml".to_string(),
                ignore_actions: vec!["A#b".to_string()],
                ..Config::default()
            };
            EnvConfigSource.load(&mut config).expect("env loads");
            assert_eq!(config.push_api_key, "from-yaml");
            assert_eq!(config.ignore_actions, vec!["A#b"]);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("APPSIGNAL_SLOW_REQUEST_THRESHOLD", "fast");
            jail.set_env("APPSIGNAL_FLUSH_INTERVAL", "-4");
            let mut config = Config::default();
            EnvConfigSource.load(&mut config).expect("env loads");
            assert!((config.slow_request_threshold - 200.0).abs() < f64::EPSILON);
            assert_eq!(config.flush_interval, Duration::from_secs(60));
            Ok(())
        });
    }
}

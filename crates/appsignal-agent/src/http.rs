// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the collector.
//!
//! The client honours `flush_timeout`, `http_proxy` and `ca_file_path`. When
//! the client cannot be built it is retried without the proxy, and a CA file
//! that cannot be read falls back to the built-in roots. Both are logged.

use std::error::Error;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::config::Config;

#[must_use]
pub fn get_client(config: &Config) -> reqwest::Client {
    match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}, retrying without proxy", e);
            match build_client_without_proxy(config) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(config: &Config) -> Result<reqwest::Client, Box<dyn Error>> {
    build_client_inner(config, true)
}

fn build_client_without_proxy(config: &Config) -> Result<reqwest::Client, Box<dyn Error>> {
    build_client_inner(config, false)
}

fn build_client_inner(
    config: &Config,
    allow_proxy: bool,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.flush_timeout)
        // The worker runtime is rebuilt after a fork; pooled connections must not outlive it.
        .pool_max_idle_per_host(0)
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(path) = &config.ca_file_path {
        match load_certificate(path) {
            Ok(certificate) => {
                debug!("Using CA certificate from {}", path.display());
                client = client.add_root_certificate(certificate);
            }
            Err(e) => warn!(
                "Ignoring non-existing or unreadable `ca_file_path` ({}): {}",
                path.display(),
                e
            ),
        }
    }

    if allow_proxy {
        if let Some(proxy_uri) = &config.http_proxy {
            let proxy = reqwest::Proxy::all(proxy_uri.clone())?;
            client = client.proxy(proxy);
        }
    }

    Ok(client.build()?)
}

fn load_certificate(path: &Path) -> Result<reqwest::Certificate, Box<dyn Error>> {
    let pem = std::fs::read(path)?;
    Ok(reqwest::Certificate::from_pem(&pem)?)
}

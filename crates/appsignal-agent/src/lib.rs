// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # AppSignal Agent
//!
//! Client core for the AppSignal APM collector: per-thread transactions fed
//! by instrumentation events, and a background agent that aggregates completed
//! transactions and ships them to the collector.
//!
//! ## Architecture
//!
//! - [`client`]: entry point owning everything below
//! - [`transaction`]: transaction state, per-thread registry, sanitizers and
//!   the wire shape
//! - [`subscriber`]: turns `start`/`finish` instrumentation calls into events
//! - [`event_formatter`]: titles and bodies for known event names
//! - [`aggregator`]: per-cycle batching with slowness tracking and the
//!   post-processing chain
//! - [`agent`]: worker thread, retry and backoff on collector responses,
//!   fork recovery
//! - [`transmitter`] and [`http`]: compressed JSON over HTTPS
//! - [`marker`]: deploy markers
//! - [`config`], [`logger`], [`error`]: configuration, log output, errors
//!
//! Nothing on the instrumentation path returns errors or panics into the
//! host application; failures are logged and degrade the telemetry only.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]

/// Per-cycle transaction batching and post-processing
pub mod aggregator;

/// Background worker, collector response handling and fork recovery
pub mod agent;

/// Client context and transaction guards
pub mod client;

/// Configuration management - YAML file, environment variables, and defaults
pub mod config;

pub mod error;

/// Title and body extraction for instrumentation events
pub mod event_formatter;

/// HTTP client construction
pub mod http;

/// Logging infrastructure and tracing setup
pub mod logger;

/// Deploy markers
pub mod marker;

/// Process and host information
pub mod proc;

pub mod subscriber;

/// Transactions and their per-thread registry
pub mod transaction;

/// Collector transport
pub mod transmitter;

/// Client version, reported to the collector as `gem_version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logs the crate version at INFO level.
pub fn log_build_info() {
    tracing::info!("appsignal-agent version: {}", VERSION);
}

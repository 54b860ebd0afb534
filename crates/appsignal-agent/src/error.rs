// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the agent.
//!
//! Only construction and deploy-marker paths hand these to callers. The worker
//! thread and the instrumentation path log them and carry on.

use thiserror::Error;

/// Failures while talking to the collector.
#[derive(Debug, Error)]
pub enum TransmitterError {
    #[error("Invalid collector URI: {0}")]
    InvalidUri(String),

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to compress payload: {0}")]
    Compression(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures while reading a configuration source.
#[derive(Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0}")]
    ParseError(String),
}

/// Failures while constructing or driving the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error(transparent)]
    Transmitter(#[from] TransmitterError),
}

/// Failures while notifying the collector of a deploy.
#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("Collector answered {status} for deploy marker at {uri}")]
    UnexpectedStatus { status: u16, uri: String },

    #[error("Failed to serialize marker: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transmitter(#[from] TransmitterError),
}

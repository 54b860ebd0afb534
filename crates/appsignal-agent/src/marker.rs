// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deploy markers.
//!
//! A marker tells the collector a new revision went live, so open incidents
//! can be reopened against it when they happen again.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::error::MarkerError;
use crate::transmitter::{Transmit, Transmitter};

pub const ACTION: &str = "markers";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MarkerData {
    pub revision: String,
    pub repository: String,
    pub user: String,
}

pub struct Marker {
    data: MarkerData,
    config: Arc<Config>,
}

impl Marker {
    #[must_use]
    pub fn new(data: MarkerData, config: Arc<Config>) -> Self {
        Self { data, config }
    }

    #[must_use]
    pub fn data(&self) -> &MarkerData {
        &self.data
    }

    /// Posts the marker. Anything but a 200 is an error.
    pub async fn transmit(&self) -> Result<(), MarkerError> {
        let transmitter = Transmitter::new(ACTION, Arc::clone(&self.config))?;
        info!(
            "Notifying AppSignal of deploy with: revision: {}, user: {}",
            self.data.revision, self.data.user
        );

        let payload = serde_json::to_value(&self.data)?;
        let result = match transmitter.transmit(&payload).await {
            Ok(200) => Ok(()),
            Ok(status) => Err(MarkerError::UnexpectedStatus {
                status,
                uri: transmitter.uri().to_string(),
            }),
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(()) => info!("AppSignal has been notified of this deploy!"),
            Err(e) => error!("Something went wrong while trying to notify AppSignal: {}", e),
        }
        result
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// What the agent does with a batch after the collector answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    /// Batch accepted.
    Sent,
    /// Collector asks to slow down (420).
    Backoff,
    /// Payload too large, send more often (413).
    SpeedUp,
    /// The agent must stop for good.
    Fatal,
    /// Transport failure or an unexpected status.
    Unknown,
}

impl ResponseAction {
    /// `None` stands for a transport failure.
    #[must_use]
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(200) => Self::Sent,
            Some(420) => Self::Backoff,
            Some(413) => Self::SpeedUp,
            Some(401 | 402 | 406 | 429) => Self::Fatal,
            _ => Self::Unknown,
        }
    }
}

/// Log line for a fatal status.
#[must_use]
pub fn fatal_reason(status: u16) -> &'static str {
    match status {
        401 => "API token cannot be authorized",
        402 => "Payment required",
        406 => "Your AppSignal client cannot communicate with the API anymore, please upgrade",
        429 => "Too many requests sent",
        _ => "Collector refused further data",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(ResponseAction::from_status(Some(200)), ResponseAction::Sent);
        assert_eq!(ResponseAction::from_status(Some(420)), ResponseAction::Backoff);
        assert_eq!(ResponseAction::from_status(Some(413)), ResponseAction::SpeedUp);
        for status in [401, 402, 406, 429] {
            assert_eq!(ResponseAction::from_status(Some(status)), ResponseAction::Fatal);
        }
        assert_eq!(ResponseAction::from_status(Some(500)), ResponseAction::Unknown);
        assert_eq!(ResponseAction::from_status(Some(201)), ResponseAction::Unknown);
        assert_eq!(ResponseAction::from_status(None), ResponseAction::Unknown);
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for the agent.
//!
//! Every line is prefixed with `APPSIGNAL` so agent output can be told apart
//! from the host application's own logging:
//!
//! ```text
//! APPSIGNAL | INFO | Starting agent worker
//! APPSIGNAL | ERROR | send_queue{batches=2}: Unknown AppSignal response code: '500'
//! ```

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::log_level::LogLevel;

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "APPSIGNAL | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Filter directives for the agent at `log_level`, silencing the HTTP stack.
#[must_use]
pub fn env_filter_directives(log_level: LogLevel) -> String {
    format!(
        "h2=off,hyper=off,rustls=off,{}",
        log_level.as_filter_directive()
    )
}

/// Installs the agent's formatter as the global subscriber.
///
/// Returns `false` when the host application already installed one; its
/// subscriber is kept and the agent's events flow through it.
pub fn init(log_level: LogLevel) -> bool {
    let env_filter = EnvFilter::new(env_filter_directives(log_level));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}

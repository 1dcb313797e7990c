// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One observed unit of work from the trace-export telemetry.

use crate::faultload::{SpanId, TraceId};
use serde::{Deserialize, Serialize};

/// A span as ingested from the trace-export telemetry.
///
/// Telemetry systems may emit a span more than once as it completes; a span is
/// created on first ingestion of its id and later re-ingestions are merged in
/// place via [`Span::merge_from`] rather than duplicated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub span_id: SpanId,
    pub trace_id: TraceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub start_time: u64,
    pub end_time: u64,
    pub service_name: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_state: Option<String>,
}

impl Span {
    /// Merges a re-ingested copy of this span into the stored one.
    ///
    /// Completion fields (`end_time`, `is_error`, `error_message`) are taken
    /// from the update; identity fields (`span_id`, `trace_id`,
    /// `parent_span_id`, `name`, `start_time`, `service_name`) are preserved.
    pub fn merge_from(&mut self, update: &Span) {
        self.end_time = update.end_time;
        self.is_error = update.is_error;
        self.error_message = update.error_message.clone();
        if update.trace_state.is_some() {
            self.trace_state = update.trace_state.clone();
        }
    }
}

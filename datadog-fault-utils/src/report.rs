// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Proxy self-reports: what fault was injected where, and what happened.

use crate::faultload::{Fault, FaultUid, SpanId, TraceId};
use serde::{Deserialize, Serialize};

/// The observed response of the call a report describes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    pub status: i32,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub duration_ms: u64,
}

/// A proxy's self-report for one [`FaultUid`] within one trace.
///
/// At most one report exists per `(trace_id, uid)`; proxies may report progress
/// more than once for the same call site, and a later report updates the stored
/// entry via [`TraceReport::apply`] instead of creating a duplicate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceReport {
    pub trace_id: TraceId,
    /// The span this call produced, if any.
    pub span_id: SpanId,
    pub uid: FaultUid,
    /// True if this is the first/root call of the trace.
    #[serde(default)]
    pub is_initial: bool,
    /// The fault actually applied, if any. May differ from the plan if the
    /// proxy declined to inject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injected_fault: Option<Fault>,
    /// FaultUids of other reports this one is known to have raced with.
    #[serde(default)]
    pub concurrent_to: Vec<FaultUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseData>,
}

impl TraceReport {
    /// Applies a newer report for the same `(trace_id, uid)` to this one.
    ///
    /// `response`, `injected_fault` and `concurrent_to` overwrite from the
    /// update; the identity fields (`trace_id`, `span_id`, `uid`,
    /// `is_initial`) are preserved.
    pub fn apply(&mut self, update: &TraceReport) {
        self.response = update.response.clone();
        self.injected_fault = update.injected_fault.clone();
        self.concurrent_to = update.concurrent_to.clone();
    }
}

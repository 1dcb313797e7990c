// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared in-memory state of the control plane: the span and report stores,
//! the active trace-session set, and the registered fault plans.
//!
//! All state is process-lifetime only. Each collection sits behind its own
//! mutex; locks are taken per operation and never held across awaits, which
//! gives the required upsert-by-key atomicity without cross-key transactions.

use datadog_fault_utils::faultload::{Fault, TraceId};
use datadog_fault_utils::report::TraceReport;
use datadog_fault_utils::report_store::ReportStore;
use datadog_fault_utils::span::Span;
use datadog_fault_utils::span_store::SpanStore;
use datadog_fault_utils::MutexExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct ControllerState {
    spans: Mutex<SpanStore>,
    reports: Mutex<ReportStore>,
    active: Mutex<HashSet<TraceId>>,
    faultloads: Mutex<HashMap<TraceId, Vec<Fault>>>,
    raw_exports: Mutex<Vec<Value>>,
    debug_mode: bool,
}

impl ControllerState {
    pub fn new(debug_mode: bool) -> Self {
        ControllerState {
            spans: Mutex::new(SpanStore::new()),
            reports: Mutex::new(ReportStore::new()),
            active: Mutex::new(HashSet::new()),
            faultloads: Mutex::new(HashMap::new()),
            raw_exports: Mutex::new(Vec::new()),
            debug_mode,
        }
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn is_active(&self, trace_id: &str) -> bool {
        self.active.lock_or_panic().contains(trace_id)
    }

    /// Marks a trace session active and records its fault plan. Called
    /// speculatively before the fleet fan-out.
    pub fn activate(&self, trace_id: &str, faults: Vec<Fault>) {
        self.active.lock_or_panic().insert(trace_id.to_string());
        self.faultloads
            .lock_or_panic()
            .insert(trace_id.to_string(), faults);
    }

    pub fn deactivate(&self, trace_id: &str) {
        self.active.lock_or_panic().remove(trace_id);
        self.faultloads.lock_or_panic().remove(trace_id);
    }

    /// Evicts a trace's spans and reports from the stores.
    pub fn evict_trace(&self, trace_id: &str) {
        let removed_spans = self.spans.lock_or_panic().remove_by_trace_id(trace_id);
        let removed_reports = self.reports.lock_or_panic().remove_by_trace_id(trace_id);
        debug!(
            trace_id,
            removed_spans, removed_reports, "Evicted trace data"
        );
    }

    /// Hard reset: active set, fault plans, both stores and the audit capture.
    pub fn clear_all(&self) {
        self.active.lock_or_panic().clear();
        self.faultloads.lock_or_panic().clear();
        self.spans.lock_or_panic().clear();
        self.reports.lock_or_panic().clear();
        self.raw_exports.lock_or_panic().clear();
    }

    /// Merges decoded spans into the span store, skipping traces that are not
    /// active (unless running in debug mode, where everything is kept for
    /// audit). Returns the number of accepted spans.
    pub fn ingest_spans(&self, spans: Vec<Span>, raw: Value) -> usize {
        if self.debug_mode {
            self.raw_exports.lock_or_panic().push(raw);
        }

        let mut accepted = 0;
        {
            let active = self.active.lock_or_panic();
            let mut store = self.spans.lock_or_panic();
            for span in spans {
                if !self.debug_mode && !active.contains(&span.trace_id) {
                    continue;
                }
                store.upsert(span);
                accepted += 1;
            }
        }
        accepted
    }

    /// Upserts a proxy report. Returns `true` when an existing report for the
    /// same `(trace_id, uid)` was updated in place.
    pub fn upsert_report(&self, report: TraceReport) -> bool {
        self.reports.lock_or_panic().upsert(report)
    }

    /// A trace is known when it is active or still holds data (debug mode
    /// keeps data around after unregistration).
    pub fn trace_known(&self, trace_id: &str) -> bool {
        self.is_active(trace_id)
            || self.spans.lock_or_panic().has_trace_id(trace_id)
            || self.reports.lock_or_panic().has_trace_id(trace_id)
    }

    pub fn spans_for_trace(&self, trace_id: &str) -> Vec<Span> {
        self.spans.lock_or_panic().get_by_trace_id(trace_id)
    }

    pub fn all_spans(&self) -> Vec<Span> {
        self.spans.lock_or_panic().all()
    }

    pub fn reports_for_trace(&self, trace_id: &str) -> Vec<TraceReport> {
        self.reports.lock_or_panic().get_by_trace_id(trace_id)
    }

    pub fn all_reports(&self) -> Vec<TraceReport> {
        self.reports.lock_or_panic().all()
    }

    /// The report a proxy registered for `span_id`, optionally narrowed to one
    /// trace.
    pub fn report_for_span(&self, trace_id: Option<&str>, span_id: &str) -> Option<TraceReport> {
        let reports = self.reports.lock_or_panic();
        match trace_id {
            Some(trace_id) => reports.get_by_trace_and_span_id(trace_id, span_id).cloned(),
            None => reports.get_by_span_id(span_id).cloned(),
        }
    }

    /// The registered fault plan of an active session, if any.
    pub fn faults_for_trace(&self, trace_id: &str) -> Option<Vec<Fault>> {
        self.faultloads.lock_or_panic().get(trace_id).cloned()
    }

    pub fn raw_exports(&self) -> Vec<Value> {
        self.raw_exports.lock_or_panic().clone()
    }

    pub fn span_count(&self) -> usize {
        self.spans.lock_or_panic().len()
    }

    pub fn report_count(&self) -> usize {
        self.reports.lock_or_panic().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn span(trace_id: &str, span_id: &str) -> Span {
        Span {
            span_id: span_id.to_string(),
            trace_id: trace_id.to_string(),
            parent_span_id: None,
            name: "test".to_string(),
            start_time: 0,
            end_time: 0,
            service_name: "svc".to_string(),
            is_error: false,
            error_message: None,
            trace_state: None,
        }
    }

    #[test]
    fn inactive_traces_are_ignored_outside_debug_mode() {
        let state = ControllerState::new(false);
        state.activate("t1", vec![]);

        let accepted = state.ingest_spans(vec![span("t1", "a"), span("t2", "b")], json!({}));

        assert_eq!(accepted, 1);
        assert_eq!(state.spans_for_trace("t1").len(), 1);
        assert!(state.spans_for_trace("t2").is_empty());
        assert!(state.raw_exports().is_empty());
    }

    #[test]
    fn debug_mode_keeps_everything() {
        let state = ControllerState::new(true);

        let accepted = state.ingest_spans(vec![span("t2", "b")], json!({"resourceSpans": []}));

        assert_eq!(accepted, 1);
        assert_eq!(state.spans_for_trace("t2").len(), 1);
        assert_eq!(state.raw_exports().len(), 1);
    }

    #[test]
    fn clear_all_resets_every_collection() {
        let state = ControllerState::new(true);
        state.activate("t1", vec![]);
        state.ingest_spans(vec![span("t1", "a")], json!({}));

        state.clear_all();

        assert!(!state.is_active("t1"));
        assert_eq!(state.span_count(), 0);
        assert!(state.raw_exports().is_empty());
    }
}

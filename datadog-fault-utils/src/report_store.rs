// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keyed indices over proxy self-reports, addressed by `(trace_id, FaultUid)`.

use crate::faultload::{FaultUid, SpanId, TraceId};
use crate::report::TraceReport;
use std::collections::HashMap;

/// In-memory report store: an insertion-ordered arena with per-trace indices by
/// FaultUid and by span id.
///
/// The store enforces the idempotent-upsert invariant: at most one report
/// exists per `(trace_id, uid)`, and a later report for the same key patches
/// the stored entry ([`TraceReport::apply`]) instead of duplicating it.
#[derive(Debug, Default)]
pub struct ReportStore {
    reports: Vec<TraceReport>,
    by_trace_id: HashMap<TraceId, Vec<usize>>,
    by_trace_by_uid: HashMap<TraceId, HashMap<FaultUid, usize>>,
    by_trace_by_span_id: HashMap<TraceId, HashMap<SpanId, usize>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or patches the report for its `(trace_id, uid)` key. Returns
    /// `true` when an existing report was updated in place.
    pub fn upsert(&mut self, report: TraceReport) -> bool {
        if let Some(&index) = self
            .by_trace_by_uid
            .get(&report.trace_id)
            .and_then(|by_uid| by_uid.get(&report.uid))
        {
            self.reports[index].apply(&report);
            return true;
        }

        let index = self.reports.len();
        self.by_trace_id
            .entry(report.trace_id.clone())
            .or_default()
            .push(index);
        self.by_trace_by_uid
            .entry(report.trace_id.clone())
            .or_default()
            .insert(report.uid.clone(), index);
        self.by_trace_by_span_id
            .entry(report.trace_id.clone())
            .or_default()
            .insert(report.span_id.clone(), index);
        self.reports.push(report);
        false
    }

    pub fn has_trace_id(&self, trace_id: &str) -> bool {
        self.by_trace_id.contains_key(trace_id)
    }

    pub fn has_uid_for_trace(&self, trace_id: &str, uid: &FaultUid) -> bool {
        self.by_trace_by_uid
            .get(trace_id)
            .is_some_and(|by_uid| by_uid.contains_key(uid))
    }

    /// All reports of one trace, in first-report order.
    pub fn get_by_trace_id(&self, trace_id: &str) -> Vec<TraceReport> {
        match self.by_trace_id.get(trace_id) {
            Some(indices) => indices.iter().map(|&index| self.reports[index].clone()).collect(),
            None => Vec::new(),
        }
    }

    pub fn get_by_trace_and_uid(&self, trace_id: &str, uid: &FaultUid) -> Option<&TraceReport> {
        self.by_trace_by_uid
            .get(trace_id)
            .and_then(|by_uid| by_uid.get(uid))
            .map(|&index| &self.reports[index])
    }

    pub fn get_by_trace_and_span_id(&self, trace_id: &str, span_id: &str) -> Option<&TraceReport> {
        self.by_trace_by_span_id
            .get(trace_id)
            .and_then(|by_span| by_span.get(span_id))
            .map(|&index| &self.reports[index])
    }

    /// First report carrying the given span id, across all traces. Used by the
    /// synchronous parent-uid lookup, where the proxy only knows the span id.
    pub fn get_by_span_id(&self, span_id: &str) -> Option<&TraceReport> {
        self.reports.iter().find(|report| report.span_id == span_id)
    }

    /// Every stored report, in first-report order.
    pub fn all(&self) -> Vec<TraceReport> {
        self.reports.clone()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Evicts every report of one trace from all views atomically with respect
    /// to readers of the store lock.
    pub fn remove_by_trace_id(&mut self, trace_id: &str) -> usize {
        if !self.by_trace_id.contains_key(trace_id) {
            return 0;
        }
        let before = self.reports.len();
        let retained: Vec<TraceReport> = self
            .reports
            .drain(..)
            .filter(|report| report.trace_id != trace_id)
            .collect();
        self.rebuild(retained);
        before - self.reports.len()
    }

    pub fn clear(&mut self) {
        self.reports.clear();
        self.by_trace_id.clear();
        self.by_trace_by_uid.clear();
        self.by_trace_by_span_id.clear();
    }

    fn rebuild(&mut self, reports: Vec<TraceReport>) {
        self.by_trace_id.clear();
        self.by_trace_by_uid.clear();
        self.by_trace_by_span_id.clear();
        self.reports = reports;
        for (index, report) in self.reports.iter().enumerate() {
            self.by_trace_id
                .entry(report.trace_id.clone())
                .or_default()
                .push(index);
            self.by_trace_by_uid
                .entry(report.trace_id.clone())
                .or_default()
                .insert(report.uid.clone(), index);
            self.by_trace_by_span_id
                .entry(report.trace_id.clone())
                .or_default()
                .insert(report.span_id.clone(), index);
        }
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keyed indices over ingested trace spans for the active trace sessions.

use crate::faultload::{SpanId, TraceId};
use crate::span::Span;
use std::collections::HashMap;

/// In-memory span store: an insertion-ordered arena with two index views, by
/// span id and by trace id. Lookups for unknown keys return empty results,
/// never errors.
#[derive(Debug, Default)]
pub struct SpanStore {
    spans: Vec<Span>,
    by_span_id: HashMap<SpanId, usize>,
    by_trace_id: HashMap<TraceId, Vec<usize>>,
}

impl SpanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new span. Returns `false` without touching the store when a
    /// span with the same id already exists; callers wanting merge semantics
    /// use [`SpanStore::upsert`].
    pub fn add(&mut self, span: Span) -> bool {
        if self.by_span_id.contains_key(&span.span_id) {
            return false;
        }
        let index = self.spans.len();
        self.by_span_id.insert(span.span_id.clone(), index);
        self.by_trace_id
            .entry(span.trace_id.clone())
            .or_default()
            .push(index);
        self.spans.push(span);
        true
    }

    /// Merge-or-insert: a span with a known id is merged into the stored entry
    /// ([`Span::merge_from`]); an unknown id is inserted. Returns `true` when
    /// the span was merged into an existing one.
    pub fn upsert(&mut self, span: Span) -> bool {
        if let Some(&index) = self.by_span_id.get(&span.span_id) {
            self.spans[index].merge_from(&span);
            return true;
        }
        self.add(span);
        false
    }

    pub fn has_span_id(&self, span_id: &str) -> bool {
        self.by_span_id.contains_key(span_id)
    }

    pub fn has_trace_id(&self, trace_id: &str) -> bool {
        self.by_trace_id.contains_key(trace_id)
    }

    pub fn get_by_span_id(&self, span_id: &str) -> Option<&Span> {
        self.by_span_id.get(span_id).map(|&index| &self.spans[index])
    }

    /// All spans of one trace, in ingestion order.
    pub fn get_by_trace_id(&self, trace_id: &str) -> Vec<Span> {
        match self.by_trace_id.get(trace_id) {
            Some(indices) => indices.iter().map(|&index| self.spans[index].clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Every stored span, in ingestion order.
    pub fn all(&self) -> Vec<Span> {
        self.spans.clone()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Evicts every span of one trace from all views. The arena and both
    /// indices are rebuilt together, so readers never observe a dangling
    /// partial index.
    pub fn remove_by_trace_id(&mut self, trace_id: &str) -> usize {
        if !self.by_trace_id.contains_key(trace_id) {
            return 0;
        }
        let before = self.spans.len();
        let retained: Vec<Span> = self
            .spans
            .drain(..)
            .filter(|span| span.trace_id != trace_id)
            .collect();
        self.rebuild(retained);
        before - self.spans.len()
    }

    pub fn clear(&mut self) {
        self.spans.clear();
        self.by_span_id.clear();
        self.by_trace_id.clear();
    }

    fn rebuild(&mut self, spans: Vec<Span>) {
        self.by_span_id.clear();
        self.by_trace_id.clear();
        self.spans = spans;
        for (index, span) in self.spans.iter().enumerate() {
            self.by_span_id.insert(span.span_id.clone(), index);
            self.by_trace_id
                .entry(span.trace_id.clone())
                .or_default()
                .push(index);
        }
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reconstruction of a hierarchical execution tree from a flat set of spans.
//!
//! The builder is intentionally permissive: a tree must still be
//! reconstructible from a partial, racily-ingested set of spans, so unknown
//! parents simply turn a span into a root candidate instead of failing.

use crate::report::TraceReport;
use crate::span::Span;
use serde::Serialize;
use std::collections::HashMap;

/// Well-known sentinel span id proxies use as the parent of a client-originated
/// call outside any instrumented service. Coordinated out-of-band with the
/// proxy fleet.
pub const CLIENT_ROOT_SPAN_ID: &str = "0000000000000001";

/// A derived, per-query view combining a span with the report attached to its
/// span id and its reconstructed children. Rebuilt on every read, never
/// persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceTreeNode {
    pub span: Span,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TraceReport>,
    pub children: Vec<TraceTreeNode>,
}

struct ArenaNode {
    span: Span,
    report: Option<TraceReport>,
    children: Vec<usize>,
    has_parent: bool,
}

/// Materializes the synthetic client root for a trace whose proxies addressed
/// their entry call to [`CLIENT_ROOT_SPAN_ID`]: if any span declares the
/// sentinel as its parent and no span with that id exists, a zero-duration
/// root span is prepended.
pub fn attach_client_root(trace_id: &str, spans: &mut Vec<Span>) {
    let has_client_parent = spans
        .iter()
        .any(|span| span.parent_span_id.as_deref() == Some(CLIENT_ROOT_SPAN_ID));
    if !has_client_parent || spans.iter().any(|span| span.span_id == CLIENT_ROOT_SPAN_ID) {
        return;
    }
    spans.insert(
        0,
        Span {
            span_id: CLIENT_ROOT_SPAN_ID.to_string(),
            trace_id: trace_id.to_string(),
            parent_span_id: None,
            name: "Client Root Span".to_string(),
            start_time: 0,
            end_time: 0,
            service_name: "Client".to_string(),
            is_error: false,
            error_message: None,
            trace_state: None,
        },
    );
}

/// Builds the trace forest for one trace's spans.
///
/// Nodes are linked to their parent by `parent_span_id` lookup; children keep
/// insertion order (first-seen span first). Spans whose parent lookup fails
/// become root candidates. With zero or one candidate the result is returned
/// as-is; with several (disconnected fragments from partial ingestion),
/// childless candidates are discarded as orphan leaves.
///
/// `report_for_span` attaches the proxy report, if any, to each node.
pub fn build_forest<F>(spans: Vec<Span>, report_for_span: F) -> Vec<TraceTreeNode>
where
    F: Fn(&str) -> Option<TraceReport>,
{
    let mut arena: Vec<ArenaNode> = spans
        .into_iter()
        .map(|span| {
            let report = report_for_span(&span.span_id);
            ArenaNode {
                span,
                report,
                children: Vec::new(),
                has_parent: false,
            }
        })
        .collect();

    let mut by_span_id: HashMap<String, usize> = HashMap::with_capacity(arena.len());
    for (index, node) in arena.iter().enumerate() {
        by_span_id.entry(node.span.span_id.clone()).or_insert(index);
    }

    for index in 0..arena.len() {
        let Some(parent_span_id) = arena[index].span.parent_span_id.clone() else {
            continue;
        };
        if let Some(&parent) = by_span_id.get(&parent_span_id) {
            if parent != index {
                arena[parent].children.push(index);
                arena[index].has_parent = true;
            }
        }
    }

    let mut roots: Vec<usize> = (0..arena.len())
        .filter(|&index| !arena[index].has_parent)
        .collect();
    if roots.len() > 1 {
        roots.retain(|&index| !arena[index].children.is_empty());
    }

    let mut slots: Vec<Option<ArenaNode>> = arena.into_iter().map(Some).collect();
    roots
        .into_iter()
        .filter_map(|root| materialize(&mut slots, root))
        .collect()
}

fn materialize(slots: &mut [Option<ArenaNode>], index: usize) -> Option<TraceTreeNode> {
    let node = slots.get_mut(index)?.take()?;
    let mut view = TraceTreeNode {
        span: node.span,
        report: node.report,
        children: Vec::new(),
    };
    for child in node.children {
        if let Some(child_view) = materialize(slots, child) {
            view.children.push(child_view);
        }
    }
    Some(view)
}

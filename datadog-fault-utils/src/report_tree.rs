// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Projection of a trace tree onto the nodes that matter for fault injection.
//!
//! A full span tree contains uninstrumented/internal spans with no
//! fault-injection relevance. The reducer collapses it to only the spans that
//! carry a proxy report (or the synthetic client root), preserving relative
//! ancestry: a qualifying node keeps, as children, the qualifying descendants
//! found beneath it, with intermediate non-qualifying spans spliced out.

use crate::trace_tree::{TraceTreeNode, CLIENT_ROOT_SPAN_ID};
use std::fmt;

/// Why a report tree could not be derived from a trace forest.
#[derive(Debug, PartialEq, Eq)]
pub enum TreeError {
    /// No spans were ingested for the trace.
    EmptyTrace,
    /// The trace did not reduce to a single root.
    MultipleRoots(usize),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::EmptyTrace => write!(f, "trace has no spans"),
            TreeError::MultipleRoots(count) => {
                write!(f, "trace has {count} roots, expected exactly one")
            }
        }
    }
}

impl std::error::Error for TreeError {}

/// Reduces a single-root trace forest to its report tree.
///
/// Defined only on a trace with exactly one root; zero or multiple roots yield
/// a [`TreeError`] the caller maps to a not-found result.
pub fn report_tree(forest: &[TraceTreeNode]) -> Result<Vec<TraceTreeNode>, TreeError> {
    match forest {
        [] => Err(TreeError::EmptyTrace),
        [root] => Ok(reduce(root)),
        _ => Err(TreeError::MultipleRoots(forest.len())),
    }
}

/// Post-order reduction of one subtree: a qualifying node emits itself with its
/// reduced children; a non-qualifying node contributes only its qualifying
/// descendants, flattened into the parent's child list.
pub fn reduce(node: &TraceTreeNode) -> Vec<TraceTreeNode> {
    let reduced_children: Vec<TraceTreeNode> =
        node.children.iter().flat_map(reduce).collect();

    let qualifies = node.report.is_some() || node.span.span_id == CLIENT_ROOT_SPAN_ID;
    if !qualifies {
        return reduced_children;
    }

    vec![TraceTreeNode {
        span: node.span.clone(),
        report: node.report.clone(),
        children: reduced_children,
    }]
}

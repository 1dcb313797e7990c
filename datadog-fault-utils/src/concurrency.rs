// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Concurrency-aware bookkeeping of what already happened beneath a call site.
//!
//! A proxy about to forward a new outbound call asks, synchronously, "what has
//! already completed directly beneath this call site, and how many times, per
//! distinct logical target?". The answer lets it assign the next deterministic
//! occurrence ordinal, so concurrent or repeated calls to the same destination
//! get distinct, reproducible addresses.

use crate::report::TraceReport;
use std::collections::BTreeMap;

/// Computes, per canonical injection-point key, the highest occurrence count
/// among the completed direct children of `parent`.
///
/// A candidate report counts when it is not the parent itself, carries a
/// completed response, and its uid's parent structurally equals the parent's
/// uid. Ties on count simply keep the max; only the upper bound matters to the
/// caller, not full ordering.
pub fn completed_events<'a, I>(reports: I, parent: &TraceReport) -> BTreeMap<String, i32>
where
    I: IntoIterator<Item = &'a TraceReport>,
{
    let mut completed: BTreeMap<String, i32> = BTreeMap::new();

    for report in reports {
        if report.span_id == parent.span_id || report.response.is_none() {
            continue;
        }
        if !report.uid.is_child_of(&parent.uid) {
            continue;
        }
        let Some(point) = report.uid.point() else {
            continue;
        };

        let key = point.as_partial().to_string();
        let count = completed.entry(key).or_insert(point.count);
        if *count < point.count {
            *count = point.count;
        }
    }

    completed
}

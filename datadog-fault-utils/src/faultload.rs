// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Identity and addressing model for fault-injection points.
//!
//! A call site inside a distributed call tree is addressed by a [`FaultUid`]: the
//! root-first sequence of [`InjectionPoint`]s leading from the trace entry point
//! down to the call. Plain span parent/child pointers cannot distinguish *which
//! logical call* a fault belongs to when a service hits the same downstream route
//! multiple times (retries, fan-out, concurrency); the occurrence ordinal
//! [`InjectionPoint::count`] plus the full path resolves that ambiguity
//! deterministically.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A trace id as produced by the ingestion adapter (lowercase hex).
pub type TraceId = String;
/// A span id as produced by the ingestion adapter (lowercase hex).
pub type SpanId = String;

/// Wildcard payload fingerprint: matches any call body.
pub const ANY_PAYLOAD: &str = "*";

/// One potential fault-injection location within its parent call context.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InjectionPoint {
    /// Logical target service of the call.
    pub destination: String,
    /// Call signature, e.g. method plus route.
    pub signature: String,
    /// Fingerprint of the call body, or [`ANY_PAYLOAD`].
    #[serde(default)]
    pub payload: String,
    /// Ordinal distinguishing the Nth call from this origin to this
    /// destination/signature/payload within its parent context. Negative means
    /// "any occurrence" and is only meaningful inside a fault plan.
    pub count: i32,
    /// Optional vector-clock-like context (canonical key -> counter) carried
    /// opaquely for cross-service causal ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessors: Option<BTreeMap<String, i32>>,
}

impl InjectionPoint {
    /// Projection onto the grouping key fields, dropping `count` and
    /// `predecessors`.
    pub fn as_partial(&self) -> PartialInjectionPoint {
        PartialInjectionPoint {
            destination: self.destination.clone(),
            signature: self.signature.clone(),
            payload: self.payload.clone(),
        }
    }

    /// Partial equality: destination, signature and payload match, ignoring the
    /// occurrence count. A wildcard payload on either side matches any payload.
    /// This is the grouping relation used for concurrency accounting.
    pub fn partial_matches(&self, other: &InjectionPoint) -> bool {
        self.destination == other.destination
            && self.signature == other.signature
            && (self.payload == other.payload
                || self.payload == ANY_PAYLOAD
                || other.payload == ANY_PAYLOAD)
    }
}

impl fmt::Display for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_partial())?;
        if let Some(predecessors) = &self.predecessors {
            if !predecessors.is_empty() {
                let entries: Vec<String> = predecessors
                    .iter()
                    .map(|(key, count)| format!("{key}:{count}"))
                    .collect();
                write!(f, "{{{}}}", entries.join(","))?;
            }
        }
        if self.count < 0 {
            write!(f, "#∞")
        } else {
            write!(f, "#{}", self.count)
        }
    }
}

/// The canonical grouping key of an injection point: destination, signature and
/// payload, without the occurrence count.
///
/// Its [`Display`](fmt::Display) rendering (`destination:signature(payload)`,
/// payload omitted when empty or wildcard) is the canonical hash-map key shared
/// by the report-tree consumers and the concurrency resolver.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialInjectionPoint {
    pub destination: String,
    pub signature: String,
    #[serde(default)]
    pub payload: String,
}

impl fmt::Display for PartialInjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.destination, self.signature)?;
        if !self.payload.is_empty() && self.payload != ANY_PAYLOAD {
            write!(f, "({})", self.payload)?;
        }
        Ok(())
    }
}

/// Canonical address of a fault in the distributed call tree: the full call path
/// from the trace's entry point down to a specific call site, root first.
///
/// Equality is structural. The prefix of a `FaultUid` (all elements but the
/// last) is itself a valid `FaultUid` denoting the parent call site.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultUid {
    pub stack: Vec<InjectionPoint>,
}

impl FaultUid {
    /// The parent call site's address, or `None` when the stack holds fewer
    /// than two points (the root has no parent).
    pub fn parent(&self) -> Option<FaultUid> {
        if self.stack.len() < 2 {
            return None;
        }
        Some(FaultUid {
            stack: self.stack[..self.stack.len() - 1].to_vec(),
        })
    }

    /// The innermost injection point, if any.
    pub fn point(&self) -> Option<&InjectionPoint> {
        self.stack.last()
    }

    /// True when dropping this uid's last element yields exactly `parent`.
    pub fn is_child_of(&self, parent: &FaultUid) -> bool {
        self.stack.len() == parent.stack.len() + 1
            && self.stack[..parent.stack.len()] == parent.stack[..]
    }
}

impl fmt::Display for FaultUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let points: Vec<String> = self.stack.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", points.join(">"))
    }
}

/// The failure behavior to apply at an injection point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultMode {
    /// Failure class, e.g. an HTTP error category.
    #[serde(rename = "type")]
    pub fault_type: String,
    /// Mode arguments, e.g. a status code.
    #[serde(default)]
    pub args: Vec<String>,
}

/// "Inject this mode at this address."
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub uid: FaultUid,
    pub mode: FaultMode,
}

/// The complete test plan for one execution: a set of faults plus the trace id
/// they apply to. Immutable once registered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faultload {
    pub trace_id: TraceId,
    #[serde(default)]
    pub faults: Vec<Fault>,
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Endpoint handlers behind the controller's HTTP routing.
//!
//! Handlers take pre-collected request bodies so they stay testable without a
//! live connection; the routing layer in [`crate::controller`] owns body
//! collection and content-length enforcement.

use crate::fleet::{FleetCoordinator, FleetError};
use crate::http_utils::{json_response, log_and_create_http_response, HttpResponse};
use crate::otlp;
use crate::state::ControllerState;
use bytes::Bytes;
use datadog_fault_utils::concurrency::completed_events;
use datadog_fault_utils::faultload::Faultload;
use datadog_fault_utils::report::TraceReport;
use datadog_fault_utils::report_tree::report_tree;
use datadog_fault_utils::span::Span;
use datadog_fault_utils::trace_tree::{attach_client_root, build_forest, TraceTreeNode};
use hyper::{http, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

/// POST /v1/traces: ingests one trace-export payload.
///
/// A payload that fails to decode is treated as "no spans produced", never as
/// a request error: the exporter side retries on errors and the data is purely
/// diagnostic.
pub fn collect_traces(state: &ControllerState, body: &Bytes) -> http::Result<HttpResponse> {
    match otlp::decode_trace_export(body) {
        Ok((raw, spans)) => {
            let accepted = state.ingest_spans(spans, raw);
            log_and_create_http_response(&format!("Collected {accepted} spans"), StatusCode::OK)
        }
        Err(error) => {
            debug!(%error, "Failed to decode trace export payload, ignoring");
            log_and_create_http_response("Collected 0 spans", StatusCode::OK)
        }
    }
}

/// POST /v1/link: the proxy report callback.
pub fn link_report(state: &ControllerState, body: &Bytes) -> http::Result<HttpResponse> {
    let report: TraceReport = match serde_json::from_slice(body) {
        Ok(report) => report,
        Err(error) => {
            return log_and_create_http_response(
                &format!("Invalid report payload: {error}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };

    if !state.is_active(&report.trace_id) {
        return log_and_create_http_response(
            &format!("Trace id {} is not registered", report.trace_id),
            StatusCode::NOT_FOUND,
        );
    }

    let trace_id = report.trace_id.clone();
    let uid = report.uid.to_string();
    let updated = state.upsert_report(report);
    debug!(trace_id, uid, updated, "Stored proxy report");
    log_and_create_http_response("Report stored", StatusCode::OK)
}

/// POST /v1/faultload/register: fleet-wide registration. The raw body is
/// forwarded to the proxies verbatim, so plan fields this controller does not
/// model pass through untouched.
pub async fn register_faultload(
    fleet: &FleetCoordinator,
    body: Bytes,
) -> http::Result<HttpResponse> {
    let faultload: Faultload = match serde_json::from_slice(&body) {
        Ok(faultload) => faultload,
        Err(error) => {
            return log_and_create_http_response(
                &format!("Invalid faultload payload: {error}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };

    match fleet.register(&faultload, body).await {
        Ok(()) => log_and_create_http_response("Faultload registered", StatusCode::OK),
        Err(error) => log_and_create_http_response(
            &format!("Failed to register faultload: {error}"),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}

#[derive(Debug, Deserialize)]
struct UnregisterRequest {
    trace_id: String,
}

/// POST /v1/faultload/unregister: fleet-wide unregistration.
pub async fn unregister_faultload(
    fleet: &FleetCoordinator,
    body: &Bytes,
) -> http::Result<HttpResponse> {
    let request: UnregisterRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(error) => {
            return log_and_create_http_response(
                &format!("Invalid unregister payload: {error}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };

    match fleet.unregister(&request.trace_id).await {
        Ok(()) => log_and_create_http_response("Faultload unregistered", StatusCode::OK),
        Err(error @ FleetError::NotRegistered(_)) => {
            log_and_create_http_response(&error.to_string(), StatusCode::NOT_FOUND)
        }
        Err(error) => log_and_create_http_response(
            &format!("Failed to unregister faultload: {error}"),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}

/// GET /v1/clear: hard reset between unrelated test campaigns.
pub fn clear(fleet: &FleetCoordinator) -> http::Result<HttpResponse> {
    fleet.clear();
    log_and_create_http_response("Cleared", StatusCode::OK)
}

fn trace_views(
    state: &ControllerState,
    trace_id: &str,
) -> (Vec<Span>, Vec<TraceReport>, Vec<TraceTreeNode>) {
    let mut spans = state.spans_for_trace(trace_id);
    attach_client_root(trace_id, &mut spans);
    let reports = state.reports_for_trace(trace_id);
    let by_span_id: HashMap<String, TraceReport> = reports
        .iter()
        .map(|report| (report.span_id.clone(), report.clone()))
        .collect();
    let forest = build_forest(spans.clone(), |span_id| by_span_id.get(span_id).cloned());
    (spans, reports, forest)
}

fn unknown_trace(trace_id: &str) -> http::Result<HttpResponse> {
    log_and_create_http_response(
        &format!("Unknown trace id {trace_id}"),
        StatusCode::NOT_FOUND,
    )
}

/// GET /v1/trace/{trace_id}: spans, reports, the full trace forest and (when
/// the trace has exactly one root) the reduced report tree.
pub fn get_trace(state: &ControllerState, trace_id: &str) -> http::Result<HttpResponse> {
    if !state.trace_known(trace_id) {
        return unknown_trace(trace_id);
    }
    let (spans, reports, forest) = trace_views(state, trace_id);
    let report_trees = report_tree(&forest).ok();
    json_response(
        &json!({
            "spans": spans,
            "reports": reports,
            "trees": forest,
            "report_trees": report_trees,
            "faultload": state.faults_for_trace(trace_id),
        }),
        StatusCode::OK,
    )
}

/// GET /v1/trace/{trace_id}/trees
pub fn get_trace_trees(state: &ControllerState, trace_id: &str) -> http::Result<HttpResponse> {
    if !state.trace_known(trace_id) {
        return unknown_trace(trace_id);
    }
    let (_, _, forest) = trace_views(state, trace_id);
    json_response(&forest, StatusCode::OK)
}

/// GET /v1/trace/{trace_id}/report-trees: 404 unless the trace reduces to
/// exactly one root.
pub fn get_report_trees(state: &ControllerState, trace_id: &str) -> http::Result<HttpResponse> {
    if !state.trace_known(trace_id) {
        return unknown_trace(trace_id);
    }
    let (_, _, forest) = trace_views(state, trace_id);
    match report_tree(&forest) {
        Ok(reduced) => json_response(&reduced, StatusCode::OK),
        Err(error) => log_and_create_http_response(
            &format!("No report tree for trace id {trace_id}: {error}"),
            StatusCode::NOT_FOUND,
        ),
    }
}

/// GET /v1/trace/{trace_id}/reports
pub fn get_reports(state: &ControllerState, trace_id: &str) -> http::Result<HttpResponse> {
    if !state.trace_known(trace_id) {
        return unknown_trace(trace_id);
    }
    json_response(&state.reports_for_trace(trace_id), StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct ParentUidRequest {
    parent_span_id: String,
    #[serde(default)]
    trace_id: Option<String>,
}

/// POST /v1/proxy/get-parent-uid: the synchronous call a proxy makes before
/// deciding the address/ordinal of its next outbound call: the parent's
/// FaultUid stack plus the completed-events map beneath it.
pub fn get_parent_uid(state: &ControllerState, body: &Bytes) -> http::Result<HttpResponse> {
    let request: ParentUidRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(error) => {
            return log_and_create_http_response(
                &format!("Invalid parent uid payload: {error}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };

    let Some(parent) = state.report_for_span(request.trace_id.as_deref(), &request.parent_span_id)
    else {
        return log_and_create_http_response(
            &format!("No report for span id {}", request.parent_span_id),
            StatusCode::NOT_FOUND,
        );
    };

    let reports = state.reports_for_trace(&parent.trace_id);
    let completed = completed_events(&reports, &parent);
    json_response(
        &json!({
            "stack": parent.uid.stack,
            "completed": completed,
        }),
        StatusCode::OK,
    )
}

/// GET /v1/all: every stored span plus the forest across all traces.
pub fn get_all(state: &ControllerState) -> http::Result<HttpResponse> {
    let spans = state.all_spans();
    let by_span_id: HashMap<String, TraceReport> = state
        .all_reports()
        .into_iter()
        .map(|report| (report.span_id.clone(), report))
        .collect();
    let forest = build_forest(spans.clone(), |span_id| by_span_id.get(span_id).cloned());
    json_response(&json!({"spans": spans, "trees": forest}), StatusCode::OK)
}

/// GET /v1/raw: the raw-export audit capture (populated in debug mode only).
pub fn get_raw(state: &ControllerState) -> http::Result<HttpResponse> {
    json_response(&json!({"data": state.raw_exports()}), StatusCode::OK)
}

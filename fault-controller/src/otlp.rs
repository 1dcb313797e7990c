// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Thin adapter from the OTLP/HTTP JSON trace-export wire format to [`Span`]s.
//!
//! Only the fields the control plane correlates on are decoded; everything else
//! in the export is ignored. A payload that fails to decode produces no spans;
//! the caller treats that as an empty ingest, not an error.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use datadog_fault_utils::span::Span;
use serde::Deserialize;
use serde_json::Value;

const SERVICE_NAME_ATTRIBUTE: &str = "service.name";
const UNKNOWN_SERVICE: &str = "unknown";
const STATUS_CODE_ERROR: i64 = 2;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ExportTraceServiceRequest {
    resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ResourceSpans {
    resource: Resource,
    scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Resource {
    attributes: Vec<KeyValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyValue {
    key: String,
    value: AnyValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AnyValue {
    string_value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ScopeSpans {
    spans: Vec<OtlpSpan>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OtlpSpan {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    trace_state: Option<String>,
    name: String,
    start_time_unix_nano: Option<Value>,
    end_time_unix_nano: Option<Value>,
    status: Option<OtlpStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OtlpStatus {
    code: Option<Value>,
    message: Option<String>,
}

/// Decodes one trace-export payload. Returns the raw decoded document (kept for
/// debug-mode audit capture) and the spans it contained.
pub fn decode_trace_export(payload: &[u8]) -> anyhow::Result<(Value, Vec<Span>)> {
    let raw: Value = serde_json::from_slice(payload)?;
    let request: ExportTraceServiceRequest = serde_json::from_value(raw.clone())?;

    let mut spans = Vec::new();
    for resource_spans in &request.resource_spans {
        let service_name = resource_attribute(&resource_spans.resource, SERVICE_NAME_ATTRIBUTE)
            .unwrap_or(UNKNOWN_SERVICE)
            .to_string();
        for scope_spans in &resource_spans.scope_spans {
            for span in &scope_spans.spans {
                if let Some(span) = convert_span(span, &service_name) {
                    spans.push(span);
                }
            }
        }
    }
    Ok((raw, spans))
}

fn resource_attribute<'a>(resource: &'a Resource, key: &str) -> Option<&'a str> {
    resource
        .attributes
        .iter()
        .find(|attribute| attribute.key == key)
        .and_then(|attribute| attribute.value.string_value.as_deref())
}

fn convert_span(span: &OtlpSpan, service_name: &str) -> Option<Span> {
    let trace_id = normalize_id(&span.trace_id, 16)?;
    let span_id = normalize_id(&span.span_id, 8)?;
    let parent_span_id = span
        .parent_span_id
        .as_deref()
        .and_then(|id| normalize_id(id, 8));

    let (is_error, error_message) = error_status(span.status.as_ref());

    Some(Span {
        span_id,
        trace_id,
        parent_span_id,
        name: span.name.clone(),
        start_time: to_u64(span.start_time_unix_nano.as_ref()),
        end_time: to_u64(span.end_time_unix_nano.as_ref()),
        service_name: service_name.to_string(),
        is_error,
        error_message,
        trace_state: span.trace_state.clone(),
    })
}

/// Normalizes a wire span/trace id to lowercase hex of the expected width.
///
/// OTLP/HTTP JSON carries ids as hex, but exporters going through the generic
/// protobuf JSON mapping emit base64 instead; both are accepted.
fn normalize_id(raw: &str, byte_length: usize) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let width = byte_length * 2;
    if raw.len() == width && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Some(raw.to_ascii_lowercase());
    }

    let decoded = STANDARD.decode(raw).ok()?;
    let mut hex = String::with_capacity(width);
    for byte in &decoded {
        hex.push_str(&format!("{byte:02x}"));
    }
    if hex.len() < width {
        hex.insert_str(0, &"0".repeat(width - hex.len()));
    }
    Some(hex)
}

fn to_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::String(raw)) => raw.parse().unwrap_or(0),
        Some(Value::Number(number)) => number.as_u64().unwrap_or(0),
        _ => 0,
    }
}

fn error_status(status: Option<&OtlpStatus>) -> (bool, Option<String>) {
    let Some(status) = status else {
        return (false, None);
    };
    let is_error = match &status.code {
        Some(Value::String(code)) => code == "STATUS_CODE_ERROR",
        Some(Value::Number(code)) => code.as_i64() == Some(STATUS_CODE_ERROR),
        _ => false,
    };
    (is_error, status.message.clone())
}

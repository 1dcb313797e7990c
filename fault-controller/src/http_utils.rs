// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{http, HeaderMap, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

pub type HttpResponse = Response<Full<Bytes>>;

/// Does two things:
/// - Logs the given message. A success status code (within 200-299) will cause an info log to be
///   written, otherwise error will be written.
/// - Returns the given message in the body of JSON response with the given status code.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_success() {
        info!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
}

/// Serializes `value` as the JSON response body with the given status code.
pub fn json_response<T: Serialize>(value: &T, status: StatusCode) -> http::Result<HttpResponse> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            return log_and_create_http_response(
                &format!("Failed to serialize response: {e}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }
    };
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
}

/// Takes a request's header map, and verifies that the "content-length" header is present, valid,
/// and less than the given max_content_length.
///
/// Will return None if no issues are found. Otherwise logs an error (with the given prefix) and
/// returns and an HTTP Response with the appropriate error status code.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<HttpResponse>> {
    let content_length_header = match header_map.get("content-length") {
        Some(res) => res,
        None => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Missing Content-Length header"),
                StatusCode::LENGTH_REQUIRED,
            ));
        }
    };
    let content_length = match content_length_header.to_str() {
        Ok(res) => match res.parse::<usize>() {
            Ok(res) => res,
            Err(_) => {
                return Some(log_and_create_http_response(
                    &format!("{error_message_prefix}: Invalid Content-Length header"),
                    StatusCode::BAD_REQUEST,
                ));
            }
        },
        Err(_) => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_string(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn message_response_shape() {
        let response = log_and_create_http_response("All good", StatusCode::OK).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"message":"All good"}"#);
    }

    #[test]
    fn content_length_guard() {
        let mut headers = HeaderMap::new();
        assert!(verify_request_content_length(&headers, 10, "test").is_some());

        headers.insert("content-length", "5".parse().unwrap());
        assert!(verify_request_content_length(&headers, 10, "test").is_none());

        headers.insert("content-length", "11".parse().unwrap());
        let response = verify_request_content_length(&headers, 10, "test").unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}

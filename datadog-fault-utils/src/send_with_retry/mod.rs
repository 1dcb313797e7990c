// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Provide [`send_with_retry`] utility to POST a payload to a URL with retries if the
//! request fails. This is the per-proxy primitive underneath the fleet fan-out.

mod retry_strategy;
pub use retry_strategy::{RetryBackoffType, RetryStrategy};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use std::{collections::HashMap, time::Duration};
use tracing::{debug, error};

/// The hyper client used to talk to the proxy fleet.
pub type HttpClient = hyper_util::client::legacy::Client<HttpConnector, Full<Bytes>>;

/// Create a new default configuration hyper client.
///
/// It will keep connections open for a longer time and reuse them.
pub fn new_default_client() -> HttpClient {
    hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build_http()
}

pub type Attempts = u32;

pub type SendWithRetryResult = Result<(http::Response<Bytes>, Attempts), SendWithRetryError>;

/// All errors contain the number of attempts after which the final error was returned
#[derive(Debug)]
pub enum SendWithRetryError {
    /// The request received an error HTTP code.
    Http(http::Response<Bytes>, Attempts),
    /// Treats timeout errors originated in the transport layer.
    Timeout(Attempts),
    /// Treats errors coming from networking.
    Network(hyper_util::client::legacy::Error, Attempts),
    /// Treats errors while reading the response body.
    ResponseBody(Attempts),
    /// Treats errors coming from building the request
    Build(Attempts),
}

impl std::fmt::Display for SendWithRetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendWithRetryError::Http(response, _) => {
                write!(f, "Http error code {} received", response.status())
            }
            SendWithRetryError::Timeout(_) => write!(f, "Request timed out"),
            SendWithRetryError::Network(error, _) => write!(f, "Network error: {error}"),
            SendWithRetryError::ResponseBody(_) => write!(f, "Failed to read response body"),
            SendWithRetryError::Build(_) => {
                write!(f, "Failed to build request due to invalid property")
            }
        }
    }
}

impl std::error::Error for SendWithRetryError {}

/// Send the `payload` with a POST request to `url` using the provided `retry_strategy` if the
/// request fails.
///
/// Each attempt is individually bounded by `timeout`, so one unreachable target cannot stall the
/// caller beyond `attempts x timeout` (plus backoff delays). The `headers` are appended to every
/// attempt.
///
/// # Returns
///
/// Return a [`SendWithRetryResult`] containing the response (body collected) and the number of
/// attempts, or an error describing the last attempt failure.
///
/// # Errors
/// Fail if the request didn't succeed after applying the retry strategy.
pub async fn send_with_retry(
    client: &HttpClient,
    url: &str,
    payload: Vec<u8>,
    headers: &HashMap<&'static str, String>,
    timeout: Duration,
    retry_strategy: &RetryStrategy,
) -> SendWithRetryResult {
    let mut request_attempt = 0;

    debug!(
        url,
        payload_size = payload.len(),
        max_retries = retry_strategy.max_retries(),
        "Sending with retry"
    );

    loop {
        request_attempt += 1;

        let mut builder = http::Request::builder()
            .method(http::Method::POST)
            .uri(url);
        for (key, value) in headers {
            builder = builder.header(*key, value.as_str());
        }
        let req = match builder.body(Full::new(Bytes::from(payload.clone()))) {
            Ok(r) => r,
            Err(_) => {
                return Err(SendWithRetryError::Build(request_attempt));
            }
        };

        let result = tokio::time::timeout(timeout, client.request(req)).await;

        match result {
            Ok(Ok(response)) => {
                let (parts, body) = response.into_parts();
                let body = match body.collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(_) => {
                        if request_attempt < retry_strategy.max_retries() {
                            retry_strategy.delay(request_attempt).await;
                            continue;
                        }
                        error!(
                            attempts = request_attempt,
                            "Max retries exceeded, failed to read response body"
                        );
                        return Err(SendWithRetryError::ResponseBody(request_attempt));
                    }
                };
                let response = http::Response::from_parts(parts, body);
                let status = response.status();

                if status.is_client_error() || status.is_server_error() {
                    if request_attempt < retry_strategy.max_retries() {
                        debug!(
                            status = status.as_u16(),
                            attempt = request_attempt,
                            remaining_retries = retry_strategy.max_retries() - request_attempt,
                            "Retrying after error status code"
                        );
                        retry_strategy.delay(request_attempt).await;
                        continue;
                    } else {
                        error!(
                            status = status.as_u16(),
                            attempts = request_attempt,
                            "Max retries exceeded, returning HTTP error"
                        );
                        return Err(SendWithRetryError::Http(response, request_attempt));
                    }
                } else {
                    debug!(
                        status = status.as_u16(),
                        attempts = request_attempt,
                        "Request succeeded"
                    );
                    return Ok((response, request_attempt));
                }
            }
            Ok(Err(e)) => {
                if request_attempt < retry_strategy.max_retries() {
                    debug!(
                        error = %e,
                        attempt = request_attempt,
                        remaining_retries = retry_strategy.max_retries() - request_attempt,
                        "Retrying after request error"
                    );
                    retry_strategy.delay(request_attempt).await;
                    continue;
                } else {
                    error!(
                        error = %e,
                        attempts = request_attempt,
                        "Max retries exceeded, returning request error"
                    );
                    return Err(SendWithRetryError::Network(e, request_attempt));
                }
            }
            Err(_) => {
                if request_attempt < retry_strategy.max_retries() {
                    debug!(
                        attempt = request_attempt,
                        remaining_retries = retry_strategy.max_retries() - request_attempt,
                        "Retrying after timeout"
                    );
                    retry_strategy.delay(request_attempt).await;
                    continue;
                } else {
                    error!(
                        attempts = request_attempt,
                        "Max retries exceeded, returning timeout error"
                    );
                    return Err(SendWithRetryError::Timeout(request_attempt));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;

    const TEST_TIMEOUT: Duration = Duration::from_millis(500);

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_retry_logic_no_errors() {
        let server = MockServer::start_async().await;
        let mock_202 = server
            .mock_async(|_when, then| {
                then.status(202)
                    .header("content-type", "application/json")
                    .body(r#"{"status":"ok"}"#);
            })
            .await;

        let client = new_default_client();
        let strategy = RetryStrategy::new(2, 10, RetryBackoffType::Constant, None);

        let result = send_with_retry(
            &client,
            &server.url("/v1/faultload/register"),
            vec![0, 1, 2, 3],
            &HashMap::new(),
            TEST_TIMEOUT,
            &strategy,
        )
        .await;

        assert!(
            matches!(result, Ok((_, attempts)) if attempts == 1),
            "Expected an ok result after one attempt"
        );
        assert_eq!(mock_202.hits_async().await, 1);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_retry_logic_max_errors() {
        let server = MockServer::start_async().await;
        let expected_retry_attempts = 3;
        let mock_503 = server
            .mock_async(|_when, then| {
                then.status(503)
                    .header("content-type", "application/json")
                    .body(r#"{"status":"error"}"#);
            })
            .await;

        let client = new_default_client();
        let strategy = RetryStrategy::new(
            expected_retry_attempts,
            10,
            RetryBackoffType::Constant,
            None,
        );

        let result = send_with_retry(
            &client,
            &server.url("/v1/faultload/register"),
            vec![0, 1, 2, 3],
            &HashMap::new(),
            TEST_TIMEOUT,
            &strategy,
        )
        .await;

        assert!(
            matches!(result.unwrap_err(), SendWithRetryError::Http(_, attempts) if attempts == expected_retry_attempts),
            "Expected an error result after max retry attempts"
        );
        assert_eq!(mock_503.hits_async().await, expected_retry_attempts as usize);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_zero_retries_on_error() {
        let server = MockServer::start_async().await;
        let mock_503 = server
            .mock_async(|_when, then| {
                then.status(503);
            })
            .await;

        let client = new_default_client();
        let strategy = RetryStrategy::new(0, 2, RetryBackoffType::Constant, None);

        let result = send_with_retry(
            &client,
            &server.url("/v1/faultload/register"),
            vec![0, 1, 2, 3],
            &HashMap::new(),
            TEST_TIMEOUT,
            &strategy,
        )
        .await;

        assert!(
            matches!(result.unwrap_err(), SendWithRetryError::Http(_, 1)),
            "Expected an http error after a single attempt"
        );
        assert_eq!(mock_503.hits_async().await, 1);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_network_error_is_retried() {
        // Nothing listens on this port; every attempt fails at the transport layer.
        let client = new_default_client();
        let strategy = RetryStrategy::new(2, 5, RetryBackoffType::Constant, None);

        let result = send_with_retry(
            &client,
            "http://127.0.0.1:9/v1/faultload/register",
            vec![],
            &HashMap::new(),
            TEST_TIMEOUT,
            &strategy,
        )
        .await;

        assert!(
            matches!(result.unwrap_err(), SendWithRetryError::Network(_, 2)),
            "Expected a network error after two attempts"
        );
    }
}

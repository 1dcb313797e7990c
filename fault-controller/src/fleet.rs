// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fleet coordination: registering and unregistering a faultload with every
//! configured proxy, concurrently and with per-proxy retries.
//!
//! The per-trace session state machine is
//! `unregistered -> registering -> active -> unregistering -> unregistered`;
//! the active set in [`ControllerState`] holds the middle of it.

use crate::config::Config;
use crate::state::ControllerState;
use bytes::Bytes;
use datadog_fault_utils::faultload::{Faultload, TraceId};
use datadog_fault_utils::send_with_retry::{
    new_default_client, send_with_retry, HttpClient, RetryBackoffType, RetryStrategy,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const REGISTER_PATH: &str = "/v1/faultload/register";
const UNREGISTER_PATH: &str = "/v1/faultload/unregister";
const RETRY_DELAY_MS: u64 = 100;

/// One proxy's terminal failure within a fan-out, carrying the last observed
/// error after the retry budget was exhausted.
#[derive(Debug)]
pub struct ProxyFailure {
    pub proxy: String,
    pub error: String,
}

#[derive(Debug)]
pub enum FleetError {
    /// The trace id is not in the active session set.
    NotRegistered(TraceId),
    /// One or more proxies failed after exhausting their retry budget. The
    /// proxies that succeeded are NOT rolled back; callers must retry the
    /// whole operation or abort the campaign.
    Partial {
        operation: &'static str,
        failures: Vec<ProxyFailure>,
    },
}

impl fmt::Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetError::NotRegistered(trace_id) => {
                write!(f, "trace id {trace_id} is not registered")
            }
            FleetError::Partial {
                operation,
                failures,
            } => {
                let details: Vec<String> = failures
                    .iter()
                    .map(|failure| format!("{}: {}", failure.proxy, failure.error))
                    .collect();
                write!(
                    f,
                    "failed to {operation} faultload at {} proxies: {}",
                    failures.len(),
                    details.join("; ")
                )
            }
        }
    }
}

impl std::error::Error for FleetError {}

pub struct FleetCoordinator {
    proxies: Vec<String>,
    retry_strategy: RetryStrategy,
    timeout: Duration,
    client: HttpClient,
    state: Arc<ControllerState>,
}

impl FleetCoordinator {
    pub fn new(config: &Config, state: Arc<ControllerState>) -> Self {
        FleetCoordinator {
            proxies: config.proxy_list.clone(),
            retry_strategy: RetryStrategy::new(
                config.proxy_retry_count,
                RETRY_DELAY_MS,
                RetryBackoffType::Exponential,
                None,
            ),
            timeout: config.proxy_timeout,
            client: new_default_client(),
            state,
        }
    }

    /// Registers a faultload with the whole fleet.
    ///
    /// The trace id is added to the active set speculatively, then the raw
    /// register body is forwarded to every proxy concurrently. If any proxy
    /// exhausts its retry budget the operation fails as a whole; there is no
    /// compensating rollback of the proxies that already succeeded, so the
    /// session's membership is ambiguous until the caller re-registers or
    /// clears.
    pub async fn register(&self, faultload: &Faultload, raw_body: Bytes) -> Result<(), FleetError> {
        self.state
            .activate(&faultload.trace_id, faultload.faults.clone());

        self.broadcast("register", REGISTER_PATH, raw_body).await?;

        info!(
            trace_id = %faultload.trace_id,
            faults = faultload.faults.len(),
            "Registered faultload"
        );
        Ok(())
    }

    /// Unregisters a trace session from the whole fleet.
    ///
    /// Only after all proxies acknowledge does the trace id leave the active
    /// set; outside debug mode the trace's spans and reports are then evicted.
    pub async fn unregister(&self, trace_id: &str) -> Result<(), FleetError> {
        if !self.state.is_active(trace_id) {
            return Err(FleetError::NotRegistered(trace_id.to_string()));
        }

        let body = serde_json::json!({ "trace_id": trace_id }).to_string();
        self.broadcast("unregister", UNREGISTER_PATH, Bytes::from(body))
            .await?;

        self.state.deactivate(trace_id);
        if !self.state.debug_mode() {
            self.state.evict_trace(trace_id);
        }

        info!(trace_id, "Unregistered faultload");
        Ok(())
    }

    /// Hard reset with no proxy notification: empties the active set and both
    /// stores. Intended for harness-level isolation between unrelated
    /// campaigns, not normal operation.
    pub fn clear(&self) {
        self.state.clear_all();
        info!("Cleared all fault-injection state");
    }

    /// POSTs `body` to every proxy concurrently, each send retried per the
    /// configured strategy, and joins the fan-out before returning. Collects
    /// the last error of every proxy that exhausted its budget.
    async fn broadcast(
        &self,
        operation: &'static str,
        path: &str,
        body: Bytes,
    ) -> Result<(), FleetError> {
        let headers = HashMap::from([("content-type", "application/json".to_string())]);
        let headers = &headers;

        let sends = self.proxies.iter().map(|proxy| {
            let url = format!("http://{proxy}{path}");
            let proxy = proxy.clone();
            let payload = body.to_vec();
            async move {
                let result = send_with_retry(
                    &self.client,
                    &url,
                    payload,
                    headers,
                    self.timeout,
                    &self.retry_strategy,
                )
                .await;
                (proxy, result)
            }
        });

        let failures: Vec<ProxyFailure> = join_all(sends)
            .await
            .into_iter()
            .filter_map(|(proxy, result)| match result {
                Ok((_, attempts)) => {
                    debug!(proxy, attempts, operation, "Proxy acknowledged");
                    None
                }
                Err(error) => Some(ProxyFailure {
                    proxy,
                    error: error.to_string(),
                }),
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FleetError::Partial {
                operation,
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datadog_fault_utils::faultload::{Fault, FaultMode, FaultUid, InjectionPoint};
    use datadog_fault_utils::report::TraceReport;
    use datadog_fault_utils::span::Span;
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_config(proxies: Vec<String>) -> Config {
        Config {
            proxy_list: proxies,
            proxy_retry_count: 2,
            proxy_timeout: Duration::from_millis(500),
            port: 0,
            debug_mode: false,
            max_request_content_length: 10 * 1024 * 1024,
        }
    }

    fn test_faultload(trace_id: &str) -> Faultload {
        Faultload {
            trace_id: trace_id.to_string(),
            faults: vec![Fault {
                uid: FaultUid {
                    stack: vec![InjectionPoint {
                        destination: "payments".to_string(),
                        signature: "POST /charge".to_string(),
                        payload: "*".to_string(),
                        count: 0,
                        predecessors: None,
                    }],
                },
                mode: FaultMode {
                    fault_type: "HTTP_ERROR".to_string(),
                    args: vec!["503".to_string()],
                },
            }],
        }
    }

    fn test_span(trace_id: &str, span_id: &str) -> Span {
        Span {
            span_id: span_id.to_string(),
            trace_id: trace_id.to_string(),
            parent_span_id: None,
            name: "test".to_string(),
            start_time: 0,
            end_time: 0,
            service_name: "svc".to_string(),
            is_error: false,
            error_message: None,
            trace_state: None,
        }
    }

    fn test_report(trace_id: &str, span_id: &str) -> TraceReport {
        TraceReport {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            uid: FaultUid {
                stack: vec![InjectionPoint {
                    destination: "payments".to_string(),
                    signature: "POST /charge".to_string(),
                    payload: String::new(),
                    count: 0,
                    predecessors: None,
                }],
            },
            is_initial: true,
            injected_fault: None,
            concurrent_to: vec![],
            response: None,
        }
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn register_succeeds_when_all_proxies_ack() {
        let proxy_a = MockServer::start_async().await;
        let proxy_b = MockServer::start_async().await;
        let mock_a = proxy_a
            .mock_async(|when, then| {
                when.method(POST).path("/v1/faultload/register");
                then.status(200);
            })
            .await;
        let mock_b = proxy_b
            .mock_async(|when, then| {
                when.method(POST).path("/v1/faultload/register");
                then.status(200);
            })
            .await;

        let state = Arc::new(ControllerState::new(false));
        let config = test_config(vec![
            proxy_a.address().to_string(),
            proxy_b.address().to_string(),
        ]);
        let coordinator = FleetCoordinator::new(&config, Arc::clone(&state));

        let faultload = test_faultload("t1");
        let body = Bytes::from(serde_json::to_vec(&faultload).unwrap());
        coordinator.register(&faultload, body).await.unwrap();

        assert!(state.is_active("t1"));
        assert_eq!(mock_a.hits_async().await, 1);
        assert_eq!(mock_b.hits_async().await, 1);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn register_fails_when_one_proxy_exhausts_retries() {
        let healthy = MockServer::start_async().await;
        let broken = MockServer::start_async().await;
        healthy
            .mock_async(|when, then| {
                when.method(POST).path("/v1/faultload/register");
                then.status(200);
            })
            .await;
        let broken_mock = broken
            .mock_async(|when, then| {
                when.method(POST).path("/v1/faultload/register");
                then.status(500);
            })
            .await;

        let state = Arc::new(ControllerState::new(false));
        let config = test_config(vec![
            healthy.address().to_string(),
            broken.address().to_string(),
        ]);
        let coordinator = FleetCoordinator::new(&config, Arc::clone(&state));

        let faultload = test_faultload("t1");
        let body = Bytes::from(serde_json::to_vec(&faultload).unwrap());
        let error = coordinator.register(&faultload, body).await.unwrap_err();

        match error {
            FleetError::Partial {
                operation,
                failures,
            } => {
                assert_eq!(operation, "register");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].proxy, broken.address().to_string());
            }
            other => panic!("unexpected error: {other}"),
        }
        // retry budget consumed on the failing proxy
        assert_eq!(broken_mock.hits_async().await, 2);

        // the session is left ambiguous; a clear() still reaches a clean slate
        // without any successful unregister
        assert!(state.is_active("t1"));
        coordinator.clear();
        assert!(!state.is_active("t1"));
        assert_eq!(state.span_count(), 0);
        assert_eq!(state.report_count(), 0);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn unregister_unknown_trace_is_not_found_and_mutates_nothing() {
        let state = Arc::new(ControllerState::new(false));
        state.activate("t1", vec![]);
        state.ingest_spans(vec![test_span("t1", "a")], json!({}));

        let config = test_config(vec![]);
        let coordinator = FleetCoordinator::new(&config, Arc::clone(&state));

        let error = coordinator.unregister("t2").await.unwrap_err();
        assert!(matches!(error, FleetError::NotRegistered(id) if id == "t2"));
        assert!(state.is_active("t1"));
        assert_eq!(state.span_count(), 1);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn unregister_evicts_trace_data_outside_debug_mode() {
        let proxy = MockServer::start_async().await;
        let mock = proxy
            .mock_async(|when, then| {
                when.method(POST).path("/v1/faultload/unregister");
                then.status(200);
            })
            .await;

        let state = Arc::new(ControllerState::new(false));
        state.activate("t1", vec![]);
        state.ingest_spans(vec![test_span("t1", "a")], json!({}));
        state.upsert_report(test_report("t1", "a"));

        let config = test_config(vec![proxy.address().to_string()]);
        let coordinator = FleetCoordinator::new(&config, Arc::clone(&state));

        coordinator.unregister("t1").await.unwrap();

        assert_eq!(mock.hits_async().await, 1);
        assert!(!state.is_active("t1"));
        assert_eq!(state.span_count(), 0);
        assert_eq!(state.report_count(), 0);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn unregister_keeps_trace_data_in_debug_mode() {
        let proxy = MockServer::start_async().await;
        proxy
            .mock_async(|when, then| {
                when.method(POST).path("/v1/faultload/unregister");
                then.status(200);
            })
            .await;

        let state = Arc::new(ControllerState::new(true));
        state.activate("t1", vec![]);
        state.ingest_spans(vec![test_span("t1", "a")], json!({}));

        let config = Config {
            debug_mode: true,
            ..test_config(vec![proxy.address().to_string()])
        };
        let coordinator = FleetCoordinator::new(&config, Arc::clone(&state));

        coordinator.unregister("t1").await.unwrap();

        assert!(!state.is_active("t1"));
        assert_eq!(state.span_count(), 1);
    }
}

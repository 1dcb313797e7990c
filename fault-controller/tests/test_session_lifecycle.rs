// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod session_lifecycle_tests {
    use bytes::Bytes;
    use fault_controller::config::Config;
    use fault_controller::endpoints;
    use fault_controller::fleet::FleetCoordinator;
    use fault_controller::state::ControllerState;
    use http_body_util::BodyExt;
    use httpmock::prelude::*;
    use hyper::StatusCode;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const TRACE: &str = "0af7651916cd43dd8448eb211c80319c";
    const ROOT_SPAN: &str = "aaaaaaaaaaaaaaaa";
    const CHILD_SPAN: &str = "bbbbbbbbbbbbbbbb";

    fn config_for(proxies: Vec<String>) -> Arc<Config> {
        Arc::new(Config {
            proxy_list: proxies,
            proxy_retry_count: 2,
            proxy_timeout: Duration::from_millis(500),
            port: 0,
            debug_mode: false,
            max_request_content_length: 10 * 1024 * 1024,
        })
    }

    fn register_body() -> Bytes {
        Bytes::from(
            json!({
                "trace_id": TRACE,
                "faults": [{
                    "uid": {"stack": [
                        {"destination": "payments", "signature": "POST /charge", "payload": "*", "count": 0}
                    ]},
                    "mode": {"type": "HTTP_ERROR", "args": ["503"]}
                }]
            })
            .to_string(),
        )
    }

    fn trace_export() -> Bytes {
        Bytes::from(
            json!({
                "resourceSpans": [{
                    "resource": {"attributes": [
                        {"key": "service.name", "value": {"stringValue": "gateway"}}
                    ]},
                    "scopeSpans": [{"spans": [
                        {
                            "traceId": TRACE,
                            "spanId": ROOT_SPAN,
                            "parentSpanId": "0000000000000001",
                            "name": "GET /checkout",
                            "startTimeUnixNano": "1000",
                            "endTimeUnixNano": "5000",
                        },
                        {
                            "traceId": TRACE,
                            "spanId": CHILD_SPAN,
                            "parentSpanId": ROOT_SPAN,
                            "name": "POST /charge",
                            "startTimeUnixNano": "2000",
                            "endTimeUnixNano": "4000",
                            "status": {"code": "STATUS_CODE_ERROR", "message": "injected"},
                        }
                    ]}]
                }]
            })
            .to_string(),
        )
    }

    fn link_body(span_id: &str, stack: serde_json::Value, is_initial: bool) -> Bytes {
        Bytes::from(
            json!({
                "trace_id": TRACE,
                "span_id": span_id,
                "uid": {"stack": stack},
                "is_initial": is_initial,
                "concurrent_to": [],
                "response": {"status": 503, "body": "injected", "duration_ms": 2},
            })
            .to_string(),
        )
    }

    async fn body_json(
        response: hyper::Response<http_body_util::Full<Bytes>>,
    ) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn full_session_round_trip() {
        let proxy = MockServer::start_async().await;
        let register_mock = proxy
            .mock_async(|when, then| {
                when.method(POST).path("/v1/faultload/register");
                then.status(200);
            })
            .await;
        let unregister_mock = proxy
            .mock_async(|when, then| {
                when.method(POST).path("/v1/faultload/unregister");
                then.status(200);
            })
            .await;

        let config = config_for(vec![proxy.address().to_string()]);
        let state = Arc::new(ControllerState::new(config.debug_mode));
        let fleet = Arc::new(FleetCoordinator::new(&config, Arc::clone(&state)));

        // register: proxy acknowledged, session active
        let response = endpoints::register_faultload(&fleet, register_body())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(register_mock.hits_async().await, 1);
        assert!(state.is_active(TRACE));

        // ingestion: spans arrive via the trace export, reports via callbacks
        let response = endpoints::collect_traces(&state, &trace_export()).unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let root_stack = json!([
            {"destination": "gateway", "signature": "GET /checkout", "payload": "", "count": 0}
        ]);
        let child_stack = json!([
            {"destination": "gateway", "signature": "GET /checkout", "payload": "", "count": 0},
            {"destination": "payments", "signature": "POST /charge", "payload": "", "count": 0}
        ]);
        endpoints::link_report(&state, &link_body(ROOT_SPAN, root_stack, true)).unwrap();
        endpoints::link_report(&state, &link_body(CHILD_SPAN, child_stack, false)).unwrap();

        // query: one synthetic-rooted tree, reduced report tree keeps ancestry
        let body = body_json(endpoints::get_trace(&state, TRACE).unwrap()).await;
        assert_eq!(body["faultload"].as_array().unwrap().len(), 1);
        assert_eq!(body["spans"].as_array().unwrap().len(), 3);
        assert_eq!(body["trees"].as_array().unwrap().len(), 1);
        assert_eq!(body["trees"][0]["span"]["span_id"], json!("0000000000000001"));
        let report_tree = &body["report_trees"][0];
        assert_eq!(report_tree["span"]["span_id"], json!("0000000000000001"));
        assert_eq!(
            report_tree["children"][0]["span"]["span_id"],
            json!(ROOT_SPAN)
        );
        assert_eq!(
            report_tree["children"][0]["children"][0]["span"]["span_id"],
            json!(CHILD_SPAN)
        );

        // the proxy's next outbound call sees the completed payments call
        let parent_uid_request = Bytes::from(json!({"parent_span_id": ROOT_SPAN}).to_string());
        let body = body_json(endpoints::get_parent_uid(&state, &parent_uid_request).unwrap()).await;
        assert_eq!(body["completed"]["payments:POST /charge"], json!(0));

        // unregister: proxy acknowledged, session gone, data evicted
        let response = endpoints::unregister_faultload(
            &fleet,
            &Bytes::from(json!({"trace_id": TRACE}).to_string()),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(unregister_mock.hits_async().await, 1);
        assert!(!state.is_active(TRACE));

        let response = endpoints::get_trace(&state, TRACE).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn registration_failure_is_surfaced_and_clear_recovers() {
        let broken = MockServer::start_async().await;
        broken
            .mock_async(|when, then| {
                when.method(POST).path("/v1/faultload/register");
                then.status(503);
            })
            .await;

        let config = config_for(vec![broken.address().to_string()]);
        let state = Arc::new(ControllerState::new(config.debug_mode));
        let fleet = Arc::new(FleetCoordinator::new(&config, Arc::clone(&state)));

        let response = endpoints::register_faultload(&fleet, register_body())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // membership is ambiguous after a partial failure; clear() is the
        // documented way back to a clean slate
        let response = endpoints::clear(&fleet).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.is_active(TRACE));
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The controller's HTTP server and request routing.

use crate::config::Config;
use crate::endpoints;
use crate::fleet::FleetCoordinator;
use crate::http_utils::{
    log_and_create_http_response, verify_request_content_length, HttpResponse,
};
use crate::state::ControllerState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{body::Incoming, http, Method, Request, Response, StatusCode};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

const TRACE_QUERY_PREFIX: &str = "/v1/trace/";

pub struct Controller {
    pub config: Arc<Config>,
    pub state: Arc<ControllerState>,
    pub fleet: Arc<FleetCoordinator>,
}

impl Controller {
    pub fn new(config: Arc<Config>) -> Self {
        let state = Arc::new(ControllerState::new(config.debug_mode));
        let fleet = Arc::new(FleetCoordinator::new(&config, Arc::clone(&state)));
        Controller {
            config,
            state,
            fleet,
        }
    }

    /// Runs the accept loop until the listener fails. Each connection is
    /// served on its own task; a panicking handler task is resurfaced, any
    /// other connection error only affects that connection.
    pub async fn start(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(
            port = self.config.port,
            proxies = ?self.config.proxy_list,
            "Controller is listening"
        );

        let config = Arc::clone(&self.config);
        let state = Arc::clone(&self.state);
        let fleet = Arc::clone(&self.fleet);
        let service = service_fn(move |req| {
            Controller::handle(
                Arc::clone(&config),
                Arc::clone(&state),
                Arc::clone(&fleet),
                req,
            )
        });

        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();
        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        std::panic::resume_unwind(e.into_panic());
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    async fn handle(
        config: Arc<Config>,
        state: Arc<ControllerState>,
        fleet: Arc<FleetCoordinator>,
        req: Request<Incoming>,
    ) -> http::Result<HttpResponse> {
        let (parts, body) = req.into_parts();
        let path = parts.uri.path().to_string();

        // Every POST endpoint consumes a JSON (or OTLP) body; collect it up
        // front so handlers stay synchronous where they can.
        let body = if parts.method == Method::POST {
            if let Some(response) = verify_request_content_length(
                &parts.headers,
                config.max_request_content_length,
                "Rejecting request",
            ) {
                return response;
            }
            match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    return log_and_create_http_response(
                        &format!("Error reading request body: {e}"),
                        StatusCode::BAD_REQUEST,
                    );
                }
            }
        } else {
            Bytes::new()
        };

        match (&parts.method, path.as_str()) {
            (&Method::POST, "/v1/traces") => endpoints::collect_traces(&state, &body),
            (&Method::POST, "/v1/link") => endpoints::link_report(&state, &body),
            (&Method::POST, "/v1/faultload/register") => {
                endpoints::register_faultload(&fleet, body).await
            }
            (&Method::POST, "/v1/faultload/unregister") => {
                endpoints::unregister_faultload(&fleet, &body).await
            }
            (&Method::POST, "/v1/proxy/get-parent-uid") => {
                endpoints::get_parent_uid(&state, &body)
            }
            (&Method::GET, "/v1/clear") => endpoints::clear(&fleet),
            (&Method::GET, "/v1/all") => endpoints::get_all(&state),
            (&Method::GET, "/v1/raw") => endpoints::get_raw(&state),
            (&Method::GET, path) if path.starts_with(TRACE_QUERY_PREFIX) => {
                Self::route_trace_query(&state, &path[TRACE_QUERY_PREFIX.len()..])
            }
            _ => Self::not_found(),
        }
    }

    fn route_trace_query(state: &ControllerState, rest: &str) -> http::Result<HttpResponse> {
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [trace_id] => endpoints::get_trace(state, trace_id),
            [trace_id, "trees"] => endpoints::get_trace_trees(state, trace_id),
            [trace_id, "report-trees"] => endpoints::get_report_trees(state, trace_id),
            [trace_id, "reports"] => endpoints::get_reports(state, trace_id),
            _ => Self::not_found(),
        }
    }

    fn not_found() -> http::Result<HttpResponse> {
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
    }
}

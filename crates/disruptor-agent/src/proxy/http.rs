//! HTTP fault-injecting reverse proxy.
//!
//! Listens on the proxy port and forwards every request to the application
//! on the target port, after applying the configured delay and error rate.
//! Faulted requests never reach the application.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{is_excluded, roll_fault, sample_delay};
use crate::cli::HttpArgs;

/// Largest request/response body the proxy buffers.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Configuration of the HTTP disruption.
#[derive(Clone, Debug)]
pub struct HttpDisruption {
    /// Average delay added to each request
    pub average_delay: Duration,
    /// Variation of the injected delay
    pub delay_variation: Duration,
    /// Fraction of requests that fail
    pub error_rate: f64,
    /// Status code of faulted requests
    pub error_code: u16,
    /// Body of faulted requests
    pub error_body: String,
    /// Paths excluded from disruption
    pub excluded: Vec<String>,
    /// Port of the application the traffic is forwarded to
    pub target_port: u16,
    /// Port the proxy listens on
    pub proxy_port: u16,
}

impl TryFrom<&HttpArgs> for HttpDisruption {
    type Error = anyhow::Error;

    fn try_from(args: &HttpArgs) -> anyhow::Result<Self> {
        if !(0.0..=1.0).contains(&args.common.rate) {
            anyhow::bail!("error rate {} out of range [0, 1]", args.common.rate);
        }
        if args.common.rate > 0.0 {
            StatusCode::from_u16(args.error_code)
                .with_context(|| format!("{} is not a valid status code", args.error_code))?;
        }

        Ok(Self {
            average_delay: Duration::from_millis(args.common.average_delay),
            delay_variation: Duration::from_millis(args.common.delay_variation),
            error_rate: args.common.rate,
            error_code: args.error_code,
            error_body: args.error_body.clone(),
            excluded: args.common.exclude.clone(),
            target_port: args.common.target_port,
            proxy_port: args.common.proxy_port,
        })
    }
}

struct ProxyState {
    disruption: HttpDisruption,
    client: reqwest::Client,
    upstream: String,
}

/// Run the proxy until the token is cancelled.
pub async fn serve(disruption: HttpDisruption, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", disruption.proxy_port))
        .await
        .with_context(|| format!("failed to bind proxy port {}", disruption.proxy_port))?;
    info!(port = disruption.proxy_port, target = disruption.target_port, "HTTP proxy listening");

    let upstream = format!("http://127.0.0.1:{}", disruption.target_port);
    let state = Arc::new(ProxyState {
        disruption,
        client: reqwest::Client::new(),
        upstream,
    });

    let app = Router::new().fallback(handle).with_state(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("proxy server failed")?;

    Ok(())
}

async fn handle(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let disruption = &state.disruption;
    let path = request.uri().path().to_string();

    if !is_excluded(&disruption.excluded, &path) {
        let delay = sample_delay(disruption.average_delay, disruption.delay_variation);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if roll_fault(disruption.error_rate) {
            debug!(path = %path, code = disruption.error_code, "faulting request");
            return fault_response(disruption);
        }
    }

    match forward(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(path = %path, error = %e, "upstream request failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

fn fault_response(disruption: &HttpDisruption) -> Response {
    let status =
        StatusCode::from_u16(disruption.error_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, disruption.error_body.clone()).into_response()
}

async fn forward(state: &ProxyState, request: Request) -> anyhow::Result<Response> {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream, path_and_query);

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .context("failed to read request body")?;

    let mut headers = parts.headers;
    headers.remove(header::HOST);

    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .context("upstream request failed")?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONNECTION);
    headers.remove(header::CONTENT_LENGTH);

    let bytes = upstream
        .bytes()
        .await
        .context("failed to read upstream response")?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

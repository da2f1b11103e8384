//! gRPC fault-injecting reverse proxy.
//!
//! gRPC carries its status in HTTP/2 trailers and multiplexes arbitrary
//! services over one connection, so the proxy relays raw HTTP/2 streams
//! instead of decoding messages: DATA frames and trailers are piped in both
//! directions, and faulted requests are answered directly with a
//! trailers-only response carrying `grpc-status`. Working at the transport
//! layer keeps the proxy agnostic of the proxied service definitions.

use std::future::poll_fn;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use h2::server::SendResponse;
use h2::{RecvStream, SendStream};
use http::{Request, Response, StatusCode, Uri};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{is_excluded, roll_fault, sample_delay};
use crate::cli::GrpcArgs;

/// gRPC status delivered when the upstream cannot be reached.
const GRPC_STATUS_UNAVAILABLE: i32 = 14;

/// Configuration of the gRPC disruption.
#[derive(Clone, Debug)]
pub struct GrpcDisruption {
    /// Average delay added to each request
    pub average_delay: Duration,
    /// Variation of the injected delay
    pub delay_variation: Duration,
    /// Fraction of requests that fail
    pub error_rate: f64,
    /// gRPC status code of faulted requests
    pub status_code: i32,
    /// Status message of faulted requests
    pub status_message: String,
    /// Services excluded from disruption
    pub excluded: Vec<String>,
    /// Port of the application the traffic is forwarded to
    pub target_port: u16,
    /// Port the proxy listens on
    pub proxy_port: u16,
}

impl TryFrom<&GrpcArgs> for GrpcDisruption {
    type Error = anyhow::Error;

    fn try_from(args: &GrpcArgs) -> anyhow::Result<Self> {
        if !(0.0..=1.0).contains(&args.common.rate) {
            anyhow::bail!("error rate {} out of range [0, 1]", args.common.rate);
        }
        if args.common.rate > 0.0 && args.status_code == 0 {
            anyhow::bail!("a status code is required when the error rate is greater than 0");
        }

        Ok(Self {
            average_delay: Duration::from_millis(args.common.average_delay),
            delay_variation: Duration::from_millis(args.common.delay_variation),
            error_rate: args.common.rate,
            status_code: args.status_code,
            status_message: args.status_message.clone(),
            excluded: args.common.exclude.clone(),
            target_port: args.common.target_port,
            proxy_port: args.common.proxy_port,
        })
    }
}

/// Run the proxy until the token is cancelled.
pub async fn serve(disruption: GrpcDisruption, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", disruption.proxy_port))
        .await
        .with_context(|| format!("failed to bind proxy port {}", disruption.proxy_port))?;
    info!(port = disruption.proxy_port, target = disruption.target_port, "gRPC proxy listening");
    serve_with(listener, disruption, shutdown).await
}

pub(crate) async fn serve_with(
    listener: TcpListener,
    disruption: GrpcDisruption,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let disruption = Arc::new(disruption);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (socket, peer) = accepted.context("accept failed")?;
                debug!(peer = %peer, "accepted connection");
                let disruption = disruption.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(socket, disruption, shutdown).await {
                        debug!(error = %e, "connection ended");
                    }
                });
            }
        }
    }
}

async fn serve_connection(
    socket: TcpStream,
    disruption: Arc<GrpcDisruption>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut connection = h2::server::handshake(socket)
        .await
        .context("HTTP/2 handshake failed")?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            stream = connection.accept() => {
                let Some(stream) = stream else { return Ok(()) };
                let (request, respond) = stream.context("stream error")?;
                let disruption = disruption.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_stream(request, respond, disruption).await {
                        debug!(error = %e, "stream ended");
                    }
                });
            }
        }
    }
}

async fn handle_stream(
    request: Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
    disruption: Arc<GrpcDisruption>,
) -> anyhow::Result<()> {
    let path = request.uri().path().to_string();

    if !is_excluded(&disruption.excluded, &path) {
        let delay = sample_delay(disruption.average_delay, disruption.delay_variation);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if roll_fault(disruption.error_rate) {
            debug!(path = %path, code = disruption.status_code, "faulting request");
            let response =
                status_response(disruption.status_code, &disruption.status_message)?;
            respond.send_response(response, true)?;
            return Ok(());
        }
    }

    let upstream = match TcpStream::connect(("127.0.0.1", disruption.target_port)).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(path = %path, error = %e, "upstream connection failed");
            let response = status_response(GRPC_STATUS_UNAVAILABLE, &e.to_string())?;
            respond.send_response(response, true)?;
            return Ok(());
        }
    };

    let (client, connection) = h2::client::handshake(upstream)
        .await
        .context("upstream handshake failed")?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    let mut client = client.ready().await.context("upstream not ready")?;

    let (parts, request_body) = request.into_parts();
    let mut forward = Request::builder()
        .method(parts.method)
        .uri(rewrite_uri(&parts.uri, disruption.target_port)?);
    for (name, value) in parts.headers.iter() {
        forward = forward.header(name, value);
    }
    let forward = forward.body(())?;

    let request_done = request_body.is_end_stream();
    let (response, upstream_body) = client.send_request(forward, request_done)?;
    if !request_done {
        tokio::spawn(async move {
            if let Err(e) = copy_stream(request_body, upstream_body).await {
                debug!(error = %e, "request relay ended");
            }
        });
    }

    let response = response.await.context("upstream request failed")?;
    let (parts, upstream_response) = response.into_parts();
    let response_done = upstream_response.is_end_stream();
    let send_body = respond.send_response(Response::from_parts(parts, ()), response_done)?;
    if !response_done {
        copy_stream(upstream_response, send_body).await?;
    }

    Ok(())
}

/// A trailers-only gRPC response: the status travels in the HEADERS frame
/// that ends the stream.
fn status_response(code: i32, message: &str) -> anyhow::Result<Response<()>> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/grpc")
        .header("grpc-status", code.to_string())
        .header("grpc-message", message)
        .body(())?)
}

fn rewrite_uri(uri: &Uri, target_port: u16) -> anyhow::Result<Uri> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Ok(Uri::builder()
        .scheme("http")
        .authority(format!("127.0.0.1:{}", target_port))
        .path_and_query(path_and_query)
        .build()?)
}

/// Pipe DATA frames and trailers from a received stream into a send stream,
/// respecting both windows' flow control.
async fn copy_stream(mut from: RecvStream, mut to: SendStream<Bytes>) -> Result<(), h2::Error> {
    while let Some(chunk) = from.data().await {
        let mut chunk = chunk?;
        let received = chunk.len();

        while !chunk.is_empty() {
            to.reserve_capacity(chunk.len());
            let Some(available) = poll_fn(|cx| to.poll_capacity(cx)).await else {
                // Receiver is gone; nothing left to relay.
                return Ok(());
            };
            let available = available?;
            if available == 0 {
                continue;
            }
            let frame = chunk.split_to(available.min(chunk.len()));
            to.send_data(frame, false)?;
        }

        from.flow_control().release_capacity(received)?;
    }

    match from.trailers().await? {
        Some(trailers) => to.send_trailers(trailers)?,
        None => to.send_data(Bytes::new(), true)?,
    }

    Ok(())
}

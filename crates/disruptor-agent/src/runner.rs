//! Orchestration of one disruption: redirect traffic, run the proxy for the
//! requested duration, clean up.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Command;
use crate::proxy::grpc::{self, GrpcDisruption};
use crate::proxy::http::{self, HttpDisruption};
use crate::redirect::TrafficRedirector;

/// Run the disruption described by the parsed command line.
pub async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Http(args) => {
            let disruption = HttpDisruption::try_from(&args)?;
            let redirector = TrafficRedirector::new(
                &args.common.iface,
                args.common.target_port,
                args.common.proxy_port,
            );
            run_with_redirection(redirector, args.common.duration, move |shutdown| {
                http::serve(disruption, shutdown)
            })
            .await
        }
        Command::Grpc(args) => {
            let disruption = GrpcDisruption::try_from(&args)?;
            let redirector = TrafficRedirector::new(
                &args.common.iface,
                args.common.target_port,
                args.common.proxy_port,
            );
            run_with_redirection(redirector, args.common.duration, move |shutdown| {
                grpc::serve(disruption, shutdown)
            })
            .await
        }
    }
}

/// Redirect traffic, run the proxy until the duration elapses (or the agent
/// is interrupted, or the proxy fails), then restore the traffic path.
async fn run_with_redirection<F, Fut>(
    redirector: TrafficRedirector,
    duration: Duration,
    proxy: F,
) -> anyhow::Result<()>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    redirector.install().await?;
    info!(duration_secs = duration.as_secs(), "disruption active");

    let shutdown = CancellationToken::new();
    let mut proxy = tokio::spawn(proxy(shutdown.clone()));

    let outcome: anyhow::Result<()> = tokio::select! {
        _ = tokio::time::sleep(duration) => {
            info!("disruption duration elapsed");
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
        joined = &mut proxy => match joined {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("proxy task failed: {}", e)),
        },
    };

    shutdown.cancel();
    if !proxy.is_finished() {
        let _ = proxy.await;
    }

    // The pod keeps running after the agent exits; leave its traffic intact.
    if let Err(e) = redirector.remove().await {
        warn!(error = %e, "failed to remove traffic redirection");
    }

    outcome
}

//! netgauge - Internet connectivity quality monitor.

use netgauge::web::Server;
use netgauge::{MonitorConfig, NetMonitor, NetProber, RouteObserver, ServerConfig, Subscription};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("netgauge=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = MonitorConfig::load();
    cfg.validate()?;
    let server_cfg = ServerConfig::load();
    tracing::info!(
        "Starting netgauge: probing {:?} and {:?} every {:?}",
        cfg.udp_targets,
        cfg.http_targets,
        cfg.interval
    );

    let monitor: Arc<NetMonitor> =
        Arc::new(NetMonitor::new(cfg, NetProber::new()?, RouteObserver::default()));
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown requested");
                    cancel.cancel();
                }
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    });

    tokio::spawn(log_reports(monitor.subscribe()));

    let runner = tokio::spawn({
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        async move { monitor.start(cancel).await }
    });

    // Serve until shutdown, then make sure the monitor follows
    let served = Server::new(server_cfg, monitor).start(cancel.clone()).await;
    cancel.cancel();
    runner.await??;
    served?;

    Ok(())
}

async fn log_reports(mut reports: Subscription) {
    while let Some(report) = reports.recv().await {
        let all = report.all();
        tracing::info!(
            "Report: quality={:?} path={:?} rate={:.3} mean={:?} http_jitter={:?} dns_jitter={:?}",
            report.quality(),
            report.path_status,
            report.rate(),
            all.map(|s| s.mean),
            report.http_jitter,
            report.dns_jitter
        );
    }
}

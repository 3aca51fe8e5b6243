//! Network path status and the observers that report it.

use serde::Serialize;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Coarse connectivity state of the network path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    Satisfied,
    Unsatisfied,
    #[default]
    RequiresConnection,
}

/// Source of path-status transitions.
pub trait PathObserver: Send + Sync + 'static {
    /// Start observing. Statuses arrive on the returned channel until the
    /// receiver is dropped.
    fn watch(&self) -> mpsc::Receiver<PathStatus>;
}

/// Observer that polls the routing table for a route to a public address.
///
/// Connecting a UDP socket performs a route lookup only; no packet is sent.
#[derive(Debug, Clone)]
pub struct RouteObserver {
    probe_addr: SocketAddr,
    poll_interval: Duration,
}

impl Default for RouteObserver {
    fn default() -> Self {
        Self {
            probe_addr: SocketAddr::from(([8, 8, 8, 8], 53)),
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl RouteObserver {
    pub fn new(probe_addr: SocketAddr, poll_interval: Duration) -> Self {
        Self {
            probe_addr,
            poll_interval,
        }
    }
}

impl PathObserver for RouteObserver {
    fn watch(&self) -> mpsc::Receiver<PathStatus> {
        let (tx, rx) = mpsc::channel(4);
        let probe_addr = self.probe_addr;
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last: Option<PathStatus> = None;
            let mut interval = tokio::time::interval(poll_interval);

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = interval.tick() => {
                        let status = check_route(probe_addr).await;
                        if last == Some(status) {
                            continue;
                        }
                        tracing::info!("Path status changed: {:?} -> {:?}", last, status);
                        last = Some(status);
                        if tx.send(status).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        rx
    }
}

async fn check_route(addr: SocketAddr) -> PathStatus {
    let bind_addr: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Path observer: failed to bind socket: {}", e);
            return PathStatus::RequiresConnection;
        }
    };

    match socket.connect(addr).await {
        Ok(()) => PathStatus::Satisfied,
        Err(e)
            if e.kind() == ErrorKind::NetworkUnreachable
                || e.kind() == ErrorKind::HostUnreachable =>
        {
            PathStatus::Unsatisfied
        }
        Err(e) => {
            tracing::debug!("Path observer: route check failed: {}", e);
            PathStatus::RequiresConnection
        }
    }
}

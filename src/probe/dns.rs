//! UDP reachability probe using a raw DNS exchange on port 53.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use super::ProbeError;

/// Run a UDP probe against the given host.
///
/// The host counts as reachable once it answers a minimal "example.com" A
/// query with a matching transaction ID. Latency is measured from launch,
/// resolution included, and the whole exchange is bounded by `timeout`.
pub async fn run_dns_probe(host: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let start = Instant::now();

    tokio::time::timeout(timeout, dns_exchange(host))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))??;

    Ok(start.elapsed())
}

async fn dns_exchange(host: &str) -> Result<(), ProbeError> {
    // Ensure address has port
    let target_addr = if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]:53", host)
    } else if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:53", host)
    };

    let addr = tokio::net::lookup_host(&target_addr)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to resolve {}: {}", target_addr, e)))?
        .next()
        .ok_or_else(|| ProbeError::Network(format!("no addresses found for {}", target_addr)))?;

    let bind_addr: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to bind socket: {}", e)))?;

    socket
        .connect(addr)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let packet = build_dns_query();
    let tx_id = u16::from_be_bytes([packet[0], packet[1]]);

    socket
        .send(&packet)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to send: {}", e)))?;

    // Read until our reply shows up; stray datagrams are ignored
    let mut response = [0u8; 512];
    loop {
        let n = socket
            .recv(&mut response)
            .await
            .map_err(|e| ProbeError::Network(format!("failed to recv: {}", e)))?;

        if n < 12 {
            continue;
        }

        if u16::from_be_bytes([response[0], response[1]]) == tx_id {
            return Ok(());
        }
    }
}

/// Build a minimal DNS query packet for "example.com" A record.
fn build_dns_query() -> Vec<u8> {
    let tx_id: u16 = rand::random();
    let flags: u16 = 0x0100; // Standard query, recursion desired

    // Header (12 bytes): id, flags, qdcount=1, an/ns/ar counts = 0
    let mut packet = Vec::with_capacity(29);
    packet.extend_from_slice(&tx_id.to_be_bytes());
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes());
    packet.extend_from_slice(&[0u8; 6]);

    // Question: example.com A IN
    packet.extend_from_slice(&[7, b'e', b'x', b'a', b'm', b'p', b'l', b'e']);
    packet.extend_from_slice(&[3, b'c', b'o', b'm']);
    packet.push(0);
    packet.extend_from_slice(&1u16.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes());

    packet
}

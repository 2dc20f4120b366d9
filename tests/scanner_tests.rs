use std::net::{IpAddr, Ipv4Addr};

use lan_recon_rs::config::ScanConfig;
use lan_recon_rs::listener::{self, ReplyMode};
use lan_recon_rs::ports::PortRange;
use lan_recon_rs::scanner::PortScanner;
use lan_recon_rs::types::PortState;
use lan_recon_rs::ReconError;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn quick_config() -> ScanConfig {
    ScanConfig {
        concurrency_cap: 50,
        timeout_ms: 1_000,
    }
}

/// Bind an ephemeral port, then release it so nothing listens there.
async fn free_port() -> u16 {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    l.local_addr().unwrap().port()
}

#[tokio::test]
async fn listening_port_is_open() {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = l.local_addr().unwrap().port();

    let scanner = PortScanner::new(quick_config());
    let results = scanner.scan("127.0.0.1", port, port).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].port, port);
    assert_eq!(results[0].state, PortState::Open);
    drop(l);
}

#[tokio::test]
async fn closed_port_is_closed_every_time() {
    let port = free_port().await;
    let scanner = PortScanner::new(quick_config());

    for _ in 0..2 {
        let results = scanner.scan("127.0.0.1", port, port).await.unwrap();
        assert_eq!(results[0].state, PortState::Closed);
    }
}

#[tokio::test]
async fn reply_listener_shows_up_as_open() {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = l.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    tokio::spawn(listener::serve(l, ReplyMode::Echo, cancel.clone()));

    let start = port.saturating_sub(2);
    let end = port.saturating_add(2);
    let report = PortScanner::new(quick_config())
        .scan_addr(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            PortRange::new(start, end).unwrap(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    cancel.cancel();

    assert_eq!(report.results.len() as u64, PortRange::new(start, end).unwrap().len());
    assert!(report.open().any(|r| r.port == port));
    let ports: Vec<u16> = report.results.iter().map(|r| r.port).collect();
    assert_eq!(ports, (start..=end).collect::<Vec<_>>());
    assert!(report.peak_in_flight <= 50);
}

#[tokio::test]
async fn one_listener_in_a_window_of_closed_ports() {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = l.local_addr().unwrap().port();
    let start = port.saturating_sub(5);
    let end = port.saturating_add(5);

    let results = PortScanner::new(quick_config())
        .scan("127.0.0.1", start, end)
        .await
        .unwrap();
    drop(l);

    assert_eq!(results.len(), usize::from(end - start) + 1);
    let open: Vec<u16> = results.iter().filter(|r| r.is_open()).map(|r| r.port).collect();
    assert_eq!(open, vec![port]);
    assert!(results
        .iter()
        .filter(|r| r.port != port)
        .all(|r| r.state == PortState::Closed));
}

#[tokio::test]
async fn unknown_host_is_fatal() {
    let scanner = PortScanner::new(quick_config());
    let err = scanner
        .scan("no-such-host.invalid", 1, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconError::UnresolvableHost(_)));
}

//! Sluice integration test harness.
//!
//! Tests in this file run real proxies on loopback TCP:
//!
//!   cargo test --test integration
//!
//! Every test binds port 0, so tests may run in parallel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use sluice_core::{StreamDirection, ToxicConfig, ToxicError, ToxicRegistry};
use sluice_services::Proxy;

mod api;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Loopback echo server. Returns its address.
pub async fn echo_server() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = socket.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    Ok(addr)
}

/// A running proxy in front of an echo server.
pub struct Harness {
    pub proxy: Arc<Proxy>,
    pub addr: SocketAddr,
    pub registry: ToxicRegistry,
    _shutdown: broadcast::Sender<()>,
}

impl Harness {
    pub async fn start(name: &str) -> Result<Self> {
        let upstream = echo_server().await?;
        let proxy = Arc::new(Proxy::new(name, "127.0.0.1:0", upstream.to_string()));
        let listener = proxy.bind().await?;
        let addr = listener.local_addr()?;
        let (shutdown, rx) = broadcast::channel(1);
        tokio::spawn(proxy.clone().run(listener, rx));
        Ok(Self {
            proxy,
            addr,
            registry: ToxicRegistry::with_builtin(),
            _shutdown: shutdown,
        })
    }

    pub async fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect(self.addr)
            .await
            .with_context(|| format!("failed to connect to proxy at {}", self.addr))
    }
}

/// Wait until the proxy tracks `n` live connections.
pub async fn wait_for_connections(proxy: &Proxy, n: usize) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while proxy.toxics.connections().await != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("connection count never settled")
}

fn latency(name: &str, stream: StreamDirection, millis: i64) -> ToxicConfig {
    ToxicConfig::new("latency", stream)
        .named(name)
        .with_attributes(json!({ "latency": millis }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn passthrough_without_toxics() -> Result<()> {
    let h = Harness::start("plain").await?;
    let mut conn = h.connect().await?;

    conn.write_all(b"hello sluice").await?;
    let mut buf = [0u8; 12];
    conn.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"hello sluice");

    wait_for_connections(&h.proxy, 1).await?;
    drop(conn);
    wait_for_connections(&h.proxy, 0).await?;
    Ok(())
}

#[tokio::test]
async fn latency_delays_round_trip() -> Result<()> {
    let h = Harness::start("slow").await?;
    h.proxy
        .toxics
        .add(&latency("down", StreamDirection::Downstream, 150), &h.registry)
        .await?;

    let mut conn = h.connect().await?;
    let start = Instant::now();
    conn.write_all(b"ping").await?;
    let mut buf = [0u8; 4];
    conn.read_exact(&mut buf).await?;

    assert_eq!(&buf, b"ping");
    assert!(start.elapsed() >= Duration::from_millis(150));
    Ok(())
}

#[tokio::test]
async fn live_edits_keep_every_byte_in_order() -> Result<()> {
    let h = Harness::start("edits").await?;
    let mut conn = h.connect().await?;
    wait_for_connections(&h.proxy, 1).await?;

    let (mut reader, mut writer) = conn.split();
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let write = async {
        for piece in payload.chunks(1024) {
            writer.write_all(piece).await?;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        writer.shutdown().await?;
        anyhow::Ok(())
    };

    let edit = async {
        for round in 0..5 {
            let name = format!("jitter-{round}");
            let config = latency(&name, StreamDirection::Upstream, 5)
                .with_attributes(json!({ "latency": 5, "jitter": 3 }));
            h.proxy.toxics.add(&config, &h.registry).await?;
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.proxy.toxics.remove(&name).await?;
        }
        anyhow::Ok(())
    };

    let read = async {
        let mut received = Vec::new();
        reader.read_to_end(&mut received).await?;
        anyhow::Ok(received)
    };

    let (w, e, r) = tokio::join!(write, edit, read);
    w?;
    e?;
    assert_eq!(r?, expected);
    Ok(())
}

#[tokio::test]
async fn unknown_toxic_leaves_proxy_unchanged() -> Result<()> {
    let h = Harness::start("strict").await?;
    h.proxy
        .toxics
        .add(&latency("keep", StreamDirection::Upstream, 1), &h.registry)
        .await?;

    let bogus = ToxicConfig::new("bogus", StreamDirection::Upstream);
    let err = h.proxy.toxics.add(&bogus, &h.registry).await.unwrap_err();
    assert!(matches!(err, ToxicError::UnknownType(_)));

    let names: Vec<_> = h
        .proxy
        .toxics
        .list()
        .await
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["keep"]);

    let mut conn = h.connect().await?;
    conn.write_all(b"ok").await?;
    let mut buf = [0u8; 2];
    conn.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"ok");
    Ok(())
}

#[tokio::test]
async fn upstream_latency_applies_to_requests() -> Result<()> {
    let h = Harness::start("oneway").await?;
    h.proxy
        .toxics
        .add(&latency("up", StreamDirection::Upstream, 200), &h.registry)
        .await?;
    let streams: Vec<_> = h
        .proxy
        .toxics
        .list()
        .await
        .into_iter()
        .map(|t| t.stream)
        .collect();
    assert_eq!(streams, vec![StreamDirection::Upstream]);

    let mut conn = h.connect().await?;
    let start = Instant::now();
    conn.write_all(b"x").await?;
    let mut buf = [0u8; 1];
    conn.read_exact(&mut buf).await?;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(2000));
    Ok(())
}

//! TCP proxy: accepts clients, dials the upstream, and runs both
//! directions of each connection through the proxy's toxic chains.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use sluice_core::config::ProxyConfig;
use sluice_core::{StreamDirection, ToxicRegistry};

use crate::collection::{LinkPair, ToxicCollection};
use crate::link::ToxicLink;

pub struct Proxy {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    pub toxics: ToxicCollection,
    next_conn: AtomicU64,
}

/// All proxies by name: shared across tasks.
pub type ProxyTable = Arc<DashMap<String, Arc<Proxy>>>;

pub fn new_proxy_table() -> ProxyTable {
    Arc::new(DashMap::new())
}

impl Proxy {
    pub fn new(
        name: impl Into<String>,
        listen: impl Into<String>,
        upstream: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            toxics: ToxicCollection::new(name.clone()),
            name,
            listen: listen.into(),
            upstream: upstream.into(),
            next_conn: AtomicU64::new(0),
        }
    }

    /// Build a proxy and install the toxics its config declares.
    pub async fn from_config(config: &ProxyConfig, registry: &ToxicRegistry) -> Result<Self> {
        let proxy = Self::new(&config.name, &config.listen, &config.upstream);
        for toxic in &config.toxics {
            proxy
                .toxics
                .add(toxic, registry)
                .await
                .with_context(|| format!("proxy {}: invalid toxic {}", config.name, toxic.resolved_name()))?;
        }
        Ok(proxy)
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.listen)
            .await
            .with_context(|| format!("failed to bind proxy {} on {}", self.name, self.listen))
    }

    /// Accept loop. Returns when `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(proxy = %self.name, listen = %local, upstream = %self.upstream, "proxy listening");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(proxy = %self.name, "proxy shutting down");
                    return Ok(());
                }

                accepted = listener.accept() => {
                    let (client, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(proxy = %self.name, error = %e, "accept failed");
                            continue;
                        }
                    };
                    let proxy = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = proxy.serve(client, peer).await {
                            tracing::warn!(proxy = %proxy.name, %peer, error = %e, "connection failed");
                        }
                    });
                }
            }
        }
    }

    async fn serve(&self, client: TcpStream, peer: SocketAddr) -> Result<()> {
        let server = TcpStream::connect(&self.upstream)
            .await
            .with_context(|| format!("failed to connect to upstream {}", self.upstream))?;
        for (side, stream) in [("client", &client), ("upstream", &server)] {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(proxy = %self.name, side, error = %e, "set_nodelay failed");
            }
        }

        let id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let (client_read, client_write) = client.into_split();
        let (server_read, server_write) = server.into_split();

        let (up_done, down_done) = self
            .toxics
            .attach(id, |toxics| {
                let (upstream, up_done) =
                    ToxicLink::start(client_read, server_write, toxics, StreamDirection::Upstream);
                let (downstream, down_done) = ToxicLink::start(
                    server_read,
                    client_write,
                    toxics,
                    StreamDirection::Downstream,
                );
                (LinkPair { upstream, downstream }, (up_done, down_done))
            })
            .await;
        tracing::info!(proxy = %self.name, conn = id, %peer, "connection opened");

        let (up, down) = tokio::join!(up_done, down_done);
        self.toxics.detach(id).await;

        let up = up.context("upstream link task failed")?;
        let down = down.context("downstream link task failed")?;
        tracing::info!(
            proxy = %self.name,
            conn = id,
            upstream_bytes = up.as_ref().ok(),
            downstream_bytes = down.as_ref().ok(),
            "connection closed"
        );
        Ok(())
    }
}

//! Control API over real HTTP.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use sluice_api::ApiState;
use sluice_core::ToxicRegistry;
use sluice_services::new_proxy_table;

use crate::Harness;

async fn start_api(h: &Harness) -> Result<String> {
    let proxies = new_proxy_table();
    proxies.insert(h.proxy.name.clone(), h.proxy.clone());
    let state = ApiState {
        proxies,
        registry: Arc::new(ToxicRegistry::with_builtin()),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    tokio::spawn(sluice_api::serve_on(state, listener));
    Ok(addr)
}

/// Minimal HTTP/1.1 request. Returns the status code and the JSON body.
async fn request(addr: &str, method: &str, path: &str, body: Option<Value>) -> Result<(u16, Value)> {
    let mut conn = TcpStream::connect(addr).await?;
    let body = body.map(|b| b.to_string()).unwrap_or_default();
    let head = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    conn.write_all(head.as_bytes()).await?;
    conn.write_all(body.as_bytes()).await?;

    let mut raw = Vec::new();
    conn.read_to_end(&mut raw).await?;
    let text = String::from_utf8_lossy(&raw);

    let status = text
        .split_whitespace()
        .nth(1)
        .context("missing status line")?
        .parse()?;
    let payload = text.split("\r\n\r\n").nth(1).unwrap_or_default().trim();
    let json = serde_json::from_str(payload).unwrap_or(Value::Null);
    Ok((status, json))
}

#[tokio::test]
async fn toxic_lifecycle_over_http() -> Result<()> {
    let h = Harness::start("api").await?;
    let addr = start_api(&h).await?;

    let (status, added) = request(
        &addr,
        "POST",
        "/api/proxies/api/toxics",
        Some(json!({
            "type": "latency",
            "stream": "downstream",
            "attributes": { "latency": 25 }
        })),
    )
    .await?;
    assert_eq!(status, 200);
    assert_eq!(added["name"], "latency_downstream");

    let (status, list) = request(&addr, "GET", "/api/proxies/api/toxics", None).await?;
    assert_eq!(status, 200);
    assert_eq!(list.as_array().map(Vec::len), Some(1));

    let (status, updated) = request(
        &addr,
        "POST",
        "/api/proxies/api/toxics/latency_downstream",
        Some(json!({ "attributes": { "jitter": 5 } })),
    )
    .await?;
    assert_eq!(status, 200);
    assert_eq!(updated["attributes"]["latency"], 25);
    assert_eq!(updated["attributes"]["jitter"], 5);

    let (status, proxies) = request(&addr, "GET", "/api/proxies", None).await?;
    assert_eq!(status, 200);
    assert_eq!(proxies["proxies"][0]["name"], "api");

    let (status, _) = request(&addr, "POST", "/api/reset", None).await?;
    assert_eq!(status, 200);
    assert!(h.proxy.toxics.list().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn rejected_edits_report_status() -> Result<()> {
    let h = Harness::start("api-errors").await?;
    let addr = start_api(&h).await?;

    let (status, _) = request(
        &addr,
        "POST",
        "/api/proxies/api-errors/toxics",
        Some(json!({ "type": "bogus" })),
    )
    .await?;
    assert_eq!(status, 400);

    let (status, _) = request(&addr, "GET", "/api/proxies/missing/toxics", None).await?;
    assert_eq!(status, 404);

    let (status, _) = request(
        &addr,
        "DELETE",
        "/api/proxies/api-errors/toxics/nothing",
        None,
    )
    .await?;
    assert_eq!(status, 404);
    Ok(())
}

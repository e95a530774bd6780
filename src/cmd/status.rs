//! `fulcrum status`: inspect a running instance.
//!
//! Sends a `GET /metrics` request to the specified URL and displays
//! traffic and per-backend counters as formatted text or raw JSON.

use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::cli::StatusArgs;
use crate::error::FulcrumError;
use crate::metrics::MetricsReport;

pub async fn execute(args: StatusArgs) -> Result<(), FulcrumError> {
    let url = format!("{}/metrics", args.url.trim_end_matches('/'));
    let uri: hyper::Uri = url
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| FulcrumError::UriParse {
            source: Box::new(e),
        })?;

    let connector = hyper_util::client::legacy::connect::HttpConnector::new();
    let client = Client::builder(TokioExecutor::new()).build(connector);

    let req = hyper::Request::builder()
        .uri(uri)
        .body(http_body_util::Full::new(bytes::Bytes::new()))
        .map_err(|e| FulcrumError::HttpRequest {
            source: Box::new(e),
        })?;

    let response = tokio::time::timeout(std::time::Duration::from_secs(10), client.request(req))
        .await
        .map_err(|_| FulcrumError::HttpRequest {
            source: "status request timed out after 10s".into(),
        })?
        .map_err(|e| FulcrumError::HttpRequest {
            source: Box::new(e),
        })?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| FulcrumError::HttpRequest {
            source: Box::new(e),
        })?
        .to_bytes();

    if !status.is_success() {
        return Err(FulcrumError::StatusCheckFailed(status));
    }

    if args.json {
        println!("{}", String::from_utf8_lossy(&body));
        return Ok(());
    }

    match serde_json::from_slice::<MetricsReport>(&body) {
        Ok(report) => print!("{}", render(&args.url, &report)),
        Err(e) => {
            eprintln!("Failed to parse metrics response: {e}");
            println!("{}", String::from_utf8_lossy(&body));
        }
    }

    Ok(())
}

fn render(url: &str, report: &MetricsReport) -> String {
    use std::fmt::Write;

    let lb = &report.load_balancer;
    let mut out = String::new();
    let _ = writeln!(out, "\u{2713} fulcrum is running ({url})");
    let _ = writeln!(out, "  uptime:    {}", report.uptime.formatted);
    let _ = writeln!(
        out,
        "  strategy:  {} (affinity {})",
        lb.strategy,
        if lb.session_affinity { "on" } else { "off" }
    );
    let _ = writeln!(
        out,
        "  backends:  {}/{} healthy",
        lb.healthy_servers, lb.total_servers
    );
    let _ = writeln!(
        out,
        "  traffic:   {} requests, {:.2} req/s, {}% errors\n",
        report.traffic.total_requests,
        report.traffic.requests_per_second,
        report.traffic.error_rate
    );

    for server in &report.servers {
        let mark = if server.healthy { "\u{2713}" } else { "\u{2717}" };
        let _ = writeln!(
            out,
            "  {mark} {:<12} {}:{:<6} weight {:<3} {:>6} req {:>5} err {:>3}%",
            server.id,
            server.host,
            server.port,
            server.weight,
            server.requests,
            server.errors,
            server.load_percentage
        );
    }
    out
}

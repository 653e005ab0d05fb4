use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_posts_fetched_total", "Wall posts returned by the source.");
        describe_counter!(
            "relay_posts_delivered_total",
            "Posts accepted by a destination webhook."
        );
        describe_counter!(
            "relay_posts_skipped_total",
            "Posts marked seen without delivery (pinned/video)."
        );
        describe_counter!(
            "relay_delivery_attempts_total",
            "Webhook POST attempts, retries included."
        );
        describe_counter!(
            "relay_delivery_failures_total",
            "Posts whose delivery exhausted all attempts."
        );
        describe_counter!("relay_fetch_errors_total", "Source fetch failures.");
        describe_counter!(
            "relay_dedup_evicted_total",
            "Seen keys evicted by the high/low-water prune."
        );
        describe_histogram!("relay_fetch_ms", "Source API call time in milliseconds.");
        describe_gauge!("relay_dedup_size", "Seen keys currently held.");
        describe_gauge!("relay_last_pass_ts", "Unix ts when the last polling pass ended.");
    });
}

/// Install the Prometheus recorder with its own HTTP listener on `addr`.
/// Must be called from within a Tokio runtime.
pub fn install_prometheus(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("parsing metrics_addr {addr:?}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus: install recorder")?;
    ensure_metrics_described();
    Ok(())
}

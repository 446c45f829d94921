//! Prometheus metrics and the diagnostics endpoint.

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

lazy_static! {
    pub static ref ENTITIES_RESTORED: IntCounterVec = register_int_counter_vec!(
        "berth_entities_restored_total",
        "Entities restored into the registry at startup",
        &["kind"]
    )
    .unwrap();
    pub static ref RESTORE_FAILURES: IntCounterVec = register_int_counter_vec!(
        "berth_restore_failures_total",
        "Entities skipped during restoration",
        &["kind"]
    )
    .unwrap();
    pub static ref EXIT_EVENTS: IntCounterVec = register_int_counter_vec!(
        "berth_exit_events_total",
        "Exit-notification events, by handling outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref STREAM_SESSIONS: IntCounterVec = register_int_counter_vec!(
        "berth_stream_sessions_total",
        "Streaming sessions registered, by kind",
        &["kind"]
    )
    .unwrap();
}

/// Start the metrics endpoint in a background task.
pub fn start_metrics_server(port: u16) {
    // Force initialization of metrics
    lazy_static::initialize(&ENTITIES_RESTORED);
    lazy_static::initialize(&RESTORE_FAILURES);
    lazy_static::initialize(&EXIT_EVENTS);
    lazy_static::initialize(&STREAM_SESSIONS);

    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                tracing::info!(addr = %addr, "Metrics endpoint listening");
                loop {
                    if let Ok((mut socket, _)) = listener.accept().await {
                        tokio::spawn(async move {
                            let body = render_metrics();
                            let response = format!(
                                "HTTP/1.0 200 OK\r\nConnection: close\r\nContent-Length: {}\r\nContent-Type: text/plain\r\n\r\n{}",
                                body.len(),
                                body
                            );
                            let _ = socket.write_all(response.as_bytes()).await;
                            let _ = socket.flush().await;
                        });
                    }
                }
            }
            Err(e) => {
                tracing::error!(addr = %addr, error = %e, "Failed to bind metrics endpoint");
            }
        }
    });
}

fn render_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }

    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = EXIT_EVENTS.with_label_values(&["refreshed"]).get();
        EXIT_EVENTS.with_label_values(&["refreshed"]).inc();
        assert_eq!(EXIT_EVENTS.with_label_values(&["refreshed"]).get(), before + 1);
    }

    #[test]
    fn test_render_metrics_includes_registered_families() {
        ENTITIES_RESTORED.with_label_values(&["sandbox"]).inc();
        let body = render_metrics();
        assert!(body.contains("berth_entities_restored_total"));
    }
}

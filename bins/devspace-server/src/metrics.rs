// Prometheus metrics for sessions, environments and runs
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "devspace_sessions_active",
        "Number of open WebSocket sessions"
    )
    .expect("metric can be created");
    pub static ref ENVIRONMENTS_PROVISIONED: IntCounterVec = register_int_counter_vec!(
        "devspace_environments_provisioned_total",
        "Environment provisioning attempts by language and outcome",
        &["language", "outcome"]
    )
    .expect("metric can be created");
    pub static ref RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "devspace_runs_total",
        "Run requests by language and outcome",
        &["language", "outcome"]
    )
    .expect("metric can be created");
    pub static ref RUN_DURATION: HistogramVec = register_histogram_vec!(
        "devspace_run_duration_seconds",
        "Wall time of run requests including provisioning",
        &["language"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("metric can be created");
    pub static ref FILE_WRITES: IntCounterVec = register_int_counter_vec!(
        "devspace_file_writes_total",
        "File synchronization writes by outcome",
        &["outcome"]
    )
    .expect("metric can be created");
}

/// Render the default registry in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        RUNS_TOTAL.with_label_values(&["python", "ok"]).inc();
        FILE_WRITES.with_label_values(&["ok"]).inc();
        let text = render();
        assert!(text.contains("devspace_runs_total"));
        assert!(text.contains("devspace_file_writes_total"));
    }
}

//! Prometheus recorder install and metric descriptions.

use anyhow::Context;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if a recorder is
    /// already installed.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_pipeline_metrics();
        Ok(Self { handle })
    }
}

/// Descriptions for the series emitted outside the feed reader.
pub fn describe_pipeline_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_total", "Digests produced, by outcome.");
        describe_counter!("delivery_attempted_total", "Recipients a delivery was attempted for.");
        describe_counter!("delivery_succeeded_total", "Recipients reached.");
        describe_counter!(
            "delivery_fallback_total",
            "Recipients reached only through the fallback identity."
        );
        describe_counter!("pipeline_cycles_total", "Pipeline cycles, by outcome.");
        describe_counter!("pipeline_faults_total", "Cycles that ended in a fault.");
        describe_gauge!("pipeline_last_cycle_ts", "Unix time of the last finished cycle.");
    });
}

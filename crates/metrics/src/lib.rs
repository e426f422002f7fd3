//! Metrics collection and export for vision.
//!
//! A unified interface over the `metrics` crate facade. With the
//! `prometheus` feature enabled the recorder can be installed once at
//! startup and scraped from the gateway's `/metrics` endpoint.
//!
//! ```rust,ignore
//! use vision_metrics::{counter, capture};
//!
//! counter!(capture::SNAPSHOTS_TOTAL, "browser" => "chromium").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

#[cfg(feature = "prometheus")]
pub use metrics_exporter_prometheus::PrometheusHandle;

/// Install the Prometheus recorder and return a handle that renders the
/// scrape body. Call once, from the binary.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
) -> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new();
    Ok(recorder.install_recorder()?)
}

//! Prometheus metrics for the ticket engine.
//!
//! Counters are recorded with the `metrics` facade wherever the coordinator
//! accepts or rejects work; [`MetricsServer`] installs the Prometheus recorder
//! and renders the scrape payload.
//!
//! # Example
//!
//! ```rust,no_run
//! use kawach_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let body = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Tickets opened
pub const TICKETS_CREATED_TOTAL: &str = "kawach_tickets_created_total";
/// Pings appended
pub const LOCATION_PINGS_TOTAL: &str = "kawach_location_pings_total";
/// Media attach calls, labelled `outcome` = `created` | `duplicate`
pub const MEDIA_ATTACHED_TOTAL: &str = "kawach_media_attached_total";
/// Status transitions, labelled `to`
pub const TRANSITIONS_TOTAL: &str = "kawach_transitions_total";
/// Requests that gave up waiting for a ticket lock
pub const BUSY_REJECTIONS_TOTAL: &str = "kawach_busy_rejections_total";
/// Change events a sink dropped, labelled `sink`
pub const PUBLISH_DROPPED_TOTAL: &str = "kawach_publish_dropped_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address its scrape endpoint is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe the engine metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// [`MetricsError::Install`] when the recorder cannot be installed. A
    /// recorder that is already installed (common in tests) is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                register_engine_metrics();
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Address the scrape endpoint should listen on
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register descriptions for every engine metric.
pub fn register_engine_metrics() {
    describe_counter!(TICKETS_CREATED_TOTAL, "Total number of emergency tickets opened");
    describe_counter!(LOCATION_PINGS_TOTAL, "Total number of location pings appended");
    describe_counter!(
        MEDIA_ATTACHED_TOTAL,
        "Total number of media attach calls by outcome (created, duplicate)"
    );
    describe_counter!(TRANSITIONS_TOTAL, "Total number of ticket status transitions by target status");
    describe_counter!(
        BUSY_REJECTIONS_TOTAL,
        "Total number of mutations rejected because the ticket lock stayed busy"
    );
    describe_counter!(
        PUBLISH_DROPPED_TOTAL,
        "Total number of change events a sink could not accept"
    );
}

//! Push-based observability for the ensemble engine
//!
//! Nothing listens for requests. Metrics leave the process as:
//!
//! 1. **Structured JSON logs**: a periodic `METRICS_JSON:` line on stdout
//! 2. **Prometheus text**: [`Metrics::render`] for scraping sidecars or push jobs

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;

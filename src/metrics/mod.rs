//! Metrics module
//!
//! Prometheus collectors for the S3 backend. Each backend owns its own set
//! so that several logs in one process can register theirs independently;
//! [`S3Metrics::collectors`] hands them out in a stable order:
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `s3_requests_total` | counter | `method`, `code` |
//! | `s3_request_duration_seconds` | summary | `method`, `code` |
//! | `s3_upload_size_bytes` | summary | |
//! | `s3_compress_ratio` | summary | |
//! | `s3_hedges_total` | counter | |
//! | `s3_hedges_successful_total` | counter | |
//!
//! Summaries use a one minute window of six age buckets.

pub mod summary;

pub use summary::{Snapshot, Summary, SummaryChild, SummaryOpts, SummaryVec};

use prometheus::core::Collector;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::time::Duration;

const WINDOW: Duration = Duration::from_secs(60);
const AGE_BUCKETS: u32 = 6;

const DURATION_OBJECTIVES: &[(f64, f64)] = &[(0.5, 0.05), (0.75, 0.025), (0.9, 0.01), (0.99, 0.001)];
const SIZE_OBJECTIVES: &[(f64, f64)] = &[(0.5, 0.05), (0.9, 0.01), (0.99, 0.001)];

/// Collectors for one S3 backend
#[derive(Clone, Debug)]
pub struct S3Metrics {
    /// HTTP requests by method and response code, one per attempt
    pub requests: IntCounterVec,
    pub request_duration: SummaryVec,
    /// On-the-wire PUT body size, after compression
    pub upload_size: Summary,
    pub compress_ratio: Summary,
    pub hedges: IntCounter,
    pub hedge_wins: IntCounter,
}

impl S3Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new(
                "s3_requests_total",
                "S3 HTTP requests performed, by method and response code.",
            ),
            &["method", "code"],
        )?;
        let request_duration = SummaryVec::new(
            SummaryOpts::new(
                "s3_request_duration_seconds",
                "S3 HTTP request latencies, by method and response code.",
            )
            .objectives(DURATION_OBJECTIVES)
            .max_age(WINDOW)
            .age_buckets(AGE_BUCKETS),
            &["method", "code"],
        )?;
        let upload_size = Summary::with_opts(
            SummaryOpts::new(
                "s3_upload_size_bytes",
                "S3 (compressed) body size in bytes for object puts.",
            )
            .objectives(SIZE_OBJECTIVES)
            .max_age(WINDOW)
            .age_buckets(AGE_BUCKETS),
        )?;
        let compress_ratio = Summary::with_opts(
            SummaryOpts::new(
                "s3_compress_ratio",
                "Ratio of compressed to uncompressed body size for compressible object puts.",
            )
            .max_age(WINDOW)
            .age_buckets(AGE_BUCKETS),
        )?;
        let hedges = IntCounter::new(
            "s3_hedges_total",
            "S3 hedge requests that were launched because the main request was too slow.",
        )?;
        let hedge_wins = IntCounter::new(
            "s3_hedges_successful_total",
            "S3 hedge requests that completed before the main request.",
        )?;

        Ok(Self {
            requests,
            request_duration,
            upload_size,
            compress_ratio,
            hedges,
            hedge_wins,
        })
    }

    /// All collectors, in registration order
    pub fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.requests.clone()),
            Box::new(self.request_duration.clone()),
            Box::new(self.upload_size.clone()),
            Box::new(self.compress_ratio.clone()),
            Box::new(self.hedges.clone()),
            Box::new(self.hedge_wins.clone()),
        ]
    }

    /// Register every collector with `registry`
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        for collector in self.collectors() {
            registry.register(collector)?;
        }
        Ok(())
    }
}

/// Record one completed HTTP exchange
pub fn record_request(metrics: &S3Metrics, method: &str, code: u16, elapsed: Duration) {
    let code = code.to_string();
    metrics
        .requests
        .with_label_values(&[method, code.as_str()])
        .inc();
    metrics
        .request_duration
        .with_label_values(&[method, code.as_str()])
        .observe(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_collector_order_is_stable() {
        let metrics = S3Metrics::new().unwrap();
        let names: Vec<String> = metrics
            .collectors()
            .iter()
            .map(|c| c.desc()[0].fq_name.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                "s3_requests_total",
                "s3_request_duration_seconds",
                "s3_upload_size_bytes",
                "s3_compress_ratio",
                "s3_hedges_total",
                "s3_hedges_successful_total",
            ]
        );
    }

    #[test]
    fn test_register_twice_in_one_registry_fails() {
        let metrics = S3Metrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }

    #[test]
    fn test_two_backends_use_separate_registries() {
        let a = S3Metrics::new().unwrap();
        let b = S3Metrics::new().unwrap();
        a.register(&Registry::new()).unwrap();
        b.register(&Registry::new()).unwrap();
    }

    #[test]
    fn test_record_request() {
        let metrics = S3Metrics::new().unwrap();
        record_request(&metrics, "put", 200, Duration::from_millis(12));
        record_request(&metrics, "put", 200, Duration::from_millis(30));
        record_request(&metrics, "get", 404, Duration::from_millis(3));

        assert_eq!(metrics.requests.with_label_values(&["put", "200"]).get(), 2);
        assert_eq!(metrics.requests.with_label_values(&["get", "404"]).get(), 1);
        let snapshot = metrics
            .request_duration
            .with_label_values(&["put", "200"])
            .snapshot();
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.quantiles.len(), 4);
    }

    #[test]
    fn test_exposition_format() {
        let metrics = S3Metrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        metrics.hedges.inc();
        metrics.upload_size.observe(5.0);
        record_request(&metrics, "put", 200, Duration::from_millis(5));

        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buf)
            .unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("s3_hedges_total 1"));
        assert!(text.contains("s3_hedges_successful_total 0"));
        assert!(text.contains("s3_upload_size_bytes_count 1"));
        assert!(text.contains("s3_requests_total{code=\"200\",method=\"put\"} 1"));
        assert!(text.contains("# TYPE s3_request_duration_seconds summary"));
    }
}

use std::sync::Arc;

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;

use crate::config::HistogramConfig;

/// Counters and histograms for the classification/reconstruction engine.
///
/// Every field here backs one of the error-kind counters from the spec's
/// error-handling design: only `TransportFailure` is ever surfaced as an
/// `Err`, everything else (`UnknownProtocol`, `InvalidFrame`,
/// `ResourceExhausted`, `OrphanFrame`) is reflected here.
#[derive(Clone)]
pub struct Metrics {
    pub trackers_created_total: Counter<u64>,
    pub trackers_destroyed_total: Counter<u64>,
    pub trackers_active: UpDownCounter<i64>,
    pub trackers_evicted_total: Counter<u64>,

    pub frames_classified_total: Counter<u64>,
    pub frames_unknown_total: Counter<u64>,

    pub frames_invalid_total: Counter<u64>,
    pub stream_resyncs_total: Counter<u64>,
    pub stream_resets_total: Counter<u64>,

    pub buffer_bytes_dropped_total: Counter<u64>,
    pub frame_queue_dropped_total: Counter<u64>,

    pub records_emitted_total: Counter<u64>,
    pub records_dropped_total: Counter<u64>,
    pub orphan_requests_total: Counter<u64>,
    pub orphan_responses_total: Counter<u64>,

    pub match_latency_seconds: Histogram<f64>,
}

impl Metrics {
    /// `histogram` supplies `match_latency_seconds`'s bucket boundaries
    /// (§6: "fixed bucket set supplied at startup") — without it the OTel
    /// SDK would fall back to its own default boundaries regardless of what
    /// an embedder configured.
    pub fn new(meter: Meter, histogram: &HistogramConfig) -> Self {
        Self {
            trackers_created_total: meter
                .u64_counter("l7probe_trackers_created_total")
                .with_description("Total number of connection trackers created")
                .build(),
            trackers_destroyed_total: meter
                .u64_counter("l7probe_trackers_destroyed_total")
                .with_description("Total number of connection trackers destroyed")
                .build(),
            trackers_active: meter
                .i64_up_down_counter("l7probe_trackers_active")
                .with_description("Number of connection trackers currently held")
                .build(),
            trackers_evicted_total: meter
                .u64_counter("l7probe_trackers_evicted_total")
                .with_description("Total number of trackers evicted for idleness or LRU pressure")
                .build(),

            frames_classified_total: meter
                .u64_counter("l7probe_frames_classified_total")
                .with_description("Total number of byte prefixes classified into a protocol")
                .build(),
            frames_unknown_total: meter
                .u64_counter("l7probe_frames_unknown_total")
                .with_description("Total number of byte prefixes that matched no enabled protocol")
                .build(),

            frames_invalid_total: meter
                .u64_counter("l7probe_frames_invalid_total")
                .with_description("Total number of parse_one calls that returned INVALID")
                .build(),
            stream_resyncs_total: meter
                .u64_counter("l7probe_stream_resyncs_total")
                .with_description("Total number of find_boundary resynchronisations after INVALID")
                .build(),
            stream_resets_total: meter
                .u64_counter("l7probe_stream_resets_total")
                .with_description("Total number of streams reset after hitting the stuck-counter threshold")
                .build(),

            buffer_bytes_dropped_total: meter
                .u64_counter("l7probe_buffer_bytes_dropped_total")
                .with_description("Total number of raw buffer bytes dropped on cap overflow")
                .build(),
            frame_queue_dropped_total: meter
                .u64_counter("l7probe_frame_queue_dropped_total")
                .with_description("Total number of pending frames dropped on queue cap overflow")
                .build(),

            records_emitted_total: meter
                .u64_counter("l7probe_records_emitted_total")
                .with_description("Total number of matched request/response records emitted")
                .build(),
            records_dropped_total: meter
                .u64_counter("l7probe_records_dropped_total")
                .with_description("Total number of records dropped on output queue overflow")
                .build(),
            orphan_requests_total: meter
                .u64_counter("l7probe_orphan_requests_total")
                .with_description("Total number of request frames evicted unmatched after T_orphan")
                .build(),
            orphan_responses_total: meter
                .u64_counter("l7probe_orphan_responses_total")
                .with_description("Total number of response frames evicted unmatched after T_orphan")
                .build(),

            match_latency_seconds: meter
                .f64_histogram("l7probe_match_latency_seconds")
                .with_description("Request-to-response latency of matched records, in seconds")
                .with_boundaries(histogram.bucket_bounds_seconds())
                .build(),
        }
    }
}

/// Build a `Metrics` backed by a fresh Prometheus-exporting meter provider.
///
/// Mirrors the teacher's `init_metrics`; wiring the returned `Registry` up to
/// an HTTP `/metrics` endpoint is bootstrap concern and lives outside this
/// crate.
pub fn init_metrics(
    histogram: &HistogramConfig,
) -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(meter_provider);

    let meter = global::meter("l7-probe-core");
    let metrics = Arc::new(Metrics::new(meter, histogram));

    Ok((metrics, registry))
}

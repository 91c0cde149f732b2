//! Prometheus metrics, exposed at `GET /metrics`.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,

    pub packets_in: IntCounter,
    pub packets_out: IntCounter,
    pub packets_dropped: IntCounter,
    pub unknown_packet_types: IntCounter,
    pub decode_errors: IntCounter,
    pub link_reconnects: IntCounter,
    pub link_connected: IntGauge,

    pub api_requests: IntCounterVec,
    pub api_errors: IntCounter,
    pub rate_limited: IntCounter,

    pub events_published: IntCounter,
    pub events_delivered: IntCounter,
    pub events_queued_offline: IntCounter,

    pub sessions_active: IntGauge,
    pub clients_connected: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let c = IntCounter::with_opts(Opts::new(name, help)).unwrap();
            registry.register(Box::new(c.clone())).unwrap();
            c
        }
        fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
            let g = IntGauge::with_opts(Opts::new(name, help)).unwrap();
            registry.register(Box::new(g.clone())).unwrap();
            g
        }

        let api_requests = IntCounterVec::new(
            Opts::new("i3_gateway_api_requests_total", "API requests by method"),
            &["method"],
        )
        .unwrap();
        registry.register(Box::new(api_requests.clone())).unwrap();

        Self {
            packets_in: counter(&registry, "i3_gateway_packets_in_total", "Inbound I3 packets"),
            packets_out: counter(&registry, "i3_gateway_packets_out_total", "Outbound I3 packets"),
            packets_dropped: counter(
                &registry,
                "i3_gateway_packets_dropped_total",
                "Packets dropped by TTL, backpressure or decode policy",
            ),
            unknown_packet_types: counter(
                &registry,
                "i3_gateway_unknown_packet_types_total",
                "Inbound packets of unknown type",
            ),
            decode_errors: counter(
                &registry,
                "i3_gateway_decode_errors_total",
                "Frames that failed LPC or packet decoding",
            ),
            link_reconnects: counter(
                &registry,
                "i3_gateway_link_reconnects_total",
                "Router link reconnect attempts",
            ),
            link_connected: gauge(
                &registry,
                "i3_gateway_link_connected",
                "1 when the router link is connected",
            ),
            api_errors: counter(&registry, "i3_gateway_api_errors_total", "API error responses"),
            rate_limited: counter(
                &registry,
                "i3_gateway_rate_limited_total",
                "API calls rejected by the rate limiter",
            ),
            events_published: counter(
                &registry,
                "i3_gateway_events_published_total",
                "Events accepted by the bus",
            ),
            events_delivered: counter(
                &registry,
                "i3_gateway_events_delivered_total",
                "Events delivered to connected sessions",
            ),
            events_queued_offline: counter(
                &registry,
                "i3_gateway_events_queued_offline_total",
                "Events appended to offline queues",
            ),
            sessions_active: gauge(
                &registry,
                "i3_gateway_sessions_active",
                "Sessions known to the store",
            ),
            clients_connected: gauge(
                &registry,
                "i3_gateway_clients_connected",
                "Clients with a live transport connection",
            ),
            api_requests,
            registry,
        }
    }

    /// Render the registry in Prometheus text format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "metrics encoding failed");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_with_prefix() {
        let metrics = Metrics::new();
        metrics.packets_in.inc();
        metrics.api_requests.with_label_values(&["tell"]).inc();
        let text = metrics.render();
        assert!(text.contains("i3_gateway_packets_in_total 1"));
        assert!(text.contains("i3_gateway_api_requests_total{method=\"tell\"} 1"));
    }
}

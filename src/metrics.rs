//! Lightweight metrics helpers for Trellis.
//!
//! Convenience functions and an RAII timer wrapping the `metrics` crate
//! macros. No exporter is bundled; the embedding application installs any
//! compatible recorder. Without one, every call is a no-op.
//!
//! Provided metrics (labels vary by family):
//! * `trellis_dispatch_total` (counter, `kind`/`outcome`)
//! * `trellis_request_duration_seconds` (histogram, `kind`)
//! * `trellis_websocket_sessions_total` (counter)
//! * `trellis_websocket_messages_total` (counter, `direction`)
//! * `trellis_active_websockets` (gauge)
//! * `trellis_lifespan_events_total` (counter, `event`/`outcome`)
//! * `trellis_middleware_inner_failures_total` (counter)
use std::time::{Duration, Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const TRELLIS_DISPATCH_TOTAL: &str = "trellis_dispatch_total";
pub const TRELLIS_REQUEST_DURATION_SECONDS: &str = "trellis_request_duration_seconds";
pub const TRELLIS_WEBSOCKET_SESSIONS_TOTAL: &str = "trellis_websocket_sessions_total";
pub const TRELLIS_WEBSOCKET_MESSAGES_TOTAL: &str = "trellis_websocket_messages_total"; // labels: direction
pub const TRELLIS_ACTIVE_WEBSOCKETS: &str = "trellis_active_websockets";
pub const TRELLIS_LIFESPAN_EVENTS_TOTAL: &str = "trellis_lifespan_events_total"; // labels: event, outcome
pub const TRELLIS_MIDDLEWARE_INNER_FAILURES_TOTAL: &str =
    "trellis_middleware_inner_failures_total";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        TRELLIS_DISPATCH_TOTAL,
        Unit::Count,
        "Router dispatch decisions by scope kind and outcome."
    );
    describe_histogram!(
        TRELLIS_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Time spent inside the application per connection."
    );
    describe_counter!(
        TRELLIS_WEBSOCKET_SESSIONS_TOTAL,
        Unit::Count,
        "Total websocket sessions accepted."
    );
    describe_counter!(
        TRELLIS_WEBSOCKET_MESSAGES_TOTAL,
        Unit::Count,
        "Websocket data frames by direction."
    );
    describe_gauge!(
        TRELLIS_ACTIVE_WEBSOCKETS,
        "Websocket connections currently held by the registry."
    );
    describe_counter!(
        TRELLIS_LIFESPAN_EVENTS_TOTAL,
        Unit::Count,
        "Lifespan startup/shutdown events by outcome."
    );
    describe_counter!(
        TRELLIS_MIDDLEWARE_INNER_FAILURES_TOTAL,
        Unit::Count,
        "Inner application failures captured by the streaming middleware adapter."
    );
});

/// Record one router dispatch decision.
pub fn record_dispatch(kind: &str, outcome: &'static str) {
    counter!(
        TRELLIS_DISPATCH_TOTAL,
        "kind" => kind.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_request_duration(kind: &str, duration: Duration) {
    histogram!(TRELLIS_REQUEST_DURATION_SECONDS, "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Increment accepted websocket session counter.
pub fn increment_websocket_sessions() {
    counter!(TRELLIS_WEBSOCKET_SESSIONS_TOTAL).increment(1);
}

/// Record a websocket data frame (`direction` is `inbound` or `outbound`).
pub fn increment_websocket_message(direction: &'static str) {
    counter!(TRELLIS_WEBSOCKET_MESSAGES_TOTAL, "direction" => direction).increment(1);
}

pub fn set_active_websockets(count: usize) {
    gauge!(TRELLIS_ACTIVE_WEBSOCKETS).set(count as f64);
}

pub fn record_lifespan_event(event: &'static str, outcome: &'static str) {
    counter!(
        TRELLIS_LIFESPAN_EVENTS_TOTAL,
        "event" => event,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn increment_middleware_inner_failures() {
    counter!(TRELLIS_MIDDLEWARE_INNER_FAILURES_TOTAL).increment(1);
}

/// RAII helper measuring how long a connection spent in the application.
pub struct RequestTimer {
    start: Instant,
    kind: String,
}

impl RequestTimer {
    pub fn new(kind: &str) -> Self {
        Self {
            start: Instant::now(),
            kind: kind.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.kind, self.start.elapsed());
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing Trellis metrics");
    Lazy::force(&DESCRIPTIONS);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_timer() {
        let timer = RequestTimer::new("http");
        // Timer will record duration when dropped
        drop(timer);
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_dispatch("http", "full");
        increment_websocket_message("inbound");
        record_lifespan_event("startup", "complete");
        set_active_websockets(3);
    }
}

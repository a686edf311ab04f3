// ── Analytics sink ──
//
// Named events for each state transition, delivered fire-and-forget.
// The trait is infallible: a sink that fails must swallow the failure
// itself, so analytics can never affect orchestration control flow.

use serde_json::Value;
use tracing::info;

/// Named orchestration events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AnalyticsEvent {
    ReaderDiscoveryStarted,
    ReaderDiscoveryFailed,
    ReaderConnectionSuccess,
    ReaderConnectionFailed,
    ReaderSoftwareUpdateStarted,
    ReaderSoftwareUpdateCompleted,
    ReaderSoftwareUpdateFailed,
    ReaderDisconnected,
    PaymentStarted,
    PaymentWaitingForInput,
    PaymentSucceeded,
    PaymentFailed,
    PaymentCancelled,
    PaymentCaptureRetried,
}

/// Consumer of orchestration analytics.
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: AnalyticsEvent, properties: Value);
}

/// Default sink: structured log lines under the `tapdeck::analytics`
/// target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalyticsSink;

impl AnalyticsSink for TracingAnalyticsSink {
    fn track(&self, event: AnalyticsEvent, properties: Value) {
        info!(target: "tapdeck::analytics", %event, %properties, "analytics");
    }
}

/// Sink that drops everything; used in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalyticsSink;

impl AnalyticsSink for NoopAnalyticsSink {
    fn track(&self, _event: AnalyticsEvent, _properties: Value) {}
}

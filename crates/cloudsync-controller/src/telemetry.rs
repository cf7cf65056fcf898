use cloudsync_core::{TelemetryEvent, TelemetrySink};
use tracing::info;

/// Writes telemetry events to the `cloudsync::telemetry` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn track(&self, event: TelemetryEvent) {
        info!(target: "cloudsync::telemetry", name = event.name(), event = ?event, "telemetry");
    }
}

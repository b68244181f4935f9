//! Metrics infrastructure for upyrepl.
//!
//! Every metric the stack emits is declared here as a [`Metric`] constant so the
//! names live in one place. The `metrics` crate is re-exported for convenience;
//! when no recorder is installed every emission is a no-op.
//!
//! # Example
//!
//! ```rust,ignore
//! use upyrepl_metrics::{describe_metrics, metric_defs, port_labels};
//!
//! describe_metrics();
//! metrics::counter!(metric_defs::REPL_ROUND_TRIPS.name, &port_labels("/dev/ttyUSB0")).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A histogram for recording distributions.
    Histogram,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "upyrepl.repl.round_trips").
    pub name: &'static str,
    /// Counter or histogram.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement.
    pub unit: Unit,
}

impl Metric {
    /// Declare a counter.
    pub const fn counter(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Metric {
            name,
            kind: MetricKind::Counter,
            description,
            unit,
        }
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Metric {
            name,
            kind: MetricKind::Histogram,
            description,
            unit,
        }
    }

    /// Register this metric's description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => {
                describe_counter!(self.name, self.unit, self.description);
            }
            MetricKind::Histogram => {
                describe_histogram!(self.name, self.unit, self.description);
            }
        }
    }
}

/// All metric definitions.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Label key carrying the port name.
    pub const PORT_LABEL: &str = "port";

    /// Commands submitted in raw mode.
    pub const REPL_ROUND_TRIPS: Metric = Metric::counter(
        "upyrepl.repl.round_trips",
        "Commands submitted to the device in raw mode",
        Unit::Count,
    );

    /// Time from command submission to the end of the error section.
    pub const REPL_ROUND_TRIP_TIME: Metric = Metric::histogram(
        "upyrepl.repl.round_trip_time_ms",
        "Time from command submission to the end of the error section",
        Unit::Milliseconds,
    );

    /// Reads that ran out of time before their terminator arrived.
    pub const REPL_TIMEOUTS: Metric = Metric::counter(
        "upyrepl.repl.timeouts",
        "Reads that timed out waiting for a terminator",
        Unit::Count,
    );

    /// Commands whose error section was non-empty.
    pub const REPL_REMOTE_ERRORS: Metric = Metric::counter(
        "upyrepl.repl.remote_errors",
        "Commands that raised an exception on the device",
        Unit::Count,
    );

    /// Interrupt sequences sent to cancel a streaming run.
    pub const REPL_INTERRUPTS: Metric = Metric::counter(
        "upyrepl.repl.stream_interrupts",
        "Interrupts sent to cancel streaming executions",
        Unit::Count,
    );

    /// Bytes written to the device by uploads.
    pub const FS_UPLOAD_BYTES: Metric = Metric::counter(
        "upyrepl.fs.upload_bytes",
        "File bytes written to the device",
        Unit::Bytes,
    );

    /// Bytes read from the device by downloads.
    pub const FS_DOWNLOAD_BYTES: Metric = Metric::counter(
        "upyrepl.fs.download_bytes",
        "File bytes read from the device",
        Unit::Bytes,
    );

    /// All metric definitions.
    pub const ALL: &[&Metric] = &[
        &REPL_ROUND_TRIPS,
        &REPL_ROUND_TRIP_TIME,
        &REPL_TIMEOUTS,
        &REPL_REMOTE_ERRORS,
        &REPL_INTERRUPTS,
        &FS_UPLOAD_BYTES,
        &FS_DOWNLOAD_BYTES,
    ];
}

/// Labels attached to every metric emitted for one connection.
pub fn port_labels(port: &str) -> Vec<(&'static str, String)> {
    vec![(metric_defs::PORT_LABEL, port.to_string())]
}

/// Register descriptions for every metric. Call once at startup, after
/// installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

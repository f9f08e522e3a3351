//! Firmware side of the controller telemetry ring.
//!
//! The core records [`ControllerEvent`]s into a [`TelemetryRecorder`] owned by
//! the control task. After every loop iteration the task calls [`drain`],
//! which mirrors everything recorded since the previous call to defmt on the
//! target and to stdout on host builds.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::time::Duration;

use embassy_time::Instant;
use signal_core::telemetry::{
    ControllerEvent, EventId, TelemetryInstant, TelemetryRecord, TelemetryRecorder,
};

/// Monotonic instant wrapper used to stamp controller events.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[cfg(target_os = "none")]
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub const fn into_embassy(self) -> Instant {
        self.0
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        let micros = self
            .0
            .checked_duration_since(earlier.0)
            .map_or(0, |elapsed| elapsed.as_micros());
        Duration::from_micros(micros)
    }
}

/// Recorder type owned by the control task.
pub type FirmwareTelemetry = TelemetryRecorder<FirmwareInstant>;

/// How loudly an event is logged.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
}

/// Faults and degraded modes are warnings; normal operation is info.
#[must_use]
pub const fn severity(event: &ControllerEvent) -> Severity {
    match event {
        ControllerEvent::FallbackEntered(_)
        | ControllerEvent::ManualFlashEngaged
        | ControllerEvent::ClockFault
        | ControllerEvent::CommandRejected { .. } => Severity::Warn,
        _ => Severity::Info,
    }
}

/// Logs every record with an id at or after `cursor` and returns the cursor
/// for the next call.
pub fn drain(recorder: &FirmwareTelemetry, cursor: EventId) -> EventId {
    for record in recorder.since(cursor) {
        log_record(record);
    }
    recorder.next_id()
}

fn log_record(record: &TelemetryRecord<FirmwareInstant>) {
    let timestamp_ms = record.timestamp.into_embassy().as_millis();
    let delta_ms = record
        .since_previous
        .map(|delta| u64::try_from(delta.as_millis()).unwrap_or(u64::MAX));
    emit_log(
        severity(&record.event),
        &record.event,
        record.id,
        timestamp_ms,
        delta_ms,
    );
}

#[cfg(target_os = "none")]
fn emit_log(
    severity: Severity,
    event: &ControllerEvent,
    id: EventId,
    timestamp_ms: u64,
    delta_ms: Option<u64>,
) {
    match (severity, delta_ms) {
        (Severity::Warn, Some(delta)) => {
            defmt::warn!("telemetry #{} {} t={}ms Δ={}ms", id, event, timestamp_ms, delta);
        }
        (Severity::Warn, None) => defmt::warn!("telemetry #{} {} t={}ms", id, event, timestamp_ms),
        (Severity::Info, Some(delta)) => {
            defmt::info!("telemetry #{} {} t={}ms Δ={}ms", id, event, timestamp_ms, delta);
        }
        (Severity::Info, None) => defmt::info!("telemetry #{} {} t={}ms", id, event, timestamp_ms),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(
    severity: Severity,
    event: &ControllerEvent,
    id: EventId,
    timestamp_ms: u64,
    delta_ms: Option<u64>,
) {
    let level = match severity {
        Severity::Info => "info",
        Severity::Warn => "warn",
    };
    if let Some(delta) = delta_ms {
        println!("[{level}] telemetry #{id} {event} t={timestamp_ms}ms Δ={delta}ms");
    } else {
        println!("[{level}] telemetry #{id} {event} t={timestamp_ms}ms");
    }
}

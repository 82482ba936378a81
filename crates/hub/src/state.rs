use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Maximum number of event-log entries retained in the ring buffer.
/// Oldest entries are evicted once the cap is reached; the buffer is
/// cleared only by process restart.
const MAX_EVENTS: usize = 200;

/// Number of individually addressed moisture sensors on the device.
pub const SENSOR_COUNT: usize = 9;

/// Sentinel reported for a sensor that sent no value.
pub const SENSOR_UNAVAILABLE: &str = "not available";

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<TelemetryState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// In-process shared state: the latest sensor snapshot plus the event-log
/// ring buffer. Neither survives a restart.
pub struct TelemetryState {
    pub snapshot: SensorSnapshot,
    events: VecDeque<EventLogEntry>,
}

/// The single most recent reading set. Unset numeric/string fields
/// serialize as null; sensors that never reported carry the
/// `"not available"` sentinel.
#[derive(Debug, Clone, Serialize)]
pub struct SensorSnapshot {
    pub average_moisture: Option<f64>,
    pub relay_status: Option<String>,
    pub sensors: [String; SENSOR_COUNT],
}

#[derive(Debug, Clone, Serialize)]
pub struct EventLogEntry {
    /// Server-assigned at the moment of receipt (RFC 3339).
    pub ts: String,
    pub moisture: Option<f64>,
    pub relay_status: Option<String>,
    pub last_sensor: Option<String>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SensorSnapshot {
    /// The all-unset value served before the first accepted update.
    pub fn unset() -> Self {
        Self {
            average_moisture: None,
            relay_status: None,
            sensors: std::array::from_fn(|_| SENSOR_UNAVAILABLE.to_string()),
        }
    }
}

impl TelemetryState {
    pub fn new() -> Self {
        Self {
            snapshot: SensorSnapshot::unset(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Replace the cached snapshot wholesale. No fields are carried over
    /// from the previous snapshot.
    pub fn replace_snapshot(&mut self, snapshot: SensorSnapshot) {
        self.snapshot = snapshot;
    }

    /// Append an event-log entry, stamping it with the receipt time.
    /// Returns the stored entry so the caller can echo it back.
    pub fn append_event(
        &mut self,
        moisture: Option<f64>,
        relay_status: Option<String>,
        last_sensor: Option<String>,
    ) -> EventLogEntry {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        let entry = EventLogEntry {
            ts: Utc::now().to_rfc3339(),
            moisture,
            relay_status,
            last_sensor,
        };
        self.events.push_back(entry.clone());
        entry
    }

    /// Full event log in append (arrival) order.
    pub fn events(&self) -> Vec<EventLogEntry> {
        self.events.iter().cloned().collect()
    }
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

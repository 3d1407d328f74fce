// ── Alarm delivery ──
//
// The engine decides *when* an alarm changes state; delivering it to an
// operator is somebody else's job. `AlarmSink` is that seam.

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::model::{Alarm, AlarmKind};

/// Receiver of alarm raises and clears.
pub trait AlarmSink: Send + Sync {
    fn raise(&self, alarm: Alarm);
}

/// Default sink: alarms become structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlarmSink;

impl AlarmSink for TracingAlarmSink {
    fn raise(&self, alarm: Alarm) {
        let ctrlr = alarm.ctrlr.as_deref().unwrap_or("-");
        let domain = alarm.domain.as_deref().unwrap_or("-");
        let vtn = alarm.vtn.as_deref().unwrap_or("-");
        if alarm.asserted {
            warn!(kind = %alarm.kind, ctrlr, domain, vtn, "alarm raised");
        } else {
            info!(kind = %alarm.kind, ctrlr, domain, vtn, "alarm cleared");
        }
    }
}

/// Sink that keeps every alarm in memory, in delivery order.
#[derive(Debug, Default)]
pub struct RecordingAlarmSink {
    alarms: Mutex<Vec<Alarm>>,
}

impl RecordingAlarmSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        self.alarms.lock().clone()
    }

    /// Alarms of one kind as `(asserted, ctrlr)` pairs.
    pub fn transitions(&self, kind: AlarmKind) -> Vec<(bool, Option<String>)> {
        self.alarms
            .lock()
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| (a.asserted, a.ctrlr.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.alarms.lock().clear();
    }
}

impl AlarmSink for RecordingAlarmSink {
    fn raise(&self, alarm: Alarm) {
        self.alarms.lock().push(alarm);
    }
}

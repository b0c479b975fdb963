use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use rakshak_audit_log::{AuditRecord, AuditSink, JsonLogger, LogLevel};
use rakshak_event_bus::{EventPublisher, SafetyEvent};
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::{
    actuator::ActuatorResult,
    dispatch::DispatchRecord,
    incident::{Alert, Incident},
    transport::spawn_worker,
};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Event type emitted when an incident is stored.
pub const INCIDENT_RECORDED: &str = "guardian.incident.recorded";
/// Event type emitted when an alert is issued.
pub const ALERT_ISSUED: &str = "guardian.alert.issued";
/// Event type emitted when a dispatch is appended.
pub const DISPATCH_RECORDED: &str = "guardian.dispatch.recorded";
/// Event type emitted when an actuator command fails.
pub const ACTUATOR_FAILED: &str = "guardian.actuator.failed";

/// Builder for [`GuardianTelemetry`].
pub struct GuardianTelemetryBuilder {
    component: String,
    log_path: Option<PathBuf>,
    sink: Option<Arc<dyn AuditSink>>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
    event_capacity: usize,
}

impl GuardianTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            log_path: None,
            sink: None,
            event_publisher: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Writes the audit trail as JSON lines to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Writes the audit trail to a custom sink; overrides [`Self::log_path`].
    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Events queued for the publisher before new ones are dropped.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Builds the telemetry handle.
    ///
    /// Events go through a bounded queue drained by a background worker, on
    /// the current runtime or on a dedicated thread outside one.
    ///
    /// # Errors
    ///
    /// Fails when the audit log file cannot be opened.
    pub fn build(self) -> Result<GuardianTelemetry> {
        let sink = match (self.sink, self.log_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => Some(Arc::new(JsonLogger::new(path)?) as Arc<dyn AuditSink>),
            (None, None) => None,
        };
        Ok(GuardianTelemetry {
            inner: Arc::new(TelemetryInner {
                component: self.component,
                sink,
                events: self
                    .event_publisher
                    .map(|publisher| EventHandle::spawn(publisher, self.event_capacity)),
            }),
        })
    }
}

/// Audit and event handle shared by the guardian components.
///
/// Without a sink or publisher every call is a no-op.
#[derive(Clone)]
pub struct GuardianTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for GuardianTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardianTelemetry")
            .field("component", &self.inner.component)
            .field("audit", &self.inner.sink.is_some())
            .field("events", &self.inner.events.is_some())
            .finish()
    }
}

impl Default for GuardianTelemetry {
    fn default() -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                component: "guardian".to_string(),
                sink: None,
                events: None,
            }),
        }
    }
}

struct TelemetryInner {
    component: String,
    sink: Option<Arc<dyn AuditSink>>,
    events: Option<EventHandle>,
}

struct EventHandle {
    sender: mpsc::Sender<SafetyEvent>,
    // Events accepted but not yet handed to the publisher.
    pending: Arc<AtomicUsize>,
}

impl EventHandle {
    fn spawn(publisher: Arc<dyn EventPublisher>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        spawn_worker(
            "rakshak-events",
            drain(publisher, receiver, Arc::clone(&pending)),
        );
        Self { sender, pending }
    }

    fn publish(&self, event: SafetyEvent) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.sender.try_send(event).map_err(|err| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            match err {
                TrySendError::Full(event) => {
                    anyhow!("event queue full, {} dropped", event.event_type)
                }
                TrySendError::Closed(event) => {
                    anyhow!("event worker stopped, {} dropped", event.event_type)
                }
            }
        })
    }
}

async fn drain(
    publisher: Arc<dyn EventPublisher>,
    mut receiver: mpsc::Receiver<SafetyEvent>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(event) = receiver.recv().await {
        if let Err(err) = publisher.publish(event).await {
            tracing::warn!(error = %err, "telemetry event publish failed");
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
}

impl GuardianTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(component: impl Into<String>) -> GuardianTelemetryBuilder {
        GuardianTelemetryBuilder::new(component)
    }

    /// Appends an audit record.
    ///
    /// # Errors
    ///
    /// Propagates sink failures.
    pub fn audit(
        &self,
        level: LogLevel,
        vehicle_id: Option<&str>,
        message: &str,
        fields: Value,
    ) -> Result<()> {
        if let Some(sink) = &self.inner.sink {
            let mut record = AuditRecord::new(&self.inner.component, level, message).with_fields(fields);
            if let Some(vehicle_id) = vehicle_id {
                record = record.for_vehicle(vehicle_id);
            }
            sink.append(&record)?;
        }
        Ok(())
    }

    /// Queues an event for publishing without waiting.
    ///
    /// # Errors
    ///
    /// Fails when the event queue is full or its worker has stopped.
    pub fn event(&self, event_type: &str, vehicle_id: Option<&str>, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.events {
            handle.publish(SafetyEvent {
                id: format!("evt-{}", Uuid::new_v4()),
                source: self.inner.component.clone(),
                event_type: event_type.to_string(),
                vehicle_id: vehicle_id.map(str::to_string),
                timestamp: chrono::Utc::now().to_rfc3339(),
                payload,
            })?;
        }
        Ok(())
    }

    /// Waits until every queued event reached the publisher.
    /// Returns `false` when `timeout` elapses first.
    #[must_use]
    pub fn flush(&self, timeout: Duration) -> bool {
        let Some(events) = &self.inner.events else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while events.pending.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Audits and announces a stored incident.
    pub fn incident_recorded(&self, incident: &Incident) {
        let payload = json!({
            "incident_id": incident.incident_id(),
            "incident_type": incident.incident_type(),
            "severity": incident.severity(),
            "actions_taken": incident.actions_taken(),
            "sos_sent": incident.sos_sent(),
        });
        self.report(
            LogLevel::Warn,
            incident.vehicle_id(),
            INCIDENT_RECORDED,
            incident.description(),
            payload,
        );
    }

    /// Audits and announces an issued alert.
    pub fn alert_issued(&self, alert: &Alert) {
        let payload = json!({
            "alert_id": alert.alert_id(),
            "incident_id": alert.incident_id(),
            "severity": alert.severity(),
            "recipients": alert.target_recipients(),
        });
        self.report(
            LogLevel::Warn,
            alert.vehicle_id(),
            ALERT_ISSUED,
            alert.message("en"),
            payload,
        );
    }

    /// Audits and announces a dispatch.
    pub fn dispatch_recorded(&self, record: &DispatchRecord) {
        let payload = json!({
            "dispatch_id": record.dispatch_id,
            "kind": record.kind,
            "recipients": record.recipients,
        });
        self.report(
            LogLevel::Critical,
            &record.vehicle_id,
            DISPATCH_RECORDED,
            &record.message,
            payload,
        );
    }

    /// Audits and announces a failed actuator command.
    pub fn actuator_failed(&self, vehicle_id: &str, result: &ActuatorResult) {
        let payload = json!({
            "action": result.action,
            "error": result.error,
        });
        self.report(
            LogLevel::Error,
            vehicle_id,
            ACTUATOR_FAILED,
            &result.action,
            payload,
        );
    }

    // Telemetry is best effort; failures are traced and dropped.
    fn report(&self, level: LogLevel, vehicle_id: &str, event_type: &str, message: &str, payload: Value) {
        let mut fields = payload.clone();
        if let Some(obj) = fields.as_object_mut() {
            obj.insert("event_type".to_string(), json!(event_type));
        }
        if let Err(err) = self.audit(level, Some(vehicle_id), message, fields) {
            tracing::warn!(error = %err, event_type, "audit write failed");
        }
        if let Err(err) = self.event(event_type, Some(vehicle_id), payload) {
            tracing::warn!(error = %err, event_type, "event publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{IncidentType, Location, Severity};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rakshak_audit_log::MemoryLogger;
    use rakshak_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    struct GatedPublisher {
        gate: Mutex<()>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventPublisher for GatedPublisher {
        async fn publish(&self, event: SafetyEvent) -> Result<()> {
            drop(self.gate.lock());
            self.seen.lock().push(event.event_type);
            Ok(())
        }
    }

    fn incident() -> Incident {
        Incident::new(
            "INC-FATIGUE-1-000001",
            "BUS-1",
            IncidentType::Fatigue,
            Severity::Critical,
            Location::default(),
            "Driver asleep at the wheel",
        )
    }

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("guardian.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = GuardianTelemetry::builder("guardian")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();

        telemetry.incident_recorded(&incident());
        assert!(telemetry.flush(Duration::from_secs(5)));

        let records = JsonLogger::read_all(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].vehicle_id.as_deref(), Some("BUS-1"));
        assert_eq!(records[0].fields["event_type"], INCIDENT_RECORDED);
        let events = bus.events_for("BUS-1");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, INCIDENT_RECORDED);
    }

    #[test]
    fn custom_sink_takes_precedence() {
        let memory = Arc::new(MemoryLogger::new(8));
        let telemetry = GuardianTelemetry::builder("guardian")
            .log_path("/nonexistent/dir/guardian.log")
            .audit_sink(memory.clone())
            .build()
            .unwrap();
        telemetry
            .audit(LogLevel::Info, None, "startup", json!({ "vehicles": 0 }))
            .unwrap();
        assert_eq!(memory.snapshot()[0].message, "startup");
    }

    #[test]
    fn default_handle_is_silent() {
        let telemetry = GuardianTelemetry::default();
        telemetry.incident_recorded(&incident());
        assert!(telemetry.event(ALERT_ISSUED, None, json!({})).is_ok());
    }

    #[test]
    fn full_event_queue_drops_without_blocking() {
        let publisher = Arc::new(GatedPublisher {
            gate: Mutex::new(()),
            seen: Mutex::new(Vec::new()),
        });
        let telemetry = GuardianTelemetry::builder("guardian")
            .event_publisher(publisher.clone())
            .event_capacity(1)
            .build()
            .unwrap();

        let gate = publisher.gate.lock();
        let started = Instant::now();
        let outcomes: Vec<bool> = [INCIDENT_RECORDED, ALERT_ISSUED, DISPATCH_RECORDED]
            .into_iter()
            .map(|kind| telemetry.event(kind, Some("BUS-1"), json!({})).is_ok())
            .collect();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(outcomes[0]);
        assert!(outcomes.contains(&false));
        drop(gate);

        assert!(telemetry.flush(Duration::from_secs(5)));
        let accepted = outcomes.iter().filter(|ok| **ok).count();
        assert_eq!(publisher.seen.lock().len(), accepted);
        assert_eq!(publisher.seen.lock()[0], INCIDENT_RECORDED);
    }
}

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    actuator::{
        ActionLogEntry, ActuatorBus, ActuatorCommand, ActuatorResult, ActuatorSnapshot,
        ActuatorState, EmergencyResponse, FlashPattern, Intensity, SimulatedActuatorBus,
    },
    config::GuardianConfig,
    dispatch::{DispatchOutcome, DispatchRecord, DispatchRouter, EmergencyContact, SosRequest},
    fatigue::{DriverSignals, FatigueClassifier, FatigueResult, FatigueState},
    incident::{Alert, Incident, IncidentType, Location, Severity},
    ledger::IncidentLedger,
    speed::{AlertLevel, SpeedReading, SpeedResult, SpeedStatus, SpeedTracker},
    telemetry::GuardianTelemetry,
    transport::{DeliveryReceipt, DispatchOutbox, Transport},
    VehicleId,
};

const SLEEP_VIBRATION_S: u32 = 3;
const SPEEDING_VIBRATION_S: u32 = 2;

/// Answer to a driver-signal reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverReport {
    /// Classification.
    #[serde(flatten)]
    pub result: FatigueResult,
    /// Incident raised by the reading, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
}

/// Answer to a speed reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedReport {
    /// Tracker output.
    #[serde(flatten)]
    pub result: SpeedResult,
    /// Incident raised by the reading, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
}

/// Point-in-time view of one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    /// Vehicle.
    pub vehicle_id: VehicleId,
    /// Latest fatigue state.
    pub fatigue_state: FatigueState,
    /// Latest fatigue score, if any driver reading arrived.
    pub last_fatigue_score: Option<u32>,
    /// Last known position.
    pub location: Location,
    /// Actuator flags.
    pub actuator_state: ActuatorSnapshot,
    /// Overspeed tracker state.
    pub speed_state: SpeedStatus,
}

impl VehicleStatus {
    fn unknown(vehicle_id: &str) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            fatigue_state: FatigueState::Normal,
            last_fatigue_score: None,
            location: Location::default(),
            actuator_state: ActuatorSnapshot::default(),
            speed_state: SpeedStatus::default(),
        }
    }
}

/// Mutable state owned by one vehicle.
#[derive(Debug)]
struct VehicleMonitor {
    vehicle_id: VehicleId,
    speed: SpeedTracker,
    actuators: ActuatorState,
    fatigue_state: FatigueState,
    last_fatigue_score: Option<u32>,
    location: Location,
}

impl VehicleMonitor {
    fn status(&self) -> VehicleStatus {
        VehicleStatus {
            vehicle_id: self.vehicle_id.clone(),
            fatigue_state: self.fatigue_state,
            last_fatigue_score: self.last_fatigue_score,
            location: self.location,
            actuator_state: self.actuators.snapshot(),
            speed_state: self.speed.status(),
        }
    }
}

/// Builder for [`MonitoringCoordinator`].
#[derive(Default)]
pub struct MonitoringCoordinatorBuilder {
    config: GuardianConfig,
    bus: Option<Arc<dyn ActuatorBus>>,
    transport: Option<Arc<dyn Transport>>,
    telemetry: Option<GuardianTelemetry>,
    ledger: Option<IncidentLedger>,
}

impl MonitoringCoordinatorBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: GuardianConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the actuator bus; defaults to [`SimulatedActuatorBus`].
    #[must_use]
    pub fn actuator_bus(mut self, bus: Arc<dyn ActuatorBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Delivers dispatches through `transport` via a bounded outbox.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the telemetry handle.
    #[must_use]
    pub fn telemetry(mut self, telemetry: GuardianTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Shares an existing ledger.
    #[must_use]
    pub fn ledger(mut self, ledger: IncidentLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Builds the coordinator.
    #[must_use]
    pub fn build(self) -> MonitoringCoordinator {
        let mut router = DispatchRouter::new(self.config.services.clone());
        if let Some(transport) = self.transport {
            router = router.with_outbox(DispatchOutbox::spawn(transport, self.config.outbox_capacity));
        }
        MonitoringCoordinator {
            classifier: FatigueClassifier::new(),
            bus: self.bus.unwrap_or_else(|| Arc::new(SimulatedActuatorBus)),
            vehicles: RwLock::new(IndexMap::new()),
            ledger: self.ledger.unwrap_or_default(),
            router,
            telemetry: self.telemetry.unwrap_or_default(),
            config: self.config,
        }
    }
}

/// Registry of per-vehicle monitors applying the graduated response.
///
/// Each vehicle has its own lock, so readings for one vehicle are
/// serialized while different vehicles proceed in parallel. Locks are
/// always taken vehicle first, then ledger or router.
pub struct MonitoringCoordinator {
    config: GuardianConfig,
    classifier: FatigueClassifier,
    bus: Arc<dyn ActuatorBus>,
    vehicles: RwLock<IndexMap<VehicleId, Arc<Mutex<VehicleMonitor>>>>,
    ledger: IncidentLedger,
    router: DispatchRouter,
    telemetry: GuardianTelemetry,
}

impl std::fmt::Debug for MonitoringCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringCoordinator")
            .field("vehicles", &self.vehicles.read().len())
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl Default for MonitoringCoordinator {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MonitoringCoordinator {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> MonitoringCoordinatorBuilder {
        MonitoringCoordinatorBuilder::default()
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &GuardianConfig {
        &self.config
    }

    /// Shared incident ledger.
    #[must_use]
    pub const fn ledger(&self) -> &IncidentLedger {
        &self.ledger
    }

    /// Shared dispatch router.
    #[must_use]
    pub const fn router(&self) -> &DispatchRouter {
        &self.router
    }

    /// Vehicles with state, in first-seen order.
    #[must_use]
    pub fn vehicles(&self) -> Vec<VehicleId> {
        self.vehicles.read().keys().cloned().collect()
    }

    fn monitor(&self, vehicle_id: &str) -> Arc<Mutex<VehicleMonitor>> {
        if let Some(monitor) = self.existing(vehicle_id) {
            return monitor;
        }
        let mut vehicles = self.vehicles.write();
        Arc::clone(vehicles.entry(vehicle_id.to_string()).or_insert_with(|| {
            tracing::info!(vehicle_id, "monitoring new vehicle");
            Arc::new(Mutex::new(VehicleMonitor {
                vehicle_id: vehicle_id.to_string(),
                speed: SpeedTracker::new(self.config.speed),
                actuators: ActuatorState::new(
                    vehicle_id,
                    Arc::clone(&self.bus),
                    self.config.pa_languages.clone(),
                ),
                fatigue_state: FatigueState::Normal,
                last_fatigue_score: None,
                location: Location::default(),
            }))
        }))
    }

    fn existing(&self, vehicle_id: &str) -> Option<Arc<Mutex<VehicleMonitor>>> {
        self.vehicles.read().get(vehicle_id).cloned()
    }

    /// Classifies a driver reading and escalates fatigue or sleep.
    #[instrument(skip(self, signals))]
    pub fn submit_driver_reading(&self, vehicle_id: &str, signals: &DriverSignals) -> DriverReport {
        let monitor = self.monitor(vehicle_id);
        let mut monitor = monitor.lock();

        let result = self.classifier.classify(signals);
        monitor.fatigue_state = result.state;
        monitor.last_fatigue_score = Some(result.fatigue_score);

        let incident_id = match result.state {
            FatigueState::Normal => None,
            FatigueState::Fatigue => {
                Some(self.escalate_fatigue(&mut monitor, Severity::High, "Driver fatigue detected"))
            }
            FatigueState::Sleep => Some(self.escalate_fatigue(
                &mut monitor,
                Severity::Critical,
                "Driver micro-sleep detected",
            )),
        };
        DriverReport { result, incident_id }
    }

    /// Tracks a speed reading and escalates overspeed.
    #[instrument(skip(self, reading))]
    pub fn submit_speed_reading(&self, vehicle_id: &str, reading: &SpeedReading) -> SpeedReport {
        let monitor = self.monitor(vehicle_id);
        let mut monitor = monitor.lock();

        let result = monitor.speed.process(reading);
        let severity = match result.alert_level {
            AlertLevel::Normal => None,
            AlertLevel::Warning => Some(Severity::Medium),
            AlertLevel::High => Some(Severity::High),
            AlertLevel::Critical | AlertLevel::Sustained => Some(Severity::Critical),
        };
        let incident_id =
            severity.map(|severity| self.escalate_speeding(&mut monitor, &result, severity));
        SpeedReport { result, incident_id }
    }

    fn escalate_fatigue(
        &self,
        monitor: &mut VehicleMonitor,
        severity: Severity,
        description: &str,
    ) -> String {
        let mut incident = Incident::new(
            self.ledger.next_incident_id(IncidentType::Fatigue),
            monitor.vehicle_id.clone(),
            IncidentType::Fatigue,
            severity,
            monitor.location,
            description,
        );
        incident.add_action("PERCEIVE: DRIVER FATIGUE");
        self.alert_driver(monitor, &mut incident);

        if severity == Severity::Critical {
            self.step(
                monitor,
                &mut incident,
                &ActuatorCommand::SeatVibration {
                    intensity: Intensity::High,
                    duration_s: SLEEP_VIBRATION_S,
                },
                "SEAT VIBRATION",
            );
            incident.trigger_sos();
            let outcome = self.router.send_sos_alert(&SosRequest {
                vehicle_id: &monitor.vehicle_id,
                incident_type: IncidentType::Fatigue.label(),
                severity,
                location: monitor.location,
                details: description,
            });
            incident.add_action("ACT: SENDING SOS TO EMERGENCY SERVICES");
            self.note_dispatch(&mut incident, &outcome);
        }

        self.file(incident, false)
    }

    fn escalate_speeding(
        &self,
        monitor: &mut VehicleMonitor,
        result: &SpeedResult,
        severity: Severity,
    ) -> String {
        let description = format!(
            "Speeding {:.1}km/h over limit {:.1}km/h (level={})",
            result.over_by_kmh, result.speed_limit_kmh, result.alert_level
        );
        let mut incident = Incident::new(
            self.ledger.next_incident_id(IncidentType::Speeding),
            monitor.vehicle_id.clone(),
            IncidentType::Speeding,
            severity,
            monitor.location,
            description,
        );
        self.alert_driver(monitor, &mut incident);

        let critical = severity == Severity::Critical;
        if critical {
            self.step(
                monitor,
                &mut incident,
                &ActuatorCommand::SeatVibration {
                    intensity: Intensity::High,
                    duration_s: SPEEDING_VIBRATION_S,
                },
                "SEAT VIBRATION",
            );
            let outcome = self.router.notify_fleet_manager(
                &monitor.vehicle_id,
                IncidentType::Speeding.label(),
                severity,
                monitor.location,
                incident.description(),
                &self.config.fleet_contact,
            );
            incident.add_action("ACT: NOTIFY FLEET MANAGER");
            self.note_dispatch(&mut incident, &outcome);
        }

        self.file(incident, critical)
    }

    fn alert_driver(&self, monitor: &mut VehicleMonitor, incident: &mut Incident) {
        self.step(
            monitor,
            incident,
            &ActuatorCommand::DriverAlertTone {
                intensity: Intensity::High,
            },
            "DRIVER ALERT TONE",
        );
        self.step(
            monitor,
            incident,
            &ActuatorCommand::FlashCabinLights {
                pattern: FlashPattern::Fast,
            },
            "FLASH CABIN LIGHTS",
        );
    }

    fn step(
        &self,
        monitor: &mut VehicleMonitor,
        incident: &mut Incident,
        command: &ActuatorCommand,
        label: &str,
    ) {
        let result = monitor.actuators.apply(command);
        if result.is_success() {
            incident.add_action(format!("ACT: {label}"));
        } else {
            let error = result.error.as_deref().unwrap_or("unknown error");
            incident.add_action(format!("FAILED: {label}: {error}"));
            self.telemetry.actuator_failed(&monitor.vehicle_id, &result);
        }
    }

    fn note_dispatch(&self, incident: &mut Incident, outcome: &DispatchOutcome) {
        self.telemetry.dispatch_recorded(&outcome.record);
        if let Some(err) = &outcome.error {
            incident.add_action(format!("FAILED: DISPATCH DELIVERY: {err}"));
        }
    }

    // Stores the incident and its single alert.
    fn file(&self, incident: Incident, fleet_notified: bool) -> String {
        let mut recipients: IndexSet<String> = self
            .router
            .emergency_contacts(incident.vehicle_id())
            .into_iter()
            .map(|contact| contact.phone)
            .collect();
        if fleet_notified {
            recipients.insert(self.config.fleet_contact.clone());
        }

        let alert = self.ledger.file(incident.clone(), recipients);
        tracing::warn!(
            vehicle_id = incident.vehicle_id(),
            incident_id = incident.incident_id(),
            severity = incident.severity().label(),
            "{}",
            incident.description()
        );
        self.telemetry.incident_recorded(&incident);
        self.telemetry.alert_issued(&alert);
        incident.incident_id().to_string()
    }

    /// Moves the vehicle's last known position.
    pub fn update_location(&self, vehicle_id: &str, location: Location) {
        self.monitor(vehicle_id).lock().location = location;
    }

    /// Clears the overspeed episode. Returns `false` for unknown vehicles.
    pub fn reset_speed_tracker(&self, vehicle_id: &str) -> bool {
        self.existing(vehicle_id).map_or(false, |monitor| {
            monitor.lock().speed.reset();
            true
        })
    }

    /// Runs one actuator command on a vehicle.
    #[instrument(skip(self))]
    pub fn actuate(&self, vehicle_id: &str, command: &ActuatorCommand) -> ActuatorResult {
        let monitor = self.monitor(vehicle_id);
        let mut monitor = monitor.lock();
        let result = monitor.actuators.apply(command);
        if !result.is_success() {
            self.telemetry.actuator_failed(vehicle_id, &result);
        }
        result
    }

    /// Runs the evacuation sequence on a vehicle.
    #[instrument(skip(self))]
    pub fn execute_emergency_response(&self, vehicle_id: &str, incident_type: &str) -> EmergencyResponse {
        let monitor = self.monitor(vehicle_id);
        let mut monitor = monitor.lock();
        let response = monitor.actuators.execute_emergency_response(incident_type);
        for failed in response.actions.iter().filter(|result| !result.is_success()) {
            self.telemetry.actuator_failed(vehicle_id, failed);
        }
        response
    }

    /// Switches the emergency systems off; driver alerts keep running.
    pub fn deactivate_emergency_systems(&self, vehicle_id: &str) -> ActuatorResult {
        self.actuate(vehicle_id, &ActuatorCommand::DeactivateAll)
    }

    /// Actuator audit log for a vehicle.
    #[must_use]
    pub fn actuator_log(&self, vehicle_id: &str) -> Vec<ActionLogEntry> {
        self.existing(vehicle_id)
            .map(|monitor| monitor.lock().actuators.log().to_vec())
            .unwrap_or_default()
    }

    /// Current state of a vehicle; defaults when never seen.
    #[must_use]
    pub fn vehicle_status(&self, vehicle_id: &str) -> VehicleStatus {
        self.existing(vehicle_id).map_or_else(
            || VehicleStatus::unknown(vehicle_id),
            |monitor| monitor.lock().status(),
        )
    }

    /// Incidents for a vehicle in creation order.
    #[must_use]
    pub fn incident_log(&self, vehicle_id: &str) -> Vec<Incident> {
        self.ledger.incidents(vehicle_id)
    }

    /// Alerts for a vehicle in creation order.
    #[must_use]
    pub fn alert_log(&self, vehicle_id: &str) -> Vec<Alert> {
        self.ledger.alerts(vehicle_id)
    }

    /// Dispatches for a vehicle in append order.
    #[must_use]
    pub fn dispatch_history(&self, vehicle_id: &str) -> Vec<DispatchRecord> {
        self.router.dispatch_history(Some(vehicle_id))
    }

    /// Delivery receipts for a vehicle's dispatches.
    #[must_use]
    pub fn delivery_receipts(&self, vehicle_id: &str) -> Vec<DeliveryReceipt> {
        self.router.delivery_receipts(vehicle_id)
    }

    /// Registers an emergency contact; its phone joins future alerts.
    pub fn add_emergency_contact(&self, contact: EmergencyContact) {
        self.router.add_emergency_contact(contact);
    }

    /// Emergency contacts for a vehicle.
    #[must_use]
    pub fn emergency_contacts(&self, vehicle_id: &str) -> Vec<EmergencyContact> {
        self.router.emergency_contacts(vehicle_id)
    }

    /// Marks an alert acknowledged. Returns `false` when the id is unknown.
    pub fn acknowledge_alert(&self, alert_id: &str) -> bool {
        self.ledger.acknowledge_alert(alert_id)
    }
}

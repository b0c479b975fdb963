use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::Utc;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use crate::incident::{Alert, Incident, IncidentType};

#[derive(Debug, Default)]
struct LedgerEntries {
    incidents: IndexMap<String, Vec<Incident>>,
    alerts: IndexMap<String, Vec<Alert>>,
}

/// Shared append-only store of incidents and alerts, keyed by vehicle.
///
/// Cloning yields another handle onto the same store.
#[derive(Debug, Clone, Default)]
pub struct IncidentLedger {
    entries: Arc<RwLock<LedgerEntries>>,
    sequence: Arc<AtomicU64>,
}

impl IncidentLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh incident id, unique for the lifetime of the ledger.
    #[must_use]
    pub fn next_incident_id(&self, incident_type: IncidentType) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!(
            "INC-{}-{}-{seq:06}",
            incident_type.label().to_uppercase(),
            Utc::now().timestamp()
        )
    }

    /// Takes ownership of a finished incident.
    pub fn record(&self, incident: Incident) {
        self.entries
            .write()
            .incidents
            .entry(incident.vehicle_id().to_string())
            .or_default()
            .push(incident);
    }

    /// Creates and stores the single alert for an incident.
    pub fn issue_alert(&self, incident: &Incident, target_recipients: IndexSet<String>) -> Alert {
        let alert = Alert::for_incident(incident, target_recipients);
        self.entries
            .write()
            .alerts
            .entry(alert.vehicle_id().to_string())
            .or_default()
            .push(alert.clone());
        alert
    }

    /// Stores an incident together with its single alert, so readers never
    /// see one without the other.
    pub fn file(&self, incident: Incident, target_recipients: IndexSet<String>) -> Alert {
        let alert = Alert::for_incident(&incident, target_recipients);
        let mut entries = self.entries.write();
        entries
            .alerts
            .entry(alert.vehicle_id().to_string())
            .or_default()
            .push(alert.clone());
        entries
            .incidents
            .entry(incident.vehicle_id().to_string())
            .or_default()
            .push(incident);
        alert
    }

    /// Incidents for a vehicle in creation order.
    #[must_use]
    pub fn incidents(&self, vehicle_id: &str) -> Vec<Incident> {
        self.entries
            .read()
            .incidents
            .get(vehicle_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Alerts for a vehicle in creation order.
    #[must_use]
    pub fn alerts(&self, vehicle_id: &str) -> Vec<Alert> {
        self.entries
            .read()
            .alerts
            .get(vehicle_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Looks an incident up by id.
    #[must_use]
    pub fn incident(&self, incident_id: &str) -> Option<Incident> {
        self.entries
            .read()
            .incidents
            .values()
            .flatten()
            .find(|incident| incident.incident_id() == incident_id)
            .cloned()
    }

    /// Marks an alert acknowledged. Returns `false` when the id is unknown.
    pub fn acknowledge_alert(&self, alert_id: &str) -> bool {
        let mut entries = self.entries.write();
        let found = entries
            .alerts
            .values_mut()
            .flatten()
            .find(|alert| alert.alert_id() == alert_id);
        match found {
            Some(alert) => {
                alert.acknowledge();
                true
            }
            None => false,
        }
    }

    /// Total number of incidents across all vehicles.
    #[must_use]
    pub fn incident_count(&self) -> usize {
        self.entries.read().incidents.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{Location, Severity};

    fn incident(ledger: &IncidentLedger, vehicle: &str) -> Incident {
        Incident::new(
            ledger.next_incident_id(IncidentType::Speeding),
            vehicle,
            IncidentType::Speeding,
            Severity::Medium,
            Location::default(),
            "Overspeed 70 km/h in a 60 zone",
        )
    }

    #[test]
    fn ids_do_not_collide_within_a_second() {
        let ledger = IncidentLedger::new();
        let ids: IndexSet<_> = (0..500)
            .map(|_| ledger.next_incident_id(IncidentType::Fatigue))
            .collect();
        assert_eq!(ids.len(), 500);
        assert!(ids.iter().all(|id| id.starts_with("INC-FATIGUE-")));
    }

    #[test]
    fn records_are_partitioned_by_vehicle() {
        let ledger = IncidentLedger::new();
        let first = incident(&ledger, "TRK-1");
        let second = incident(&ledger, "TRK-2");
        ledger.issue_alert(&first, IndexSet::new());
        ledger.record(first.clone());
        ledger.record(second);

        assert_eq!(ledger.incidents("TRK-1"), vec![first.clone()]);
        assert_eq!(ledger.incidents("TRK-2").len(), 1);
        assert_eq!(ledger.alerts("TRK-1").len(), 1);
        assert!(ledger.alerts("TRK-2").is_empty());
        assert!(ledger.incidents("nobody").is_empty());
        assert_eq!(ledger.incident(first.incident_id()), Some(first));
        assert_eq!(ledger.incident_count(), 2);
    }

    #[test]
    fn acknowledgement_is_visible_to_every_handle() {
        let ledger = IncidentLedger::new();
        let other = ledger.clone();
        let incident = incident(&ledger, "TRK-1");
        let alert = ledger.issue_alert(&incident, IndexSet::new());

        assert!(other.acknowledge_alert(alert.alert_id()));
        assert!(ledger.alerts("TRK-1")[0].acknowledged());
        assert!(!ledger.acknowledge_alert("ALR_missing"));
    }

    #[test]
    fn filed_alerts_always_have_their_incident() {
        let ledger = IncidentLedger::new();
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..200 {
                    ledger.file(incident(&ledger, "TRK-1"), IndexSet::new());
                }
                done.store(true, Ordering::Release);
            });
            scope.spawn(|| loop {
                let finished = done.load(Ordering::Acquire);
                let alerts = ledger.alerts("TRK-1");
                let incidents: IndexSet<String> = ledger
                    .incidents("TRK-1")
                    .iter()
                    .map(|incident| incident.incident_id().to_string())
                    .collect();
                assert!(alerts
                    .iter()
                    .all(|alert| incidents.contains(alert.incident_id())));
                if finished {
                    break;
                }
            });
        });

        assert_eq!(ledger.incident_count(), 200);
        assert_eq!(ledger.alerts("TRK-1").len(), 200);
    }
}

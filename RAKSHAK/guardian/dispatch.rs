use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    incident::{Location, Severity},
    transport::{DeliveryJob, DeliveryReceipt, DispatchError, DispatchOutbox},
    VehicleId,
};

/// Always notified on SOS.
pub const HIGHWAY_CONTROL: &str = "highway_control";
/// Notified for fires.
pub const FIRE_BRIGADE: &str = "fire_brigade";
/// Notified for crashes and collisions.
pub const POLICE: &str = "police";
/// Notified for crashes and collisions.
pub const AMBULANCE: &str = "ambulance";
/// Recipient name used for fleet notifications.
pub const FLEET_MANAGER: &str = "fleet_manager";

/// Contact numbers for emergency services, keyed by service name.
///
/// Deserialized entries are layered over the default directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "IndexMap<String, String>",
    into = "IndexMap<String, String>"
)]
pub struct ServiceDirectory(IndexMap<String, String>);

impl From<IndexMap<String, String>> for ServiceDirectory {
    fn from(overrides: IndexMap<String, String>) -> Self {
        let mut directory = Self::default();
        directory.0.extend(overrides);
        directory
    }
}

impl From<ServiceDirectory> for IndexMap<String, String> {
    fn from(directory: ServiceDirectory) -> Self {
        directory.0
    }
}

impl Default for ServiceDirectory {
    fn default() -> Self {
        Self(
            [
                (FIRE_BRIGADE, "101"),
                (POLICE, "100"),
                (AMBULANCE, "102"),
                (HIGHWAY_CONTROL, "1033"),
            ]
            .into_iter()
            .map(|(service, number)| (service.to_string(), number.to_string()))
            .collect(),
        )
    }
}

impl ServiceDirectory {
    /// Number for a service, `"unknown"` when unlisted.
    #[must_use]
    pub fn number(&self, service: &str) -> &str {
        self.0.get(service).map_or("unknown", String::as_str)
    }

    /// Whether the directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Kind of dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    /// Emergency services alerted.
    Sos,
    /// Fleet operator informed.
    FleetNotification,
}

/// Send status recorded at dispatch time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Handed to delivery.
    Sent,
    /// Could not be handed to delivery.
    Failed,
}

/// Per-recipient send record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceNotification {
    /// Service or role name.
    pub recipient: String,
    /// Number or address used.
    pub contact: String,
    /// Send status.
    pub status: NotificationStatus,
}

/// Append-only record of one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchRecord {
    /// `SOS_<vehicle>_<epoch>` or `FLEET_<vehicle>_<epoch>`.
    pub dispatch_id: String,
    /// Kind.
    pub kind: DispatchKind,
    /// Vehicle concerned.
    pub vehicle_id: VehicleId,
    /// Descriptive incident type used for routing.
    pub incident_type: String,
    /// Severity reported.
    pub severity: Severity,
    /// Last known position.
    pub location: Location,
    /// Recipients in notification order.
    pub recipients: Vec<String>,
    /// Send records, one per recipient.
    pub notifications: Vec<ServiceNotification>,
    /// Message body handed to delivery.
    pub message: String,
    /// When the dispatch was made.
    pub timestamp: DateTime<Utc>,
}

/// Record plus the outcome of handing it to delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// The appended record.
    pub record: DispatchRecord,
    /// Why delivery could not be queued, if it could not.
    pub error: Option<DispatchError>,
}

/// SOS parameters.
#[derive(Debug, Clone, Copy)]
pub struct SosRequest<'a> {
    /// Vehicle concerned.
    pub vehicle_id: &'a str,
    /// Descriptive type; routing matches substrings of it.
    pub incident_type: &'a str,
    /// Severity to report.
    pub severity: Severity,
    /// Last known position.
    pub location: Location,
    /// Free-text details.
    pub details: &'a str,
}

/// Person to reach for a vehicle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmergencyContact {
    /// Vehicle the contact belongs to.
    pub vehicle_id: VehicleId,
    /// Contact name.
    pub name: String,
    /// Phone number.
    pub phone: String,
    /// Optional e-mail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Default)]
struct RouterLog {
    records: Vec<DispatchRecord>,
    contacts: IndexMap<VehicleId, Vec<EmergencyContact>>,
}

/// Routes incidents to emergency services and keeps the dispatch log.
///
/// Cloning yields another handle onto the same log.
#[derive(Debug, Clone, Default)]
pub struct DispatchRouter {
    log: Arc<RwLock<RouterLog>>,
    services: ServiceDirectory,
    outbox: Option<DispatchOutbox>,
}

impl DispatchRouter {
    /// Router without delivery; records are synthesized only.
    #[must_use]
    pub fn new(services: ServiceDirectory) -> Self {
        Self {
            services,
            ..Self::default()
        }
    }

    /// Hands every future record to `outbox` for delivery.
    #[must_use]
    pub fn with_outbox(mut self, outbox: DispatchOutbox) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Service directory in use.
    #[must_use]
    pub const fn services(&self) -> &ServiceDirectory {
        &self.services
    }

    /// Services to alert for an incident type.
    ///
    /// Matching is on substrings of the lower-cased type, so descriptive
    /// strings like `"vehicle_fire"` or `"rear collision"` route correctly.
    #[must_use]
    pub fn determine_recipients(incident_type: &str) -> IndexSet<String> {
        let normalized = incident_type.to_lowercase();
        let mut recipients = IndexSet::from([HIGHWAY_CONTROL.to_string()]);
        if normalized.contains("fire") {
            recipients.insert(FIRE_BRIGADE.to_string());
        }
        if normalized.contains("crash") || normalized.contains("collision") {
            recipients.insert(POLICE.to_string());
            recipients.insert(AMBULANCE.to_string());
        }
        recipients
    }

    /// Alerts emergency services and appends the dispatch record.
    pub fn send_sos_alert(&self, request: &SosRequest<'_>) -> DispatchOutcome {
        let timestamp = Utc::now();
        let dispatch_id = format!("SOS_{}_{}", request.vehicle_id, timestamp.timestamp());
        let recipients: Vec<String> = Self::determine_recipients(request.incident_type)
            .into_iter()
            .collect();
        let message = format!(
            "SOS {} ({}) vehicle {} at {}: {}",
            request.incident_type.to_uppercase(),
            request.severity,
            request.vehicle_id,
            request.location,
            request.details
        );
        tracing::error!(
            dispatch_id = dispatch_id.as_str(),
            vehicle_id = request.vehicle_id,
            incident_type = request.incident_type,
            "sending sos"
        );

        let error = self.hand_off(DeliveryJob::Sos {
            dispatch_id: dispatch_id.clone(),
            recipients: recipients.clone(),
            message: message.clone(),
        });
        let status = send_status(error.as_ref());
        let notifications = recipients
            .iter()
            .map(|service| ServiceNotification {
                recipient: service.clone(),
                contact: self.services.number(service).to_string(),
                status,
            })
            .collect();

        let record = DispatchRecord {
            dispatch_id,
            kind: DispatchKind::Sos,
            vehicle_id: request.vehicle_id.to_string(),
            incident_type: request.incident_type.to_string(),
            severity: request.severity,
            location: request.location,
            recipients,
            notifications,
            message,
            timestamp,
        };
        self.log.write().records.push(record.clone());
        DispatchOutcome { record, error }
    }

    /// Informs the fleet operator and appends a single-recipient record.
    pub fn notify_fleet_manager(
        &self,
        vehicle_id: &str,
        incident_type: &str,
        severity: Severity,
        location: Location,
        details: &str,
        contact: &str,
    ) -> DispatchOutcome {
        let timestamp = Utc::now();
        let dispatch_id = format!("FLEET_{vehicle_id}_{}", timestamp.timestamp());
        let message = format!(
            "ALERT: {} - {vehicle_id}: {details}",
            incident_type.to_uppercase()
        );
        tracing::warn!(vehicle_id, contact, "fleet manager notified");

        let error = self.hand_off(DeliveryJob::Notify {
            dispatch_id: dispatch_id.clone(),
            contact: contact.to_string(),
            message: message.clone(),
        });
        let record = DispatchRecord {
            dispatch_id,
            kind: DispatchKind::FleetNotification,
            vehicle_id: vehicle_id.to_string(),
            incident_type: incident_type.to_string(),
            severity,
            location,
            recipients: vec![FLEET_MANAGER.to_string()],
            notifications: vec![ServiceNotification {
                recipient: FLEET_MANAGER.to_string(),
                contact: contact.to_string(),
                status: send_status(error.as_ref()),
            }],
            message,
            timestamp,
        };
        self.log.write().records.push(record.clone());
        DispatchOutcome { record, error }
    }

    fn hand_off(&self, job: DeliveryJob) -> Option<DispatchError> {
        let outbox = self.outbox.as_ref()?;
        let error = outbox.enqueue(job).err();
        if let Some(err) = &error {
            tracing::error!(%err, "dispatch not queued for delivery");
        }
        error
    }

    /// Dispatch records in append order, optionally for one vehicle.
    #[must_use]
    pub fn dispatch_history(&self, vehicle_id: Option<&str>) -> Vec<DispatchRecord> {
        let log = self.log.read();
        match vehicle_id {
            Some(vehicle_id) => log
                .records
                .iter()
                .filter(|record| record.vehicle_id == vehicle_id)
                .cloned()
                .collect(),
            None => log.records.clone(),
        }
    }

    /// Registers an emergency contact for a vehicle.
    pub fn add_emergency_contact(&self, contact: EmergencyContact) {
        tracing::info!(
            vehicle_id = contact.vehicle_id.as_str(),
            name = contact.name.as_str(),
            "emergency contact added"
        );
        self.log
            .write()
            .contacts
            .entry(contact.vehicle_id.clone())
            .or_default()
            .push(contact);
    }

    /// Contacts registered for a vehicle.
    #[must_use]
    pub fn emergency_contacts(&self, vehicle_id: &str) -> Vec<EmergencyContact> {
        self.log
            .read()
            .contacts
            .get(vehicle_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Delivery receipts for one vehicle's dispatches.
    #[must_use]
    pub fn delivery_receipts(&self, vehicle_id: &str) -> Vec<DeliveryReceipt> {
        let Some(outbox) = &self.outbox else {
            return Vec::new();
        };
        let ids: IndexSet<String> = self
            .dispatch_history(Some(vehicle_id))
            .into_iter()
            .map(|record| record.dispatch_id)
            .collect();
        outbox
            .receipts()
            .into_iter()
            .filter(|receipt| ids.contains(&receipt.dispatch_id))
            .collect()
    }
}

const fn send_status(error: Option<&DispatchError>) -> NotificationStatus {
    if error.is_some() {
        NotificationStatus::Failed
    } else {
        NotificationStatus::Sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(vehicle_id: &'a str, incident_type: &'a str) -> SosRequest<'a> {
        SosRequest {
            vehicle_id,
            incident_type,
            severity: Severity::Critical,
            location: Location::new(28.6139, 77.209, 216.0),
            details: "test",
        }
    }

    #[test]
    fn recipients_follow_substring_rules() {
        let names = |t: &str| -> Vec<String> {
            DispatchRouter::determine_recipients(t).into_iter().collect()
        };
        assert_eq!(names("fatigue"), vec![HIGHWAY_CONTROL]);
        assert_eq!(names("Vehicle_FIRE"), vec![HIGHWAY_CONTROL, FIRE_BRIGADE]);
        assert_eq!(names("rear collision"), vec![HIGHWAY_CONTROL, POLICE, AMBULANCE]);
        assert_eq!(
            names("crash with fire"),
            vec![HIGHWAY_CONTROL, FIRE_BRIGADE, POLICE, AMBULANCE]
        );
    }

    #[test]
    fn sos_synthesizes_one_notification_per_service() {
        let router = DispatchRouter::new(ServiceDirectory::default());
        let outcome = router.send_sos_alert(&request("BUS-4", "crash"));
        assert!(outcome.error.is_none());

        let record = outcome.record;
        assert!(record.dispatch_id.starts_with("SOS_BUS-4_"));
        assert_eq!(record.kind, DispatchKind::Sos);
        let numbers: Vec<_> = record.notifications.iter().map(|n| n.contact.as_str()).collect();
        assert_eq!(numbers, vec!["1033", "100", "102"]);
        assert!(record
            .notifications
            .iter()
            .all(|n| n.status == NotificationStatus::Sent));
    }

    #[test]
    fn history_is_filtered_by_vehicle() {
        let router = DispatchRouter::default();
        router.send_sos_alert(&request("A", "fatigue"));
        router.notify_fleet_manager(
            "B",
            "speeding",
            Severity::Critical,
            Location::default(),
            "95 in 60",
            "fleet.manager@example.com",
        );
        router.send_sos_alert(&request("A", "fire"));

        assert_eq!(router.dispatch_history(None).len(), 3);
        assert_eq!(router.dispatch_history(Some("A")).len(), 2);
        let fleet = router.dispatch_history(Some("B"));
        assert_eq!(fleet[0].kind, DispatchKind::FleetNotification);
        assert_eq!(fleet[0].recipients, vec![FLEET_MANAGER]);
        assert!(router.dispatch_history(Some("C")).is_empty());
        assert_eq!(ServiceDirectory::default().number("coast_guard"), "unknown");
    }

    #[test]
    fn configured_services_override_defaults() {
        let services: ServiceDirectory =
            serde_json::from_value(serde_json::json!({ "ambulance": "108" })).unwrap();
        assert_eq!(services.number(AMBULANCE), "108");
        assert_eq!(services.number(HIGHWAY_CONTROL), "1033");
        assert_eq!(services.number(POLICE), "100");
        assert_eq!(serde_json::to_value(&services).unwrap()[AMBULANCE], "108");
    }

    #[test]
    fn contacts_are_kept_per_vehicle() {
        let router = DispatchRouter::default();
        router.add_emergency_contact(EmergencyContact {
            vehicle_id: "A".to_string(),
            name: "Asha".to_string(),
            phone: "+91-9000000001".to_string(),
            email: None,
        });
        assert_eq!(router.emergency_contacts("A").len(), 1);
        assert!(router.emergency_contacts("B").is_empty());
        assert!(router.delivery_receipts("A").is_empty());
    }
}

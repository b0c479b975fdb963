use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::VehicleId;

/// Kind of event that raised an incident.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    /// Driver fatigue or micro-sleep.
    Fatigue,
    /// Overspeed.
    Speeding,
    /// Vehicle crash.
    Crash,
    /// Fire on board.
    Fire,
    /// Collision with another party.
    Collision,
    /// Mechanical failure.
    MechanicalFailure,
    /// Unclassified.
    Unknown,
}

impl IncidentType {
    /// Lowercase label, also used for recipient routing.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Fatigue => "fatigue",
            Self::Speeding => "speeding",
            Self::Crash => "crash",
            Self::Fire => "fire",
            Self::Collision => "collision",
            Self::MechanicalFailure => "mechanical_failure",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Incident severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Info,
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
    /// Critical.
    Critical,
}

impl Severity {
    /// Lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// GPS position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Location {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Altitude in metres.
    pub altitude: f64,
}

impl Location {
    /// Creates a location.
    #[must_use]
    pub const fn new(lat: f64, lon: f64, altitude: f64) -> Self {
        Self { lat, lon, altitude }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5}, {:.0}m)", self.lat, self.lon, self.altitude)
    }
}

/// A safety incident raised for one vehicle.
///
/// After construction only [`Incident::add_action`] and
/// [`Incident::trigger_sos`] change it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    incident_id: String,
    vehicle_id: VehicleId,
    incident_type: IncidentType,
    severity: Severity,
    location: Location,
    description: String,
    actions_taken: Vec<String>,
    sos_sent: bool,
    sos_timestamp: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl Incident {
    /// Creates an incident with no actions and no SOS.
    #[must_use]
    pub fn new(
        incident_id: impl Into<String>,
        vehicle_id: impl Into<VehicleId>,
        incident_type: IncidentType,
        severity: Severity,
        location: Location,
        description: impl Into<String>,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            vehicle_id: vehicle_id.into(),
            incident_type,
            severity,
            location,
            description: description.into(),
            actions_taken: Vec::new(),
            sos_sent: false,
            sos_timestamp: None,
            created_at: Utc::now(),
        }
    }

    /// Appends an action to the escalation trail.
    pub fn add_action(&mut self, action: impl Into<String>) {
        self.actions_taken.push(action.into());
    }

    /// Marks the SOS as sent; later calls keep the first timestamp.
    pub fn trigger_sos(&mut self) {
        if !self.sos_sent {
            self.sos_sent = true;
            self.sos_timestamp = Some(Utc::now());
        }
    }

    /// Unique identifier.
    #[must_use]
    pub fn incident_id(&self) -> &str {
        &self.incident_id
    }

    /// Vehicle the incident belongs to.
    #[must_use]
    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    /// Incident kind.
    #[must_use]
    pub const fn incident_type(&self) -> IncidentType {
        self.incident_type
    }

    /// Severity at creation.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Where the vehicle was.
    #[must_use]
    pub const fn location(&self) -> Location {
        self.location
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Escalation trail in order.
    #[must_use]
    pub fn actions_taken(&self) -> &[String] {
        &self.actions_taken
    }

    /// Whether an SOS was triggered.
    #[must_use]
    pub const fn sos_sent(&self) -> bool {
        self.sos_sent
    }

    /// When the SOS was triggered.
    #[must_use]
    pub const fn sos_timestamp(&self) -> Option<DateTime<Utc>> {
        self.sos_timestamp
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Multilingual notification derived from an incident.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    alert_id: String,
    incident_id: String,
    vehicle_id: VehicleId,
    alert_type: IncidentType,
    messages: IndexMap<String, String>,
    severity: Severity,
    acknowledged: bool,
    target_recipients: IndexSet<String>,
    created_at: DateTime<Utc>,
}

impl Alert {
    /// Builds the alert for an incident, copying its severity.
    #[must_use]
    pub fn for_incident(incident: &Incident, target_recipients: IndexSet<String>) -> Self {
        let mut messages = IndexMap::new();
        messages.insert(
            "en".to_string(),
            format!(
                "DRIVER ALERT: {} at {}",
                incident.description(),
                incident.location()
            ),
        );
        messages.insert("hi".to_string(), hindi_message(incident.incident_type()).to_string());

        Self {
            alert_id: format!("ALR_{}", incident.incident_id()),
            incident_id: incident.incident_id().to_string(),
            vehicle_id: incident.vehicle_id().to_string(),
            alert_type: incident.incident_type(),
            messages,
            severity: incident.severity(),
            acknowledged: false,
            target_recipients,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn acknowledge(&mut self) {
        self.acknowledged = true;
    }

    /// Message in the requested language, falling back to English.
    #[must_use]
    pub fn message(&self, language: &str) -> &str {
        self.messages
            .get(language)
            .or_else(|| self.messages.get("en"))
            .map_or("", String::as_str)
    }

    /// Every message keyed by language code.
    #[must_use]
    pub const fn messages(&self) -> &IndexMap<String, String> {
        &self.messages
    }

    /// Unique identifier.
    #[must_use]
    pub fn alert_id(&self) -> &str {
        &self.alert_id
    }

    /// Incident this alert refers to.
    #[must_use]
    pub fn incident_id(&self) -> &str {
        &self.incident_id
    }

    /// Vehicle the alert concerns.
    #[must_use]
    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    /// Incident kind.
    #[must_use]
    pub const fn alert_type(&self) -> IncidentType {
        self.alert_type
    }

    /// Severity copied from the incident.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Whether an operator acknowledged the alert.
    #[must_use]
    pub const fn acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Contacts the alert is addressed to.
    #[must_use]
    pub const fn target_recipients(&self) -> &IndexSet<String> {
        &self.target_recipients
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

const fn hindi_message(kind: IncidentType) -> &'static str {
    match kind {
        IncidentType::Fatigue => "चेतावनी: चालक थकान/नींद का पता चला!",
        IncidentType::Speeding => "चेतावनी: वाहन निर्धारित गति सीमा से अधिक चल रहा है!",
        _ => "चेतावनी: वाहन में आपात स्थिति!",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident() -> Incident {
        Incident::new(
            "INC-FATIGUE-1-000001",
            "BUS-9",
            IncidentType::Fatigue,
            Severity::High,
            Location::new(19.076, 72.8777, 14.0),
            "Driver fatigue detected",
        )
    }

    #[test]
    fn sos_flip_is_one_way() {
        let mut incident = incident();
        assert!(!incident.sos_sent());
        incident.trigger_sos();
        let first = incident.sos_timestamp();
        incident.trigger_sos();
        assert!(incident.sos_sent());
        assert_eq!(incident.sos_timestamp(), first);
    }

    #[test]
    fn alert_copies_severity_and_is_bilingual() {
        let mut incident = incident();
        incident.add_action("ACT: DRIVER ALERT TONE");
        let alert = Alert::for_incident(&incident, IndexSet::from(["+91-9000000000".to_string()]));
        assert_eq!(alert.alert_id(), "ALR_INC-FATIGUE-1-000001");
        assert_eq!(alert.severity(), Severity::High);
        assert!(alert.messages().len() >= 2);
        assert!(alert.message("en").starts_with("DRIVER ALERT: Driver fatigue detected"));
        assert!(alert.message("hi").contains("थकान"));
        assert_eq!(alert.message("ta"), alert.message("en"));
        assert!(!alert.acknowledged());
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(IncidentType::MechanicalFailure.to_string(), "mechanical_failure");
    }
}

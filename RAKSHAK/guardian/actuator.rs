use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Regional languages announced through the PA in addition to English.
const REGIONAL_LANGUAGES: [&str; 4] = ["hi", "mr", "ta", "te"];

/// Output strength for tones and vibration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    /// Gentle nudge.
    Low,
    /// Noticeable.
    Medium,
    /// Strongest setting.
    #[default]
    High,
}

impl Intensity {
    /// Short lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Cabin light flashing pattern.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlashPattern {
    /// Slow pulse.
    Slow,
    /// Rapid flashing.
    #[default]
    Fast,
    /// Strobe.
    Strobe,
}

impl FlashPattern {
    /// Short lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Slow => "slow",
            Self::Fast => "fast",
            Self::Strobe => "strobe",
        }
    }
}

/// A side effect requested from the vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ActuatorCommand {
    /// Unlock every door for evacuation.
    UnlockDoors,
    /// Sound the emergency siren.
    ActivateAlarm,
    /// Broadcast a PA announcement.
    ActivatePa {
        /// Announcement text.
        message: String,
        /// Language code (`en`, `hi`, ...).
        language: String,
    },
    /// Hazard, interior and exit-sign lighting.
    ActivateLighting,
    /// Audible tone aimed at the driver.
    DriverAlertTone {
        /// Tone strength.
        intensity: Intensity,
    },
    /// Vibrate the driver seat.
    SeatVibration {
        /// Vibration strength.
        intensity: Intensity,
        /// Vibration length in seconds.
        duration_s: u32,
    },
    /// Flash the cabin lights.
    FlashCabinLights {
        /// Flashing pattern.
        pattern: FlashPattern,
    },
    /// Return every actuator to its resting state.
    DeactivateAll,
}

impl ActuatorCommand {
    /// Action name recorded in the log.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::UnlockDoors => "unlock_all_doors",
            Self::ActivateAlarm => "activate_alarm",
            Self::ActivatePa { .. } => "pa_announcement",
            Self::ActivateLighting => "emergency_lighting",
            Self::DriverAlertTone { .. } => "driver_alert_tone",
            Self::SeatVibration { .. } => "seat_vibration",
            Self::FlashCabinLights { .. } => "flash_cabin_lights",
            Self::DeactivateAll => "deactivate_systems",
        }
    }

    fn parameters(&self) -> serde_json::Value {
        match self {
            Self::ActivatePa { message, language } => json!({
                "message": message,
                "language": language,
                "multilingual": REGIONAL_LANGUAGES.contains(&language.as_str()),
            }),
            Self::ActivateLighting => json!({
                "features": ["hazard_lights", "interior_lights", "exit_signs"],
            }),
            Self::DriverAlertTone { intensity } => json!({ "intensity": intensity.label() }),
            Self::SeatVibration {
                intensity,
                duration_s,
            } => json!({ "intensity": intensity.label(), "duration_s": duration_s }),
            Self::FlashCabinLights { pattern } => json!({ "pattern": pattern.label() }),
            Self::UnlockDoors | Self::ActivateAlarm | Self::DeactivateAll => json!({}),
        }
    }

    fn details(&self) -> String {
        match self {
            Self::ActivatePa { message, .. } => message.clone(),
            Self::DriverAlertTone { intensity } => format!("intensity={}", intensity.label()),
            Self::SeatVibration {
                intensity,
                duration_s,
            } => format!("intensity={},duration={duration_s}", intensity.label()),
            Self::FlashCabinLights { pattern } => format!("pattern={}", pattern.label()),
            Self::UnlockDoors | Self::ActivateAlarm | Self::ActivateLighting | Self::DeactivateAll => {
                String::new()
            }
        }
    }

    fn success_message(&self) -> Option<&'static str> {
        match self {
            Self::UnlockDoors => Some("All doors unlocked for emergency evacuation"),
            Self::ActivateAlarm => Some("Emergency alarm activated - continuous loud siren"),
            Self::DeactivateAll => Some("Emergency systems deactivated"),
            _ => None,
        }
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

/// Errors raised by the vehicle side of an actuator command.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorError {
    /// The vehicle refused the command.
    #[error("{action} rejected: {reason}")]
    Rejected {
        /// Action name.
        action: String,
        /// Reason reported by the vehicle.
        reason: String,
    },
    /// The vehicle bus could not be reached.
    #[error("actuator bus unavailable: {0}")]
    Unavailable(String),
}

/// Hardware seam delivering commands to a vehicle (CAN bus, vendor API, ...).
pub trait ActuatorBus: Send + Sync {
    /// Applies the command to the vehicle.
    fn apply(&self, vehicle_id: &str, command: &ActuatorCommand) -> Result<(), ActuatorError>;
}

/// Bus that accepts every command and only traces it.
#[derive(Debug, Default)]
pub struct SimulatedActuatorBus;

impl ActuatorBus for SimulatedActuatorBus {
    fn apply(&self, vehicle_id: &str, command: &ActuatorCommand) -> Result<(), ActuatorError> {
        match command {
            ActuatorCommand::ActivatePa { message, language } => {
                tracing::warn!(vehicle_id, language = language.as_str(), "PA: {message}");
            }
            ActuatorCommand::DeactivateAll => {
                tracing::info!(vehicle_id, "deactivating emergency systems");
            }
            other => tracing::warn!(vehicle_id, action = other.action(), "actuator engaged"),
        }
        Ok(())
    }
}

/// Outcome of an actuator call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The vehicle accepted the command.
    Success,
    /// The command failed; see the error.
    Failed,
}

/// Entry in the per-vehicle action log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionLogEntry {
    /// Action name.
    pub action: String,
    /// Outcome.
    pub status: ActionStatus,
    /// When the action was attempted.
    pub timestamp: DateTime<Utc>,
    /// Parameters on success, error text on failure.
    pub details: String,
}

/// Value returned to the caller of an actuator operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActuatorResult {
    /// Action name.
    pub action: String,
    /// Outcome.
    pub status: ActionStatus,
    /// Echoed command parameters.
    pub parameters: serde_json::Value,
    /// Human-readable confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Captured failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the action was attempted.
    pub timestamp: DateTime<Utc>,
}

impl ActuatorResult {
    /// Whether the command succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

/// Result of the composite emergency sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmergencyResponse {
    /// Incident type the sequence was run for.
    pub incident_type: String,
    /// When the sequence started.
    pub timestamp: DateTime<Utc>,
    /// Individual results in execution order.
    pub actions: Vec<ActuatorResult>,
    /// Whether every step succeeded.
    pub all_successful: bool,
}

/// Flag snapshot for status queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ActuatorSnapshot {
    /// Doors unlocked.
    pub doors_unlocked: bool,
    /// Siren sounding.
    pub alarm_active: bool,
    /// PA announcing.
    pub pa_active: bool,
    /// Emergency lighting on.
    pub emergency_lighting: bool,
    /// Driver tone playing.
    pub driver_alert_tone_active: bool,
    /// Seat vibrating.
    pub seat_vibration_active: bool,
    /// Cabin lights flashing.
    pub cabin_light_flash_active: bool,
    /// Length of the action log.
    pub total_actions_logged: usize,
}

/// Actuator flags and action log for one vehicle.
pub struct ActuatorState {
    vehicle_id: String,
    bus: Arc<dyn ActuatorBus>,
    pa_languages: Vec<String>,
    flags: ActuatorSnapshot,
    log: Vec<ActionLogEntry>,
}

impl fmt::Debug for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActuatorState")
            .field("vehicle_id", &self.vehicle_id)
            .field("flags", &self.flags)
            .field("log_len", &self.log.len())
            .finish_non_exhaustive()
    }
}

impl ActuatorState {
    /// Creates the state for a vehicle, announcing emergencies in `pa_languages`.
    #[must_use]
    pub fn new(
        vehicle_id: impl Into<String>,
        bus: Arc<dyn ActuatorBus>,
        pa_languages: Vec<String>,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            bus,
            pa_languages,
            flags: ActuatorSnapshot::default(),
            log: Vec::new(),
        }
    }

    /// Applies a command, updating flags on success and logging either way.
    pub fn apply(&mut self, command: &ActuatorCommand) -> ActuatorResult {
        let timestamp = Utc::now();
        let action = command.action().to_string();
        match self.bus.apply(&self.vehicle_id, command) {
            Ok(()) => {
                self.set_flags(command);
                self.log.push(ActionLogEntry {
                    action: action.clone(),
                    status: ActionStatus::Success,
                    timestamp,
                    details: command.details(),
                });
                ActuatorResult {
                    action,
                    status: ActionStatus::Success,
                    parameters: command.parameters(),
                    message: command.success_message().map(str::to_string),
                    error: None,
                    timestamp,
                }
            }
            Err(err) => {
                tracing::error!(vehicle_id = self.vehicle_id.as_str(), %err, "actuator failed");
                self.log.push(ActionLogEntry {
                    action: action.clone(),
                    status: ActionStatus::Failed,
                    timestamp,
                    details: err.to_string(),
                });
                ActuatorResult {
                    action,
                    status: ActionStatus::Failed,
                    parameters: command.parameters(),
                    message: None,
                    error: Some(err.to_string()),
                    timestamp,
                }
            }
        }
    }

    fn set_flags(&mut self, command: &ActuatorCommand) {
        let flags = &mut self.flags;
        match command {
            ActuatorCommand::UnlockDoors => flags.doors_unlocked = true,
            ActuatorCommand::ActivateAlarm => flags.alarm_active = true,
            ActuatorCommand::ActivatePa { .. } => flags.pa_active = true,
            ActuatorCommand::ActivateLighting => flags.emergency_lighting = true,
            ActuatorCommand::DriverAlertTone { .. } => flags.driver_alert_tone_active = true,
            ActuatorCommand::SeatVibration { .. } => flags.seat_vibration_active = true,
            ActuatorCommand::FlashCabinLights { .. } => flags.cabin_light_flash_active = true,
            ActuatorCommand::DeactivateAll => {
                flags.doors_unlocked = false;
                flags.alarm_active = false;
                flags.pa_active = false;
                flags.emergency_lighting = false;
            }
        }
    }

    /// Unlocks every door.
    pub fn unlock_doors(&mut self) -> ActuatorResult {
        self.apply(&ActuatorCommand::UnlockDoors)
    }

    /// Sounds the siren.
    pub fn activate_alarm(&mut self) -> ActuatorResult {
        self.apply(&ActuatorCommand::ActivateAlarm)
    }

    /// Broadcasts a PA message.
    pub fn activate_pa(&mut self, message: impl Into<String>, language: impl Into<String>) -> ActuatorResult {
        self.apply(&ActuatorCommand::ActivatePa {
            message: message.into(),
            language: language.into(),
        })
    }

    /// Turns on emergency lighting.
    pub fn activate_lighting(&mut self) -> ActuatorResult {
        self.apply(&ActuatorCommand::ActivateLighting)
    }

    /// Plays the driver alert tone.
    pub fn play_driver_alert_tone(&mut self, intensity: Intensity) -> ActuatorResult {
        self.apply(&ActuatorCommand::DriverAlertTone { intensity })
    }

    /// Vibrates the driver seat.
    pub fn seat_vibration(&mut self, intensity: Intensity, duration_s: u32) -> ActuatorResult {
        self.apply(&ActuatorCommand::SeatVibration {
            intensity,
            duration_s,
        })
    }

    /// Flashes the cabin lights.
    pub fn flash_cabin_lights(&mut self, pattern: FlashPattern) -> ActuatorResult {
        self.apply(&ActuatorCommand::FlashCabinLights { pattern })
    }

    /// Clears doors, alarm, PA and emergency lighting. Driver alerts are untouched.
    pub fn deactivate_all(&mut self) -> ActuatorResult {
        self.apply(&ActuatorCommand::DeactivateAll)
    }

    /// Runs unlock, alarm, lighting, then one PA announcement per configured language.
    pub fn execute_emergency_response(&mut self, incident_type: &str) -> EmergencyResponse {
        let timestamp = Utc::now();
        tracing::error!(
            vehicle_id = self.vehicle_id.as_str(),
            incident_type,
            "executing emergency response"
        );

        let mut actions = vec![
            self.unlock_doors(),
            self.activate_alarm(),
            self.activate_lighting(),
        ];
        let languages = self.pa_languages.clone();
        for language in &languages {
            let message = evacuation_message(language, incident_type);
            actions.push(self.activate_pa(message, language.as_str()));
        }

        let all_successful = actions.iter().all(ActuatorResult::is_success);
        EmergencyResponse {
            incident_type: incident_type.to_string(),
            timestamp,
            actions,
            all_successful,
        }
    }

    /// Current flags.
    #[must_use]
    pub fn snapshot(&self) -> ActuatorSnapshot {
        ActuatorSnapshot {
            total_actions_logged: self.log.len(),
            ..self.flags
        }
    }

    /// Action log, oldest first.
    #[must_use]
    pub fn log(&self) -> &[ActionLogEntry] {
        &self.log
    }
}

fn evacuation_message(language: &str, incident_type: &str) -> String {
    let kind = incident_type.to_uppercase();
    match language {
        "hi" => format!("आपातकाल! {kind} का पता चला। तुरंत बाहर निकलें!"),
        _ => format!("EMERGENCY! {kind} DETECTED. EVACUATE IMMEDIATELY!"),
    }
}

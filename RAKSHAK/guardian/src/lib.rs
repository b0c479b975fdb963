#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Vahan-Rakshak guardian core: per-vehicle fatigue and overspeed monitoring
//! with a graduated safety response.

/// Driver attention signals and the fatigue classifier.
#[path = "../fatigue.rs"]
pub mod fatigue;

/// Sustained overspeed tracking.
#[path = "../speed.rs"]
pub mod speed;

/// In-vehicle actuators and their audit log.
#[path = "../actuator.rs"]
pub mod actuator;

/// Incident and alert records.
#[path = "../incident.rs"]
pub mod incident;

/// Process-wide append-only incident and alert ledger.
#[path = "../ledger.rs"]
pub mod ledger;

/// Emergency service routing and dispatch records.
#[path = "../dispatch.rs"]
pub mod dispatch;

/// Outbound transport capability and the deferred delivery outbox.
#[path = "../transport.rs"]
pub mod transport;

/// Per-vehicle registry orchestrating the escalation policy.
#[path = "../coordinator.rs"]
pub mod coordinator;

/// TOML configuration for the guardian runtime.
#[path = "../config.rs"]
pub mod config;

/// Structured audit and event telemetry.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Opaque vehicle identifier used to key all per-vehicle state.
pub type VehicleId = String;

/// Prelude exports for consumers embedding the guardian core.
pub mod prelude {
    pub use crate::actuator::{ActuatorBus, ActuatorCommand, ActuatorResult, ActuatorState};
    pub use crate::config::GuardianConfig;
    pub use crate::coordinator::{
        DriverReport, MonitoringCoordinator, MonitoringCoordinatorBuilder, SpeedReport,
        VehicleStatus,
    };
    pub use crate::dispatch::{DispatchRecord, DispatchRouter, EmergencyContact};
    pub use crate::fatigue::{DriverSignals, FatigueClassifier, FatigueResult, FatigueState};
    pub use crate::incident::{Alert, Incident, IncidentType, Location, Severity};
    pub use crate::ledger::IncidentLedger;
    pub use crate::speed::{AlertLevel, SpeedReading, SpeedResult, SpeedThresholds, SpeedTracker};
    pub use crate::telemetry::{GuardianTelemetry, GuardianTelemetryBuilder};
    pub use crate::transport::{DeliveryReceipt, DispatchOutbox, LoopbackTransport, Transport};
    pub use crate::VehicleId;
}

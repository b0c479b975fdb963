use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use rakshak_event_bus::FileEventPublisher;
use rakshak_guardian::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "rakshak", version, about = "Vahan-Rakshak guardian tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feeds a JSON-lines telemetry capture through the monitoring core.
    Replay {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        audit_log: Option<PathBuf>,
        #[arg(long)]
        event_log: Option<PathBuf>,
    },
    /// Classifies a single set of driver signals.
    Classify {
        #[arg(long, default_value_t = 0.0)]
        eye_closure_pct: f64,
        #[arg(long, default_value_t = 150.0)]
        blink_duration_ms: f64,
        #[arg(long, default_value_t = 0.0)]
        yawning_rate_per_min: f64,
        #[arg(long, default_value_t = 0.0)]
        steering_variability: f64,
        #[arg(long, default_value_t = 0)]
        lane_departures: u32,
    },
}

/// One line of a replay capture.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplayEvent {
    Driver {
        vehicle_id: String,
        #[serde(flatten)]
        signals: DriverSignals,
    },
    Speed {
        vehicle_id: String,
        #[serde(flatten)]
        reading: SpeedReading,
    },
    Location {
        vehicle_id: String,
        #[serde(flatten)]
        location: Location,
    },
    Contact {
        vehicle_id: String,
        name: String,
        phone: String,
        #[serde(default)]
        email: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Replay {
            input,
            config,
            audit_log,
            event_log,
        } => {
            let mut config = match config {
                Some(path) => GuardianConfig::load(path)?,
                None => GuardianConfig::default(),
            };
            config.audit_log = audit_log.or(config.audit_log);
            config.event_log = event_log.or(config.event_log);
            let report = replay(&input, config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Classify {
            eye_closure_pct,
            blink_duration_ms,
            yawning_rate_per_min,
            steering_variability,
            lane_departures,
        } => {
            let result = FatigueClassifier::new().classify(&DriverSignals {
                eye_closure_pct,
                blink_duration_ms,
                yawning_rate_per_min,
                steering_variability,
                lane_departures,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

fn replay(input: &Path, config: GuardianConfig) -> Result<Value> {
    let mut telemetry = GuardianTelemetry::builder("rakshak-replay");
    if let Some(path) = &config.audit_log {
        telemetry = telemetry.log_path(path);
    }
    if let Some(path) = &config.event_log {
        telemetry = telemetry.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    let telemetry = telemetry.build()?;
    let coordinator = MonitoringCoordinator::builder()
        .telemetry(telemetry.clone())
        .transport(Arc::new(LoopbackTransport))
        .config(config)
        .build();

    for event in read_events(input)? {
        apply(&coordinator, event);
    }

    let vehicles: Vec<Value> = coordinator
        .vehicles()
        .into_iter()
        .map(|vehicle_id| {
            json!({
                "status": coordinator.vehicle_status(&vehicle_id),
                "incidents": coordinator.incident_log(&vehicle_id),
                "alerts": coordinator.alert_log(&vehicle_id),
                "dispatches": coordinator.dispatch_history(&vehicle_id),
            })
        })
        .collect();
    ensure!(
        telemetry.flush(Duration::from_secs(10)),
        "timed out writing queued events"
    );
    Ok(json!({ "vehicles": vehicles }))
}

fn apply(coordinator: &MonitoringCoordinator, event: ReplayEvent) {
    match event {
        ReplayEvent::Driver {
            vehicle_id,
            signals,
        } => {
            coordinator.submit_driver_reading(&vehicle_id, &signals);
        }
        ReplayEvent::Speed {
            vehicle_id,
            reading,
        } => {
            coordinator.submit_speed_reading(&vehicle_id, &reading);
        }
        ReplayEvent::Location {
            vehicle_id,
            location,
        } => coordinator.update_location(&vehicle_id, location),
        ReplayEvent::Contact {
            vehicle_id,
            name,
            phone,
            email,
        } => coordinator.add_emergency_contact(EmergencyContact {
            vehicle_id,
            name,
            phone,
            email,
        }),
    }
}

fn read_events(path: &Path) -> Result<Vec<ReplayEvent>> {
    let file = File::open(path).with_context(|| format!("opening replay {}", path.display()))?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .with_context(|| format!("parsing {} line {}", path.display(), idx + 1))?;
        events.push(event);
    }
    Ok(events)
}

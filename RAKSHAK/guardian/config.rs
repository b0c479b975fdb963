use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{dispatch::ServiceDirectory, speed::SpeedThresholds};

/// Runtime settings for the guardian core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianConfig {
    /// Overspeed thresholds and sustained duration.
    #[serde(default)]
    pub speed: SpeedThresholds,
    /// Languages the PA announces emergencies in, in order.
    #[serde(default = "default_pa_languages")]
    pub pa_languages: Vec<String>,
    /// Address fleet notifications are sent to.
    #[serde(default = "default_fleet_contact")]
    pub fleet_contact: String,
    /// Emergency service numbers.
    #[serde(default)]
    pub services: ServiceDirectory,
    /// Jobs the delivery outbox holds before refusing new ones.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// JSON-lines audit log, relative to the config file when loaded.
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    /// JSON-lines event log, relative to the config file when loaded.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            speed: SpeedThresholds::default(),
            pa_languages: default_pa_languages(),
            fleet_contact: default_fleet_contact(),
            services: ServiceDirectory::default(),
            outbox_capacity: default_outbox_capacity(),
            audit_log: None,
            event_log: None,
        }
    }
}

impl GuardianConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or does not validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading guardian config {}", path.display()))?;
        let mut config =
            Self::from_toml(&raw).with_context(|| format!("loading {}", path.display()))?;

        let source_dir = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        for log in [&mut config.audit_log, &mut config.event_log].into_iter().flatten() {
            if log.is_relative() {
                *log = source_dir.join(&*log);
            }
        }
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Fails on malformed TOML or invalid values.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw).context("parsing guardian config")?;
        if config.outbox_capacity == 0 {
            config.outbox_capacity = default_outbox_capacity();
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants the runtime depends on.
    ///
    /// # Errors
    ///
    /// Fails on non-ascending thresholds or an empty language list.
    pub fn validate(&self) -> Result<()> {
        let SpeedThresholds {
            warn_pct,
            high_pct,
            critical_pct,
            ..
        } = self.speed;
        if !(warn_pct > 0.0 && warn_pct < high_pct && high_pct < critical_pct) {
            bail!(
                "speed thresholds must ascend: warn {warn_pct} < high {high_pct} < critical {critical_pct}"
            );
        }
        if self.pa_languages.is_empty() {
            bail!("pa_languages must name at least one language");
        }
        if self.fleet_contact.trim().is_empty() {
            bail!("fleet_contact must not be empty");
        }
        Ok(())
    }
}

fn default_pa_languages() -> Vec<String> {
    vec!["en".to_string(), "hi".to_string()]
}

fn default_fleet_contact() -> String {
    "fleet.manager@example.com".to_string()
}

const fn default_outbox_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_uses_defaults() {
        let config = GuardianConfig::from_toml("").unwrap();
        assert_eq!(config, GuardianConfig::default());
        assert_eq!(config.services.number("highway_control"), "1033");
    }

    #[test]
    fn load_resolves_relative_paths() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("guardian.toml");
        fs::write(
            &path,
            r#"
pa_languages = ["en", "hi", "mr"]
fleet_contact = "ops@fleet.example"
audit_log = "logs/audit.jsonl"
outbox_capacity = 0

[speed]
warn_pct = 0.05
sustained_duration_s = 5

[services]
ambulance = "108"
coast_guard = "1554"
"#,
        )
        .unwrap();

        let config = GuardianConfig::load(&path).unwrap();
        assert_eq!(config.pa_languages.len(), 3);
        assert_eq!(config.audit_log, Some(tmp.path().join("logs/audit.jsonl")));
        assert_eq!(config.event_log, None);
        assert_eq!(config.outbox_capacity, 64);
        assert!((config.speed.warn_pct - 0.05).abs() < f64::EPSILON);
        assert!((config.speed.high_pct - 0.30).abs() < f64::EPSILON);
        assert_eq!(config.speed.sustained_duration_s, 5);
        assert_eq!(config.services.number("ambulance"), "108");
        assert_eq!(config.services.number("police"), "100");
        assert_eq!(config.services.number("fire_brigade"), "101");
        assert_eq!(config.services.number("coast_guard"), "1554");
    }

    #[test]
    fn rejects_invalid_settings() {
        let unordered = GuardianConfig::from_toml("[speed]\nhigh_pct = 0.6\n");
        assert!(unordered.unwrap_err().to_string().contains("ascend"));

        let silent = GuardianConfig::from_toml("pa_languages = []\n");
        assert!(silent.is_err());

        let missing = GuardianConfig::load("/nonexistent/guardian.toml");
        assert!(format!("{:#}", missing.unwrap_err()).contains("reading guardian config"));
    }
}

//! Application configuration for the Herald engine.

use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer, Serializer};

/// Custom deserializer for Duration from seconds
pub fn deserialize_duration_from_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

/// Custom serializer for Duration to seconds
pub fn serialize_duration_to_seconds<S>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_secs())
}

/// Provides the default value for schedule_interval.
fn default_schedule_interval() -> Duration {
    Duration::from_secs(5)
}

/// Provides the default value for maintenance_timeout.
///
/// The maximum expected delivery delay is roughly the schedule interval plus
/// the time an item spends waiting in the queue plus the delivery duration
/// itself, so this timeout is set relatively high to avoid reclaiming items
/// before they even had a chance to be processed.
fn default_maintenance_timeout() -> Duration {
    Duration::from_secs(300)
}

/// Provides the default value for minimum_delay.
fn default_minimum_delay() -> Duration {
    Duration::from_secs(180)
}

/// Provides the default value for lease_duration.
fn default_lease_duration() -> Duration {
    Duration::from_secs(30)
}

/// Engine configuration, loaded once at startup and immutable thereafter.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Interval between scheduler sweeps.
    #[serde(
        default = "default_schedule_interval",
        deserialize_with = "deserialize_duration_from_seconds"
    )]
    pub schedule_interval: Duration,

    /// Age past which an unresolved claim is considered stuck and force-aborted
    /// by maintenance. Must exceed the schedule interval plus the expected
    /// queue wait and delivery duration.
    #[serde(
        default = "default_maintenance_timeout",
        deserialize_with = "deserialize_duration_from_seconds"
    )]
    pub maintenance_timeout: Duration,

    /// Default minimum delay between the first append for a target and its
    /// earliest possible delivery. Per-target overrides come from the target
    /// resolver.
    #[serde(
        default = "default_minimum_delay",
        deserialize_with = "deserialize_duration_from_seconds"
    )]
    pub minimum_delay: Duration,

    /// Duration of the exclusive lease a delivery attempt holds on a target.
    #[serde(
        default = "default_lease_duration",
        deserialize_with = "deserialize_duration_from_seconds"
    )]
    pub lease_duration: Duration,

    /// Optional cap on buffered records per target; oldest records are
    /// truncated once exceeded. `None` disables truncation.
    #[serde(default)]
    pub digest_capacity: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schedule_interval: default_schedule_interval(),
            maintenance_timeout: default_maintenance_timeout(),
            minimum_delay: default_minimum_delay(),
            lease_duration: default_lease_duration(),
            digest_capacity: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from an optional file layered under
    /// `HERALD_`-prefixed environment variables.
    pub fn new(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(Environment::with_prefix("HERALD").separator("__"))
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maintenance_timeout <= self.schedule_interval + self.lease_duration {
            return Err(ConfigError::Message(format!(
                "maintenance_timeout ({:?}) must exceed schedule_interval + lease_duration ({:?})",
                self.maintenance_timeout,
                self.schedule_interval + self.lease_duration
            )));
        }
        if self.digest_capacity == Some(0) {
            return Err(ConfigError::Message(
                "digest_capacity must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

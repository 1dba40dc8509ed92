use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NETWORK_TICK_RATE: u32 = 20;
pub const DEFAULT_CLIENT_TICK_RATE: u32 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read config: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write config: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[source] ron::error::SpannedError),
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] ron::Error),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Quantization step per networked field. Doubles as the change epsilon
/// used by the registry when diffing observed state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Precision {
    pub position: f32,
    pub rotation: f32,
    pub velocity: f32,
    pub health: f32,
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            position: 0.1,
            rotation: 0.01,
            velocity: 0.1,
            health: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    /// Speed at which the velocity weight saturates at 2.0.
    pub velocity_reference: f32,
    pub health_changed: f32,
    pub owned: f32,
    pub combat: f32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            velocity_reference: 10.0,
            health_changed: 1.5,
            owned: 2.0,
            combat: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub network_tick_rate: u32,
    pub client_tick_rate: u32,
    pub precision: Precision,
    pub max_updates_per_tick: usize,
    pub priority_radius: f32,
    pub culling_distance: f32,
    pub weights: PriorityWeights,
    /// Network ticks between forced full resyncs per viewer. 0 disables.
    pub full_resync_interval: u32,
    /// Network ticks a removal keeps being repeated to a viewer.
    pub removal_repeat_ticks: u32,
    pub max_removals_per_tick: usize,
    pub interpolation_buffer_depth: u32,
    pub snapshot_history_capacity: usize,
    pub max_extrapolation: f64,
    /// Seconds of server history kept for rewinds.
    pub lag_compensation_window: f64,
    pub prediction_buffer_depth: usize,
    pub prediction_tolerance: f32,
    pub prediction_smoothing_rate: f32,
    pub prediction_snap_distance: f32,
    pub command_buffer_capacity: usize,
    /// Seconds between ping probes.
    pub ping_interval: f64,
    pub enable_prediction: bool,
    pub enable_interpolation: bool,
    pub enable_extrapolation: bool,
    pub enable_lag_compensation: bool,
    pub enable_delta_compression: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            network_tick_rate: DEFAULT_NETWORK_TICK_RATE,
            client_tick_rate: DEFAULT_CLIENT_TICK_RATE,
            precision: Precision::default(),
            max_updates_per_tick: 16,
            priority_radius: 50.0,
            culling_distance: 100.0,
            weights: PriorityWeights::default(),
            full_resync_interval: 100,
            removal_repeat_ticks: 20,
            max_removals_per_tick: 32,
            interpolation_buffer_depth: 2,
            snapshot_history_capacity: 32,
            max_extrapolation: 0.25,
            lag_compensation_window: 1.0,
            prediction_buffer_depth: DEFAULT_CLIENT_TICK_RATE as usize,
            prediction_tolerance: 0.15,
            prediction_smoothing_rate: 20.0,
            prediction_snap_distance: 1.0,
            command_buffer_capacity: 256,
            ping_interval: 1.0,
            enable_prediction: true,
            enable_interpolation: true,
            enable_extrapolation: false,
            enable_lag_compensation: true,
            enable_delta_compression: true,
        }
    }
}

impl SyncConfig {
    pub fn network_tick_period(&self) -> f64 {
        1.0 / self.network_tick_rate as f64
    }

    pub fn client_tick_period(&self) -> f64 {
        1.0 / self.client_tick_rate as f64
    }

    pub fn interpolation_delay(&self) -> f64 {
        self.network_tick_period() * self.interpolation_buffer_depth as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network_tick_rate == 0 {
            return Err(ConfigError::invalid("network_tick_rate", "must be positive"));
        }
        if self.client_tick_rate == 0 {
            return Err(ConfigError::invalid("client_tick_rate", "must be positive"));
        }

        let precisions = [
            ("precision.position", self.precision.position),
            ("precision.rotation", self.precision.rotation),
            ("precision.velocity", self.precision.velocity),
            ("precision.health", self.precision.health),
        ];
        for (field, value) in precisions {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be a positive finite step, got {value}"),
                ));
            }
        }

        if self.max_updates_per_tick == 0 {
            return Err(ConfigError::invalid("max_updates_per_tick", "must be positive"));
        }
        if self.removal_repeat_ticks == 0 {
            return Err(ConfigError::invalid("removal_repeat_ticks", "must be positive"));
        }
        if self.max_removals_per_tick == 0 {
            return Err(ConfigError::invalid("max_removals_per_tick", "must be positive"));
        }
        if !(self.priority_radius > 0.0) {
            return Err(ConfigError::invalid("priority_radius", "must be positive"));
        }
        if self.culling_distance < self.priority_radius {
            return Err(ConfigError::invalid(
                "culling_distance",
                format!(
                    "must be at least priority_radius ({} < {})",
                    self.culling_distance, self.priority_radius
                ),
            ));
        }
        if self.interpolation_buffer_depth == 0 {
            return Err(ConfigError::invalid(
                "interpolation_buffer_depth",
                "must be positive",
            ));
        }
        if self.snapshot_history_capacity < 2 {
            return Err(ConfigError::invalid(
                "snapshot_history_capacity",
                "must hold at least two snapshots",
            ));
        }
        if self.prediction_buffer_depth == 0 {
            return Err(ConfigError::invalid("prediction_buffer_depth", "must be positive"));
        }
        if self.command_buffer_capacity == 0 {
            return Err(ConfigError::invalid("command_buffer_capacity", "must be positive"));
        }
        if !(self.lag_compensation_window >= 0.0) {
            return Err(ConfigError::invalid(
                "lag_compensation_window",
                "must not be negative",
            ));
        }
        if !(self.max_extrapolation >= 0.0) {
            return Err(ConfigError::invalid("max_extrapolation", "must not be negative"));
        }
        if !(self.prediction_tolerance >= 0.0) {
            return Err(ConfigError::invalid("prediction_tolerance", "must not be negative"));
        }
        if !(self.prediction_smoothing_rate >= 0.0) {
            return Err(ConfigError::invalid(
                "prediction_smoothing_rate",
                "must not be negative",
            ));
        }
        if !(self.ping_interval > 0.0) {
            return Err(ConfigError::invalid("ping_interval", "must be positive"));
        }

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config: SyncConfig = ron::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        log::info!("Loaded sync config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let pretty = ron::ser::PrettyConfig::new().depth_limit(2);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;
        std::fs::write(path, serialized).map_err(ConfigError::Write)
    }
}

//! Machine configuration: encoder, per-axis drive constants and step timing.
//!
//! Every field has a default matching the H5 reference build, so an empty
//! file is a valid configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub axes: AxesConfig,
    #[serde(default)]
    pub timing: MotionTiming,
    #[serde(default)]
    pub handwheel: HandwheelConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderConfig {
    /// Pulses per revolution before quadrature decoding.
    #[serde(default = "default_ppr")]
    pub ppr: i32,
    /// Deadband in encoder counts absorbed on spindle reversal.
    #[serde(default = "default_backlash")]
    pub backlash: i32,
    /// Hardware counter magnitude at which the register is rebased.
    #[serde(default = "default_counter_limit")]
    pub counter_limit: i32,
}

impl EncoderConfig {
    /// Counts per spindle revolution after decoding (PPR x 2).
    pub fn counts_per_rev(&self) -> i32 {
        self.ppr * 2
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ppr: default_ppr(),
            backlash: default_backlash(),
            counter_limit: default_counter_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(from = "AxesFile")]
pub struct AxesConfig {
    pub x: AxisConfig,
    pub z: AxisConfig,
}

impl Default for AxesConfig {
    fn default() -> Self {
        Self {
            x: default_x_axis(),
            z: default_z_axis(),
        }
    }
}

/// `[axes]` as written. Each table overlays the defaults of its own axis.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AxesFile {
    x: AxisOverrides,
    z: AxisOverrides,
}

impl From<AxesFile> for AxesConfig {
    fn from(file: AxesFile) -> Self {
        Self {
            x: file.x.over(default_x_axis()),
            z: file.z.over(default_z_axis()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AxisOverrides {
    screw_pitch_du: Option<i32>,
    motor_steps: Option<i32>,
    start_speed: Option<u32>,
    acceleration: Option<u32>,
    max_speed: Option<u32>,
    invert_direction: Option<bool>,
    invert_enable: Option<bool>,
    invert_step: Option<bool>,
    max_travel_mm: Option<i32>,
}

impl AxisOverrides {
    fn over(self, base: AxisConfig) -> AxisConfig {
        AxisConfig {
            screw_pitch_du: self.screw_pitch_du.unwrap_or(base.screw_pitch_du),
            motor_steps: self.motor_steps.unwrap_or(base.motor_steps),
            start_speed: self.start_speed.unwrap_or(base.start_speed),
            acceleration: self.acceleration.unwrap_or(base.acceleration),
            max_speed: self.max_speed.unwrap_or(base.max_speed),
            invert_direction: self.invert_direction.unwrap_or(base.invert_direction),
            invert_enable: self.invert_enable.unwrap_or(base.invert_enable),
            invert_step: self.invert_step.unwrap_or(base.invert_step),
            max_travel_mm: self.max_travel_mm.unwrap_or(base.max_travel_mm),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AxisConfig {
    /// Lead screw travel per motor revolution, du.
    pub screw_pitch_du: i32,
    pub motor_steps: i32,
    /// steps/s
    pub start_speed: u32,
    /// steps/s^2
    pub acceleration: u32,
    /// steps/s
    pub max_speed: u32,
    pub invert_direction: bool,
    pub invert_enable: bool,
    pub invert_step: bool,
    /// Symmetric soft-limit envelope around zero, mm.
    pub max_travel_mm: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotionTiming {
    #[serde(default = "default_direction_setup_delay_us")]
    pub direction_setup_delay_us: u32,
    #[serde(default = "default_step_pulse_width_us")]
    pub step_pulse_width_us: u32,
    /// Rate at which the scheduler is expected to call `Engine::update`.
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,
}

impl MotionTiming {
    pub fn tick_period_us(&self) -> u32 {
        1_000_000 / self.tick_rate_hz.max(1)
    }
}

impl Default for MotionTiming {
    fn default() -> Self {
        Self {
            direction_setup_delay_us: default_direction_setup_delay_us(),
            step_pulse_width_us: default_step_pulse_width_us(),
            tick_rate_hz: default_tick_rate_hz(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandwheelConfig {
    /// Handwheel counts per configured step size.
    #[serde(default = "default_scale_divisor")]
    pub scale_divisor: i32,
    /// Travel per handwheel detent, du.
    #[serde(default = "default_handwheel_step_du")]
    pub step_du: i32,
    #[serde(default = "default_counter_limit")]
    pub counter_limit: i32,
}

impl Default for HandwheelConfig {
    fn default() -> Self {
        Self {
            scale_divisor: default_scale_divisor(),
            step_du: default_handwheel_step_du(),
            counter_limit: default_counter_limit(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.encoder.ppr <= 0 {
            return Err("encoder ppr must be > 0".to_string());
        }
        if self.encoder.backlash < 0 {
            return Err("encoder backlash must be >= 0".to_string());
        }
        if self.encoder.counter_limit <= 0 {
            return Err("encoder counter_limit must be > 0".to_string());
        }
        for (name, axis) in [("x", &self.axes.x), ("z", &self.axes.z)] {
            if axis.screw_pitch_du <= 0 {
                return Err(format!("axis '{}' screw_pitch_du must be > 0", name));
            }
            if axis.motor_steps <= 0 {
                return Err(format!("axis '{}' motor_steps must be > 0", name));
            }
            if axis.start_speed == 0 || axis.max_speed == 0 || axis.acceleration == 0 {
                return Err(format!("axis '{}' speeds and acceleration must be > 0", name));
            }
            if axis.start_speed > axis.max_speed {
                return Err(format!("axis '{}' start_speed exceeds max_speed", name));
            }
            if axis.max_travel_mm <= 0 {
                return Err(format!("axis '{}' max_travel_mm must be > 0", name));
            }
        }
        if self.timing.tick_rate_hz == 0 {
            return Err("timing tick_rate_hz must be > 0".to_string());
        }
        if self.handwheel.scale_divisor <= 0 {
            return Err("handwheel scale_divisor must be > 0".to_string());
        }
        Ok(())
    }
}

// Default value functions
fn default_ppr() -> i32 { 600 }
fn default_backlash() -> i32 { 3 }
fn default_counter_limit() -> i32 { 30_000 }
fn default_screw_pitch_du() -> i32 { 50_000 }
fn default_motor_steps() -> i32 { 4_000 }
fn default_start_speed() -> u32 { 4_000 }
fn default_acceleration() -> u32 { 100_000 }
fn default_max_speed() -> u32 { 32_000 }
fn default_max_travel_mm() -> i32 { 300 }
fn default_direction_setup_delay_us() -> u32 { 5 }
fn default_step_pulse_width_us() -> u32 { 10 }
fn default_tick_rate_hz() -> u32 { 5_000 }
fn default_scale_divisor() -> i32 { 1 }
fn default_handwheel_step_du() -> i32 { 100 }

fn default_x_axis() -> AxisConfig {
    AxisConfig {
        screw_pitch_du: 40_000,
        invert_direction: true,
        max_travel_mm: 100,
        ..default_z_axis()
    }
}

fn default_z_axis() -> AxisConfig {
    AxisConfig {
        screw_pitch_du: default_screw_pitch_du(),
        motor_steps: default_motor_steps(),
        start_speed: default_start_speed(),
        acceleration: default_acceleration(),
        max_speed: default_max_speed(),
        invert_direction: false,
        invert_enable: true,
        invert_step: true,
        max_travel_mm: default_max_travel_mm(),
    }
}

/// Load and validate a TOML machine configuration.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate().map_err(|e| {
        tracing::error!("Rejected config '{}': {}", path, e);
        ConfigError::Invalid(e)
    })?;
    Ok(config)
}

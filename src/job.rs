//! Scripted operator sessions: what the keypad collaborator would do, one
//! step at a time.

use config as config_rs;
use els_core::{Axis, OperationMode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Job {
    #[serde(default = "default_job_name")]
    pub name: String,
    /// Record every n-th tick.
    #[serde(default = "default_sample_every")]
    pub sample_every: u32,
    #[serde(default)]
    pub steps: Vec<JobStep>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobStep {
    SetMode { mode: OperationMode },
    /// Lead in du/rev and number of starts.
    SetPitch {
        dupr: i32,
        #[serde(default = "default_starts")]
        starts: i32,
    },
    SetDirection { left_to_right: bool },
    SetInternal { internal: bool },
    TouchOffX { diameter_mm: f32 },
    TouchOffZ { z_mm: f32 },
    NextStep,
    PreviousStep,
    /// Target diameter or length, depending on the setup step.
    Target { mm: f32 },
    Passes { count: i32 },
    Starts { count: i32 },
    ConeRatio { ratio: f32 },
    /// Store the current axis positions as the parking position.
    Park,
    Jog { axis: Axis, steps: i32 },
    SoftLimits { axis: Axis, low: i32, high: i32 },
    /// Handwheel detents turned on the selected axis.
    Handwheel {
        axis: Axis,
        detents: i32,
        #[serde(default = "default_handwheel_step_du")]
        step_du: i32,
    },
    /// Next handwheel step-size preset.
    CycleHandwheelStep,
    Rpm { rpm: f64 },
    Start,
    Stop,
    Cancel,
    AdvancePass,
    EmergencyStop { active: bool },
    RunTicks { ticks: u64 },
    WaitIdle {
        #[serde(default = "default_timeout_ticks")]
        timeout_ticks: u64,
    },
}

impl JobStep {
    pub fn name(&self) -> &'static str {
        match self {
            JobStep::SetMode { .. } => "set_mode",
            JobStep::SetPitch { .. } => "set_pitch",
            JobStep::SetDirection { .. } => "set_direction",
            JobStep::SetInternal { .. } => "set_internal",
            JobStep::TouchOffX { .. } => "touch_off_x",
            JobStep::TouchOffZ { .. } => "touch_off_z",
            JobStep::NextStep => "next_step",
            JobStep::PreviousStep => "previous_step",
            JobStep::Target { .. } => "target",
            JobStep::Passes { .. } => "passes",
            JobStep::Starts { .. } => "starts",
            JobStep::ConeRatio { .. } => "cone_ratio",
            JobStep::Park => "park",
            JobStep::Jog { .. } => "jog",
            JobStep::SoftLimits { .. } => "soft_limits",
            JobStep::Handwheel { .. } => "handwheel",
            JobStep::CycleHandwheelStep => "cycle_handwheel_step",
            JobStep::Rpm { .. } => "rpm",
            JobStep::Start => "start",
            JobStep::Stop => "stop",
            JobStep::Cancel => "cancel",
            JobStep::AdvancePass => "advance_pass",
            JobStep::EmergencyStop { .. } => "emergency_stop",
            JobStep::RunTicks { .. } => "run_ticks",
            JobStep::WaitIdle { .. } => "wait_idle",
        }
    }
}

/// Load a job file, letting `ELS_*` environment variables override the
/// top-level settings (e.g. `ELS_SAMPLE_EVERY=1`).
pub fn load_job(path: &str) -> Result<Job, config_rs::ConfigError> {
    let settings = config_rs::Config::builder()
        .add_source(config_rs::File::with_name(path))
        .add_source(config_rs::Environment::with_prefix("ELS"))
        .build()
        .inspect_err(|e| tracing::error!("Failed to load job '{}': {}", path, e))?;
    let job: Job = settings
        .try_deserialize()
        .inspect_err(|e| tracing::error!("Invalid job '{}': {}", path, e))?;
    tracing::info!(name = %job.name, steps = job.steps.len(), "job loaded");
    Ok(job)
}

fn default_job_name() -> String { "job".to_string() }
fn default_sample_every() -> u32 { 100 }
fn default_starts() -> i32 { 1 }
fn default_timeout_ticks() -> u64 { 5_000_000 }
fn default_handwheel_step_du() -> i32 { 100 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_parse_from_toml() {
        let job: Job = toml::from_str(
            r#"
            name = "thread"

            [[steps]]
            action = "set_mode"
            mode = "thread"

            [[steps]]
            action = "set_pitch"
            dupr = 15000

            [[steps]]
            action = "jog"
            axis = "x"
            steps = -40

            [[steps]]
            action = "wait_idle"
            "#,
        )
        .unwrap();
        assert_eq!(job.sample_every, 100);
        assert_eq!(
            job.steps,
            vec![
                JobStep::SetMode { mode: OperationMode::Thread },
                JobStep::SetPitch { dupr: 15_000, starts: 1 },
                JobStep::Jog { axis: Axis::X, steps: -40 },
                JobStep::WaitIdle { timeout_ticks: 5_000_000 },
            ]
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        let result: Result<Job, _> = toml::from_str("[[steps]]\naction = \"warp\"\n");
        assert!(result.is_err());
    }
}

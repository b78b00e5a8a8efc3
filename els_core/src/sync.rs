//! Spindle angle <-> axis displacement mapping.
//!
//! Pure integer functions. Intermediates are widened to i128 so that a full
//! i32 spindle count at the largest pitch cannot overflow.

use serde::Serialize;

use crate::config::{AxisConfig, Config};
use crate::safety::SoftLimits;

/// Drive train constants of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AxisGeometry {
    pub motor_steps: i32,
    /// du per motor revolution
    pub screw_pitch_du: i32,
}

impl AxisGeometry {
    pub fn new(motor_steps: i32, screw_pitch_du: i32) -> Self {
        Self { motor_steps, screw_pitch_du }
    }

    pub fn from_config(axis: &AxisConfig) -> Self {
        Self::new(axis.motor_steps, axis.screw_pitch_du)
    }

    /// Nearest whole step for a travel in du.
    pub fn steps_from_du(&self, du: i64) -> i64 {
        div_round(
            i128::from(du) * i128::from(self.motor_steps),
            i128::from(self.screw_pitch_du),
        )
    }

    pub fn du_from_steps(&self, steps: i64) -> i64 {
        div_round(
            i128::from(steps) * i128::from(self.screw_pitch_du),
            i128::from(self.motor_steps),
        )
    }

    pub fn steps_from_mm(&self, mm: f32) -> i64 {
        self.steps_from_du(crate::units::du_from_mm(mm))
    }
}

/// Mapping parameterised by the encoder resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Synchronizer {
    counts_per_rev: i32,
}

impl Synchronizer {
    pub fn new(counts_per_rev: i32) -> Self {
        Self { counts_per_rev }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.encoder.counts_per_rev())
    }

    pub fn counts_per_rev(&self) -> i32 {
        self.counts_per_rev
    }

    /// Axis travel in steps for `spindle_ticks` of spindle rotation at
    /// `dupr` du/rev with `starts` thread starts. Truncates toward zero.
    pub fn axis_steps_from_spindle_ticks(
        &self,
        axis: &AxisGeometry,
        spindle_ticks: i64,
        dupr: i32,
        starts: i32,
    ) -> i64 {
        let num = i128::from(spindle_ticks)
            * i128::from(axis.motor_steps)
            * i128::from(dupr)
            * i128::from(starts);
        let den = i128::from(axis.screw_pitch_du) * i128::from(self.counts_per_rev);
        if den == 0 {
            return 0;
        }
        narrow(num / den)
    }

    /// As [`Self::axis_steps_from_spindle_ticks`], bounded to `limits`.
    pub fn axis_steps_from_spindle_ticks_clamped(
        &self,
        axis: &AxisGeometry,
        spindle_ticks: i64,
        dupr: i32,
        starts: i32,
        limits: &SoftLimits,
    ) -> i32 {
        let steps = self.axis_steps_from_spindle_ticks(axis, spindle_ticks, dupr, starts);
        steps.clamp(i64::from(limits.low), i64::from(limits.high)) as i32
    }

    /// Inverse mapping, for diagnostics only. Zero when the pitch is zero.
    pub fn spindle_ticks_from_axis_steps(
        &self,
        axis: &AxisGeometry,
        steps: i64,
        dupr: i32,
        starts: i32,
    ) -> i64 {
        let den = i128::from(axis.motor_steps) * i128::from(dupr) * i128::from(starts);
        if den == 0 {
            return 0;
        }
        let num = i128::from(steps) * i128::from(axis.screw_pitch_du) * i128::from(self.counts_per_rev);
        narrow(num / den)
    }
}

/// Both axes plus the spindle mapping, as needed by the cutting workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineGeometry {
    pub x: AxisGeometry,
    pub z: AxisGeometry,
    pub sync: Synchronizer,
}

impl MachineGeometry {
    pub fn from_config(config: &Config) -> Self {
        Self {
            x: AxisGeometry::from_config(&config.axes.x),
            z: AxisGeometry::from_config(&config.axes.z),
            sync: Synchronizer::from_config(config),
        }
    }
}

fn narrow(v: i128) -> i64 {
    v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

fn div_round(num: i128, den: i128) -> i64 {
    if den == 0 {
        return 0;
    }
    let half = den.abs() / 2;
    let adjusted = if (num < 0) == (den < 0) { num + half * den.signum() } else { num - half * den.signum() };
    narrow(adjusted / den)
}

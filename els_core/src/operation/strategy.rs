//! One strategy per operation mode, installed when the mode is selected.

use std::fmt;

use super::params::OperationParameters;
use super::state::{OperationMode, OperationState};
use super::{cone, cut, face, normal, thread, turn};
use crate::sync::{AxisGeometry, MachineGeometry};

/// Snapshot handed to a strategy each tick.
#[derive(Debug, Clone, Copy)]
pub struct CutContext<'a> {
    pub params: &'a OperationParameters,
    pub geometry: &'a MachineGeometry,
    /// Backlash-compensated spindle position.
    pub spindle: i32,
    pub x: i32,
    pub z: i32,
}

impl CutContext<'_> {
    /// Spindle travel since this pass's sync point. Reverse rotation past the
    /// sync point is dropped when `allow_reverse` is false.
    pub fn spindle_delta(&self, allow_reverse: bool) -> i64 {
        let delta = i64::from(self.spindle.wrapping_sub(self.params.spindle_sync_pos));
        if allow_reverse { delta } else { delta.max(0) }
    }

    /// Axis steps for `ticks` of spindle at the operation pitch.
    pub fn feed(&self, axis: &AxisGeometry, ticks: i64, dupr: i32, starts: i32) -> i64 {
        self.geometry.sync.axis_steps_from_spindle_ticks(axis, ticks, dupr, starts)
    }

    /// Radial X steps for a Z displacement of `z_steps` at the cone ratio.
    pub fn cone_offset(&self, z_steps: i64) -> i64 {
        let z_du = self.geometry.z.du_from_steps(z_steps);
        let radial_du = z_du * self.params.cone_ratio_micro() / 1_000_000;
        self.geometry.x.steps_from_du(radial_du)
    }

    pub fn parking_x(&self) -> i32 {
        self.params.parking.map_or(self.params.touch_off_x, |(x, _)| x)
    }

    pub fn parking_z(&self) -> i32 {
        self.params.parking.map_or(self.params.touch_off_z, |(_, z)| z)
    }
}

/// Axis targets requested for this tick; `None` leaves an axis alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisTargets {
    pub x: Option<i32>,
    pub z: Option<i32>,
}

impl AxisTargets {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn both(x: i64, z: i64) -> Self {
        Self {
            x: Some(saturate(x)),
            z: Some(saturate(z)),
        }
    }

    pub fn x(x: i64) -> Self {
        Self { x: Some(saturate(x)), z: None }
    }

    pub fn z(z: i64) -> Self {
        Self { x: None, z: Some(saturate(z)) }
    }

    pub fn is_none(&self) -> bool {
        self.x.is_none() && self.z.is_none()
    }
}

pub(crate) fn saturate(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Mode-specific parts of the cutting workflow. The pass sequencing itself
/// lives in `OperationManager`.
pub trait OperationStrategy: Send + fmt::Debug {
    /// Parameter-entry states visited after touch-off, in order.
    fn setup_steps(&self) -> &'static [OperationState];

    /// Runs the pass cycle; otherwise `tick` is applied every update.
    fn uses_passes(&self) -> bool {
        true
    }

    fn requires_touch_off(&self) -> bool {
        true
    }

    fn requires_cut_depth(&self) -> bool {
        false
    }

    fn requires_cut_length(&self) -> bool {
        false
    }

    /// Lock each pass to the same spindle phase.
    fn phase_locked(&self) -> bool {
        false
    }

    fn default_passes(&self) -> i32 {
        1
    }

    /// Feed installed when the mode is selected, du/rev.
    fn default_feed(&self) -> Option<i32> {
        None
    }

    /// Recompute `cut_depth`/`cut_length` from touch-off and targets.
    fn derive_cut(&self, _params: &mut OperationParameters, _geometry: &MachineGeometry) {}

    /// Pass start position `(x, z)`.
    fn start(&self, ctx: &CutContext) -> (i32, i32) {
        (ctx.params.touch_off_x, ctx.params.touch_off_z)
    }

    fn tick(&self, ctx: &CutContext) -> AxisTargets;

    /// While true the pass sync point follows the spindle, so the fed axis
    /// starts from zero once the plunge completes.
    fn plunging(&self, _ctx: &CutContext) -> bool {
        false
    }

    /// Whether the cut of the current pass is finished, given the targets
    /// just applied.
    fn is_done(&self, _ctx: &CutContext, _applied: &AxisTargets) -> bool {
        false
    }

    fn retract(&self, ctx: &CutContext) -> AxisTargets {
        AxisTargets::x(i64::from(ctx.parking_x()))
    }

    /// Empty targets complete the return immediately.
    fn return_to_start(&self, ctx: &CutContext) -> AxisTargets {
        AxisTargets::z(i64::from(ctx.params.touch_off_z))
    }

    /// Fraction of the current pass completed, 0..=1.
    fn pass_progress(&self, _ctx: &CutContext) -> f32 {
        0.0
    }
}

pub fn strategy_for(mode: OperationMode) -> Box<dyn OperationStrategy> {
    match mode {
        OperationMode::Normal => Box::new(normal::NormalStrategy),
        OperationMode::Turn => Box::new(turn::TurnStrategy),
        OperationMode::Face => Box::new(face::FaceStrategy),
        OperationMode::Thread => Box::new(thread::ThreadStrategy),
        OperationMode::Cone => Box::new(cone::ConeStrategy),
        OperationMode::Cut => Box::new(cut::CutStrategy),
    }
}

/// Spindle position at which a phase-locked pass begins: the first position
/// at or after `current` whose phase matches the operation origin shifted by
/// `start_offset` per pass.
pub fn phase_locked_sync(current: i32, origin: i32, start_offset: i32, pass: i32, counts_per_rev: i32) -> i32 {
    let counts = i64::from(counts_per_rev.max(1));
    let reference = origin.wrapping_add(start_offset.wrapping_mul(pass));
    let wait = i64::from(reference.wrapping_sub(current)).rem_euclid(counts);
    current.wrapping_add(saturate(wait))
}

/// Ratio `done / total` limited to 0..=1.
pub(crate) fn fraction(done: i64, total: i64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (done.abs() as f64 / total.abs() as f64).clamp(0.0, 1.0) as f32
}

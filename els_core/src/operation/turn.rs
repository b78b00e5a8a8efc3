//! Longitudinal turning: X at the pass depth, Z fed from the spindle.

use super::params::OperationParameters;
use super::state::OperationState;
use super::strategy::{AxisTargets, CutContext, OperationStrategy, fraction};
use crate::sync::MachineGeometry;

const SETUP: &[OperationState] = &[
    OperationState::TargetDiameter,
    OperationState::TargetLength,
    OperationState::SetupPasses,
];

#[derive(Debug)]
pub struct TurnStrategy;

impl OperationStrategy for TurnStrategy {
    fn setup_steps(&self) -> &'static [OperationState] {
        SETUP
    }

    fn requires_cut_depth(&self) -> bool {
        true
    }

    fn requires_cut_length(&self) -> bool {
        true
    }

    fn phase_locked(&self) -> bool {
        true
    }

    fn default_passes(&self) -> i32 {
        3
    }

    fn default_feed(&self) -> Option<i32> {
        // 0.1 mm/rev
        Some(1000)
    }

    fn derive_cut(&self, params: &mut OperationParameters, geometry: &MachineGeometry) {
        derive_longitudinal(params, geometry);
    }

    fn tick(&self, ctx: &CutContext) -> AxisTargets {
        follow_spindle(ctx, false)
    }

    fn is_done(&self, ctx: &CutContext, _applied: &AxisTargets) -> bool {
        length_reached(ctx)
    }

    fn pass_progress(&self, ctx: &CutContext) -> f32 {
        fraction(i64::from(ctx.z) - i64::from(ctx.params.touch_off_z), i64::from(ctx.params.cut_length))
    }
}

/// Radial depth from the diameter change, length from the target length.
pub(super) fn derive_longitudinal(params: &mut OperationParameters, geometry: &MachineGeometry) {
    if let Some(diameter) = params.target_diameter {
        let radial_du = (params.touch_off_x_diameter - diameter).abs() / 2;
        let depth = geometry.x.steps_from_du(radial_du) * params.radial_sign();
        params.cut_depth = super::strategy::saturate(depth);
    }
    if let Some(length) = params.target_length {
        params.cut_length = super::strategy::saturate(geometry.z.steps_from_du(length.abs()));
    }
}

/// X at the current pass depth, Z following the spindle from touch-off and
/// bounded to the cut length. With `cone` the radial correction for the Z
/// travel is added to X.
pub(super) fn follow_spindle(ctx: &CutContext, cone: bool) -> AxisTargets {
    let p = ctx.params;
    let limit = i64::from(p.cut_length).abs();
    let dz = ctx
        .feed(&ctx.geometry.z, ctx.spindle_delta(false), p.op_dupr, p.op_starts)
        .clamp(-limit, limit);
    let mut x = i64::from(p.touch_off_x) - p.pass_share(p.cut_depth);
    if cone {
        x += ctx.cone_offset(dz);
    }
    AxisTargets::both(x, i64::from(p.touch_off_z) + dz)
}

pub(super) fn length_reached(ctx: &CutContext) -> bool {
    let travelled = (i64::from(ctx.z) - i64::from(ctx.params.touch_off_z)).abs();
    travelled >= i64::from(ctx.params.cut_length).abs()
}

//! Facing: Z steps in by the pass depth, X sweeps toward the target
//! diameter fed from the spindle.

use super::params::OperationParameters;
use super::state::OperationState;
use super::strategy::{AxisTargets, CutContext, OperationStrategy, fraction, saturate};
use crate::sync::MachineGeometry;

const SETUP: &[OperationState] = &[
    OperationState::TargetDiameter,
    OperationState::TargetLength,
    OperationState::SetupPasses,
];

const TOLERANCE: i64 = 5;

#[derive(Debug)]
pub struct FaceStrategy;

impl FaceStrategy {
    fn final_x(ctx: &CutContext) -> i64 {
        i64::from(ctx.params.touch_off_x) - i64::from(ctx.params.cut_length)
    }

    fn pass_z(ctx: &CutContext) -> i64 {
        i64::from(ctx.params.touch_off_z) - ctx.params.pass_share(ctx.params.cut_depth)
    }
}

impl OperationStrategy for FaceStrategy {
    fn setup_steps(&self) -> &'static [OperationState] {
        SETUP
    }

    fn requires_cut_depth(&self) -> bool {
        true
    }

    fn requires_cut_length(&self) -> bool {
        true
    }

    fn default_feed(&self) -> Option<i32> {
        Some(1000)
    }

    // cut_length is the radial sweep on X, cut_depth the face depth on Z
    fn derive_cut(&self, params: &mut OperationParameters, geometry: &MachineGeometry) {
        if let Some(diameter) = params.target_diameter {
            let radial_du = (params.touch_off_x_diameter - diameter).abs() / 2;
            params.cut_length = saturate(geometry.x.steps_from_du(radial_du) * params.radial_sign());
        }
        if let Some(depth) = params.target_length {
            params.cut_depth = saturate(geometry.z.steps_from_du(depth.abs()));
        }
    }

    fn start(&self, ctx: &CutContext) -> (i32, i32) {
        (ctx.parking_x(), ctx.parking_z())
    }

    fn tick(&self, ctx: &CutContext) -> AxisTargets {
        let p = ctx.params;
        if self.plunging(ctx) {
            return AxisTargets::both(i64::from(p.touch_off_x), Self::pass_z(ctx));
        }
        let sweep = i64::from(p.cut_length);
        let dx = ctx
            .feed(&ctx.geometry.x, ctx.spindle_delta(false), p.op_dupr.saturating_abs(), 1)
            .min(sweep.abs());
        let x = i64::from(p.touch_off_x) - dx * sweep.signum();
        AxisTargets::both(x, Self::pass_z(ctx))
    }

    fn plunging(&self, ctx: &CutContext) -> bool {
        (i64::from(ctx.z) - Self::pass_z(ctx)).abs() >= TOLERANCE
    }

    fn is_done(&self, ctx: &CutContext, _applied: &AxisTargets) -> bool {
        (i64::from(ctx.x) - Self::final_x(ctx)).abs() < TOLERANCE
            && (i64::from(ctx.z) - Self::pass_z(ctx)).abs() < TOLERANCE
    }

    fn retract(&self, ctx: &CutContext) -> AxisTargets {
        AxisTargets::z(i64::from(ctx.parking_z()))
    }

    fn return_to_start(&self, ctx: &CutContext) -> AxisTargets {
        AxisTargets::x(i64::from(ctx.parking_x()))
    }

    fn pass_progress(&self, ctx: &CutContext) -> f32 {
        fraction(i64::from(ctx.x) - i64::from(ctx.params.touch_off_x), i64::from(ctx.params.cut_length))
    }
}

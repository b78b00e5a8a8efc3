//! Parting off: X plunges toward the final diameter fed from the spindle.

use super::params::OperationParameters;
use super::state::OperationState;
use super::strategy::{AxisTargets, CutContext, OperationStrategy, fraction, saturate};
use crate::sync::MachineGeometry;

const SETUP: &[OperationState] = &[OperationState::TargetDiameter, OperationState::SetupPasses];

const TOLERANCE: i64 = 5;

#[derive(Debug)]
pub struct CutStrategy;

impl CutStrategy {
    fn final_x(ctx: &CutContext) -> i64 {
        i64::from(ctx.params.touch_off_x) - ctx.params.pass_share(ctx.params.cut_depth)
    }
}

impl OperationStrategy for CutStrategy {
    fn setup_steps(&self) -> &'static [OperationState] {
        SETUP
    }

    fn requires_cut_depth(&self) -> bool {
        true
    }

    fn default_feed(&self) -> Option<i32> {
        Some(1000)
    }

    fn derive_cut(&self, params: &mut OperationParameters, geometry: &MachineGeometry) {
        if let Some(diameter) = params.target_diameter {
            let radial_du = (params.touch_off_x_diameter - diameter).abs() / 2;
            params.cut_depth = saturate(geometry.x.steps_from_du(radial_du) * params.radial_sign());
        }
    }

    fn tick(&self, ctx: &CutContext) -> AxisTargets {
        let p = ctx.params;
        let final_x = Self::final_x(ctx);
        let depth = (i64::from(p.touch_off_x) - final_x).abs();
        let dx = ctx
            .feed(&ctx.geometry.x, ctx.spindle_delta(false), p.op_dupr.saturating_abs(), 1)
            .min(depth);
        AxisTargets::x(i64::from(p.touch_off_x) - dx * i64::from(p.cut_depth.signum()))
    }

    fn is_done(&self, ctx: &CutContext, applied: &AxisTargets) -> bool {
        let final_x = Self::final_x(ctx);
        applied.x.is_some_and(|x| i64::from(x) == final_x) && (i64::from(ctx.x) - final_x).abs() < TOLERANCE
    }

    // Z never moved
    fn return_to_start(&self, _ctx: &CutContext) -> AxisTargets {
        AxisTargets::none()
    }

    fn pass_progress(&self, ctx: &CutContext) -> f32 {
        fraction(i64::from(ctx.x) - i64::from(ctx.params.touch_off_x), i64::from(ctx.params.cut_depth))
    }
}

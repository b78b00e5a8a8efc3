//! Threading: turning at the thread pitch, phase locked per start, with an
//! optional taper.

use super::params::OperationParameters;
use super::state::OperationState;
use super::strategy::{AxisTargets, CutContext, OperationStrategy, fraction};
use super::turn::{derive_longitudinal, follow_spindle, length_reached};
use crate::sync::MachineGeometry;

const SETUP: &[OperationState] = &[
    OperationState::TargetDiameter,
    OperationState::TargetLength,
    OperationState::SetupPasses,
    OperationState::SetupStarts,
    OperationState::SetupCone,
];

#[derive(Debug)]
pub struct ThreadStrategy;

impl OperationStrategy for ThreadStrategy {
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

    fn derive_cut(&self, params: &mut OperationParameters, geometry: &MachineGeometry) {
        derive_longitudinal(params, geometry);
    }

    fn tick(&self, ctx: &CutContext) -> AxisTargets {
        follow_spindle(ctx, true)
    }

    fn is_done(&self, ctx: &CutContext, _applied: &AxisTargets) -> bool {
        length_reached(ctx)
    }

    fn pass_progress(&self, ctx: &CutContext) -> f32 {
        fraction(i64::from(ctx.z) - i64::from(ctx.params.touch_off_z), i64::from(ctx.params.cut_length))
    }
}

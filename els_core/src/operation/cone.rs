//! Continuous taper: Z follows the spindle, X follows Z at the cone ratio.

use super::state::OperationState;
use super::strategy::{AxisTargets, CutContext, OperationStrategy};

const SETUP: &[OperationState] = &[OperationState::SetupCone];

#[derive(Debug)]
pub struct ConeStrategy;

impl OperationStrategy for ConeStrategy {
    fn setup_steps(&self) -> &'static [OperationState] {
        SETUP
    }

    fn uses_passes(&self) -> bool {
        false
    }

    fn tick(&self, ctx: &CutContext) -> AxisTargets {
        let p = ctx.params;
        let dz = ctx.feed(&ctx.geometry.z, ctx.spindle_delta(true), p.op_dupr, p.op_starts);
        let x = i64::from(p.touch_off_x) + ctx.cone_offset(dz);
        AxisTargets::both(x, i64::from(p.touch_off_z) + dz)
    }
}

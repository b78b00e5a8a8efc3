//! Electronic gearbox: Z is geared to the spindle at the set pitch.

use super::state::OperationState;
use super::strategy::{AxisTargets, CutContext, OperationStrategy};

#[derive(Debug)]
pub struct NormalStrategy;

impl OperationStrategy for NormalStrategy {
    fn setup_steps(&self) -> &'static [OperationState] {
        &[]
    }

    fn uses_passes(&self) -> bool {
        false
    }

    fn requires_touch_off(&self) -> bool {
        false
    }

    fn tick(&self, ctx: &CutContext) -> AxisTargets {
        let p = ctx.params;
        let ticks = i64::from(ctx.spindle.wrapping_sub(p.spindle_origin));
        let dz = ctx.feed(&ctx.geometry.z, ticks, p.op_dupr, p.op_starts);
        AxisTargets::z(i64::from(p.gear_origin_z) + dz)
    }
}

use serde::Serialize;

use super::state::OperationMode;

/// Touch-off references, targets and pass bookkeeping of the current mode.
///
/// Axis positions are steps, operator coordinates are du. `cut_depth` and
/// `cut_length` are derived steps whose sign carries the internal/external
/// convention: a positive radial value moves X toward the spindle axis.
#[derive(Debug, Clone, Serialize)]
pub struct OperationParameters {
    pub mode: OperationMode,
    pub touch_off_x: i32,
    pub touch_off_z: i32,
    /// Diameter at the X touch-off point, du.
    pub touch_off_x_diameter: i64,
    /// Z coordinate at the Z touch-off point, du.
    pub touch_off_z_coord: i64,
    pub touch_off_x_valid: bool,
    pub touch_off_z_valid: bool,
    pub target_diameter: Option<i64>,
    pub target_length: Option<i64>,
    pub cut_depth: i32,
    pub cut_length: i32,
    pub num_passes: i32,
    pub cone_ratio: f32,
    pub is_internal: bool,
    pub is_left_to_right: bool,
    pub current_pass: i32,
    pub spindle_sync_pos: i32,
    pub start_offset: i32,
    /// Compensated spindle position when the operation started.
    pub spindle_origin: i32,
    /// Z position when the gearbox was engaged.
    pub gear_origin_z: i32,
    pub parking: Option<(i32, i32)>,
    /// Pitch and starts captured at start, used for the whole operation.
    pub op_dupr: i32,
    pub op_starts: i32,
}

impl OperationParameters {
    pub fn new(mode: OperationMode) -> Self {
        Self {
            mode,
            touch_off_x: 0,
            touch_off_z: 0,
            touch_off_x_diameter: 0,
            touch_off_z_coord: 0,
            touch_off_x_valid: false,
            touch_off_z_valid: false,
            target_diameter: None,
            target_length: None,
            cut_depth: 0,
            cut_length: 0,
            num_passes: 1,
            cone_ratio: 0.0,
            is_internal: false,
            is_left_to_right: false,
            current_pass: 0,
            spindle_sync_pos: 0,
            start_offset: 0,
            spindle_origin: 0,
            gear_origin_z: 0,
            parking: None,
            op_dupr: 0,
            op_starts: 1,
        }
    }

    pub fn has_touch_off(&self) -> bool {
        self.touch_off_x_valid && self.touch_off_z_valid
    }

    pub fn clear_touch_off(&mut self) {
        self.touch_off_x = 0;
        self.touch_off_z = 0;
        self.touch_off_x_diameter = 0;
        self.touch_off_z_coord = 0;
        self.touch_off_x_valid = false;
        self.touch_off_z_valid = false;
    }

    /// +1 for external work (toward the axis), -1 for internal.
    pub fn radial_sign(&self) -> i64 {
        if self.is_internal { -1 } else { 1 }
    }

    /// Cumulative depth of `value` reached by the current pass.
    pub fn pass_share(&self, value: i32) -> i64 {
        let passes = i64::from(self.num_passes.max(1));
        let pass = i64::from(self.current_pass).clamp(0, passes - 1);
        i64::from(value) * (pass + 1) / passes
    }

    /// Cone ratio as a millionths fixed-point factor.
    pub fn cone_ratio_micro(&self) -> i64 {
        (f64::from(self.cone_ratio) * 1_000_000.0).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_share_reaches_full_depth_on_last_pass() {
        let mut p = OperationParameters::new(OperationMode::Turn);
        p.num_passes = 3;
        p.cut_depth = 600;
        let shares: Vec<i64> = (0..3)
            .map(|pass| {
                p.current_pass = pass;
                p.pass_share(p.cut_depth)
            })
            .collect();
        assert_eq!(shares, vec![200, 400, 600]);
    }

    #[test]
    fn cone_ratio_fixed_point() {
        let mut p = OperationParameters::new(OperationMode::Cone);
        p.cone_ratio = -0.0625;
        assert_eq!(p.cone_ratio_micro(), -62_500);
    }
}

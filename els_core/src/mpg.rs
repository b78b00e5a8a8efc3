//! Manual pulse generator (handwheel) jogging.

use crate::config::HandwheelConfig;
use crate::hardware_traits::PulseCounter;
use crate::sync::AxisGeometry;
use crate::units::Measure;

/// Step size presets in du: 1 mm, 0.1 mm, 0.01 mm and 0.1", 0.01", 0.001".
pub const METRIC_STEP_SIZES: [i32; 3] = [10_000, 1_000, 100];
pub const IMPERIAL_STEP_SIZES: [i32; 3] = [25_400, 2_540, 254];

/// Preset following `current` for `measure`, wrapping to the coarsest. A
/// size outside the table starts over at the coarsest.
pub fn next_step_size(current: i32, measure: Measure) -> i32 {
    let sizes = match measure {
        Measure::Metric => &METRIC_STEP_SIZES,
        Measure::Inch | Measure::Tpi => &IMPERIAL_STEP_SIZES,
    };
    sizes
        .iter()
        .position(|&size| size == current)
        .map_or(sizes[0], |i| sizes[(i + 1) % sizes.len()])
}

/// Converts handwheel counts into axis steps, carrying the fractional
/// remainder between updates so slow turning is never lost.
#[derive(Debug)]
pub struct Handwheel<C: PulseCounter> {
    counter: C,
    counter_limit: i32,
    last_count: i32,
    step_du: i32,
    scale_divisor: i32,
    // remainder numerator over (screw pitch * divisor)
    remainder: i64,
    enabled: bool,
}

impl<C: PulseCounter> Handwheel<C> {
    pub fn new(counter: C, config: &HandwheelConfig) -> Self {
        Self {
            counter,
            counter_limit: config.counter_limit,
            last_count: 0,
            step_du: config.step_du,
            scale_divisor: config.scale_divisor.max(1),
            remainder: 0,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enabling discards anything turned while disabled.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.counter.clear();
            self.last_count = 0;
            self.remainder = 0;
        }
        self.enabled = enabled;
    }

    pub fn step_du(&self) -> i32 {
        self.step_du
    }

    pub fn set_step_du(&mut self, du: i32) {
        self.step_du = du;
        self.remainder = 0;
    }

    /// Read the counter and return the whole steps to jog `axis` by.
    /// Counts are consumed even when `suppress` is set or the wheel is
    /// disabled, so they do not replay later.
    pub fn take_steps(&mut self, axis: &AxisGeometry, suppress: bool) -> i32 {
        let count = self.counter.read();
        let delta = count.wrapping_sub(self.last_count);
        if count.saturating_abs() >= self.counter_limit {
            self.counter.rebase(count);
            self.last_count = 0;
        } else {
            self.last_count = count;
        }
        if delta == 0 || suppress || !self.enabled {
            return 0;
        }
        let den = i64::from(axis.screw_pitch_du) * i64::from(self.scale_divisor);
        if den == 0 {
            return 0;
        }
        let num = i64::from(delta) * i64::from(self.step_du) * i64::from(axis.motor_steps) + self.remainder;
        let steps = num / den;
        self.remainder = num % den;
        steps.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware_traits::AtomicPulseCounter;

    #[test]
    fn step_presets_cycle_per_measure() {
        assert_eq!(next_step_size(10_000, Measure::Metric), 1_000);
        assert_eq!(next_step_size(100, Measure::Metric), 10_000);
        assert_eq!(next_step_size(254, Measure::Inch), 25_400);
        assert_eq!(next_step_size(2_540, Measure::Tpi), 254);
        // metric size after switching to inch
        assert_eq!(next_step_size(1_000, Measure::Inch), 25_400);
    }

    fn wheel(step_du: i32) -> (AtomicPulseCounter, Handwheel<AtomicPulseCounter>) {
        let counter = AtomicPulseCounter::new();
        let config = HandwheelConfig {
            scale_divisor: 1,
            step_du,
            counter_limit: 30_000,
        };
        let mut wheel = Handwheel::new(counter.clone(), &config);
        wheel.set_enabled(true);
        (counter, wheel)
    }

    #[test]
    fn fractional_steps_accumulate() {
        // 0.001 mm per count on a 5 mm / 4000 step screw = 0.8 steps
        let (counter, mut wheel) = wheel(10);
        let z = AxisGeometry::new(4000, 50_000);
        let mut total = 0;
        for _ in 0..5 {
            counter.add(1);
            total += wheel.take_steps(&z, false);
        }
        assert_eq!(total, 4);
    }

    #[test]
    fn suppressed_counts_are_dropped() {
        let (counter, mut wheel) = wheel(1_000);
        let z = AxisGeometry::new(4000, 50_000);
        counter.add(10);
        assert_eq!(wheel.take_steps(&z, true), 0);
        counter.add(1);
        assert_eq!(wheel.take_steps(&z, false), 80);
    }
}

//! Per-axis step/direction generation with a speed ramp and soft limits.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::config::{AxisConfig, MotionTiming};
use crate::hardware_traits::StepperPins;
use crate::safety::{SafetyCoordinator, SoftLimits};
use crate::sync::AxisGeometry;

/// The narrow view of an axis the cutting workflow needs.
pub trait AxisDrive {
    fn position(&self) -> i32;
    fn target(&self) -> i32;
    /// Store a new target, clamped to the soft limits; returns the
    /// effective target.
    fn set_target(&mut self, steps: i32) -> i32;
}

/// Read-only view of an axis position, safe to hand to another task.
#[derive(Debug, Clone)]
pub struct AxisPositionHandle {
    position: Arc<AtomicI32>,
}

impl AxisPositionHandle {
    pub fn get(&self) -> i32 {
        self.position.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct AxisMotionController<P: StepperPins> {
    pins: P,
    geometry: AxisGeometry,
    // written only by `step_pulse`
    position: Arc<AtomicI32>,
    target: i32,
    current_speed: u32,
    start_speed: u32,
    max_speed: u32,
    configured_max_speed: u32,
    acceleration: u32,
    limits: SoftLimits,
    enabled: bool,
    last_step_us: u32,
    last_direction: Option<bool>,
    invert_direction: bool,
    invert_enable: bool,
    invert_step: bool,
    direction_setup_us: u32,
    step_pulse_us: u32,
}

impl<P: StepperPins> AxisMotionController<P> {
    pub fn new(pins: P, config: &AxisConfig, timing: &MotionTiming) -> Self {
        let geometry = AxisGeometry::from_config(config);
        let travel = geometry.steps_from_mm(config.max_travel_mm as f32);
        let travel = travel.clamp(0, i64::from(i32::MAX)) as i32;
        let mut axis = Self {
            pins,
            geometry,
            position: Arc::new(AtomicI32::new(0)),
            target: 0,
            current_speed: config.start_speed,
            start_speed: config.start_speed,
            max_speed: config.max_speed,
            configured_max_speed: config.max_speed,
            acceleration: config.acceleration,
            limits: SoftLimits::symmetric(travel),
            enabled: false,
            last_step_us: 0,
            last_direction: None,
            invert_direction: config.invert_direction,
            invert_enable: config.invert_enable,
            invert_step: config.invert_step,
            direction_setup_us: timing.direction_setup_delay_us,
            step_pulse_us: timing.step_pulse_width_us,
        };
        let idle = axis.invert_step;
        axis.pins.set_step(idle);
        axis.enable(false);
        axis
    }

    pub fn position(&self) -> i32 {
        self.position.load(Ordering::Acquire)
    }

    pub fn position_handle(&self) -> AxisPositionHandle {
        AxisPositionHandle {
            position: Arc::clone(&self.position),
        }
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    pub fn set_target(&mut self, steps: i32) -> i32 {
        self.target = self.limits.clamp(steps);
        self.target
    }

    pub fn move_relative(&mut self, delta: i32) -> i32 {
        self.set_target(self.target.saturating_add(delta))
    }

    /// Pin the target to the current position.
    pub fn stop(&mut self) {
        self.target = self.position();
    }

    pub fn is_moving(&self) -> bool {
        self.position() != self.target
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Drive the enable line. Disabling also stops motion; the position
    /// is kept.
    pub fn enable(&mut self, on: bool) {
        self.enabled = on;
        self.pins.set_enable(on ^ self.invert_enable);
        if !on {
            self.stop();
        }
    }

    /// Redefine the current location as zero.
    pub fn zero(&mut self) {
        self.position.store(0, Ordering::Release);
        self.target = 0;
    }

    pub fn soft_limits(&self) -> SoftLimits {
        self.limits
    }

    /// Replace the envelope; the pending target is re-clamped into it.
    pub fn set_soft_limits(&mut self, limits: SoftLimits) {
        self.limits = limits;
        self.target = limits.clamp(self.target);
    }

    pub fn current_speed(&self) -> u32 {
        self.current_speed
    }

    pub fn max_speed(&self) -> u32 {
        self.max_speed
    }

    /// Clamped to `[start_speed, configured max]`.
    pub fn set_max_speed(&mut self, steps_per_sec: u32) -> u32 {
        self.max_speed = steps_per_sec.clamp(self.start_speed, self.configured_max_speed);
        self.current_speed = self.current_speed.min(self.max_speed);
        self.max_speed
    }

    pub fn geometry(&self) -> &AxisGeometry {
        &self.geometry
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    /// Advance one control period. Emits at most one step; returns whether
    /// it did.
    pub fn tick(&mut self, now_us: u32, safety: &SafetyCoordinator) -> bool {
        if safety.is_active() {
            return false;
        }
        let position = self.position();
        let to_go = i64::from(self.target) - i64::from(position);
        if to_go == 0 {
            self.decelerate();
            return false;
        }
        if !self.enabled {
            return false;
        }
        let forward = to_go > 0;
        if self.last_direction.is_some_and(|d| d != forward) {
            self.current_speed = self.start_speed;
        }
        if now_us.wrapping_sub(self.last_step_us) < self.step_interval_us() {
            return false;
        }
        self.step_pulse(forward);
        self.last_step_us = now_us;
        let remaining = to_go.unsigned_abs() - 1;
        if remaining <= self.stopping_distance() {
            self.decelerate();
        } else {
            self.accelerate();
        }
        true
    }

    fn step_interval_us(&self) -> u32 {
        1_000_000 / self.current_speed.max(1)
    }

    // steps needed to ramp from the current speed down to start speed
    fn stopping_distance(&self) -> u64 {
        let v = u64::from(self.current_speed);
        let v0 = u64::from(self.start_speed);
        let a = u64::from(self.acceleration.max(1));
        (v * v).saturating_sub(v0 * v0) / (2 * a)
    }

    fn accelerate(&mut self) {
        let dv = self.acceleration / self.current_speed.max(1);
        self.current_speed = self.current_speed.saturating_add(dv.max(1)).min(self.max_speed);
    }

    fn decelerate(&mut self) {
        if self.current_speed <= self.start_speed {
            self.current_speed = self.start_speed;
            return;
        }
        let dv = (self.acceleration / self.current_speed).max(1);
        self.current_speed = self.current_speed.saturating_sub(dv).max(self.start_speed);
    }

    fn step_pulse(&mut self, forward: bool) {
        if self.last_direction != Some(forward) {
            self.pins.set_direction(forward ^ self.invert_direction);
            self.pins.delay_us(self.direction_setup_us);
            self.last_direction = Some(forward);
        }
        let active = !self.invert_step;
        self.pins.set_step(active);
        self.pins.delay_us(self.step_pulse_us);
        self.pins.set_step(!active);
        self.position.fetch_add(if forward { 1 } else { -1 }, Ordering::AcqRel);
    }
}

impl<P: StepperPins> AxisDrive for AxisMotionController<P> {
    fn position(&self) -> i32 {
        AxisMotionController::position(self)
    }

    fn target(&self) -> i32 {
        self.target
    }

    fn set_target(&mut self, steps: i32) -> i32 {
        AxisMotionController::set_target(self, steps)
    }
}

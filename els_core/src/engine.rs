//! The engine context object: owns the spindle tracker, both axes, the
//! operation workflow and the safety coordinator, and runs them once per
//! `update()` from a single control loop.

use serde::{Deserialize, Serialize};

use crate::axis::{AxisMotionController, AxisPositionHandle};
use crate::config::Config;
use crate::error::{EngineError, OperationError};
use crate::hardware_traits::{Clock, PulseCounter, StepperPins};
use crate::mpg::{self, Handwheel};
use crate::operation::{OperationManager, OperationMode, OperationParameters, OperationState, PassSubState, Plant};
use crate::safety::{EmergencyStopHandle, SafetyCoordinator, SoftLimits};
use crate::spindle::SpindleTracker;
use crate::sync::{AxisGeometry, MachineGeometry};
use crate::units::{DUPR_MAX, Measure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Z,
}

/// Point-in-time view for displays, loggers and the web collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub x_position: i32,
    pub x_target: i32,
    pub z_position: i32,
    pub z_target: i32,
    pub spindle_position: i32,
    pub spindle_compensated: i32,
    pub thread_pitch: i32,
    pub thread_starts: i32,
    pub mode: OperationMode,
    pub state: OperationState,
    pub sub_state: PassSubState,
    pub current_pass: i32,
    pub num_passes: i32,
    pub progress: f32,
    pub following_error_x_um: f32,
    pub following_error_z_um: f32,
    pub emergency_stop: bool,
    pub status_text: String,
    pub prompt_text: String,
}

pub struct Engine<C: PulseCounter, P: StepperPins, K: Clock> {
    config: Config,
    geometry: MachineGeometry,
    spindle: SpindleTracker<C>,
    x: AxisMotionController<P>,
    z: AxisMotionController<P>,
    operation: OperationManager,
    safety: SafetyCoordinator,
    handwheel: Option<Handwheel<C>>,
    handwheel_axis: Axis,
    clock: K,
}

impl<C: PulseCounter, P: StepperPins, K: Clock> Engine<C, P, K> {
    /// Build the engine over its hardware. Both axes start enabled.
    pub fn new(config: Config, spindle_counter: C, x_pins: P, z_pins: P, clock: K) -> Self {
        let geometry = MachineGeometry::from_config(&config);
        let spindle = SpindleTracker::new(spindle_counter, &config.encoder);
        let mut x = AxisMotionController::new(x_pins, &config.axes.x, &config.timing);
        let mut z = AxisMotionController::new(z_pins, &config.axes.z, &config.timing);
        x.enable(true);
        z.enable(true);
        tracing::info!(
            counts_per_rev = geometry.sync.counts_per_rev(),
            backlash = config.encoder.backlash,
            "engine initialised"
        );
        Self {
            geometry,
            spindle,
            x,
            z,
            operation: OperationManager::new(geometry),
            safety: SafetyCoordinator::new(),
            handwheel: None,
            handwheel_axis: Axis::Z,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn with_plant<R>(&mut self, f: impl FnOnce(&mut OperationManager, &mut Plant<'_>) -> R) -> R {
        let mut plant = Plant {
            spindle: &mut self.spindle,
            x: &mut self.x,
            z: &mut self.z,
        };
        f(&mut self.operation, &mut plant)
    }

    fn axis(&self, axis: Axis) -> &AxisMotionController<P> {
        match axis {
            Axis::X => &self.x,
            Axis::Z => &self.z,
        }
    }

    fn axis_mut(&mut self, axis: Axis) -> &mut AxisMotionController<P> {
        match axis {
            Axis::X => &mut self.x,
            Axis::Z => &mut self.z,
        }
    }

    fn geometry_of(&self, axis: Axis) -> &AxisGeometry {
        match axis {
            Axis::X => &self.geometry.x,
            Axis::Z => &self.geometry.z,
        }
    }

    /// One control period: safety, spindle, handwheel, workflow, axes.
    pub fn update(&mut self) {
        if self.safety.poll() {
            self.apply_emergency_stop();
        }
        self.spindle.update();
        let halted = self.safety.is_active();
        let jog = self.take_handwheel_steps(halted || self.operation.is_running());
        if halted {
            return;
        }
        if jog != 0 {
            let axis = self.handwheel_axis;
            self.axis_mut(axis).move_relative(jog);
        }
        self.with_plant(|operation, plant| operation.update(plant));
        let now = self.clock.now_micros();
        self.x.tick(now, &self.safety);
        self.z.tick(now, &self.safety);
    }

    fn take_handwheel_steps(&mut self, suppress: bool) -> i32 {
        let geometry = *self.geometry_of(self.handwheel_axis);
        match self.handwheel.as_mut() {
            Some(wheel) => wheel.take_steps(&geometry, suppress),
            None => 0,
        }
    }

    // ---- safety ----

    pub fn emergency_stop_handle(&self) -> EmergencyStopHandle {
        self.safety.handle()
    }

    pub fn is_emergency_stop(&self) -> bool {
        self.safety.is_active()
    }

    /// Engaging stops both axes, disables synchronisation and returns the
    /// workflow to `Idle` before returning. Releasing only clears the flag.
    pub fn set_emergency_stop(&mut self, active: bool) {
        if self.safety.set(active) {
            self.apply_emergency_stop();
        }
    }

    fn apply_emergency_stop(&mut self) {
        self.x.stop();
        self.z.stop();
        self.spindle.set_syncing(false);
        self.with_plant(|operation, plant| operation.emergency_stop(plant));
    }

    // ---- manual motion ----

    fn ensure_manual(&self) -> Result<(), OperationError> {
        if self.safety.is_active() {
            return Err(OperationError::EmergencyStop);
        }
        if self.operation.is_running() {
            return Err(OperationError::Busy);
        }
        Ok(())
    }

    /// Jog by `steps`; returns the effective, clamped target.
    pub fn move_relative(&mut self, axis: Axis, steps: i32) -> Result<i32, OperationError> {
        self.ensure_manual()
            .inspect_err(|e| tracing::debug!(?axis, error = %e, "jog rejected"))?;
        Ok(self.axis_mut(axis).move_relative(steps))
    }

    pub fn set_target(&mut self, axis: Axis, steps: i32) -> Result<i32, OperationError> {
        self.ensure_manual()?;
        Ok(self.axis_mut(axis).set_target(steps))
    }

    pub fn zero_axis(&mut self, axis: Axis) -> Result<(), OperationError> {
        self.ensure_manual()?;
        self.axis_mut(axis).zero();
        Ok(())
    }

    pub fn enable_axis(&mut self, axis: Axis, on: bool) {
        self.axis_mut(axis).enable(on);
    }

    pub fn set_soft_limits(&mut self, axis: Axis, low: i32, high: i32) -> Result<(), EngineError> {
        let limits = SoftLimits::new(low, high).ok_or(EngineError::InvalidLimits { low, high })?;
        self.axis_mut(axis).set_soft_limits(limits);
        Ok(())
    }

    pub fn soft_limits(&self, axis: Axis) -> SoftLimits {
        self.axis(axis).soft_limits()
    }

    /// Pitch in du/rev (clamped to one inch) and thread starts.
    pub fn set_thread_pitch(&mut self, dupr: i32, starts: i32) -> Result<(), OperationError> {
        if self.operation.is_running() {
            return Err(OperationError::Busy);
        }
        let max = DUPR_MAX as i32;
        self.spindle.set_thread_pitch(dupr.clamp(-max, max), starts);
        Ok(())
    }

    pub fn reset_spindle_position(&mut self) -> Result<(), EngineError> {
        self.spindle.reset()
    }

    // ---- handwheel ----

    pub fn attach_handwheel(&mut self, counter: C) {
        self.handwheel = Some(Handwheel::new(counter, &self.config.handwheel));
    }

    pub fn set_handwheel_axis(&mut self, axis: Axis) {
        self.handwheel_axis = axis;
    }

    pub fn set_handwheel_enabled(&mut self, enabled: bool) {
        if let Some(wheel) = self.handwheel.as_mut() {
            wheel.set_enabled(enabled);
        }
    }

    pub fn set_handwheel_step(&mut self, du: i32) {
        if let Some(wheel) = self.handwheel.as_mut() {
            wheel.set_step_du(du);
        }
    }

    /// Select the next step-size preset for the display measure; `None`
    /// without a handwheel.
    pub fn cycle_handwheel_step(&mut self) -> Option<i32> {
        let measure = self.operation.measure();
        let wheel = self.handwheel.as_mut()?;
        let du = mpg::next_step_size(wheel.step_du(), measure);
        wheel.set_step_du(du);
        tracing::debug!(du, ?measure, "handwheel step size");
        Some(du)
    }

    // ---- workflow commands ----

    pub fn set_mode(&mut self, mode: OperationMode) {
        self.with_plant(|operation, plant| operation.set_mode(mode, plant));
    }

    pub fn set_left_to_right(&mut self, left_to_right: bool) -> Result<(), OperationError> {
        self.operation.set_left_to_right(left_to_right)
    }

    pub fn set_internal(&mut self, internal: bool) -> Result<(), OperationError> {
        self.operation.set_internal(internal)
    }

    pub fn start_touch_off_x(&mut self) -> Result<(), OperationError> {
        self.with_plant(|operation, plant| operation.start_touch_off_x(plant))
    }

    pub fn start_touch_off_z(&mut self) -> Result<(), OperationError> {
        self.with_plant(|operation, plant| operation.start_touch_off_z(plant))
    }

    pub fn confirm_touch_off_value(&mut self, value_mm: f32) -> Result<(), OperationError> {
        self.operation.confirm_touch_off_value(value_mm)
    }

    pub fn next_setup_step(&mut self) -> Result<(), OperationError> {
        self.operation
            .next_setup_step()
            .inspect_err(|e| tracing::debug!(error = %e, "setup step rejected"))
    }

    pub fn previous_setup_step(&mut self) -> Result<(), OperationError> {
        self.operation.previous_setup_step()
    }

    pub fn confirm_target_value(&mut self, du: i64) -> Result<(), OperationError> {
        self.operation
            .confirm_target_value(du)
            .inspect_err(|e| tracing::debug!(du, error = %e, "target rejected"))
    }

    pub fn set_passes(&mut self, passes: i32) -> Result<(), OperationError> {
        self.operation.set_passes(passes)
    }

    pub fn set_starts(&mut self, starts: i32) -> Result<(), OperationError> {
        self.with_plant(|operation, plant| operation.set_starts(starts, plant))
    }

    pub fn set_cone_ratio(&mut self, ratio: f32) -> Result<(), OperationError> {
        self.operation.set_cone_ratio(ratio)
    }

    pub fn start_parking_setup(&mut self) -> Result<(), OperationError> {
        self.operation.start_parking_setup()
    }

    pub fn confirm_parking_position(&mut self) -> Result<(), OperationError> {
        self.with_plant(|operation, plant| operation.confirm_parking_position(plant))
    }

    pub fn clear_parking_position(&mut self) -> Result<(), OperationError> {
        self.operation.clear_parking_position()
    }

    pub fn clear_current_input(&mut self) {
        self.operation.clear_current_input();
    }

    pub fn start_operation(&mut self) -> Result<(), OperationError> {
        let active = self.safety.is_active();
        self.with_plant(|operation, plant| operation.start_operation(plant, active))
            .inspect_err(|e| tracing::debug!(error = %e, "start rejected"))
    }

    pub fn stop_operation(&mut self) {
        self.with_plant(|operation, plant| operation.stop_operation(plant));
    }

    pub fn cancel_operation(&mut self) {
        self.with_plant(|operation, plant| operation.cancel_operation(plant));
    }

    pub fn advance_pass(&mut self) -> Result<(), OperationError> {
        self.operation.advance_pass()
    }

    pub fn cycle_measure(&mut self) -> Measure {
        self.operation.cycle_measure()
    }

    // ---- outputs ----

    pub fn position(&self, axis: Axis) -> i32 {
        self.axis(axis).position()
    }

    pub fn target(&self, axis: Axis) -> i32 {
        self.axis(axis).target()
    }

    pub fn position_handle(&self, axis: Axis) -> AxisPositionHandle {
        self.axis(axis).position_handle()
    }

    pub fn is_moving(&self, axis: Axis) -> bool {
        self.axis(axis).is_moving()
    }

    pub fn is_enabled(&self, axis: Axis) -> bool {
        self.axis(axis).is_enabled()
    }

    pub fn axis_pins(&self, axis: Axis) -> &P {
        self.axis(axis).pins()
    }

    /// Logical spindle position in encoder counts.
    pub fn spindle_position(&self) -> i32 {
        self.spindle.position()
    }

    pub fn spindle_compensated(&self) -> i32 {
        self.spindle.compensated()
    }

    pub fn spindle(&self) -> &SpindleTracker<C> {
        &self.spindle
    }

    /// Commanded minus actual position, in micrometres.
    pub fn following_error_um(&self, axis: Axis) -> f32 {
        let a = self.axis(axis);
        let error_steps = i64::from(a.target()) - i64::from(a.position());
        self.geometry_of(axis).du_from_steps(error_steps) as f32 / 10.0
    }

    /// Following error expressed as spindle counts at the operative pitch.
    pub fn following_error_ticks(&self, axis: Axis) -> i64 {
        let a = self.axis(axis);
        let error_steps = i64::from(a.target()) - i64::from(a.position());
        self.geometry.sync.spindle_ticks_from_axis_steps(
            self.geometry_of(axis),
            error_steps,
            self.spindle.thread_pitch(),
            self.spindle.thread_starts(),
        )
    }

    pub fn operation(&self) -> &OperationManager {
        &self.operation
    }

    pub fn params(&self) -> &OperationParameters {
        self.operation.params()
    }

    pub fn mode(&self) -> OperationMode {
        self.operation.mode()
    }

    pub fn state(&self) -> OperationState {
        self.operation.state()
    }

    pub fn sub_state(&self) -> PassSubState {
        self.operation.sub_state()
    }

    pub fn progress(&self) -> f32 {
        self.operation
            .progress(self.x.position(), self.z.position(), self.spindle.compensated())
    }

    pub fn status_text(&self) -> String {
        if self.safety.is_active() {
            return "E-STOP".to_string();
        }
        self.operation.status_text()
    }

    pub fn prompt_text(&self) -> String {
        if self.safety.is_active() {
            return "Release to continue".to_string();
        }
        self.operation.prompt_text()
    }

    pub fn status(&self) -> EngineStatus {
        let params = self.operation.params();
        EngineStatus {
            x_position: self.x.position(),
            x_target: self.x.target(),
            z_position: self.z.position(),
            z_target: self.z.target(),
            spindle_position: self.spindle.position(),
            spindle_compensated: self.spindle.compensated(),
            thread_pitch: self.spindle.thread_pitch(),
            thread_starts: self.spindle.thread_starts(),
            mode: params.mode,
            state: self.operation.state(),
            sub_state: self.operation.sub_state(),
            current_pass: params.current_pass,
            num_passes: params.num_passes,
            progress: self.progress(),
            following_error_x_um: self.following_error_um(Axis::X),
            following_error_z_um: self.following_error_um(Axis::Z),
            emergency_stop: self.safety.is_active(),
            status_text: self.status_text(),
            prompt_text: self.prompt_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware_traits::{AtomicPulseCounter, ManualClock, RecordingPins};

    type TestEngine = Engine<AtomicPulseCounter, RecordingPins, ManualClock>;

    fn engine() -> (AtomicPulseCounter, ManualClock, TestEngine) {
        let counter = AtomicPulseCounter::new();
        let clock = ManualClock::new();
        let engine = Engine::new(
            Config::default(),
            counter.clone(),
            RecordingPins::new(),
            RecordingPins::new(),
            clock.clone(),
        );
        (counter, clock, engine)
    }

    fn run(engine: &mut TestEngine, clock: &ManualClock, counter: &AtomicPulseCounter, ticks: u32, counts: i32) {
        for _ in 0..ticks {
            counter.add(counts);
            clock.advance(200);
            engine.update();
        }
    }

    #[test]
    fn gearbox_follows_spindle() {
        let (counter, clock, mut engine) = engine();
        engine.set_thread_pitch(1000, 1).unwrap();
        engine.start_operation().unwrap();
        // one revolution at 0.1 mm/rev on a 5 mm screw: 80 steps
        run(&mut engine, &clock, &counter, 100, 12);
        run(&mut engine, &clock, &counter, 200, 0);
        assert_eq!(engine.spindle_compensated(), 1200);
        assert_eq!(engine.target(Axis::Z), 80);
        assert_eq!(engine.position(Axis::Z), 80);
        assert_eq!(engine.following_error_um(Axis::Z), 0.0);
    }

    #[test]
    fn manual_moves_rejected_during_emergency_stop() {
        let (_counter, _clock, mut engine) = engine();
        engine.set_emergency_stop(true);
        assert_eq!(engine.move_relative(Axis::X, 10), Err(OperationError::EmergencyStop));
        assert_eq!(engine.start_operation(), Err(OperationError::EmergencyStop));
        assert_eq!(engine.status_text(), "E-STOP");
        engine.set_emergency_stop(false);
        assert_eq!(engine.move_relative(Axis::X, 10), Ok(10));
    }

    #[test]
    fn handle_trigger_applies_on_next_update() {
        let (counter, clock, mut engine) = engine();
        engine.move_relative(Axis::Z, 1_000).unwrap();
        run(&mut engine, &clock, &counter, 50, 0);
        let handle = engine.emergency_stop_handle();
        handle.trigger();
        engine.update();
        let stopped_at = engine.position(Axis::Z);
        assert_eq!(engine.target(Axis::Z), stopped_at);
        run(&mut engine, &clock, &counter, 50, 0);
        assert_eq!(engine.position(Axis::Z), stopped_at);
        assert!(engine.status().emergency_stop);
    }

    #[test]
    fn following_error_reports_micrometres() {
        let (_counter, _clock, mut engine) = engine();
        // Z: 12.5 du per step
        engine.set_target(Axis::Z, 8).unwrap();
        assert_eq!(engine.following_error_um(Axis::Z), 10.0);
    }

    #[test]
    fn following_error_in_spindle_counts() {
        let (_counter, _clock, mut engine) = engine();
        engine.set_thread_pitch(0, 1).unwrap();
        engine.set_target(Axis::Z, 8).unwrap();
        assert_eq!(engine.following_error_ticks(Axis::Z), 0);
        // 8 steps = 100 du = 0.1 rev at 1 mm/rev
        engine.set_thread_pitch(1000, 1).unwrap();
        assert_eq!(engine.following_error_ticks(Axis::Z), 120);
        engine.set_thread_pitch(1000, 2).unwrap();
        assert_eq!(engine.following_error_ticks(Axis::Z), 60);
        // X: 10 du per step
        engine.set_target(Axis::X, -10).unwrap();
        engine.set_thread_pitch(1000, 1).unwrap();
        assert_eq!(engine.following_error_ticks(Axis::X), -120);
    }

    #[test]
    fn handle_pulse_between_updates_still_stops() {
        let (counter, clock, mut engine) = engine();
        engine.set_thread_pitch(1000, 1).unwrap();
        engine.start_operation().unwrap();
        run(&mut engine, &clock, &counter, 50, 12);
        let handle = engine.emergency_stop_handle();
        handle.trigger();
        handle.release();
        engine.update();
        assert_eq!(engine.state(), OperationState::Idle);
        assert!(!engine.spindle().is_syncing());
        assert_eq!(engine.target(Axis::Z), engine.position(Axis::Z));
        assert!(!engine.is_emergency_stop());
        assert!(engine.move_relative(Axis::X, 5).is_ok());
    }

    #[test]
    fn soft_limits_validated() {
        let (_counter, _clock, mut engine) = engine();
        assert_eq!(
            engine.set_soft_limits(Axis::X, 10, -10),
            Err(EngineError::InvalidLimits { low: 10, high: -10 })
        );
        engine.set_soft_limits(Axis::X, -100, 100).unwrap();
        assert_eq!(engine.move_relative(Axis::X, 500), Ok(100));
    }

    #[test]
    fn pitch_change_rejected_while_running() {
        let (_counter, _clock, mut engine) = engine();
        engine.start_operation().unwrap();
        assert!(engine.spindle().is_syncing());
        assert_eq!(engine.set_thread_pitch(500, 1), Err(OperationError::Busy));
        assert_eq!(engine.reset_spindle_position(), Err(EngineError::SpindleBusy));
        engine.stop_operation();
        assert!(engine.reset_spindle_position().is_ok());
    }

    #[test]
    fn zero_and_disable_axis() {
        let (counter, clock, mut engine) = engine();
        engine.move_relative(Axis::Z, 20).unwrap();
        run(&mut engine, &clock, &counter, 200, 0);
        assert_eq!(engine.position(Axis::Z), 20);
        engine.zero_axis(Axis::Z).unwrap();
        assert_eq!(engine.position(Axis::Z), 0);
        assert_eq!(engine.target(Axis::Z), 0);
        engine.enable_axis(Axis::Z, false);
        assert!(!engine.is_enabled(Axis::Z));
        engine.move_relative(Axis::Z, 20).unwrap();
        run(&mut engine, &clock, &counter, 200, 0);
        assert_eq!(engine.position(Axis::Z), 0);
    }

    #[test]
    fn handwheel_jogs_selected_axis() {
        let (counter, clock, mut engine) = engine();
        let wheel = AtomicPulseCounter::new();
        engine.attach_handwheel(wheel.clone());
        engine.set_handwheel_axis(Axis::X);
        engine.set_handwheel_enabled(true);
        // 100 du per detent on a 4 mm screw: 10 steps
        wheel.add(3);
        run(&mut engine, &clock, &counter, 1, 0);
        assert_eq!(engine.target(Axis::X), 30);
    }

    #[test]
    fn handwheel_step_presets() {
        let (counter, clock, mut engine) = engine();
        assert_eq!(engine.cycle_handwheel_step(), None);
        let wheel = AtomicPulseCounter::new();
        engine.attach_handwheel(wheel.clone());
        engine.set_handwheel_axis(Axis::X);
        engine.set_handwheel_enabled(true);
        // default 0.01 mm wraps to 1 mm, then 0.1 mm
        assert_eq!(engine.cycle_handwheel_step(), Some(10_000));
        assert_eq!(engine.cycle_handwheel_step(), Some(1_000));
        wheel.add(2);
        run(&mut engine, &clock, &counter, 1, 0);
        assert_eq!(engine.target(Axis::X), 200);
    }
}

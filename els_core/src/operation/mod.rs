//! Cutting-operation workflow: touch-off, parameter entry, and the per-pass
//! state machine that drives both axes from the spindle.

mod cone;
mod cut;
mod face;
mod normal;
pub mod params;
pub mod state;
pub mod strategy;
mod thread;
mod turn;

pub use params::OperationParameters;
pub use state::{OperationMode, OperationState, PassSubState};
pub use strategy::{AxisTargets, CutContext, OperationStrategy, phase_locked_sync, strategy_for};

use crate::axis::AxisDrive;
use crate::error::OperationError;
use crate::spindle::SpindleSync;
use crate::sync::MachineGeometry;
use crate::units::{self, Measure};

/// Steps within which an axis counts as arrived.
pub const POSITION_TOLERANCE: i64 = 5;
/// Width of the status/prompt line.
pub const DISPLAY_WIDTH: usize = 21;

/// Mutable access to the spindle and both axes for one call.
pub struct Plant<'a> {
    pub spindle: &'a mut dyn SpindleSync,
    pub x: &'a mut dyn AxisDrive,
    pub z: &'a mut dyn AxisDrive,
}

impl Plant<'_> {
    fn pin_axes(&mut self) {
        let x = self.x.position();
        self.x.set_target(x);
        let z = self.z.position();
        self.z.set_target(z);
    }

    /// Apply requested targets; returns the effective (clamped) ones.
    fn apply(&mut self, targets: AxisTargets) -> AxisTargets {
        AxisTargets {
            x: targets.x.map(|x| self.x.set_target(x)),
            z: targets.z.map(|z| self.z.set_target(z)),
        }
    }
}

fn arrived(ctx: &CutContext, applied: &AxisTargets) -> bool {
    let near = |pos: i32, target: i32| (i64::from(pos) - i64::from(target)).abs() < POSITION_TOLERANCE;
    applied.x.is_none_or(|t| near(ctx.x, t)) && applied.z.is_none_or(|t| near(ctx.z, t))
}

enum PassEvent {
    Stay,
    Enter(PassSubState),
    Synced(i32),
    PassComplete,
}

#[derive(Debug)]
pub struct OperationManager {
    params: OperationParameters,
    strategy: Box<dyn OperationStrategy>,
    state: OperationState,
    sub_state: PassSubState,
    geometry: MachineGeometry,
    measure: Measure,
    completed_passes: u32,
}

impl OperationManager {
    pub fn new(geometry: MachineGeometry) -> Self {
        let strategy = strategy_for(OperationMode::Normal);
        let mut params = OperationParameters::new(OperationMode::Normal);
        params.num_passes = strategy.default_passes();
        Self {
            params,
            strategy,
            state: OperationState::Idle,
            sub_state: PassSubState::MoveToStart,
            geometry,
            measure: Measure::Metric,
            completed_passes: 0,
        }
    }

    pub fn mode(&self) -> OperationMode {
        self.params.mode
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn sub_state(&self) -> PassSubState {
        self.sub_state
    }

    pub fn params(&self) -> &OperationParameters {
        &self.params
    }

    pub fn is_running(&self) -> bool {
        self.state == OperationState::Running
    }

    /// Passes finished since the operation started.
    pub fn completed_passes(&self) -> u32 {
        self.completed_passes
    }

    pub fn measure(&self) -> Measure {
        self.measure
    }

    pub fn cycle_measure(&mut self) -> Measure {
        self.measure = self.measure.cycle();
        self.measure
    }

    fn ensure_not_running(&self) -> Result<(), OperationError> {
        if self.is_running() {
            return Err(OperationError::Busy);
        }
        Ok(())
    }

    /// Select a mode. Stops any running operation and resets touch-off,
    /// targets, parking and pass counters.
    pub fn set_mode(&mut self, mode: OperationMode, plant: &mut Plant) {
        if self.is_running() {
            self.stop_operation(plant);
        }
        self.strategy = strategy_for(mode);
        self.params = OperationParameters::new(mode);
        self.params.num_passes = self.strategy.default_passes();
        if let Some(feed) = self.strategy.default_feed() {
            plant.spindle.set_thread_pitch(feed, 1);
        }
        self.state = OperationState::Idle;
        self.sub_state = PassSubState::MoveToStart;
        self.completed_passes = 0;
        tracing::info!(?mode, "operation mode selected");
    }

    pub fn set_left_to_right(&mut self, left_to_right: bool) -> Result<(), OperationError> {
        self.ensure_not_running()?;
        self.params.is_left_to_right = left_to_right;
        Ok(())
    }

    pub fn set_internal(&mut self, internal: bool) -> Result<(), OperationError> {
        self.ensure_not_running()?;
        self.params.is_internal = internal;
        self.derive_cut();
        Ok(())
    }

    /// Record the X position as the touch-off point; the diameter there
    /// follows with `confirm_touch_off_value`.
    pub fn start_touch_off_x(&mut self, plant: &mut Plant) -> Result<(), OperationError> {
        self.ensure_not_running()?;
        self.params.touch_off_x = plant.x.position();
        self.params.touch_off_x_valid = false;
        self.state = OperationState::TouchOffX;
        Ok(())
    }

    pub fn start_touch_off_z(&mut self, plant: &mut Plant) -> Result<(), OperationError> {
        self.ensure_not_running()?;
        self.params.touch_off_z = plant.z.position();
        self.params.touch_off_z_valid = false;
        self.state = OperationState::TouchOffZ;
        Ok(())
    }

    /// Diameter (X) or Z coordinate, in mm, at the pending touch-off point.
    pub fn confirm_touch_off_value(&mut self, value_mm: f32) -> Result<(), OperationError> {
        if !value_mm.is_finite() {
            return Err(OperationError::InvalidValue(format!("{value_mm}")));
        }
        let du = units::du_from_mm(value_mm);
        match self.state {
            OperationState::TouchOffX => {
                if du < 0 {
                    return Err(OperationError::InvalidValue("negative diameter".to_string()));
                }
                self.params.touch_off_x_diameter = du;
                self.params.touch_off_x_valid = true;
            }
            OperationState::TouchOffZ => {
                self.params.touch_off_z_coord = du;
                self.params.touch_off_z_valid = true;
            }
            state => return Err(OperationError::WrongState(state)),
        }
        self.state = OperationState::Idle;
        self.derive_cut();
        tracing::debug!(value_mm, "touch-off confirmed");
        Ok(())
    }

    /// Abandon a pending entry and return to `Idle`.
    pub fn clear_current_input(&mut self) {
        if !matches!(self.state, OperationState::Running | OperationState::Ready) {
            self.state = OperationState::Idle;
        }
    }

    /// Advance the setup workflow by one step.
    pub fn next_setup_step(&mut self) -> Result<(), OperationError> {
        match self.state {
            OperationState::Running => Err(OperationError::Busy),
            OperationState::Ready => Ok(()),
            OperationState::Idle
            | OperationState::TouchOffX
            | OperationState::TouchOffZ
            | OperationState::ParkingSetup => {
                if self.strategy.requires_touch_off() && !self.params.has_touch_off() {
                    return Err(OperationError::TouchOffIncomplete);
                }
                self.enter_step(0);
                Ok(())
            }
            state => {
                let confirmed = match state {
                    OperationState::TargetDiameter => self.params.target_diameter.is_some(),
                    OperationState::TargetLength => self.params.target_length.is_some(),
                    _ => true,
                };
                if !confirmed {
                    return Err(OperationError::InvalidValue("no value confirmed".to_string()));
                }
                self.advance();
                Ok(())
            }
        }
    }

    pub fn previous_setup_step(&mut self) -> Result<(), OperationError> {
        self.ensure_not_running()?;
        let steps = self.strategy.setup_steps();
        self.state = match self.state {
            OperationState::Ready => steps.last().copied().unwrap_or(OperationState::Idle),
            state => match steps.iter().position(|s| *s == state) {
                Some(0) | None => OperationState::Idle,
                Some(i) => steps[i - 1],
            },
        };
        Ok(())
    }

    fn enter_step(&mut self, index: usize) {
        self.state = self
            .strategy
            .setup_steps()
            .get(index)
            .copied()
            .unwrap_or(OperationState::Ready);
        tracing::debug!(state = ?self.state, "setup step");
    }

    fn advance(&mut self) {
        let steps = self.strategy.setup_steps();
        let next = steps.iter().position(|s| *s == self.state).map_or(0, |i| i + 1);
        self.enter_step(next);
    }

    /// Target diameter or length in du, depending on the entry state.
    pub fn confirm_target_value(&mut self, du: i64) -> Result<(), OperationError> {
        match self.state {
            OperationState::TargetDiameter => {
                if du < 0 {
                    return Err(OperationError::InvalidValue("negative diameter".to_string()));
                }
                self.params.target_diameter = Some(du);
            }
            OperationState::TargetLength => {
                if du <= 0 {
                    return Err(OperationError::InvalidValue("length must be positive".to_string()));
                }
                self.params.target_length = Some(du);
            }
            state => return Err(OperationError::WrongState(state)),
        }
        self.derive_cut();
        self.advance();
        Ok(())
    }

    pub fn set_passes(&mut self, passes: i32) -> Result<(), OperationError> {
        self.expect_state(OperationState::SetupPasses)?;
        if passes < 1 {
            return Err(OperationError::InvalidValue(format!("{passes} passes")));
        }
        self.params.num_passes = passes;
        self.advance();
        Ok(())
    }

    pub fn set_starts(&mut self, starts: i32, plant: &mut Plant) -> Result<(), OperationError> {
        self.expect_state(OperationState::SetupStarts)?;
        if starts < 1 {
            return Err(OperationError::InvalidValue(format!("{starts} starts")));
        }
        let pitch = plant.spindle.thread_pitch();
        plant.spindle.set_thread_pitch(pitch, starts);
        self.advance();
        Ok(())
    }

    pub fn set_cone_ratio(&mut self, ratio: f32) -> Result<(), OperationError> {
        self.expect_state(OperationState::SetupCone)?;
        if !ratio.is_finite() {
            return Err(OperationError::InvalidValue(format!("{ratio}")));
        }
        self.params.cone_ratio = ratio;
        self.advance();
        Ok(())
    }

    fn expect_state(&self, expected: OperationState) -> Result<(), OperationError> {
        if self.state != expected {
            return Err(OperationError::WrongState(self.state));
        }
        Ok(())
    }

    fn derive_cut(&mut self) {
        self.strategy.derive_cut(&mut self.params, &self.geometry);
    }

    pub fn start_parking_setup(&mut self) -> Result<(), OperationError> {
        match self.state {
            OperationState::Idle | OperationState::TouchOffX | OperationState::TouchOffZ => {
                self.state = OperationState::ParkingSetup;
                Ok(())
            }
            OperationState::Running => Err(OperationError::Busy),
            state => Err(OperationError::WrongState(state)),
        }
    }

    /// Store the current axis positions as the parking position.
    pub fn confirm_parking_position(&mut self, plant: &mut Plant) -> Result<(), OperationError> {
        self.expect_state(OperationState::ParkingSetup)?;
        self.params.parking = Some((plant.x.position(), plant.z.position()));
        self.state = OperationState::Idle;
        Ok(())
    }

    pub fn clear_parking_position(&mut self) -> Result<(), OperationError> {
        self.ensure_not_running()?;
        self.params.parking = None;
        Ok(())
    }

    pub fn start_operation(&mut self, plant: &mut Plant, emergency_stop: bool) -> Result<(), OperationError> {
        if emergency_stop {
            return Err(OperationError::EmergencyStop);
        }
        self.ensure_not_running()?;
        let strategy = &self.strategy;
        if strategy.requires_touch_off() {
            if self.state != OperationState::Ready {
                return Err(OperationError::NotReady(self.state));
            }
            if !self.params.has_touch_off() {
                return Err(OperationError::TouchOffIncomplete);
            }
        }
        if (strategy.requires_cut_depth() && self.params.cut_depth == 0)
            || (strategy.requires_cut_length() && self.params.cut_length == 0)
        {
            return Err(OperationError::MissingCutParameters);
        }
        let mut dupr = plant.spindle.thread_pitch();
        let starts = plant.spindle.thread_starts().max(1);
        if strategy.requires_touch_off() {
            if dupr == 0 {
                return Err(OperationError::InvalidValue("feed pitch is zero".to_string()));
            }
            dupr = if self.params.is_left_to_right { dupr.saturating_abs() } else { -dupr.saturating_abs() };
            plant.spindle.set_thread_pitch(dupr, starts);
        }

        let spindle = plant.spindle.compensated();
        let counts = self.geometry.sync.counts_per_rev();
        let p = &mut self.params;
        p.op_dupr = dupr;
        p.op_starts = starts;
        p.start_offset = if starts == 1 { 0 } else { (f64::from(counts) / f64::from(starts)).round() as i32 };
        p.spindle_sync_pos = spindle;
        p.spindle_origin = spindle;
        p.gear_origin_z = plant.z.position();
        p.current_pass = 0;
        self.completed_passes = 0;
        self.sub_state = PassSubState::MoveToStart;
        self.state = OperationState::Running;
        plant.spindle.set_syncing(true);
        tracing::info!(mode = ?p.mode, dupr, starts, passes = p.num_passes, "operation started");
        Ok(())
    }

    /// End the operation: `Idle`, both axes pinned, synchronisation off.
    pub fn stop_operation(&mut self, plant: &mut Plant) {
        plant.pin_axes();
        plant.spindle.set_syncing(false);
        if self.is_running() {
            tracing::info!(mode = ?self.params.mode, pass = self.params.current_pass, "operation stopped");
        }
        self.state = OperationState::Idle;
        self.sub_state = PassSubState::MoveToStart;
    }

    pub fn cancel_operation(&mut self, plant: &mut Plant) {
        self.stop_operation(plant);
        self.clear_current_input();
    }

    /// Skip to the next pass.
    pub fn advance_pass(&mut self) -> Result<(), OperationError> {
        if !self.is_running() || !self.strategy.uses_passes() {
            return Err(OperationError::WrongState(self.state));
        }
        if self.params.current_pass >= self.params.num_passes - 1 {
            return Err(OperationError::InvalidValue("already on the last pass".to_string()));
        }
        self.params.current_pass += 1;
        self.sub_state = PassSubState::MoveToStart;
        Ok(())
    }

    /// Unwind everything. An interrupted operation needs a fresh touch-off.
    pub fn emergency_stop(&mut self, plant: &mut Plant) {
        let interrupted = self.is_running();
        self.stop_operation(plant);
        self.params.current_pass = 0;
        if interrupted {
            self.params.clear_touch_off();
        }
    }

    /// Per-tick workflow step. No-op unless running.
    pub fn update(&mut self, plant: &mut Plant) {
        if !self.is_running() {
            return;
        }
        if !self.strategy.uses_passes() {
            let ctx = self.context(plant);
            let targets = self.strategy.tick(&ctx);
            plant.apply(targets);
            return;
        }
        let event = {
            let ctx = self.context(plant);
            match self.sub_state {
                PassSubState::MoveToStart => {
                    let (x, z) = self.strategy.start(&ctx);
                    let applied = plant.apply(AxisTargets {
                        x: Some(x),
                        z: Some(z),
                    });
                    if arrived(&ctx, &applied) {
                        PassEvent::Enter(PassSubState::SyncSpindle)
                    } else {
                        PassEvent::Stay
                    }
                }
                PassSubState::SyncSpindle => {
                    let sync = if self.strategy.phase_locked() {
                        phase_locked_sync(
                            ctx.spindle,
                            ctx.params.spindle_origin,
                            ctx.params.start_offset,
                            ctx.params.current_pass,
                            self.geometry.sync.counts_per_rev(),
                        )
                    } else {
                        ctx.spindle
                    };
                    PassEvent::Synced(sync)
                }
                PassSubState::Cutting => {
                    let applied = plant.apply(self.strategy.tick(&ctx));
                    if self.strategy.plunging(&ctx) {
                        PassEvent::Synced(ctx.spindle)
                    } else if self.strategy.is_done(&ctx, &applied) {
                        PassEvent::Enter(PassSubState::Retracting)
                    } else {
                        PassEvent::Stay
                    }
                }
                PassSubState::Retracting => {
                    let applied = plant.apply(self.strategy.retract(&ctx));
                    if arrived(&ctx, &applied) {
                        PassEvent::Enter(PassSubState::Returning)
                    } else {
                        PassEvent::Stay
                    }
                }
                PassSubState::Returning => {
                    let applied = plant.apply(self.strategy.return_to_start(&ctx));
                    if arrived(&ctx, &applied) {
                        PassEvent::PassComplete
                    } else {
                        PassEvent::Stay
                    }
                }
            }
        };
        match event {
            PassEvent::Stay => {}
            PassEvent::Enter(next) => {
                tracing::debug!(from = ?self.sub_state, to = ?next, pass = self.params.current_pass, "pass step");
                self.sub_state = next;
            }
            PassEvent::Synced(sync) => {
                self.params.spindle_sync_pos = sync;
                self.sub_state = PassSubState::Cutting;
            }
            PassEvent::PassComplete => {
                self.completed_passes += 1;
                tracing::debug!(pass = self.params.current_pass, "pass complete");
                if self.params.current_pass < self.params.num_passes - 1 {
                    self.params.current_pass += 1;
                    self.sub_state = PassSubState::MoveToStart;
                } else {
                    tracing::info!(mode = ?self.params.mode, passes = self.completed_passes, "operation complete");
                    self.stop_operation(plant);
                }
            }
        }
    }

    fn context<'a>(&'a self, plant: &Plant) -> CutContext<'a> {
        CutContext {
            params: &self.params,
            geometry: &self.geometry,
            spindle: plant.spindle.compensated(),
            x: plant.x.position(),
            z: plant.z.position(),
        }
    }

    /// Fraction of the whole multi-pass operation done, 0..=1.
    pub fn progress(&self, x: i32, z: i32, spindle: i32) -> f32 {
        if !self.is_running() || !self.strategy.uses_passes() || self.params.num_passes <= 0 {
            return 0.0;
        }
        let ctx = CutContext {
            params: &self.params,
            geometry: &self.geometry,
            spindle,
            x,
            z,
        };
        let pass_progress = match self.sub_state {
            PassSubState::MoveToStart | PassSubState::SyncSpindle => 0.0,
            PassSubState::Cutting => self.strategy.pass_progress(&ctx),
            PassSubState::Retracting | PassSubState::Returning => 1.0,
        };
        ((self.params.current_pass as f32 + pass_progress) / self.params.num_passes as f32).clamp(0.0, 1.0)
    }

    pub fn status_text(&self) -> String {
        let label = self.params.mode.label();
        let text = match self.state {
            OperationState::Idle => format!("{label} OFF"),
            OperationState::TouchOffX => "Touch X".to_string(),
            OperationState::TouchOffZ => "Touch Z".to_string(),
            OperationState::ParkingSetup => "Parking".to_string(),
            OperationState::TargetDiameter => "Target X".to_string(),
            OperationState::TargetLength => "Target L".to_string(),
            OperationState::SetupPasses => "Set passes".to_string(),
            OperationState::SetupStarts => "Set starts".to_string(),
            OperationState::SetupCone => "Set cone".to_string(),
            OperationState::Ready => "Ready".to_string(),
            OperationState::Running if self.strategy.uses_passes() && self.params.num_passes > 1 => {
                format!("{label} ON {}/{}", self.params.current_pass + 1, self.params.num_passes)
            }
            OperationState::Running => format!("{label} ON"),
        };
        fit(text)
    }

    pub fn prompt_text(&self) -> String {
        let p = &self.params;
        let m = self.measure;
        let text = match self.state {
            OperationState::Idle if !self.strategy.requires_touch_off() => "Start to engage".to_string(),
            OperationState::Idle if p.has_touch_off() => {
                format!("X{} Z{}", m.format_du(p.touch_off_x_diameter), m.format_du(p.touch_off_z_coord))
            }
            OperationState::Idle => "Touch off X & Z".to_string(),
            OperationState::TouchOffX => "Enter diameter".to_string(),
            OperationState::TouchOffZ => "Enter Z position".to_string(),
            OperationState::ParkingSetup => "Park: jog + confirm".to_string(),
            OperationState::TargetDiameter => "Target diameter".to_string(),
            OperationState::TargetLength if p.mode == OperationMode::Face => "Face depth".to_string(),
            OperationState::TargetLength => "Target length".to_string(),
            OperationState::SetupPasses => format!("{} passes", p.num_passes),
            OperationState::SetupStarts => "Thread starts".to_string(),
            OperationState::SetupCone => format!("Ratio {:.5}", p.cone_ratio),
            OperationState::Ready => {
                let side = if p.is_internal { "INT" } else { "EXT" };
                let dir = if p.is_left_to_right { "L->R" } else { "R->L" };
                format!("{side} {dir} GO?")
            }
            OperationState::Running if self.strategy.uses_passes() => {
                format!("Pass {}/{}", p.current_pass + 1, p.num_passes)
            }
            OperationState::Running => format!("Pitch {}", m.format_pitch(i64::from(p.op_dupr))),
        };
        fit(text)
    }
}

fn fit(text: String) -> String {
    if text.chars().count() <= DISPLAY_WIDTH {
        return text;
    }
    text.chars().take(DISPLAY_WIDTH).collect()
}

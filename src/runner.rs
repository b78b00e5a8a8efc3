//! Job replay: executes job steps against a [`Rig`], ticking the engine in
//! between, and records samples to CSV and JSON lines.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use els_core::units::du_from_mm;
use els_core::{
    Axis, Config, EngineError, EngineStatus, OperationMode, OperationState, PassSubState,
};
use serde::Serialize;
use thiserror::Error;

use crate::job::{Job, JobStep};
use crate::sim::Rig;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("step {index} ({action}) rejected: {source}")]
    Step {
        index: usize,
        action: &'static str,
        #[source]
        source: EngineError,
    },
    #[error("step {index} did not reach idle within {ticks} ticks")]
    Timeout { index: usize, ticks: u64 },
}

/// One recorded row.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub tick: u64,
    pub time_us: u64,
    pub rpm: f64,
    pub spindle: i32,
    pub spindle_compensated: i32,
    pub x: i32,
    pub x_target: i32,
    pub z: i32,
    pub z_target: i32,
    pub mode: OperationMode,
    pub state: OperationState,
    pub sub_state: PassSubState,
    pub pass: i32,
    pub progress: f32,
    pub following_error_x_um: f32,
    pub following_error_z_um: f32,
    pub emergency_stop: bool,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job: String,
    pub ticks: u64,
    pub samples: u64,
    pub completed_passes: u32,
    pub x_step_edges: u64,
    pub z_step_edges: u64,
    pub status: EngineStatus,
}

struct Recorder {
    csv: csv::Writer<File>,
    jsonl: BufWriter<File>,
}

impl Recorder {
    fn create(dir: &Path) -> Result<Self, RunnerError> {
        fs::create_dir_all(dir)?;
        let csv = csv::Writer::from_path(dir.join("run.csv"))?;
        let jsonl = BufWriter::new(File::create(dir.join("run.jsonl"))?);
        tracing::info!("Recording to {}", dir.display());
        Ok(Self { csv, jsonl })
    }

    fn record(&mut self, sample: &Sample) -> Result<(), RunnerError> {
        self.csv.serialize(sample)?;
        serde_json::to_writer(&mut self.jsonl, sample)?;
        writeln!(self.jsonl)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RunnerError> {
        self.csv.flush()?;
        self.jsonl.flush()?;
        Ok(())
    }
}

/// How long the runner keeps ticking after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    None,
    Ticks(u64),
    UntilIdle { timeout: u64 },
}

pub struct Runner {
    rig: Rig,
    recorder: Option<Recorder>,
    sample_every: u64,
    samples: u64,
}

impl Runner {
    pub fn new(config: Config, sample_every: u32, output: Option<&Path>) -> Result<Self, RunnerError> {
        let recorder = output.map(Recorder::create).transpose()?;
        Ok(Self {
            rig: Rig::new(config),
            recorder,
            sample_every: u64::from(sample_every.max(1)),
            samples: 0,
        })
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    pub fn rig_mut(&mut self) -> &mut Rig {
        &mut self.rig
    }

    /// Run the whole job as fast as possible on simulated time.
    pub fn run(&mut self, job: &Job) -> Result<RunSummary, RunnerError> {
        for (index, step) in job.steps.iter().enumerate() {
            let wait = self.execute(index, step)?;
            let mut elapsed = 0;
            while !self.finished(wait, index, elapsed)? {
                self.tick()?;
                elapsed += 1;
            }
        }
        self.summary(job)
    }

    /// Run the job paced to wall-clock time. Ctrl-C engages the emergency
    /// stop; the job then runs on to its end against a halted machine.
    pub async fn run_realtime(&mut self, job: &Job) -> Result<RunSummary, RunnerError> {
        let handle = self.rig.engine.emergency_stop_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl-C received, engaging emergency stop");
                handle.trigger();
            }
        });
        let mut interval = tokio::time::interval(Duration::from_micros(u64::from(self.rig.tick_us())));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
        for (index, step) in job.steps.iter().enumerate() {
            let wait = self.execute(index, step)?;
            let mut elapsed = 0;
            while !self.finished(wait, index, elapsed)? {
                interval.tick().await;
                self.tick()?;
                elapsed += 1;
            }
        }
        self.summary(job)
    }

    fn finished(&self, wait: Wait, index: usize, elapsed: u64) -> Result<bool, RunnerError> {
        match wait {
            Wait::None => Ok(true),
            Wait::Ticks(n) => Ok(elapsed >= n),
            Wait::UntilIdle { timeout } => {
                if !self.rig.engine.operation().is_running() {
                    return Ok(true);
                }
                if elapsed >= timeout {
                    return Err(RunnerError::Timeout { index, ticks: timeout });
                }
                Ok(false)
            }
        }
    }

    /// Apply one job step to the engine.
    fn execute(&mut self, index: usize, step: &JobStep) -> Result<Wait, RunnerError> {
        tracing::debug!(index, action = step.name(), "job step");
        let engine = &mut self.rig.engine;
        let result: Result<(), EngineError> = match *step {
            JobStep::SetMode { mode } => {
                engine.set_mode(mode);
                Ok(())
            }
            JobStep::SetPitch { dupr, starts } => engine.set_thread_pitch(dupr, starts).map_err(Into::into),
            JobStep::SetDirection { left_to_right } => engine.set_left_to_right(left_to_right).map_err(Into::into),
            JobStep::SetInternal { internal } => engine.set_internal(internal).map_err(Into::into),
            JobStep::TouchOffX { diameter_mm } => engine
                .start_touch_off_x()
                .and_then(|()| engine.confirm_touch_off_value(diameter_mm))
                .map_err(Into::into),
            JobStep::TouchOffZ { z_mm } => engine
                .start_touch_off_z()
                .and_then(|()| engine.confirm_touch_off_value(z_mm))
                .map_err(Into::into),
            JobStep::NextStep => engine.next_setup_step().map_err(Into::into),
            JobStep::PreviousStep => engine.previous_setup_step().map_err(Into::into),
            JobStep::Target { mm } => engine.confirm_target_value(du_from_mm(mm)).map_err(Into::into),
            JobStep::Passes { count } => engine.set_passes(count).map_err(Into::into),
            JobStep::Starts { count } => engine.set_starts(count).map_err(Into::into),
            JobStep::ConeRatio { ratio } => engine.set_cone_ratio(ratio).map_err(Into::into),
            JobStep::Park => engine
                .start_parking_setup()
                .and_then(|()| engine.confirm_parking_position())
                .map_err(Into::into),
            JobStep::Jog { axis, steps } => engine.move_relative(axis, steps).map(|_| ()).map_err(Into::into),
            JobStep::SoftLimits { axis, low, high } => engine.set_soft_limits(axis, low, high),
            JobStep::Handwheel { axis, detents, step_du } => {
                engine.set_handwheel_axis(axis);
                engine.set_handwheel_step(step_du);
                engine.set_handwheel_enabled(true);
                self.rig.handwheel.add(detents);
                return Ok(Wait::Ticks(1));
            }
            JobStep::CycleHandwheelStep => {
                engine.cycle_handwheel_step();
                Ok(())
            }
            JobStep::Rpm { rpm } => {
                self.rig.spindle.set_rpm(rpm);
                Ok(())
            }
            JobStep::Start => engine.start_operation().map_err(Into::into),
            JobStep::Stop => {
                engine.stop_operation();
                Ok(())
            }
            JobStep::Cancel => {
                engine.cancel_operation();
                Ok(())
            }
            JobStep::AdvancePass => engine.advance_pass().map_err(Into::into),
            JobStep::EmergencyStop { active } => {
                engine.set_emergency_stop(active);
                Ok(())
            }
            JobStep::RunTicks { ticks } => return Ok(Wait::Ticks(ticks)),
            JobStep::WaitIdle { timeout_ticks } => return Ok(Wait::UntilIdle { timeout: timeout_ticks }),
        };
        result.map_err(|source| {
            tracing::error!(index, action = step.name(), "job step rejected: {}", source);
            RunnerError::Step {
                index,
                action: step.name(),
                source,
            }
        })?;
        Ok(Wait::None)
    }

    fn tick(&mut self) -> Result<(), RunnerError> {
        self.rig.tick();
        if self.rig.ticks() % self.sample_every == 0 {
            let sample = self.sample();
            if let Some(recorder) = self.recorder.as_mut() {
                recorder.record(&sample)?;
            }
            self.samples += 1;
        }
        Ok(())
    }

    pub fn sample(&self) -> Sample {
        let engine = &self.rig.engine;
        let status = engine.status();
        Sample {
            tick: self.rig.ticks(),
            time_us: self.rig.elapsed_us(),
            rpm: self.rig.spindle.rpm(),
            spindle: status.spindle_position,
            spindle_compensated: status.spindle_compensated,
            x: status.x_position,
            x_target: status.x_target,
            z: status.z_position,
            z_target: status.z_target,
            mode: status.mode,
            state: status.state,
            sub_state: status.sub_state,
            pass: status.current_pass,
            progress: status.progress,
            following_error_x_um: status.following_error_x_um,
            following_error_z_um: status.following_error_z_um,
            emergency_stop: status.emergency_stop,
            status: status.status_text,
        }
    }

    fn summary(&mut self, job: &Job) -> Result<RunSummary, RunnerError> {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.finish()?;
        }
        let engine = &self.rig.engine;
        let summary = RunSummary {
            job: job.name.clone(),
            ticks: self.rig.ticks(),
            samples: self.samples,
            completed_passes: engine.operation().completed_passes(),
            x_step_edges: engine.axis_pins(Axis::X).step_edges,
            z_step_edges: engine.axis_pins(Axis::Z).step_edges,
            status: engine.status(),
        };
        tracing::info!(
            job = %summary.job,
            ticks = summary.ticks,
            passes = summary.completed_passes,
            "job finished"
        );
        Ok(summary)
    }
}

//! Simulator host for the lead screw engine: replays a scripted job against
//! simulated spindle and stepper hardware and records the run.

pub mod job;
pub mod runner;
pub mod sim;

pub use job::{Job, JobStep, load_job};
pub use runner::{RunSummary, Runner, RunnerError, Sample};
pub use sim::{Rig, SimulatedSpindle};

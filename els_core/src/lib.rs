//! Hardware-agnostic electronic lead screw engine shared by the firmware
//! host, the simulator and the tests.
//!
//! All control-path math is integer: axis positions are motor steps,
//! lengths and pitches are deci-microns (du, 10^-4 mm), spindle positions
//! are quadrature encoder counts.

pub mod axis;
pub mod config;
pub mod engine;
pub mod error;
pub mod hardware_traits;
pub mod mpg;
pub mod operation;
pub mod safety;
pub mod spindle;
pub mod sync;
pub mod units;

pub use axis::{AxisDrive, AxisMotionController, AxisPositionHandle};
pub use config::{AxesConfig, AxisConfig, Config, ConfigError, EncoderConfig, HandwheelConfig, MotionTiming, load_config};
pub use engine::{Axis, Engine, EngineStatus};
pub use error::{EngineError, OperationError};
pub use hardware_traits::{AtomicPulseCounter, Clock, ManualClock, PulseCounter, RecordingPins, StepperPins};
pub use mpg::Handwheel;
pub use operation::{
    AxisTargets, CutContext, OperationManager, OperationMode, OperationParameters, OperationState, OperationStrategy,
    PassSubState, Plant,
};
pub use safety::{EmergencyStopHandle, SafetyCoordinator, SoftLimits};
pub use spindle::{SpindleSync, SpindleTracker};
pub use sync::{AxisGeometry, MachineGeometry, Synchronizer};
pub use units::Measure;

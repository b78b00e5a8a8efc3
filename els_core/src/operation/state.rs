use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Electronic gearbox: Z follows the spindle, no passes.
    #[default]
    Normal,
    Turn,
    Face,
    Thread,
    /// Continuous taper following the spindle.
    Cone,
    /// Parting off.
    Cut,
}

impl OperationMode {
    /// Short LCD label.
    pub fn label(self) -> &'static str {
        match self {
            OperationMode::Normal => "GEAR",
            OperationMode::Turn => "TURN",
            OperationMode::Face => "FACE",
            OperationMode::Thread => "THRD",
            OperationMode::Cone => "CONE",
            OperationMode::Cut => "CUT",
        }
    }
}

/// Setup and execution workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperationState {
    #[default]
    Idle,
    TouchOffX,
    TouchOffZ,
    ParkingSetup,
    TargetDiameter,
    TargetLength,
    SetupPasses,
    SetupStarts,
    SetupCone,
    Ready,
    Running,
}

/// Per-pass sequence, active only while `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PassSubState {
    #[default]
    MoveToStart,
    SyncSpindle,
    Cutting,
    Retracting,
    Returning,
}

use thiserror::Error;

use crate::operation::OperationState;

/// A rejected operator command. The engine state is unchanged when one of
/// these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("operation not ready (state {0:?})")]
    NotReady(OperationState),
    #[error("touch-off incomplete")]
    TouchOffIncomplete,
    #[error("cut length and depth must be non-zero")]
    MissingCutParameters,
    #[error("emergency stop active")]
    EmergencyStop,
    #[error("operation running")]
    Busy,
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("command not valid in state {0:?}")]
    WrongState(OperationState),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error("spindle position cannot be reset while synchronised")]
    SpindleBusy,
    #[error("soft limit low {low} exceeds high {high}")]
    InvalidLimits { low: i32, high: i32 },
}

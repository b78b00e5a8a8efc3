//! Emergency stop flag and soft travel limits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

/// Inclusive travel envelope of one axis, in motor steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SoftLimits {
    pub low: i32,
    pub high: i32,
}

impl SoftLimits {
    pub fn new(low: i32, high: i32) -> Option<Self> {
        (low <= high).then_some(Self { low, high })
    }

    /// Envelope of `+-span` steps around zero.
    pub fn symmetric(span: i32) -> Self {
        let span = span.saturating_abs();
        Self { low: -span, high: span }
    }

    pub fn clamp(&self, steps: i32) -> i32 {
        steps.clamp(self.low, self.high)
    }

    pub fn contains(&self, steps: i32) -> bool {
        (self.low..=self.high).contains(&steps)
    }
}

/// Clonable trigger for the stop flag, usable from another task or an
/// interrupt handler. The engine observes it at the start of its next update,
/// even if the flag was released again in between.
#[derive(Debug, Clone)]
pub struct EmergencyStopHandle {
    flag: Arc<AtomicBool>,
    raised: Arc<AtomicBool>,
}

impl EmergencyStopHandle {
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        self.raised.store(true, Ordering::Release);
    }

    pub fn release(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Owns the emergency stop flag and remembers whether the stop has already
/// been applied to the axes and the operation workflow.
#[derive(Debug, Default)]
pub struct SafetyCoordinator {
    flag: Arc<AtomicBool>,
    // set by every trigger, cleared by poll
    raised: Arc<AtomicBool>,
    applied: bool,
}

impl SafetyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> EmergencyStopHandle {
        EmergencyStopHandle {
            flag: Arc::clone(&self.flag),
            raised: Arc::clone(&self.raised),
        }
    }

    pub fn is_active(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Raise or clear the flag. Returns true when this call engaged a stop
    /// that has not been applied yet.
    pub fn set(&mut self, active: bool) -> bool {
        self.flag.store(active, Ordering::Release);
        self.poll()
    }

    /// Returns true exactly once per engagement, the first time an active
    /// flag or a latched trigger is seen. Clearing the flag re-arms it.
    pub fn poll(&mut self) -> bool {
        let raised = self.raised.swap(false, Ordering::AcqRel);
        let active = self.is_active();
        if !self.applied && (active || raised) {
            self.applied = true;
            tracing::warn!(active, "Emergency stop activated");
            return true;
        }
        if !active && self.applied {
            tracing::info!("Emergency stop released");
            self.applied = false;
        }
        false
    }
}

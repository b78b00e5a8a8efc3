// Trait-based hardware boundary for the encoder counters, stepper driver pins
// and the microsecond clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// A hardware pulse counter (quadrature decoder register or ISR-maintained
/// count). The producer side is the interrupt/hardware; the engine only reads,
/// and rebases the register when it nears its representable range.
pub trait PulseCounter: Send {
    /// Current cumulative count. Must never observe a torn value.
    fn read(&self) -> i32;
    /// Subtract an already-consumed count, keeping anything that arrived
    /// after `observed` was read.
    fn rebase(&self, observed: i32);
    fn clear(&self);
}

/// Counter cell shared between an interrupt/producer task and the control
/// loop. Producer stores are Release, consumer loads are Acquire.
#[derive(Debug, Clone, Default)]
pub struct AtomicPulseCounter {
    count: Arc<AtomicI32>,
}

impl AtomicPulseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer side: account `delta` decoded counts.
    pub fn add(&self, delta: i32) {
        self.count.fetch_add(delta, Ordering::Release);
    }
}

impl PulseCounter for AtomicPulseCounter {
    fn read(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    fn rebase(&self, observed: i32) {
        self.count.fetch_sub(observed, Ordering::AcqRel);
    }

    fn clear(&self) {
        self.count.store(0, Ordering::Release);
    }
}

/// Step/direction/enable lines of one stepper driver. Levels are physical;
/// polarity inversion is applied by the caller.
pub trait StepperPins: Send {
    fn set_direction(&mut self, level: bool);
    fn set_step(&mut self, level: bool);
    fn set_enable(&mut self, level: bool);
    /// Busy-wait for driver setup/hold times.
    fn delay_us(&mut self, us: u32);
}

/// Free-running microsecond clock. Wraps at `u32::MAX`.
pub trait Clock: Send {
    fn now_micros(&self) -> u32;
}

/// Clock advanced explicitly by the caller; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, us: u32) {
        // fetch_add wraps, like a hardware timer
        self.now.fetch_add(us, Ordering::AcqRel);
    }

    pub fn set(&self, us: u32) {
        self.now.store(us, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u32 {
        self.now.load(Ordering::Acquire)
    }
}

/// Pin sink that records levels and edges instead of driving hardware.
#[derive(Debug, Clone, Default)]
pub struct RecordingPins {
    pub direction: bool,
    pub step: bool,
    pub enable: bool,
    pub step_edges: u64,
    pub direction_changes: u64,
    pub delayed_us: u64,
}

impl RecordingPins {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepperPins for RecordingPins {
    fn set_direction(&mut self, level: bool) {
        if level != self.direction {
            self.direction_changes += 1;
        }
        self.direction = level;
    }

    fn set_step(&mut self, level: bool) {
        if level != self.step {
            self.step_edges += 1;
        }
        self.step = level;
    }

    fn set_enable(&mut self, level: bool) {
        self.enable = level;
    }

    fn delay_us(&mut self, us: u32) {
        self.delayed_us += u64::from(us);
    }
}

//! Spindle position tracking with backlash compensation.

use crate::config::EncoderConfig;
use crate::error::EngineError;
use crate::hardware_traits::PulseCounter;

/// Accumulates the spindle encoder into a position that survives hardware
/// counter rebases, and a backlash-compensated position used for all
/// synchronised motion.
///
/// `|position - compensated| <= backlash` holds after every update.
#[derive(Debug)]
pub struct SpindleTracker<C: PulseCounter> {
    counter: C,
    backlash: i32,
    counter_limit: i32,
    raw_count: i32,
    position: i32,
    compensated: i32,
    thread_pitch: i32,
    thread_starts: i32,
    syncing: bool,
}

impl<C: PulseCounter> SpindleTracker<C> {
    pub fn new(counter: C, config: &EncoderConfig) -> Self {
        Self {
            counter,
            backlash: config.backlash,
            counter_limit: config.counter_limit,
            raw_count: 0,
            position: 0,
            compensated: 0,
            thread_pitch: 0,
            thread_starts: 1,
            syncing: false,
        }
    }

    /// Consume counts accumulated since the last call.
    pub fn update(&mut self) {
        let count = self.counter.read();
        let delta = count.wrapping_sub(self.raw_count);
        if delta == 0 {
            return;
        }
        if count.saturating_abs() >= self.counter_limit {
            self.counter.rebase(count);
            self.raw_count = 0;
            tracing::trace!(count, "spindle counter rebased");
        } else {
            self.raw_count = count;
        }
        self.apply_delta(delta);
    }

    fn apply_delta(&mut self, delta: i32) {
        self.position = self.position.wrapping_add(delta);
        // compared as a wrapped difference so a register wrap reads as forward travel
        let lead = self.position.wrapping_sub(self.compensated);
        if lead > 0 {
            self.compensated = self.position;
        } else if lead < -self.backlash {
            self.compensated = self.position.wrapping_add(self.backlash);
        }
    }

    /// Zero all counters. Rejected while synchronised motion is active.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        if self.syncing {
            return Err(EngineError::SpindleBusy);
        }
        self.counter.clear();
        self.raw_count = 0;
        self.position = 0;
        self.compensated = 0;
        Ok(())
    }

    /// Counts since the last hardware register rebase.
    pub fn raw_count(&self) -> i32 {
        self.raw_count
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn compensated(&self) -> i32 {
        self.compensated
    }

    pub fn backlash(&self) -> i32 {
        self.backlash
    }

    /// Operative pitch in du/rev; the sign selects the feed direction.
    pub fn thread_pitch(&self) -> i32 {
        self.thread_pitch
    }

    pub fn thread_starts(&self) -> i32 {
        self.thread_starts
    }

    pub fn set_thread_pitch(&mut self, dupr: i32, starts: i32) {
        self.thread_pitch = dupr;
        self.thread_starts = starts.max(1);
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub fn set_syncing(&mut self, syncing: bool) {
        self.syncing = syncing;
    }
}

/// What the cutting workflow reads from and sets on the spindle.
pub trait SpindleSync {
    fn compensated(&self) -> i32;
    fn thread_pitch(&self) -> i32;
    fn thread_starts(&self) -> i32;
    fn set_thread_pitch(&mut self, dupr: i32, starts: i32);
    fn set_syncing(&mut self, syncing: bool);
}

impl<C: PulseCounter> SpindleSync for SpindleTracker<C> {
    fn compensated(&self) -> i32 {
        self.compensated
    }

    fn thread_pitch(&self) -> i32 {
        self.thread_pitch
    }

    fn thread_starts(&self) -> i32 {
        self.thread_starts
    }

    fn set_thread_pitch(&mut self, dupr: i32, starts: i32) {
        SpindleTracker::set_thread_pitch(self, dupr, starts);
    }

    fn set_syncing(&mut self, syncing: bool) {
        self.syncing = syncing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware_traits::AtomicPulseCounter;

    fn tracker() -> (AtomicPulseCounter, SpindleTracker<AtomicPulseCounter>) {
        let counter = AtomicPulseCounter::new();
        let config = EncoderConfig {
            ppr: 600,
            backlash: 3,
            counter_limit: 1000,
        };
        (counter.clone(), SpindleTracker::new(counter, &config))
    }

    #[test]
    fn forward_motion_has_no_lag() {
        let (counter, mut spindle) = tracker();
        counter.add(10);
        spindle.update();
        assert_eq!(spindle.position(), 10);
        assert_eq!(spindle.compensated(), 10);
    }

    #[test]
    fn reversal_inside_deadband_is_absorbed() {
        let (counter, mut spindle) = tracker();
        counter.add(10);
        spindle.update();
        counter.add(-3);
        spindle.update();
        assert_eq!(spindle.position(), 7);
        assert_eq!(spindle.compensated(), 10);
        counter.add(-1);
        spindle.update();
        assert_eq!(spindle.compensated(), 9);
    }

    #[test]
    fn overflow_rebase_keeps_position_continuous() {
        let (counter, mut spindle) = tracker();
        for _ in 0..25 {
            counter.add(90);
            spindle.update();
        }
        assert_eq!(spindle.position(), 2250);
        assert!(counter.read().abs() < 1000);
        assert_eq!(spindle.raw_count(), counter.read());
    }

    #[test]
    fn position_wrap_reads_as_forward_travel() {
        let (_counter, mut spindle) = tracker();
        spindle.apply_delta(i32::MAX - 5);
        spindle.apply_delta(10);
        assert_eq!(spindle.position(), i32::MIN + 4);
        assert_eq!(spindle.compensated(), spindle.position());
        spindle.apply_delta(-2);
        assert_eq!(spindle.compensated(), i32::MIN + 4);
        // reverse back across the wrap, past the deadband
        spindle.apply_delta(-10);
        assert_eq!(spindle.position(), i32::MAX - 7);
        assert_eq!(spindle.compensated(), i32::MAX - 4);
        assert_eq!(spindle.compensated().wrapping_sub(spindle.position()), 3);
    }

    #[test]
    fn reset_rejected_while_syncing() {
        let (counter, mut spindle) = tracker();
        counter.add(50);
        spindle.update();
        spindle.set_syncing(true);
        assert_eq!(spindle.reset(), Err(EngineError::SpindleBusy));
        assert_eq!(spindle.position(), 50);
        spindle.set_syncing(false);
        spindle.reset().unwrap();
        assert_eq!(spindle.position(), 0);
        assert_eq!(spindle.compensated(), 0);
        assert_eq!(counter.read(), 0);
    }
}

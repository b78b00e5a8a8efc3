// Simulated hardware: a spindle turning at a set speed and the engine wired
// to recording step pins and a manual clock.

use els_core::{AtomicPulseCounter, Config, Engine, ManualClock, RecordingPins};

pub type SimEngine = Engine<AtomicPulseCounter, RecordingPins, ManualClock>;

/// Quadrature encoder on a spindle turning at `rpm`. Produces whole counts
/// into the shared counter; the exact angle is kept so rounding never drifts.
#[derive(Debug, Clone)]
pub struct SimulatedSpindle {
    counter: AtomicPulseCounter,
    counts_per_rev: i32,
    rpm: f64,
    exact: f64,
    total: i64,
}

impl SimulatedSpindle {
    pub fn new(counter: AtomicPulseCounter, counts_per_rev: i32) -> Self {
        Self {
            counter,
            counts_per_rev,
            rpm: 0.0,
            exact: 0.0,
            total: 0,
        }
    }

    pub fn rpm(&self) -> f64 {
        self.rpm
    }

    /// Negative values turn the spindle in reverse.
    pub fn set_rpm(&mut self, rpm: f64) {
        self.rpm = rpm;
    }

    /// Counts produced since start.
    pub fn total_counts(&self) -> i64 {
        self.total
    }

    pub fn advance(&mut self, dt_us: u32) -> i32 {
        self.exact += self.rpm / 60.0 * f64::from(self.counts_per_rev) * f64::from(dt_us) / 1_000_000.0;
        let counts = (self.exact.round() as i64 - self.total) as i32;
        if counts != 0 {
            self.counter.add(counts);
            self.total += i64::from(counts);
        }
        counts
    }
}

/// Engine plus the simulated hardware it drives.
pub struct Rig {
    pub engine: SimEngine,
    pub spindle: SimulatedSpindle,
    pub handwheel: AtomicPulseCounter,
    clock: ManualClock,
    tick_us: u32,
    ticks: u64,
}

impl Rig {
    pub fn new(config: Config) -> Self {
        let counter = AtomicPulseCounter::new();
        let handwheel = AtomicPulseCounter::new();
        let clock = ManualClock::new();
        let tick_us = config.timing.tick_period_us();
        let spindle = SimulatedSpindle::new(counter.clone(), config.encoder.counts_per_rev());
        let mut engine = Engine::new(config, counter, RecordingPins::new(), RecordingPins::new(), clock.clone());
        engine.attach_handwheel(handwheel.clone());
        Self {
            engine,
            spindle,
            handwheel,
            clock,
            tick_us,
            ticks: 0,
        }
    }

    pub fn tick_us(&self) -> u32 {
        self.tick_us
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Simulated time in microseconds.
    pub fn elapsed_us(&self) -> u64 {
        self.ticks * u64::from(self.tick_us)
    }

    /// One control period: the spindle turns, the clock moves on, the engine
    /// runs once.
    pub fn tick(&mut self) {
        self.spindle.advance(self.tick_us);
        self.clock.advance(self.tick_us);
        self.engine.update();
        self.ticks += 1;
    }
}

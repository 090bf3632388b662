use std::time::Duration;

const MAX_FRAME_DELTA: Duration = Duration::from_millis(250);

pub struct FixedTimestep {
    dt: Duration,
    accumulator: Duration,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            dt: Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64),
            accumulator: Duration::ZERO,
        }
    }

    pub fn dt(&self) -> Duration {
        self.dt
    }

    pub fn accumulate(&mut self, delta: Duration) {
        self.accumulator += delta.min(MAX_FRAME_DELTA);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    /// Time left until the next tick is due.
    pub fn remaining(&self) -> Duration {
        self.dt.saturating_sub(self.accumulator)
    }
}

use crate::record::{Reading, Record};

/// Source of fresh sensor values.
pub trait Sensor {
    /// Take one reading. Called once per sample period.
    fn read(&mut self) -> Reading;
}

impl<F: FnMut() -> Reading> Sensor for F {
    fn read(&mut self) -> Reading {
        self()
    }
}

/// Time gate and sequence counter of the sample loop.
#[derive(Debug)]
pub struct Sampler {
    /// Minimum time between samples, in milliseconds.
    period_ms: u32,

    /// Uptime of the last sample.
    last_tick_ms: u32,

    /// Sequence id of the last sample.
    sequence_id: u32,
}

impl Sampler {
    /// Create a sampler that fires once more than `period_ms` has elapsed.
    pub fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            last_tick_ms: 0,
            sequence_id: 0,
        }
    }

    /// Check whether a sample is due and, if so, restart the period.
    ///
    /// The uptime counter may wrap; elapsed time is computed with wrapping
    /// subtraction.
    ///
    /// # Arguments
    /// * `now_ms` - Current uptime in milliseconds.
    ///
    /// # Returns
    /// * `bool` - Whether to sample now.
    pub fn due(&mut self, now_ms: u32) -> bool {
        if now_ms.wrapping_sub(self.last_tick_ms) > self.period_ms {
            self.last_tick_ms = now_ms;
            true
        } else {
            false
        }
    }

    /// Read the sensor and stamp the next record.
    pub fn sample<D: Sensor + ?Sized>(&mut self, now_ms: u32, sensor: &mut D) -> Record {
        self.sequence_id = self.sequence_id.wrapping_add(1);

        Record {
            timestamp: now_ms,
            sequence_id: self.sequence_id,
            reading: sensor.read(),
        }
    }
}

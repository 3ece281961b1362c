// Fixed-duration time series buffer
use super::channel::{Channel, RatioValues, Sample, SignalValues};

const MS_PER_MINUTE: f64 = 60_000.0;
/// Absorbs float error in `run / resolution` so 30 / 0.1 still gives 300.
const SLOT_EPSILON: f64 = 1e-9;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BufferError {
    #[error("resolution must be positive, got {0} min")]
    InvalidResolution(f64),
    #[error("run duration must be positive, got {0} min")]
    InvalidDuration(f64),
}

/// Pre-allocated arena of sample slots covering `[0, run_duration]`.
///
/// Slots are never added or removed after allocation; writes land in place and
/// out-of-range writes are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesBuffer {
    samples: Vec<Sample>,
    resolution: f64,
    resolution_ms: i64,
    run_duration: f64,
}

impl TimeSeriesBuffer {
    pub fn allocate(
        run_duration: f64,
        resolution: f64,
        initial_ratios: RatioValues,
        default_signal: SignalValues,
    ) -> Result<Self, BufferError> {
        let resolution_ms = validate(run_duration, resolution)?;
        // Last slot time never passes the run duration.
        let slot_count = (run_duration / resolution + SLOT_EPSILON).floor() as usize + 1;

        let samples = (0..slot_count)
            .map(|slot| Sample {
                time: slot as f64 * resolution,
                signal_channels: default_signal,
                ratio_channels: initial_ratios,
            })
            .collect();

        Ok(Self {
            samples,
            resolution,
            resolution_ms,
            run_duration,
        })
    }

    /// Rebuild a buffer from persisted samples without touching their values.
    pub fn from_samples(
        samples: Vec<Sample>,
        run_duration: f64,
        resolution: f64,
    ) -> Result<Self, BufferError> {
        let resolution_ms = validate(run_duration, resolution)?;
        Ok(Self {
            samples,
            resolution,
            resolution_ms,
            run_duration,
        })
    }

    /// `floor(elapsed / resolution)` computed on whole milliseconds so the
    /// result is exact and monotonic. Negative elapsed time has no slot.
    pub fn slot_at(&self, elapsed_ms: i64) -> Option<usize> {
        if elapsed_ms < 0 {
            return None;
        }
        Some((elapsed_ms / self.resolution_ms) as usize)
    }

    pub fn contains_slot(&self, slot: usize) -> bool {
        slot < self.samples.len()
    }

    pub fn write_signal(&mut self, slot: usize, channel: Channel, value: f64) -> bool {
        let Some(sample) = self.samples.get_mut(slot) else {
            return false;
        };
        match channel {
            Channel::Primary => sample.signal_channels.primary = Some(value),
            Channel::Secondary => sample.signal_channels.secondary = Some(value),
            _ => return false,
        }
        true
    }

    /// Write both signal channels or neither.
    pub fn write_signals(&mut self, slot: usize, primary: f64, secondary: f64) -> bool {
        if !self.contains_slot(slot) {
            return false;
        }
        self.write_signal(slot, Channel::Primary, primary)
            && self.write_signal(slot, Channel::Secondary, secondary)
    }

    /// Slots `[0, slot]` inclusive, clamped to the end of the run.
    pub fn slice_up_to(&self, slot: usize) -> &[Sample] {
        let end = (slot + 1).min(self.samples.len());
        &self.samples[..end]
    }

    pub fn all(&self) -> &[Sample] {
        &self.samples
    }

    pub fn slot_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn run_duration(&self) -> f64 {
        self.run_duration
    }

    pub fn run_duration_ms(&self) -> i64 {
        (self.run_duration * MS_PER_MINUTE).round() as i64
    }

    #[cfg(test)]
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

fn validate(run_duration: f64, resolution: f64) -> Result<i64, BufferError> {
    if !(run_duration > 0.0) {
        return Err(BufferError::InvalidDuration(run_duration));
    }
    let resolution_ms = (resolution * MS_PER_MINUTE).round() as i64;
    if !(resolution > 0.0) || resolution_ms <= 0 {
        return Err(BufferError::InvalidResolution(resolution));
    }
    Ok(resolution_ms)
}

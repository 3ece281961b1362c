// Axis domain tracking for the signal and ratio axes
use super::channel::Sample;
use serde::{Deserialize, Serialize};

/// Ranges are refreshed on every slot that is a multiple of this interval...
pub const RANGE_REFRESH_INTERVAL: usize = 10;
/// ...and on every slot during warm-up, while variance is still high.
pub const RANGE_WARMUP_SLOTS: usize = 50;

const SIGNAL_PADDING_FRACTION: f64 = 0.1;
const MIN_SIGNAL_PADDING: f64 = 0.1;
const RATIO_PADDING: f64 = 2.0;
const MIN_RATIO_SPAN: f64 = 10.0;
const RATIO_FLOOR: f64 = 0.0;
const RATIO_CEILING: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

pub const DEFAULT_SIGNAL_RANGE: Range = Range::new(0.0, 1.0);
pub const DEFAULT_RATIO_RANGE: Range = Range::new(0.0, 100.0);

pub fn should_recompute(slot: usize) -> bool {
    slot % RANGE_REFRESH_INTERVAL == 0 || slot < RANGE_WARMUP_SLOTS
}

/// Tick count for the percentage axis.
pub fn ratio_tick_count(range: &Range) -> usize {
    let ticks = (range.span() / 10.0).floor().max(0.0) as usize;
    ticks.clamp(3, 8)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeTracker {
    signal: Range,
    ratio: Range,
}

impl Default for RangeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_RANGE, DEFAULT_RATIO_RANGE)
    }
}

impl RangeTracker {
    pub fn new(signal: Range, ratio: Range) -> Self {
        Self { signal, ratio }
    }

    pub fn signal(&self) -> Range {
        self.signal
    }

    pub fn ratio(&self) -> Range {
        self.ratio
    }

    /// Recompute both domains from the window.
    pub fn update(&mut self, samples: &[Sample]) {
        self.signal = self.compute_signal_range(samples);
        self.ratio = self.compute_ratio_range(samples);
    }

    /// Proportional padding around both signal channels; the previous range is
    /// kept when the window holds no signal values.
    pub fn compute_signal_range(&self, samples: &[Sample]) -> Range {
        let values = samples.iter().flat_map(|s| {
            [s.signal_channels.primary, s.signal_channels.secondary]
                .into_iter()
                .flatten()
        });
        let Some((lo, hi)) = bounds(values) else {
            return self.signal;
        };

        let spread_padding = (hi - lo) * SIGNAL_PADDING_FRACTION;
        let padding = if spread_padding > 0.0 {
            spread_padding
        } else {
            MIN_SIGNAL_PADDING
        };

        let min = (lo - padding).max(0.0);
        let mut max = hi + padding;
        if max <= min {
            max = min + MIN_SIGNAL_PADDING;
        }
        Range::new(min, max)
    }

    /// Fixed absolute padding keeps percentage tick labels from churning.
    pub fn compute_ratio_range(&self, samples: &[Sample]) -> Range {
        let values = samples.iter().flat_map(|s| s.ratio_channels.iter());
        let Some((lo, hi)) = bounds(values) else {
            return self.ratio;
        };

        let mut min = (lo - RATIO_PADDING).clamp(RATIO_FLOOR, RATIO_CEILING);
        let mut max = (hi + RATIO_PADDING).clamp(RATIO_FLOOR, RATIO_CEILING);

        if max - min < MIN_RATIO_SPAN {
            let center = (min + max) / 2.0;
            min = (center - MIN_RATIO_SPAN / 2.0).max(RATIO_FLOOR);
            max = (center + MIN_RATIO_SPAN / 2.0).min(RATIO_CEILING);
        }
        Range::new(min, max)
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

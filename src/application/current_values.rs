// Current-value mirror shared with the rest of the dashboard
use crate::domain::payload::SignalReading;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Secondary channel estimate when only the combined signal is known.
const SECONDARY_FALLBACK_RATIO: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CurrentValues {
    pub primary: Option<f64>,
    pub secondary: Option<f64>,
    /// Combined detector signal, kept equal to `primary` for older widgets.
    pub signal: Option<f64>,
}

/// Latest detector values. The chart writes here on every accepted sample and
/// only reads it back while the transport is down.
#[derive(Clone)]
pub struct CurrentValueMirror {
    tx: Arc<watch::Sender<CurrentValues>>,
}

impl CurrentValueMirror {
    pub fn new(initial: CurrentValues) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> CurrentValues {
        *self.tx.borrow()
    }

    pub fn set(&self, reading: SignalReading) {
        self.tx.send_modify(|values| {
            values.primary = Some(reading.primary);
            values.secondary = Some(reading.secondary);
            values.signal = Some(reading.primary);
        });
    }

    #[cfg(test)]
    pub fn replace(&self, values: CurrentValues) {
        self.tx.send_replace(values);
    }

    pub fn fallback_reading(&self) -> Option<SignalReading> {
        let values = self.get();
        let primary = values.primary.or(values.signal)?;
        let secondary = values
            .secondary
            .or(values.signal.map(|s| s * SECONDARY_FALLBACK_RATIO))?;
        Some(SignalReading { primary, secondary })
    }
}

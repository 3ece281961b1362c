// Durable form of a chart session
use super::channel::Sample;
use super::range::Range;
use serde::{Deserialize, Serialize};

/// Buffer, ranges and timing needed to resume a run after a restart.
///
/// Field names follow the stored JSON object so existing cache entries stay
/// readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    #[serde(rename = "chartData")]
    pub samples: Vec<Sample>,
    /// Epoch ms at which the run started.
    #[serde(rename = "chartStartTime")]
    pub session_start_ms: i64,
    #[serde(rename = "lastUpdateTime")]
    pub last_update_ms: i64,
    #[serde(rename = "uvDataRange")]
    pub signal_range: Range,
    #[serde(rename = "gradientDataRange")]
    pub ratio_range: Range,
    #[serde(rename = "timestamp")]
    pub saved_at_ms: i64,
}

impl PersistedSnapshot {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.saved_at_ms
    }
}

//! Transport state and tempo

use serde::{Deserialize, Serialize};

/// Tempo a new sequencer starts at
pub const DEFAULT_BPM: f64 = 120.0;
/// Lowest accepted tempo
pub const MIN_BPM: f64 = 1.0;
/// Highest accepted tempo
pub const MAX_BPM: f64 = 1000.0;

/// Transport playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    #[default]
    Stopped,
    Started,
}

impl TransportState {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }
}

/// Musical subdivision a recurring clock callback fires at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Subdivision {
    /// One grid step
    #[default]
    Sixteenth,
}

impl Subdivision {
    /// Callbacks per quarter-note beat
    pub fn per_beat(&self) -> u32 {
        match self {
            Self::Sixteenth => 4,
        }
    }

    /// Seconds between two callbacks at the given tempo
    pub fn interval_secs(&self, bpm: f64) -> f64 {
        60.0 / bpm / self.per_beat() as f64
    }
}

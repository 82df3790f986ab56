//! Payloads exchanged with the "suggest next bar" generator

use serde::{Deserialize, Serialize};

use crate::grid::{BarPatch, SequenceGrid};

/// Request body sent to the bar generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionRequest {
    /// Target tempo
    pub bpm: f64,
    /// Drum machine the kit comes from (e.g. "808")
    pub machine: String,
    /// The bar the suggestion should build on
    pub sequence: SequenceGrid,
}

impl SuggestionRequest {
    /// Build a request around the last bar of `grid`
    pub fn for_grid(grid: &SequenceGrid, bpm: f64, machine: impl Into<String>) -> Self {
        Self {
            bpm,
            machine: machine.into(),
            sequence: grid.last_bar(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Parse a generator response into a patch for the sequencer's replace mode.
///
/// Only the JSON shape is checked here; instrument set and bar length are
/// validated when the patch is applied.
pub fn parse_bar_patch(body: &str) -> serde_json::Result<BarPatch> {
    serde_json::from_str(body)
}

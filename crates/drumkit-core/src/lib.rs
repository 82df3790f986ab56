//! drumkit-core: Domain types for the drumkit step sequencer

mod error;
pub mod grid;
mod kit;
pub mod suggestion;
mod transport;

pub use error::{GridError, Result};
pub use grid::{BarPatch, SequenceGrid, Track, Trigger, STEPS_PER_BAR};
pub use kit::SampleSource;
pub use suggestion::{parse_bar_patch, SuggestionRequest};
pub use transport::{Subdivision, TransportState, DEFAULT_BPM, MAX_BPM, MIN_BPM};

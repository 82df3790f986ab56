//! drumkit-services: Sequencer engine, clock contracts and a reference clock

pub mod clock;
pub mod config;
pub mod loader;
pub mod observers;
pub mod sequencer;
pub mod thread_clock;

#[cfg(test)]
mod test_support;

pub use clock::{AudioClock, ClockTime, SampleHandle, ScheduleId, TickCallback};
pub use config::{ConfigError, EngineConfig};
pub use loader::{LoadError, LoadFuture, SampleLoader};
pub use observers::{ObserverId, ObserverList};
pub use sequencer::{ExtendMode, Sequencer, SequencerError, SequencerEvent, SequencerSnapshot};
pub use thread_clock::{ThreadClock, TriggerEvent};

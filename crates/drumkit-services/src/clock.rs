//! Audio clock contract
//!
//! The clock is the timing authority. The sequencer registers one recurring
//! callback and asks the clock to play loaded samples at the time each
//! callback was scheduled for, not at the time it happened to run.

use drumkit_core::Subdivision;

/// Seconds on the clock's own timeline
pub type ClockTime = f64;

/// Recurring callback, invoked with the scheduled time of each firing
pub type TickCallback = Box<dyn FnMut(ClockTime) + Send>;

/// Identifies one recurring registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleId(pub u64);

/// Playable sample produced by a [`crate::SampleLoader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleHandle(pub u64);

pub trait AudioClock: Send + Sync {
    /// Fire `callback` once per `subdivision` while the clock runs
    fn schedule_recurring(&self, subdivision: Subdivision, callback: TickCallback) -> ScheduleId;
    /// Stop future firings of a registration (unknown ids are ignored)
    fn cancel(&self, id: ScheduleId);
    fn run(&self);
    fn halt(&self);
    /// Change tempo without restarting
    fn set_rate(&self, bpm: f64);
    /// Play a sample at a scheduled time
    fn trigger_at(&self, sample: SampleHandle, time: ClockTime);
    /// Play a sample right away, outside any schedule
    fn trigger_now(&self, sample: SampleHandle);
}

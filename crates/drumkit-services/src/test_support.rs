//! Test doubles for the clock and loader contracts

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use drumkit_core::{SampleSource, Subdivision, DEFAULT_BPM};

use crate::clock::{AudioClock, ClockTime, SampleHandle, ScheduleId, TickCallback};
use crate::loader::{LoadError, LoadFuture, SampleLoader};

struct ManualState {
    next_id: u64,
    schedules: Vec<(ScheduleId, Subdivision, Option<TickCallback>)>,
    /// Cancelled callbacks, kept so tests can deliver them late
    retired: Vec<TickCallback>,
    running: bool,
    bpm: f64,
    time: ClockTime,
    triggered: Vec<(SampleHandle, Option<ClockTime>)>,
}

/// Clock that only fires when a test calls [`ManualClock::tick`]
pub(crate) struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ManualState {
                next_id: 1,
                schedules: Vec::new(),
                retired: Vec::new(),
                running: false,
                bpm: DEFAULT_BPM,
                time: 0.0,
                triggered: Vec::new(),
            }),
        })
    }

    /// Fire every registration `n` times, if the clock is running
    pub fn tick(&self, n: usize) {
        for _ in 0..n {
            let (due, time) = {
                let mut state = self.state.lock().unwrap();
                if !state.running {
                    return;
                }
                let time = state.time;
                let due: Vec<(ScheduleId, TickCallback)> = state
                    .schedules
                    .iter_mut()
                    .filter_map(|(id, _, cb)| cb.take().map(|cb| (*id, cb)))
                    .collect();
                let interval = Subdivision::Sixteenth.interval_secs(state.bpm);
                state.time += interval;
                (due, time)
            };

            for (id, mut callback) in due {
                callback(time);
                let mut state = self.state.lock().unwrap();
                match state.schedules.iter_mut().find(|(sid, _, _)| *sid == id) {
                    Some(entry) => entry.2 = Some(callback),
                    None => state.retired.push(callback),
                }
            }
        }
    }

    /// Deliver every cancelled callback once more, as a racing clock might
    pub fn fire_retired(&self) {
        let (mut retired, time) = {
            let mut state = self.state.lock().unwrap();
            (std::mem::take(&mut state.retired), state.time)
        };
        for callback in retired.iter_mut() {
            callback(time);
        }
        self.state.lock().unwrap().retired.extend(retired);
    }

    pub fn schedule_count(&self) -> usize {
        self.state.lock().unwrap().schedules.len()
    }

    pub fn subdivisions(&self) -> Vec<Subdivision> {
        self.state.lock().unwrap().schedules.iter().map(|(_, s, _)| *s).collect()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn bpm(&self) -> f64 {
        self.state.lock().unwrap().bpm
    }

    pub fn triggered(&self) -> Vec<(SampleHandle, Option<ClockTime>)> {
        self.state.lock().unwrap().triggered.clone()
    }
}

impl AudioClock for ManualClock {
    fn schedule_recurring(&self, subdivision: Subdivision, callback: TickCallback) -> ScheduleId {
        let mut state = self.state.lock().unwrap();
        let id = ScheduleId(state.next_id);
        state.next_id += 1;
        state.schedules.push((id, subdivision, Some(callback)));
        id
    }

    fn cancel(&self, id: ScheduleId) {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.schedules.iter().position(|(sid, _, _)| *sid == id) {
            let (_, _, callback) = state.schedules.remove(pos);
            state.retired.extend(callback);
        }
    }

    fn run(&self) {
        self.state.lock().unwrap().running = true;
    }

    fn halt(&self) {
        self.state.lock().unwrap().running = false;
    }

    fn set_rate(&self, bpm: f64) {
        self.state.lock().unwrap().bpm = bpm;
    }

    fn trigger_at(&self, sample: SampleHandle, time: ClockTime) {
        self.state.lock().unwrap().triggered.push((sample, Some(time)));
    }

    fn trigger_now(&self, sample: SampleHandle) {
        self.state.lock().unwrap().triggered.push((sample, None));
    }
}

/// Loader handing out handles 0..n, counting how often it ran.
///
/// Yields once before resolving so overlapping callers really overlap.
#[derive(Default)]
pub(crate) struct StaticLoader {
    loads: AtomicUsize,
}

impl StaticLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl SampleLoader for StaticLoader {
    fn load<'a>(&'a self, sources: &'a [SampleSource]) -> LoadFuture<'a> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok((0..sources.len() as u64).map(SampleHandle).collect())
        })
    }
}

/// Loader that fails on the first source
pub(crate) struct FailingLoader;

impl SampleLoader for FailingLoader {
    fn load<'a>(&'a self, sources: &'a [SampleSource]) -> LoadFuture<'a> {
        Box::pin(async move {
            let name = sources.first().map(|s| s.name.clone()).unwrap_or_default();
            Err(LoadError::Sample {
                name,
                reason: "404 Not Found".into(),
            })
        })
    }
}

/// Kit with one source per name
pub(crate) fn kit(names: &[&str]) -> Vec<SampleSource> {
    names
        .iter()
        .map(|name| SampleSource::new(*name, format!("/samples/808/{name}.wav")))
        .collect()
}

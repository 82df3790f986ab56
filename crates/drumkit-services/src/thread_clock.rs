//! Thread-driven reference clock
//!
//! Recurring callbacks fire at absolute deadlines (`anchor + n * interval`),
//! so a late wakeup delays one tick without pushing back every tick after it.
//! Sample triggers are not rendered here; they are forwarded as
//! [`TriggerEvent`]s to whoever owns the audio output.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use drumkit_core::{Subdivision, DEFAULT_BPM};
use tracing::{debug, warn};

use crate::clock::{AudioClock, ClockTime, SampleHandle, ScheduleId, TickCallback};

/// A sample the clock was asked to play
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerEvent {
    pub sample: SampleHandle,
    /// Scheduled clock time, `None` for immediate playback
    pub at: Option<ClockTime>,
}

enum Control {
    Wake,
    Shutdown,
}

struct Schedule {
    id: ScheduleId,
    subdivision: Subdivision,
    /// Taken out while the callback runs on the worker
    callback: Option<TickCallback>,
    anchor: Instant,
    fired: u64,
}

impl Schedule {
    fn interval(&self, bpm: f64) -> Duration {
        Duration::from_secs_f64(self.subdivision.interval_secs(bpm))
    }

    fn deadline(&self, bpm: f64) -> Instant {
        self.anchor + self.interval(bpm).mul_f64(self.fired as f64)
    }

    fn reanchor(&mut self, at: Instant) {
        self.anchor = at;
        self.fired = 0;
    }
}

struct ClockState {
    bpm: f64,
    running: bool,
    next_id: u64,
    schedules: Vec<Schedule>,
}

type SharedState = Arc<Mutex<ClockState>>;

fn lock(state: &Mutex<ClockState>) -> MutexGuard<'_, ClockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock driven by a dedicated worker thread
pub struct ThreadClock {
    state: SharedState,
    control: Sender<Control>,
    triggers: Sender<TriggerEvent>,
    origin: Instant,
    worker: Option<JoinHandle<()>>,
}

impl ThreadClock {
    /// Start the worker. The receiver yields every triggered sample.
    pub fn new() -> (Self, Receiver<TriggerEvent>) {
        let (control_tx, control_rx) = unbounded();
        let (trigger_tx, trigger_rx) = unbounded();
        let origin = Instant::now();
        let state = Arc::new(Mutex::new(ClockState {
            bpm: DEFAULT_BPM,
            running: false,
            next_id: 1,
            schedules: Vec::new(),
        }));

        let worker_state = state.clone();
        let worker = thread::spawn(move || run_worker(worker_state, control_rx, origin));

        let clock = Self {
            state,
            control: control_tx,
            triggers: trigger_tx,
            origin,
            worker: Some(worker),
        };
        (clock, trigger_rx)
    }

    /// Current position on the clock timeline
    pub fn now(&self) -> ClockTime {
        clock_time(self.origin, Instant::now())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    fn wake(&self) {
        let _ = self.control.send(Control::Wake);
    }
}

impl AudioClock for ThreadClock {
    fn schedule_recurring(&self, subdivision: Subdivision, callback: TickCallback) -> ScheduleId {
        let id = {
            let mut state = lock(&self.state);
            let id = ScheduleId(state.next_id);
            state.next_id += 1;
            state.schedules.push(Schedule {
                id,
                subdivision,
                callback: Some(callback),
                anchor: Instant::now(),
                fired: 0,
            });
            id
        };
        debug!(id = id.0, ?subdivision, "Recurring callback scheduled");
        self.wake();
        id
    }

    fn cancel(&self, id: ScheduleId) {
        lock(&self.state).schedules.retain(|s| s.id != id);
        debug!(id = id.0, "Recurring callback cancelled");
        self.wake();
    }

    fn run(&self) {
        {
            let mut state = lock(&self.state);
            if state.running {
                return;
            }
            state.running = true;
            let now = Instant::now();
            for schedule in state.schedules.iter_mut() {
                schedule.reanchor(now);
            }
        }
        debug!("Clock running");
        self.wake();
    }

    fn halt(&self) {
        lock(&self.state).running = false;
        debug!("Clock halted");
        self.wake();
    }

    /// Non-positive and non-finite tempos are ignored
    fn set_rate(&self, bpm: f64) {
        if !(bpm.is_finite() && bpm > 0.0) {
            warn!(bpm, "Ignoring invalid clock rate");
            return;
        }
        {
            let mut state = lock(&self.state);
            if state.running {
                // The pending tick keeps its time; the new interval applies after it
                let old = state.bpm;
                for schedule in state.schedules.iter_mut() {
                    let next = schedule.deadline(old);
                    schedule.reanchor(next);
                }
            }
            state.bpm = bpm;
        }
        self.wake();
    }

    fn trigger_at(&self, sample: SampleHandle, time: ClockTime) {
        let _ = self.triggers.send(TriggerEvent {
            sample,
            at: Some(time),
        });
    }

    fn trigger_now(&self, sample: SampleHandle) {
        let _ = self.triggers.send(TriggerEvent { sample, at: None });
    }
}

impl Drop for ThreadClock {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Shutdown);
        let Some(worker) = self.worker.take() else {
            return;
        };
        // The last reference can be released from inside a callback
        if worker.thread().id() != thread::current().id() {
            let _ = worker.join();
        }
    }
}

fn clock_time(origin: Instant, at: Instant) -> ClockTime {
    at.saturating_duration_since(origin).as_secs_f64()
}

fn run_worker(state: SharedState, control: Receiver<Control>, origin: Instant) {
    loop {
        let now = Instant::now();
        let (due, next_deadline) = collect_due(&state, now);

        if !due.is_empty() {
            for (id, deadline, mut callback) in due {
                callback(clock_time(origin, deadline));
                // Put the callback back unless it was cancelled while running
                let mut state = lock(&state);
                if let Some(schedule) = state.schedules.iter_mut().find(|s| s.id == id) {
                    schedule.callback = Some(callback);
                }
            }
            continue;
        }

        let message = match next_deadline {
            Some(deadline) => control.recv_deadline(deadline),
            None => control.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match message {
            Ok(Control::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Clock worker exited");
}

/// Take the callbacks whose deadline has passed and find the next deadline
fn collect_due(
    state: &Mutex<ClockState>,
    now: Instant,
) -> (Vec<(ScheduleId, Instant, TickCallback)>, Option<Instant>) {
    let mut state = lock(state);
    if !state.running {
        return (Vec::new(), None);
    }

    let bpm = state.bpm;
    let mut due = Vec::new();
    let mut next: Option<Instant> = None;

    for schedule in state.schedules.iter_mut() {
        let deadline = schedule.deadline(bpm);
        if deadline > now {
            next = Some(next.map_or(deadline, |n| n.min(deadline)));
            continue;
        }

        let interval = schedule.interval(bpm);
        let behind = (now - deadline).as_nanos() / interval.as_nanos().max(1);
        if behind > 0 {
            warn!(id = schedule.id.0, skipped = behind as u64, "Clock fell behind, skipping ticks");
            schedule.fired += behind as u64;
        }

        let deadline = schedule.deadline(bpm);
        if let Some(callback) = schedule.callback.take() {
            schedule.fired += 1;
            due.push((schedule.id, deadline, callback));
        }
    }

    (due, next)
}

//! Step sequencer engine
//!
//! [`Sequencer`] owns the beat grid, the playhead and the transport state. A
//! caller edits the grid through synchronous operations while an injected
//! [`AudioClock`] drives playback by calling back into the engine once per
//! 16th note. Observers are told about every edit, tick and transport change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use drumkit_core::{
    BarPatch, GridError, SampleSource, SequenceGrid, Subdivision, SuggestionRequest, Trigger,
    TransportState, STEPS_PER_BAR,
};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace, warn};

use crate::clock::{AudioClock, ClockTime, SampleHandle, ScheduleId, TickCallback};
use crate::config::{ConfigError, EngineConfig};
use crate::loader::{LoadError, SampleLoader};
use crate::observers::{ObserverId, ObserverList};

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("Sample loading failed: {0}")]
    Load(#[from] LoadError),
    #[error("Tempo {0} BPM is outside the accepted range")]
    InvalidTempo(f64),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// How the bar added by [`Sequencer::extend`] is produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendMode {
    /// Repeat the last bar
    Copy,
    /// Add a silent bar
    Empty,
    /// Add externally generated content (one bar per instrument)
    Replace(BarPatch),
}

impl ExtendMode {
    fn label(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Empty => "empty",
            Self::Replace(_) => "replace",
        }
    }
}

/// What changed. Observers read current state back from the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerEvent {
    NoteChanged {
        instrument: String,
        step: usize,
        value: Trigger,
    },
    Extended {
        bars: usize,
    },
    BarDeleted {
        bar: usize,
    },
    Cleared,
    Started,
    Stopped,
    /// Playhead moved; `step` is the step the next tick will play
    Tick {
        step: usize,
    },
}

/// Transport, playhead, tempo and grid read together
#[derive(Debug, Clone)]
pub struct SequencerSnapshot {
    pub status: TransportState,
    pub current_step: usize,
    pub bpm: f64,
    pub grid: Arc<SequenceGrid>,
}

struct PlaybackState {
    grid: Arc<SequenceGrid>,
    current_step: usize,
    transport: TransportState,
    bpm: f64,
    schedule: Option<ScheduleId>,
    /// Bumped on every start and stop; ticks from an older run are ignored
    run_id: u64,
}

struct Shared {
    sources: Vec<SampleSource>,
    clock: Arc<dyn AudioClock>,
    loader: Arc<dyn SampleLoader>,
    config: EngineConfig,
    blank_bar: SequenceGrid,
    state: Mutex<PlaybackState>,
    samples: OnceCell<HashMap<String, SampleHandle>>,
    observers: ObserverList<SequencerEvent>,
    /// Held while a tick or a transport change is applied and delivered
    delivery: Mutex<()>,
    /// Thread currently holding `delivery`
    delivering: Mutex<Option<ThreadId>>,
}

/// Releases the delivery gate and forgets its owner, also on unwind
struct Delivery<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
    _gate: MutexGuard<'a, ()>,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, PlaybackState> {
        // Grids are built before they are installed, so a poisoned guard
        // still holds a consistent state
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` while no other thread is delivering a tick or a transport
    /// change. Observers re-entering on the delivering thread pass straight
    /// through.
    fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let me = thread::current().id();
        let reentrant =
            *self.delivering.lock().unwrap_or_else(PoisonError::into_inner) == Some(me);
        if reentrant {
            return f();
        }

        let _delivery = Delivery {
            _gate: self.delivery.lock().unwrap_or_else(PoisonError::into_inner),
            owner: &self.delivering,
        };
        *self.delivering.lock().unwrap_or_else(PoisonError::into_inner) = Some(me);
        f()
    }

    fn is_current_run(&self, run_id: u64) -> bool {
        self.lock_state().run_id == run_id
    }

    fn on_tick(&self, run_id: u64, time: ClockTime) {
        self.exclusive(|| {
            let step = {
                let mut state = self.lock_state();
                if state.run_id != run_id || !state.transport.is_started() {
                    trace!(run_id, "Dropping tick from a stopped run");
                    return;
                }

                let len = state.grid.len();
                let current = state.current_step % len;
                if let Some(samples) = self.samples.get() {
                    for name in state.grid.active_at(current) {
                        if let Some(&sample) = samples.get(name) {
                            self.clock.trigger_at(sample, time);
                        }
                    }
                }
                state.current_step = (current + 1) % len;
                state.current_step
            };

            trace!(step, time, "Tick");
            // An observer may stop playback part way through the fan-out
            self.observers
                .notify_while(&SequencerEvent::Tick { step }, || self.is_current_run(run_id));
        });
    }

    /// Stop the current run and hand back its clock registration
    fn end_run(&self) -> (bool, Option<ScheduleId>) {
        let mut state = self.lock_state();
        let was_started = state.transport.is_started();
        state.transport = TransportState::Stopped;
        state.run_id += 1;
        (was_started, state.schedule.take())
    }
}

/// Step sequencer for one kit
pub struct Sequencer {
    shared: Arc<Shared>,
}

impl Sequencer {
    pub fn new(
        sources: Vec<SampleSource>,
        clock: Arc<dyn AudioClock>,
        loader: Arc<dyn SampleLoader>,
    ) -> Result<Self, SequencerError> {
        Self::with_config(EngineConfig::default(), sources, clock, loader)
    }

    pub fn with_config(
        config: EngineConfig,
        sources: Vec<SampleSource>,
        clock: Arc<dyn AudioClock>,
        loader: Arc<dyn SampleLoader>,
    ) -> Result<Self, SequencerError> {
        config.validate()?;

        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        let blank_bar = SequenceGrid::empty(&names, 1)?;
        let bpm = config.initial_bpm;
        clock.set_rate(bpm);

        info!(instruments = sources.len(), bpm, "Sequencer created");

        Ok(Self {
            shared: Arc::new(Shared {
                sources,
                clock,
                loader,
                config,
                state: Mutex::new(PlaybackState {
                    grid: Arc::new(blank_bar.clone()),
                    current_step: 0,
                    transport: TransportState::Stopped,
                    bpm,
                    schedule: None,
                    run_id: 0,
                }),
                blank_bar,
                samples: OnceCell::new(),
                observers: ObserverList::new(),
                delivery: Mutex::new(()),
                delivering: Mutex::new(None),
            }),
        })
    }

    /// Current grid. The returned grid never changes; edits install a new one.
    pub fn grid(&self) -> Arc<SequenceGrid> {
        self.shared.lock_state().grid.clone()
    }

    pub fn current_step(&self) -> usize {
        self.shared.lock_state().current_step
    }

    pub fn transport_state(&self) -> TransportState {
        self.shared.lock_state().transport
    }

    pub fn is_playing(&self) -> bool {
        self.transport_state().is_started()
    }

    pub fn bpm(&self) -> f64 {
        self.shared.lock_state().bpm
    }

    pub fn instruments(&self) -> &[SampleSource] {
        &self.shared.sources
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn snapshot(&self) -> SequencerSnapshot {
        let state = self.shared.lock_state();
        SequencerSnapshot {
            status: state.transport,
            current_step: state.current_step,
            bpm: state.bpm,
            grid: state.grid.clone(),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&SequencerEvent) + Send + Sync + 'static,
    {
        self.shared.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.shared.observers.unsubscribe(id)
    }

    /// Set one cell, or toggle it between 0 and 1 when `value` is `None`.
    ///
    /// Returns the value now stored in the cell.
    pub fn set_note(
        &self,
        instrument: &str,
        step: usize,
        value: Option<Trigger>,
    ) -> Result<Trigger, SequencerError> {
        let value = {
            let mut state = self.shared.lock_state();
            let value = value.unwrap_or_else(|| match state.grid.value(instrument, step) {
                Some(current) if current > 0 => 0,
                _ => 1,
            });
            let next = state.grid.with_note(instrument, step, value)?;
            state.grid = Arc::new(next);
            value
        };

        debug!(instrument, step, value, "Note set");
        self.shared.observers.notify(&SequencerEvent::NoteChanged {
            instrument: instrument.to_string(),
            step,
            value,
        });
        Ok(value)
    }

    /// Grow the grid by one bar
    pub fn extend(&self, mode: ExtendMode) -> Result<(), SequencerError> {
        let bars = {
            let mut state = self.shared.lock_state();
            let addition = match &mode {
                ExtendMode::Copy => state.grid.last_bar(),
                ExtendMode::Empty => self.shared.blank_bar.clone(),
                ExtendMode::Replace(patch) => state.grid.bar_from_patch(patch)?,
            };
            let next = state.grid.with_bars_appended(&addition)?;
            let bars = next.bar_count();
            state.grid = Arc::new(next);
            bars
        };

        debug!(mode = mode.label(), bars, "Grid extended");
        self.shared.observers.notify(&SequencerEvent::Extended { bars });
        Ok(())
    }

    /// Remove a bar from every track.
    ///
    /// A playhead before the bar stays put, one after it moves back a bar,
    /// and one inside it keeps its index (wrapped to the new length).
    pub fn delete_bar(&self, bar: usize) -> Result<(), SequencerError> {
        {
            let mut state = self.shared.lock_state();
            let next = state.grid.with_bar_removed(bar)?;

            let start = bar * STEPS_PER_BAR;
            let end = start + STEPS_PER_BAR;
            state.current_step = match state.current_step {
                step if step < start => step,
                step if step < end => step % next.len(),
                step => step - STEPS_PER_BAR,
            };
            state.grid = Arc::new(next);
        }

        debug!(bar, "Bar deleted");
        self.shared.observers.notify(&SequencerEvent::BarDeleted { bar });
        Ok(())
    }

    /// Back to one silent bar with the playhead at the top
    pub fn clear(&self) {
        {
            let mut state = self.shared.lock_state();
            state.grid = Arc::new(self.shared.blank_bar.clone());
            state.current_step = 0;
        }

        debug!("Grid cleared");
        self.shared.observers.notify(&SequencerEvent::Cleared);
    }

    /// Start playback from step 0. Loads samples on first use.
    ///
    /// Does nothing if already started. A failed load leaves the sequencer
    /// stopped.
    pub async fn start(&self) -> Result<(), SequencerError> {
        if self.is_playing() {
            debug!("Start ignored, already started");
            return Ok(());
        }

        self.ensure_samples().await?;
        self.shared.exclusive(|| self.begin_run());
        Ok(())
    }

    fn begin_run(&self) {
        let run_id = {
            let mut state = self.shared.lock_state();
            if state.transport.is_started() {
                return;
            }
            state.transport = TransportState::Started;
            state.current_step = 0;
            state.run_id += 1;
            state.run_id
        };

        let shared = Arc::downgrade(&self.shared);
        let callback: TickCallback = Box::new(move |time| {
            if let Some(shared) = shared.upgrade() {
                shared.on_tick(run_id, time);
            }
        });
        let id = self
            .shared
            .clock
            .schedule_recurring(Subdivision::Sixteenth, callback);

        {
            let mut state = self.shared.lock_state();
            if state.run_id != run_id {
                // Stopped while registering
                drop(state);
                self.shared.clock.cancel(id);
                return;
            }
            state.schedule = Some(id);
        }

        self.shared.clock.run();
        info!(run_id, bpm = self.bpm(), "Playback started");
        self.shared
            .observers
            .notify_while(&SequencerEvent::Started, || self.shared.is_current_run(run_id));
    }

    /// Stop playback, keeping grid and playhead. Safe to call when stopped.
    ///
    /// Waits for a tick being delivered on another thread, so no tick
    /// reaches observers once this returns.
    pub fn stop(&self) {
        self.shared.exclusive(|| {
            let (was_started, schedule) = self.shared.end_run();
            if let Some(id) = schedule {
                self.shared.clock.cancel(id);
            }
            self.shared.clock.halt();

            if was_started {
                info!(step = self.current_step(), "Playback stopped");
            }
            self.shared.observers.notify(&SequencerEvent::Stopped);
        });
    }

    pub fn set_tempo(&self, bpm: f64) -> Result<(), SequencerError> {
        if !self.shared.config.accepts_bpm(bpm) {
            warn!(bpm, "Rejected tempo");
            return Err(SequencerError::InvalidTempo(bpm));
        }

        self.shared.lock_state().bpm = bpm;
        self.shared.clock.set_rate(bpm);
        debug!(bpm, "Tempo set");
        Ok(())
    }

    /// Audition one instrument right away, outside the sequence
    pub async fn play_sample(&self, instrument: &str) -> Result<(), SequencerError> {
        if !self.shared.blank_bar.contains(instrument) {
            return Err(GridError::UnknownInstrument(instrument.to_string()).into());
        }

        let samples = self.ensure_samples().await?;
        if let Some(&sample) = samples.get(instrument) {
            self.shared.clock.trigger_now(sample);
        }
        Ok(())
    }

    /// Payload asking the bar generator to continue the current pattern
    pub fn suggestion_request(&self, machine: impl Into<String>) -> SuggestionRequest {
        let state = self.shared.lock_state();
        SuggestionRequest::for_grid(&state.grid, state.bpm, machine)
    }

    /// Loaded sample table. Overlapping callers share one load.
    async fn ensure_samples(&self) -> Result<&HashMap<String, SampleHandle>, SequencerError> {
        self.shared
            .samples
            .get_or_try_init(|| self.load_samples())
            .await
    }

    async fn load_samples(&self) -> Result<HashMap<String, SampleHandle>, SequencerError> {
        let sources = &self.shared.sources;
        info!(count = sources.len(), "Loading samples");
        let handles = self
            .shared
            .loader
            .load(sources)
            .await
            .inspect_err(|e| warn!("Failed to load samples: {}", e))?;

        if handles.len() != sources.len() {
            return Err(LoadError::HandleCount {
                expected: sources.len(),
                got: handles.len(),
            }
            .into());
        }

        Ok(sources.iter().map(|s| s.name.clone()).zip(handles).collect())
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.shared.exclusive(|| {
            let (was_started, schedule) = self.shared.end_run();
            if let Some(id) = schedule {
                self.shared.clock.cancel(id);
            }
            if was_started {
                self.shared.clock.halt();
            }
        });
    }
}

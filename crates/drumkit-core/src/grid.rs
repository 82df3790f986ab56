//! Beat grid: one track of triggers per instrument
//!
//! A [`SequenceGrid`] is never edited in place. Every operation builds and
//! returns a new grid, so a grid handed out to a reader stays valid while the
//! owner moves on to the next version.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{GridError, Result};

/// Steps in one bar (4/4 at 16th-note resolution)
pub const STEPS_PER_BAR: usize = 16;

/// Value of one step: 0 is silent, anything above 0 plays
pub type Trigger = u8;

/// Externally supplied bar content keyed by instrument name
pub type BarPatch = BTreeMap<String, Vec<Trigger>>;

/// The ordered triggers of one instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    name: String,
    steps: Vec<Trigger>,
}

impl Track {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Trigger] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether the step holds a non-zero trigger (out of range reads as silent)
    pub fn is_active(&self, step: usize) -> bool {
        self.steps.get(step).is_some_and(|&v| v > 0)
    }
}

/// Rectangular mapping from instrument name to track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGrid {
    tracks: Vec<Track>,
}

impl SequenceGrid {
    /// Silent grid of `bars` bars for the given instruments
    pub fn empty<S: AsRef<str>>(instruments: &[S], bars: usize) -> Result<Self> {
        if bars == 0 {
            return Err(GridError::InvalidOperation(
                "a grid needs at least one bar".into(),
            ));
        }
        let tracks = instruments
            .iter()
            .map(|name| Track {
                name: name.as_ref().to_string(),
                steps: vec![0; bars * STEPS_PER_BAR],
            })
            .collect();
        Self::from_tracks(tracks)
    }

    /// Build a grid from (name, steps) pairs, checking every invariant
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<Trigger>)>,
        S: Into<String>,
    {
        let tracks = pairs
            .into_iter()
            .map(|(name, steps)| Track {
                name: name.into(),
                steps,
            })
            .collect();
        Self::from_tracks(tracks)
    }

    fn from_tracks(tracks: Vec<Track>) -> Result<Self> {
        let Some(first) = tracks.first() else {
            return Err(GridError::InvalidOperation(
                "a grid needs at least one instrument".into(),
            ));
        };

        let mut seen = HashSet::new();
        if let Some(dup) = tracks.iter().find(|t| !seen.insert(t.name.as_str())) {
            return Err(GridError::InvalidOperation(format!(
                "instrument '{}' appears twice",
                dup.name
            )));
        }

        let len = first.len();
        if let Some(odd) = tracks.iter().find(|t| t.len() != len) {
            return Err(GridError::LengthMismatch(format!(
                "track '{}' has {} steps, expected {}",
                odd.name,
                odd.len(),
                len
            )));
        }
        if len == 0 || len % STEPS_PER_BAR != 0 {
            return Err(GridError::LengthMismatch(format!(
                "track length {len} is not a positive multiple of {STEPS_PER_BAR}"
            )));
        }

        Ok(Self { tracks })
    }

    /// Steps per track
    pub fn len(&self) -> usize {
        self.tracks.first().map_or(0, Track::len)
    }

    /// Always false for a constructed grid; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bar_count(&self) -> usize {
        self.len() / STEPS_PER_BAR
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Instrument names in track order
    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.tracks.iter().map(Track::name)
    }

    pub fn track(&self, instrument: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.name == instrument)
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.track(instrument).is_some()
    }

    pub fn value(&self, instrument: &str, step: usize) -> Option<Trigger> {
        self.track(instrument)?.steps.get(step).copied()
    }

    /// Instruments with a non-zero trigger at `step`
    pub fn active_at(&self, step: usize) -> impl Iterator<Item = &str> {
        self.tracks
            .iter()
            .filter(move |t| t.is_active(step))
            .map(Track::name)
    }

    /// Copy with one cell changed
    pub fn with_note(&self, instrument: &str, step: usize, value: Trigger) -> Result<Self> {
        let idx = self
            .tracks
            .iter()
            .position(|t| t.name == instrument)
            .ok_or_else(|| GridError::OutOfRange(format!("no instrument named '{instrument}'")))?;

        if step >= self.len() {
            return Err(GridError::OutOfRange(format!(
                "step {step} outside 0..{}",
                self.len()
            )));
        }

        let mut tracks = self.tracks.clone();
        tracks[idx].steps[step] = value;
        Ok(Self { tracks })
    }

    /// Copy with `new_bars` concatenated after every track
    pub fn with_bars_appended(&self, new_bars: &SequenceGrid) -> Result<Self> {
        if !self.same_instruments(new_bars) {
            return Err(GridError::LengthMismatch(
                "appended bars cover a different instrument set".into(),
            ));
        }

        let tracks = self
            .tracks
            .iter()
            .map(|track| {
                let mut steps = track.steps.clone();
                if let Some(extra) = new_bars.track(&track.name) {
                    steps.extend_from_slice(&extra.steps);
                }
                Track {
                    name: track.name.clone(),
                    steps,
                }
            })
            .collect();
        Self::from_tracks(tracks)
    }

    /// Copy without bar `bar_index`
    pub fn with_bar_removed(&self, bar_index: usize) -> Result<Self> {
        let bars = self.bar_count();
        if bar_index >= bars {
            return Err(GridError::OutOfRange(format!(
                "bar {bar_index} outside 0..{bars}"
            )));
        }
        if bars == 1 {
            return Err(GridError::InvalidOperation(
                "cannot remove the only bar".into(),
            ));
        }

        let start = bar_index * STEPS_PER_BAR;
        let end = start + STEPS_PER_BAR;
        let tracks = self
            .tracks
            .iter()
            .map(|track| Track {
                name: track.name.clone(),
                steps: [&track.steps[..start], &track.steps[end..]].concat(),
            })
            .collect();
        Ok(Self { tracks })
    }

    /// Bar `bar_index` as a one-bar grid
    pub fn bar(&self, bar_index: usize) -> Result<Self> {
        if bar_index >= self.bar_count() {
            return Err(GridError::OutOfRange(format!(
                "bar {bar_index} outside 0..{}",
                self.bar_count()
            )));
        }
        let start = bar_index * STEPS_PER_BAR;
        Ok(self.slice(start))
    }

    /// The final 16 steps of every track as a one-bar grid
    pub fn last_bar(&self) -> Self {
        debug_assert_eq!(
            self.len() % STEPS_PER_BAR,
            0,
            "track length must stay bar aligned"
        );
        self.slice(self.len() - STEPS_PER_BAR)
    }

    fn slice(&self, start: usize) -> Self {
        let tracks = self
            .tracks
            .iter()
            .map(|track| Track {
                name: track.name.clone(),
                steps: track.steps[start..start + STEPS_PER_BAR].to_vec(),
            })
            .collect();
        Self { tracks }
    }

    /// Validate one bar of external content against this grid's instruments.
    ///
    /// The patch must name exactly this grid's instruments and hold 16 steps
    /// for each. The result is ordered like this grid.
    pub fn bar_from_patch(&self, patch: &BarPatch) -> Result<Self> {
        let unknown: Vec<&str> = patch
            .keys()
            .map(String::as_str)
            .filter(|name| !self.contains(name))
            .collect();
        if !unknown.is_empty() {
            return Err(GridError::UnknownInstrument(unknown.join(", ")));
        }
        let missing: Vec<&str> = self
            .instruments()
            .filter(|name| !patch.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(GridError::UnknownInstrument(format!(
                "missing {}",
                missing.join(", ")
            )));
        }

        let tracks = self
            .tracks
            .iter()
            .map(|track| {
                let steps = &patch[&track.name];
                if steps.len() != STEPS_PER_BAR {
                    return Err(GridError::LengthMismatch(format!(
                        "track '{}' has {} steps, expected {STEPS_PER_BAR}",
                        track.name,
                        steps.len()
                    )));
                }
                Ok(Track {
                    name: track.name.clone(),
                    steps: steps.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tracks })
    }

    fn same_instruments(&self, other: &SequenceGrid) -> bool {
        self.tracks.len() == other.tracks.len() && self.instruments().all(|n| other.contains(n))
    }
}

impl Serialize for SequenceGrid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tracks.len()))?;
        for track in &self.tracks {
            map.serialize_entry(&track.name, &track.steps)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SequenceGrid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct GridVisitor;

        impl<'de> Visitor<'de> for GridVisitor {
            type Value = SequenceGrid;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map from instrument name to a list of triggers")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<SequenceGrid, A::Error> {
                // Keep document order so tracks come back in the order they were sent
                let mut pairs: Vec<(String, Vec<Trigger>)> = Vec::new();
                while let Some(entry) = access.next_entry()? {
                    pairs.push(entry);
                }
                SequenceGrid::from_pairs(pairs).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_map(GridVisitor)
    }
}

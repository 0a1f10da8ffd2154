//! Replay of a recorded election.
//!
//! The playhead moves through virtual time: advancing by a wall-clock
//! duration moves it `elapsed * speed` milliseconds forward and passes
//! every event stamped at or before the new position.
//!
//! The loaded events mirror the sandbox log window. Events that fall out of
//! the window are folded into a base snapshot the playhead starts from.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stp_election::{ElectionEvent, ElectionSnapshot};

use crate::error::{Error, Result};

/// Current state of playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    /// At the beginning, not running
    Stopped,
    Playing,
    Paused,
    /// Every event has been played
    Finished,
}

/// Playback controller over one election run's event log.
#[derive(Debug, Clone)]
pub struct Playback {
    run: u64,
    /// State before the first loaded event
    base: ElectionSnapshot,
    events: Vec<ElectionEvent>,
    /// Number of events already played
    cursor: usize,
    position_ms: u64,
    state: PlaybackState,
    speed: f64,
    looping: bool,
}

impl Default for Playback {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Playback {
    pub fn new(events: Vec<ElectionEvent>) -> Self {
        Self {
            run: 0,
            base: ElectionSnapshot::default(),
            events,
            cursor: 0,
            position_ms: 0,
            state: PlaybackState::Stopped,
            speed: 1.0,
            looping: false,
        }
    }

    /// Follow the sandbox log window and the `base` state before it.
    ///
    /// A new run replaces the loaded events and rewinds, as does a log that
    /// has moved past events never loaded. Otherwise new events are appended
    /// by sequence number and events the log has dropped are dropped here
    /// too, pulling the playhead forward if it was still among them.
    pub fn sync(&mut self, run: u64, base: &ElectionSnapshot, log: &[ElectionEvent]) {
        let next = self.events.last().map_or(0, |e| e.seq + 1);
        let missed = log.first().is_some_and(|e| e.seq > next);
        if run != self.run || missed {
            self.run = run;
            self.base = base.clone();
            self.events = log.to_vec();
            self.stop();
            return;
        }

        let fresh = log.partition_point(|e| e.seq < next);
        if fresh < log.len() {
            self.events.extend_from_slice(&log[fresh..]);
            if self.state == PlaybackState::Finished {
                self.state = PlaybackState::Paused;
            }
        }

        let Some(first) = log.first() else {
            return;
        };
        let stale = self.events.partition_point(|e| e.seq < first.seq);
        if stale > 0 {
            self.base.fold(&self.events[..stale]);
            self.events.drain(..stale);
            self.cursor = self.cursor.saturating_sub(stale);
            self.position_ms = self.position_ms.max(self.base.time_ms);
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Virtual time of the playhead in milliseconds.
    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    /// Virtual time of the last recorded event.
    pub fn end_ms(&self) -> u64 {
        self.events.last().map_or(0, |e| e.time_ms)
    }

    pub fn play(&mut self) {
        if self.cursor >= self.events.len() {
            self.rewind();
        }
        self.state = PlaybackState::Playing;
    }

    pub fn pause(&mut self) {
        self.state = PlaybackState::Paused;
    }

    /// Stop and rewind to the beginning.
    pub fn stop(&mut self) {
        self.rewind();
        self.state = PlaybackState::Stopped;
    }

    /// Set the virtual-time multiplier. Must be positive and finite.
    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(Error::InvalidRequest(format!(
                "playback speed must be positive, got {speed}"
            )));
        }
        self.speed = speed;
        Ok(())
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.looping = enabled;
    }

    /// Move the cursor so the first `index` events count as played.
    pub fn seek(&mut self, index: usize) {
        self.cursor = index.min(self.events.len());
        self.position_ms = self.played().last().map_or(self.base.time_ms, |e| e.time_ms);
        self.settle();
    }

    /// Move the playhead to a virtual time.
    pub fn seek_time(&mut self, time_ms: u64) {
        self.cursor = self.events.partition_point(|e| e.time_ms <= time_ms);
        self.position_ms = time_ms;
        self.settle();
    }

    /// Play exactly one event and pause there.
    pub fn step_forward(&mut self) -> Option<&ElectionEvent> {
        let event = self.events.get(self.cursor)?;
        self.cursor += 1;
        self.position_ms = event.time_ms;
        self.state = if self.cursor == self.events.len() {
            PlaybackState::Finished
        } else {
            PlaybackState::Paused
        };
        Some(event)
    }

    /// Undo the last played event and pause there.
    pub fn step_backward(&mut self) -> Option<&ElectionEvent> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.position_ms = self.played().last().map_or(self.base.time_ms, |e| e.time_ms);
        self.state = PlaybackState::Paused;
        self.events.get(self.cursor)
    }

    /// Advance the playhead by a wall-clock duration.
    ///
    /// Returns the events passed. Does nothing unless playing.
    pub fn advance(&mut self, elapsed: Duration) -> &[ElectionEvent] {
        if self.state != PlaybackState::Playing {
            return &[];
        }
        let step = (elapsed.as_secs_f64() * 1000.0 * self.speed) as u64;
        self.position_ms = self.position_ms.saturating_add(step);

        let start = self.cursor;
        let position = self.position_ms;
        self.cursor += self.events[start..].partition_point(|e| e.time_ms <= position);
        let end = self.cursor;

        if end == self.events.len() {
            if self.looping {
                self.rewind();
            } else {
                self.state = PlaybackState::Finished;
            }
        }
        &self.events[start..end]
    }

    /// Events played so far.
    pub fn played(&self) -> &[ElectionEvent] {
        &self.events[..self.cursor]
    }

    /// Election state at the playhead.
    pub fn snapshot(&self) -> ElectionSnapshot {
        let mut snapshot = self.base.clone();
        snapshot.fold(self.played());
        snapshot.time_ms = self.position_ms;
        snapshot
    }

    /// Fraction of events played, 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        if self.events.is_empty() {
            0.0
        } else {
            self.cursor as f64 / self.events.len() as f64
        }
    }

    fn rewind(&mut self) {
        self.cursor = 0;
        self.position_ms = self.base.time_ms;
    }

    fn settle(&mut self) {
        if self.cursor == self.events.len() && !self.events.is_empty() && !self.looping {
            self.state = PlaybackState::Finished;
        } else if self.state == PlaybackState::Finished {
            self.state = PlaybackState::Paused;
        }
    }
}

/// Playback status for clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub run: u64,
    pub cursor: usize,
    pub total: usize,
    pub state: PlaybackState,
    pub speed: f64,
    pub position_ms: u64,
    pub end_ms: u64,
    pub progress: f64,
    pub looping: bool,
}

impl From<&Playback> for PlaybackStatus {
    fn from(playback: &Playback) -> Self {
        Self {
            run: playback.run,
            cursor: playback.cursor,
            total: playback.len(),
            state: playback.state,
            speed: playback.speed,
            position_ms: playback.position_ms,
            end_ms: playback.end_ms(),
            progress: playback.progress(),
            looping: playback.looping,
        }
    }
}

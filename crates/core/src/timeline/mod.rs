use std::{collections::HashSet, fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{KaraokeError, Result};

/// Identifier of a note within one chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub u32);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Target note authored in the chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    /// Fractional MIDI pitch.
    pub pitch_midi: f64,
    pub start_ms: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub is_golden: bool,
    #[serde(default)]
    pub is_bonus: bool,
    #[serde(default)]
    pub lyric: String,
}

impl Note {
    /// Plain note with no lyric. Validation happens when the note joins a
    /// [`NoteTimeline`].
    pub fn new(id: u32, pitch_midi: f64, start_ms: u64, duration_ms: u64) -> Self {
        Self {
            id: NoteId(id),
            pitch_midi,
            start_ms,
            duration_ms,
            is_golden: false,
            is_bonus: false,
            lyric: String::new(),
        }
    }

    /// Marks the note golden: extra points and a bigger star-power charge.
    pub fn golden(mut self) -> Self {
        self.is_golden = true;
        self
    }

    /// Marks the note as a bonus note, whose points are multiplied.
    pub fn bonus(mut self) -> Self {
        self.is_bonus = true;
        self
    }

    pub fn with_lyric(mut self, lyric: impl Into<String>) -> Self {
        self.lyric = lyric.into();
        self
    }

    pub fn end_ms(&self) -> u64 {
        self.start_ms.saturating_add(self.duration_ms)
    }

    /// Inclusive on both ends.
    pub fn is_active_at(&self, now_ms: u64) -> bool {
        self.start_ms <= now_ms && now_ms <= self.end_ms()
    }
}

/// Notes that share a display window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub notes: Vec<Note>,
}

impl LyricLine {
    pub fn new(notes: Vec<Note>) -> Self {
        Self { notes }
    }

    pub fn text(&self) -> String {
        self.notes.iter().map(|note| note.lyric.as_str()).collect()
    }
}

#[derive(Debug, Deserialize)]
struct ChartFile {
    #[serde(default)]
    title: Option<String>,
    lines: Vec<LyricLine>,
}

/// Immutable, start-ordered chart consulted by the scoring engine.
#[derive(Debug, Clone)]
pub struct NoteTimeline {
    title: Option<String>,
    lines: Vec<LyricLine>,
    notes: Vec<Note>,
    longest_note_ms: u64,
}

impl NoteTimeline {
    /// Validates and indexes the given lines. Fails on an empty chart,
    /// duplicate ids, non-finite pitches or zero-length notes.
    pub fn new(lines: Vec<LyricLine>) -> Result<Self> {
        let mut notes: Vec<Note> = lines.iter().flat_map(|line| line.notes.clone()).collect();
        if notes.is_empty() {
            return Err(KaraokeError::timeline("chart contains no notes"));
        }

        let mut ids = HashSet::with_capacity(notes.len());
        for note in &notes {
            if !ids.insert(note.id) {
                return Err(KaraokeError::timeline(format!("duplicate note id {}", note.id)));
            }
            if !note.pitch_midi.is_finite() || !(0.0..=127.0).contains(&note.pitch_midi) {
                return Err(KaraokeError::timeline(format!(
                    "note {} has pitch {} outside the MIDI range",
                    note.id, note.pitch_midi
                )));
            }
            if note.duration_ms == 0 {
                return Err(KaraokeError::timeline(format!(
                    "note {} has zero duration",
                    note.id
                )));
            }
        }

        notes.sort_by_key(|note| (note.start_ms, note.id));
        let longest_note_ms = notes.iter().map(|note| note.duration_ms).max().unwrap_or(0);

        Ok(Self {
            title: None,
            lines,
            notes,
            longest_note_ms,
        })
    }

    /// Convenience constructor for a chart without lyric grouping.
    pub fn from_notes(notes: Vec<Note>) -> Result<Self> {
        Self::new(vec![LyricLine::new(notes)])
    }

    /// Parses the JSON chart format `{ "title": .., "lines": [{ "notes": [..] }] }`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let chart: ChartFile = serde_json::from_str(json)?;
        let mut timeline = Self::new(chart.lines)?;
        timeline.title = chart.title;
        Ok(timeline)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Song title from the chart file, if it had one.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Lyric lines as given, in chart order.
    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    /// All notes ordered by start time.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Number of notes across all lines; the denominator of accuracy.
    pub fn total_notes(&self) -> usize {
        self.notes.len()
    }

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == id)
    }

    /// End of the last note.
    pub fn end_ms(&self) -> u64 {
        self.notes.iter().map(Note::end_ms).max().unwrap_or(0)
    }

    /// Notes whose `[start, start + duration]` window contains `now_ms`.
    pub fn active_at(&self, now_ms: u64) -> impl Iterator<Item = &Note> + '_ {
        let first = self
            .notes
            .partition_point(|note| note.start_ms.saturating_add(self.longest_note_ms) < now_ms);
        let last = self.notes.partition_point(|note| note.start_ms <= now_ms);
        self.notes[first..last.max(first)]
            .iter()
            .filter(move |note| note.is_active_at(now_ms))
    }
}

/// Playback position supplied by the host once per tick. Never moves backwards.
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    now_ms: u64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn reset(&mut self) {
        self.now_ms = 0;
    }

    pub fn advance(&mut self, delta_ms: u64) -> u64 {
        self.now_ms = self.now_ms.saturating_add(delta_ms);
        self.now_ms
    }

    /// Moves to `position_ms` unless that would rewind the clock.
    pub fn sync_to(&mut self, position_ms: u64) -> u64 {
        self.now_ms = self.now_ms.max(position_ms);
        self.now_ms
    }
}

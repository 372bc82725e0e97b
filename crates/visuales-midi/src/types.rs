//! Trigger identity and deck addressing types
//!
//! A [`TriggerKey`] is the canonical identity of a matchable MIDI condition.
//! Velocity and CC value are never part of the key, so every press of the
//! same pad on the same channel resolves to the same binding.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest valid MIDI channel (0-based)
pub const MAX_CHANNEL: u8 = 15;

/// Highest valid note / CC / program number
pub const MAX_NUMBER: u8 = 127;

/// Kind of MIDI message a trigger matches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Note On with velocity > 0
    NoteOn,
    /// Control Change
    ControlChange,
    /// Program Change
    ProgramChange,
    /// Pitch wheel (number is always 0)
    PitchWheel,
}

/// Canonical identity of a matchable MIDI condition
///
/// Fields are private so a key cannot change after construction; use
/// [`TriggerKey::new`] or one of the kind-specific constructors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    kind: TriggerKind,
    channel: u8,
    number: u8,
}

/// Error returned when a trigger cannot be built or parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("MIDI channel {0} out of range (0-15)")]
    ChannelOutOfRange(u8),

    #[error("MIDI number {0} out of range (0-127)")]
    NumberOutOfRange(u8),

    #[error("Unrecognized trigger string: '{0}'")]
    Unrecognized(String),
}

impl TriggerKey {
    /// Build a trigger key, validating channel and number ranges
    ///
    /// Pitch wheel keys ignore `number` and always store 0.
    pub fn new(kind: TriggerKind, channel: u8, number: u8) -> Result<Self, TriggerError> {
        if channel > MAX_CHANNEL {
            return Err(TriggerError::ChannelOutOfRange(channel));
        }
        let number = if kind == TriggerKind::PitchWheel { 0 } else { number };
        if number > MAX_NUMBER {
            return Err(TriggerError::NumberOutOfRange(number));
        }
        Ok(Self {
            kind,
            channel,
            number,
        })
    }

    /// Note On trigger
    pub fn note_on(channel: u8, note: u8) -> Result<Self, TriggerError> {
        Self::new(TriggerKind::NoteOn, channel, note)
    }

    /// Control Change trigger
    pub fn control_change(channel: u8, cc: u8) -> Result<Self, TriggerError> {
        Self::new(TriggerKind::ControlChange, channel, cc)
    }

    /// Program Change trigger
    pub fn program_change(channel: u8, program: u8) -> Result<Self, TriggerError> {
        Self::new(TriggerKind::ProgramChange, channel, program)
    }

    /// Pitch wheel trigger
    pub fn pitch_wheel(channel: u8) -> Result<Self, TriggerError> {
        Self::new(TriggerKind::PitchWheel, channel, 0)
    }

    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn number(&self) -> u8 {
        self.number
    }
}

/// Formats the persisted string form, e.g. `note_on_ch0_note37` or `cc_ch1_cc7`
impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TriggerKind::NoteOn => write!(f, "note_on_ch{}_note{}", self.channel, self.number),
            TriggerKind::ControlChange => write!(f, "cc_ch{}_cc{}", self.channel, self.number),
            TriggerKind::ProgramChange => write!(f, "pc_ch{}_prog{}", self.channel, self.number),
            TriggerKind::PitchWheel => write!(f, "pitchwheel_ch{}", self.channel),
        }
    }
}

impl FromStr for TriggerKey {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unrecognized = || TriggerError::Unrecognized(s.to_string());
        let s_trim = s.trim();

        if let Some(rest) = s_trim.strip_prefix("pitchwheel_ch") {
            let channel = parse_u8(rest).ok_or_else(unrecognized)?;
            return Self::pitch_wheel(channel);
        }

        let (kind, rest, separator) = if let Some(rest) = s_trim.strip_prefix("note_on_ch") {
            (TriggerKind::NoteOn, rest, "_note")
        } else if let Some(rest) = s_trim.strip_prefix("cc_ch") {
            (TriggerKind::ControlChange, rest, "_cc")
        } else if let Some(rest) = s_trim.strip_prefix("pc_ch") {
            (TriggerKind::ProgramChange, rest, "_prog")
        } else {
            return Err(unrecognized());
        };

        let (channel, number) = rest.split_once(separator).ok_or_else(unrecognized)?;
        let channel = parse_u8(channel).ok_or_else(unrecognized)?;
        let number = parse_u8(number).ok_or_else(unrecognized)?;
        Self::new(kind, channel, number)
    }
}

/// Parse a decimal u8, rejecting signs and empty strings
fn parse_u8(s: &str) -> Option<u8> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// One of the two visual decks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeckId::A => "A",
            DeckId::B => "B",
        }
    }

    /// Parse "A"/"B", also accepting the "deckA"/"deck_b" spellings used by older profiles
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let bare = lower
            .strip_prefix("deck_")
            .or_else(|| lower.strip_prefix("deck"))
            .unwrap_or(&lower)
            .trim();
        match bare {
            "a" => Some(DeckId::A),
            "b" => Some(DeckId::B),
            _ => None,
        }
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deck addressing for parameter actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeckScope {
    A,
    B,
    Both,
}

impl DeckScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeckScope::A => "A",
            DeckScope::B => "B",
            DeckScope::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        if lower == "both" || lower == "both decks" {
            return Some(DeckScope::Both);
        }
        DeckId::parse(s).map(DeckScope::from)
    }
}

impl From<DeckId> for DeckScope {
    fn from(deck: DeckId) -> Self {
        match deck {
            DeckId::A => DeckScope::A,
            DeckId::B => DeckScope::B,
        }
    }
}

/// Convert a MIDI note number to a display name (60 -> "C4")
pub fn note_name(note: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", NAMES[(note % 12) as usize], octave)
}

//! Decoded MIDI input events
//!
//! Raw bytes from the transport callback are parsed with midly's live-event
//! parser into [`MidiInputEvent`]. System realtime / common messages (clock,
//! start, stop, song position) are logged and dropped here; they never reach
//! the binding engine.

use crate::types::{TriggerKey, TriggerKind};
use midly::live::{LiveEvent, SystemCommon, SystemRealtime};
use midly::MidiMessage as RawMessage;

/// Decoded MIDI channel event (before any binding lookup)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiInputEvent {
    /// Note On message (velocity 0 is kept as-is; it is a note-off alias)
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note Off message
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Control Change message
    ControlChange { channel: u8, cc: u8, value: u8 },
    /// Program Change message
    ProgramChange { channel: u8, program: u8 },
    /// Pitch wheel, raw 14-bit value (8192 = centre)
    PitchWheel { channel: u8, value: u16 },
}

impl MidiInputEvent {
    /// Parse raw MIDI bytes into an event
    ///
    /// Returns `None` for malformed input and for message types the engine
    /// does not bind (aftertouch, system messages).
    pub fn parse(data: &[u8]) -> Option<Self> {
        let event = match LiveEvent::parse(data) {
            Ok(event) => event,
            Err(e) => {
                log::trace!("MIDI: Ignoring unparseable message {:02X?}: {}", data, e);
                return None;
            }
        };

        let LiveEvent::Midi { channel, message } = event else {
            trace_system(&event);
            return None;
        };
        let channel = channel.as_int();

        match message {
            RawMessage::NoteOn { key, vel } => Some(Self::NoteOn {
                channel,
                note: key.as_int(),
                velocity: vel.as_int(),
            }),
            RawMessage::NoteOff { key, vel } => Some(Self::NoteOff {
                channel,
                note: key.as_int(),
                velocity: vel.as_int(),
            }),
            RawMessage::Controller { controller, value } => Some(Self::ControlChange {
                channel,
                cc: controller.as_int(),
                value: value.as_int(),
            }),
            RawMessage::ProgramChange { program } => Some(Self::ProgramChange {
                channel,
                program: program.as_int(),
            }),
            RawMessage::PitchBend { bend } => Some(Self::PitchWheel {
                channel,
                value: bend.0.as_int(),
            }),
            RawMessage::Aftertouch { .. } | RawMessage::ChannelAftertouch { .. } => None,
        }
    }

    /// Get the MIDI channel
    pub fn channel(&self) -> u8 {
        match self {
            Self::NoteOn { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::ProgramChange { channel, .. }
            | Self::PitchWheel { channel, .. } => *channel,
        }
    }

    /// Check if this is a "press" (Note On with velocity > 0)
    pub fn is_press(&self) -> bool {
        matches!(self, Self::NoteOn { velocity, .. } if *velocity > 0)
    }

    /// Get the data value (velocity, CC value, program number, or pitch MSB)
    pub fn value(&self) -> u8 {
        match self {
            Self::NoteOn { velocity, .. } | Self::NoteOff { velocity, .. } => *velocity,
            Self::ControlChange { value, .. } => *value,
            Self::ProgramChange { program, .. } => *program,
            Self::PitchWheel { value, .. } => (*value >> 7) as u8,
        }
    }

    /// Compute the trigger key for this event
    ///
    /// Note Off (and Note On velocity 0) have no trigger key; releases are
    /// never bindable.
    pub fn trigger_key(&self) -> Option<TriggerKey> {
        let (kind, number) = match *self {
            Self::NoteOn { note, velocity, .. } if velocity > 0 => (TriggerKind::NoteOn, note),
            Self::NoteOn { .. } | Self::NoteOff { .. } => return None,
            Self::ControlChange { cc, .. } => (TriggerKind::ControlChange, cc),
            Self::ProgramChange { program, .. } => (TriggerKind::ProgramChange, program),
            Self::PitchWheel { .. } => (TriggerKind::PitchWheel, 0),
        };
        TriggerKey::new(kind, self.channel(), number).ok()
    }

    /// Whether this event may resolve to a bound action
    ///
    /// Presses, control changes and program changes dispatch; pitch wheel
    /// ticks and note releases do not.
    pub fn is_dispatchable(&self) -> bool {
        match self {
            Self::NoteOn { .. } => self.is_press(),
            Self::ControlChange { .. } | Self::ProgramChange { .. } => true,
            Self::NoteOff { .. } | Self::PitchWheel { .. } => false,
        }
    }

    /// Whether a learn session may capture this event
    pub fn is_learnable(&self) -> bool {
        self.is_press() || matches!(self, Self::ControlChange { .. })
    }
}

/// Clock and transport messages are not bindable; they are only logged
fn trace_system(event: &LiveEvent) {
    match event {
        LiveEvent::Realtime(SystemRealtime::TimingClock) => log::trace!("MIDI: Clock tick"),
        LiveEvent::Realtime(
            msg @ (SystemRealtime::Start | SystemRealtime::Stop | SystemRealtime::Continue),
        ) => log::debug!("MIDI: Transport {:?}", msg),
        LiveEvent::Common(SystemCommon::SongPosition(pos)) => {
            log::debug!("MIDI: Song position {}", pos.as_int())
        }
        other => log::trace!("MIDI: Ignoring system message {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_on() {
        let data = [0x90, 0x3C, 0x7F]; // Note On, channel 0, note 60, velocity 127
        let event = MidiInputEvent::parse(&data).unwrap();
        assert_eq!(
            event,
            MidiInputEvent::NoteOn {
                channel: 0,
                note: 60,
                velocity: 127
            }
        );
        assert!(event.is_press());
        assert_eq!(event.trigger_key(), Some(TriggerKey::note_on(0, 60).unwrap()));
    }

    #[test]
    fn test_parse_note_on_zero_velocity() {
        // Note On with velocity 0 is a release alias
        let event = MidiInputEvent::parse(&[0x91, 0x3C, 0x00]).unwrap();
        assert!(!event.is_press());
        assert!(!event.is_dispatchable());
        assert!(!event.is_learnable());
        assert_eq!(event.trigger_key(), None);
    }

    #[test]
    fn test_parse_note_off() {
        let event = MidiInputEvent::parse(&[0x80, 0x3C, 0x40]).unwrap();
        assert_eq!(
            event,
            MidiInputEvent::NoteOff {
                channel: 0,
                note: 60,
                velocity: 64
            }
        );
        assert_eq!(event.trigger_key(), None);
    }

    #[test]
    fn test_parse_cc() {
        let event = MidiInputEvent::parse(&[0xB2, 0x07, 0x64]).unwrap();
        assert_eq!(
            event,
            MidiInputEvent::ControlChange {
                channel: 2,
                cc: 7,
                value: 100
            }
        );
        assert!(event.is_dispatchable());
        assert!(event.is_learnable());
        assert_eq!(event.trigger_key().unwrap().to_string(), "cc_ch2_cc7");
    }

    #[test]
    fn test_parse_program_change() {
        let event = MidiInputEvent::parse(&[0xC5, 0x11]).unwrap();
        assert_eq!(
            event,
            MidiInputEvent::ProgramChange {
                channel: 5,
                program: 17
            }
        );
        assert!(event.is_dispatchable());
        assert!(!event.is_learnable());
    }

    #[test]
    fn test_parse_pitch_wheel() {
        // Centre position: LSB 0x00, MSB 0x40
        let event = MidiInputEvent::parse(&[0xE3, 0x00, 0x40]).unwrap();
        assert_eq!(
            event,
            MidiInputEvent::PitchWheel {
                channel: 3,
                value: 8192
            }
        );
        assert!(!event.is_dispatchable());
        assert!(!event.is_learnable());
        assert_eq!(event.trigger_key().unwrap().to_string(), "pitchwheel_ch3");
    }

    #[test]
    fn test_parse_ignores_system_and_garbage() {
        assert_eq!(MidiInputEvent::parse(&[0xF8]), None); // clock
        assert_eq!(MidiInputEvent::parse(&[0xFA]), None); // start
        assert_eq!(MidiInputEvent::parse(&[]), None);
        assert_eq!(MidiInputEvent::parse(&[0x90, 0x3C]), None);
        assert_eq!(MidiInputEvent::parse(&[0xA0, 0x3C, 0x10]), None); // aftertouch
    }

    #[test]
    fn test_parse_drops_transport_messages() {
        assert_eq!(MidiInputEvent::parse(&[0xFB]), None); // continue
        assert_eq!(MidiInputEvent::parse(&[0xFC]), None); // stop
        assert_eq!(MidiInputEvent::parse(&[0xF2, 0x10, 0x02]), None); // song position
        assert_eq!(MidiInputEvent::parse(&[0xFE]), None); // active sensing
    }
}

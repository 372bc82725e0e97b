//! Trigger dispatch
//!
//! Converts decoded MIDI events to bound actions. The dispatcher is pure:
//! it never calls the action sink or mutates anything on a lookup, so the
//! caller decides what to do with the resolved action.

use crate::binding::{Action, Binding, BindingTable};
use crate::input::MidiInputEvent;
use crate::types::TriggerKey;

/// Owns the live binding table and resolves events against it
#[derive(Debug, Default)]
pub struct Dispatcher {
    table: BindingTable,
}

impl Dispatcher {
    pub fn new(table: BindingTable) -> Self {
        Self { table }
    }

    /// Live table (read-only)
    pub fn table(&self) -> &BindingTable {
        &self.table
    }

    /// Live table for owner-side mutation (learn commits, add/remove)
    pub(crate) fn table_mut(&mut self) -> &mut BindingTable {
        &mut self.table
    }

    /// Find the bound binding for a trigger
    pub fn lookup(&self, trigger: &TriggerKey) -> Option<&Binding> {
        self.table.lookup(trigger)
    }

    /// Resolve an event to its bound action
    ///
    /// Returns `None` for non-dispatchable events (releases, pitch wheel)
    /// and for unmapped controls.
    pub fn dispatch(&self, event: &MidiInputEvent) -> Option<Action> {
        self.dispatch_binding(event)
            .map(|(binding, _)| binding.action.clone())
    }

    /// Resolve an event to its binding and the event's data value
    pub fn dispatch_binding(&self, event: &MidiInputEvent) -> Option<(&Binding, u8)> {
        if !event.is_dispatchable() {
            return None;
        }
        let trigger = event.trigger_key()?;
        match self.table.lookup(&trigger) {
            Some(binding) => {
                log::trace!("MIDI: {} -> {}", trigger, binding.id);
                Some((binding, event.value()))
            }
            None => {
                log::trace!("MIDI: {} -> (no mapping)", trigger);
                None
            }
        }
    }

    /// Resolve a trigger as if its control had been pressed
    ///
    /// Used to test a mapping without a device attached.
    pub fn resolve_trigger(&self, trigger: &TriggerKey) -> Option<Action> {
        self.table.lookup(trigger).map(|b| b.action.clone())
    }

    /// Immutable copy of the live table
    pub fn snapshot(&self) -> BindingTable {
        self.table.clone()
    }

    /// Swap in a new table, returning the old one
    pub fn replace(&mut self, table: BindingTable) -> BindingTable {
        std::mem::replace(&mut self.table, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{CrossfadeDirection, ParamValue};
    use crate::types::{DeckId, DeckScope};

    fn scenario_dispatcher() -> Dispatcher {
        let mut table = BindingTable::new();
        table
            .insert(
                Binding::new("deck_a_preset_1", Action::load_preset(DeckId::A, "Wire Terrain"))
                    .with_trigger(TriggerKey::note_on(0, 37).unwrap()),
            )
            .unwrap();
        table
            .insert(
                Binding::new(
                    "mix_a_to_b",
                    Action::crossfade(CrossfadeDirection::AtoB, 2000).unwrap(),
                )
                .with_trigger(TriggerKey::control_change(0, 1).unwrap()),
            )
            .unwrap();
        table
            .insert(
                Binding::new(
                    "speed",
                    Action::control_parameter(DeckScope::Both, "speed", ParamValue::Number(1.0)),
                )
                .with_trigger(TriggerKey::program_change(2, 4).unwrap()),
            )
            .unwrap();
        Dispatcher::new(table)
    }

    #[test]
    fn test_dispatch_concrete_scenario() {
        let dispatcher = scenario_dispatcher();

        let hit = dispatcher.dispatch(&MidiInputEvent::NoteOn {
            channel: 0,
            note: 37,
            velocity: 100,
        });
        assert_eq!(hit, Some(Action::load_preset(DeckId::A, "Wire Terrain")));

        let miss = dispatcher.dispatch(&MidiInputEvent::NoteOn {
            channel: 0,
            note: 60,
            velocity: 100,
        });
        assert_eq!(miss, None);
    }

    #[test]
    fn test_dispatch_ignores_dynamics_and_releases() {
        let dispatcher = scenario_dispatcher();

        for velocity in [1, 64, 127] {
            assert!(dispatcher
                .dispatch(&MidiInputEvent::NoteOn {
                    channel: 0,
                    note: 37,
                    velocity
                })
                .is_some());
        }

        // Note-on velocity 0 and note-off never dispatch
        assert_eq!(
            dispatcher.dispatch(&MidiInputEvent::NoteOn {
                channel: 0,
                note: 37,
                velocity: 0
            }),
            None
        );
        assert_eq!(
            dispatcher.dispatch(&MidiInputEvent::NoteOff {
                channel: 0,
                note: 37,
                velocity: 0
            }),
            None
        );

        // Same note on another channel is a different trigger
        assert_eq!(
            dispatcher.dispatch(&MidiInputEvent::NoteOn {
                channel: 1,
                note: 37,
                velocity: 100
            }),
            None
        );
    }

    #[test]
    fn test_dispatch_cc_and_program_change() {
        let dispatcher = scenario_dispatcher();

        let (binding, value) = dispatcher
            .dispatch_binding(&MidiInputEvent::ControlChange {
                channel: 0,
                cc: 1,
                value: 0,
            })
            .unwrap();
        assert_eq!(binding.id, "mix_a_to_b");
        assert_eq!(value, 0);

        let action = dispatcher.dispatch(&MidiInputEvent::ProgramChange {
            channel: 2,
            program: 4,
        });
        assert!(matches!(action, Some(Action::ControlParameter { .. })));
    }

    #[test]
    fn test_dispatch_is_deterministic_and_side_effect_free() {
        let dispatcher = scenario_dispatcher();
        let before = dispatcher.snapshot();
        let event = MidiInputEvent::NoteOn {
            channel: 0,
            note: 37,
            velocity: 90,
        };

        let first = dispatcher.dispatch(&event);
        for _ in 0..10 {
            assert_eq!(dispatcher.dispatch(&event), first);
        }
        let unmapped = MidiInputEvent::ControlChange {
            channel: 9,
            cc: 9,
            value: 9,
        };
        assert_eq!(dispatcher.dispatch(&unmapped), None);
        assert_eq!(dispatcher.snapshot(), before);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut dispatcher = scenario_dispatcher();
        let mut snapshot = dispatcher.snapshot();
        snapshot.clear();
        assert_eq!(dispatcher.table().len(), 3);

        let old = dispatcher.replace(snapshot);
        assert_eq!(old.len(), 3);
        assert!(dispatcher.table().is_empty());
        assert_eq!(
            dispatcher.resolve_trigger(&TriggerKey::note_on(0, 37).unwrap()),
            None
        );
    }
}

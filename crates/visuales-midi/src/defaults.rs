//! Generated preset bindings
//!
//! One note per preset on each deck's channel, starting at `start_note`,
//! plus a clear-deck binding on the note after the last preset:
//!
//! ```text
//! deck_a_preset_0  note_on_ch12_note56  -> load first preset on A
//! deck_a_preset_1  note_on_ch12_note57  -> load second preset on A
//! deck_a_clear     note_on_ch12_note58  -> clear A
//! ```

use crate::binding::{Action, Binding, BindingTable};
use crate::config::DeckChannels;
use crate::types::{note_name, DeckId, TriggerKey};

/// Binding id of the preset at `index` on `deck`
pub fn preset_binding_id(deck: DeckId, index: usize) -> String {
    format!("deck_{}_preset_{}", deck.as_str().to_ascii_lowercase(), index)
}

/// Binding id of the clear action on `deck`
pub fn clear_binding_id(deck: DeckId) -> String {
    format!("deck_{}_clear", deck.as_str().to_ascii_lowercase())
}

/// Build the default table for a list of preset names
///
/// Notes past 127 have no trigger; those bindings are created unbound.
pub fn generate_default_bindings(
    preset_names: &[String],
    deck_channels: DeckChannels,
    start_note: u8,
) -> BindingTable {
    let mut bindings = Vec::with_capacity((preset_names.len() + 1) * 2);

    for deck in [DeckId::A, DeckId::B] {
        let channel = deck_channels.get(deck);

        for (index, preset) in preset_names.iter().enumerate() {
            let binding = Binding::new(
                preset_binding_id(deck, index),
                Action::load_preset(deck, preset.clone()),
            )
            .with_deck_scope(deck);
            bindings.push(with_note(binding, channel, start_note as usize + index));
        }

        let clear =
            Binding::new(clear_binding_id(deck), Action::clear_deck(deck)).with_deck_scope(deck);
        bindings.push(with_note(
            clear,
            channel,
            start_note as usize + preset_names.len(),
        ));
    }

    let (table, displaced) = BindingTable::from_bindings(bindings);
    for d in &displaced {
        log::warn!(
            "MIDI: Default binding '{}' shares {} with '{}', left unassigned",
            d.binding_id,
            d.trigger,
            d.kept_by
        );
    }

    log::info!(
        "MIDI: Generated {} default bindings for {} preset(s) (A on ch{}, B on ch{}, from {})",
        table.len(),
        preset_names.len(),
        deck_channels.a,
        deck_channels.b,
        note_name(start_note)
    );
    table
}

fn with_note(binding: Binding, channel: u8, note: usize) -> Binding {
    let key = u8::try_from(note)
        .ok()
        .and_then(|note| TriggerKey::note_on(channel, note).ok());
    match key {
        Some(key) => binding.with_trigger(key),
        None => {
            log::warn!(
                "MIDI: No note left for '{}' (note {} on ch{}), left unassigned",
                binding.id,
                note,
                channel
            );
            binding
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_generate_default_bindings() {
        let table = generate_default_bindings(
            &presets(&["Wire Terrain", "Plasma Clouds"]),
            DeckChannels::default(),
            56,
        );
        assert_eq!(table.len(), 6);
        assert_eq!(table.bound_count(), 6);

        let a0 = table.get("deck_a_preset_0").unwrap();
        assert_eq!(a0.trigger.unwrap().to_string(), "note_on_ch12_note56");
        assert_eq!(a0.action, Action::load_preset(DeckId::A, "Wire Terrain"));
        assert_eq!(a0.deck_scope, Some(DeckId::A));

        let b1 = table.get("deck_b_preset_1").unwrap();
        assert_eq!(b1.trigger.unwrap().to_string(), "note_on_ch13_note57");

        let clear_b = table.get("deck_b_clear").unwrap();
        assert_eq!(clear_b.action, Action::clear_deck(DeckId::B));
        assert_eq!(clear_b.trigger.unwrap().to_string(), "note_on_ch13_note58");
    }

    #[test]
    fn test_generate_no_presets() {
        let table = generate_default_bindings(&[], DeckChannels::default(), 56);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get("deck_a_clear").unwrap().trigger.unwrap().to_string(),
            "note_on_ch12_note56"
        );
    }

    #[test]
    fn test_generate_runs_out_of_notes() {
        let table = generate_default_bindings(
            &presets(&["Gradient", "Fluid Particles"]),
            DeckChannels::default(),
            127,
        );
        assert!(table.get("deck_a_preset_0").unwrap().is_bound());
        assert!(!table.get("deck_a_preset_1").unwrap().is_bound());
        assert!(!table.get("deck_a_clear").unwrap().is_bound());
    }

    #[test]
    fn test_generate_shared_channel_settles() {
        let table = generate_default_bindings(
            &presets(&["Gradient"]),
            DeckChannels { a: 0, b: 0 },
            60,
        );
        // Deck A presets rank above deck B presets and keep the notes
        let key = TriggerKey::note_on(0, 60).unwrap();
        assert_eq!(table.owner_of(&key), Some("deck_a_preset_0"));
        assert!(!table.get("deck_b_preset_0").unwrap().is_bound());
    }
}

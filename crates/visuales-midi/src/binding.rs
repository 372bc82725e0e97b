//! Actions, bindings and the binding table
//!
//! The table owns every binding by id and keeps a reverse index from
//! [`TriggerKey`] to binding id. Every mutating method keeps the settled
//! invariant: at most one bound binding owns a given trigger.

use crate::types::{DeckId, DeckScope, TriggerKey};
use crate::MidiError;
use std::collections::HashMap;

/// Id patterns that win a shared trigger, strongest first
///
/// Ids matching none of them (custom bindings) rank below generated `note_` ids.
const SETTLE_PRIORITY: [&str; 6] = [
    "mix_action_",
    "deck_a_preset_",
    "deck_b_preset_",
    "deck_a_clear",
    "deck_b_clear",
    "note_",
];

/// Crossfade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrossfadeDirection {
    AtoB,
    BtoA,
}

impl CrossfadeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AtoB => "a_to_b",
            Self::BtoA => "b_to_a",
        }
    }

    /// Parse "a_to_b" / "b_to_a", also the "A to B" labels older profiles stored
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "atob" => Some(Self::AtoB),
            "btoa" => Some(Self::BtoA),
            _ => None,
        }
    }
}

/// Value carried by a parameter action
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    /// Continuous value
    Number(f64),
    /// Index into an enumerated parameter
    Index(u32),
}

/// Semantic operation a trigger resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Load a preset on a deck; `None` clears the deck
    LoadPreset {
        deck: DeckId,
        preset_name: Option<String>,
        /// `name:value;name:value` overrides applied after loading (may be empty)
        custom_values: String,
    },
    /// Animated crossfade towards one side of the mixer
    Crossfade {
        direction: CrossfadeDirection,
        /// Always > 0
        duration_ms: u32,
    },
    /// Set a named visual parameter on one or both decks
    ControlParameter {
        scope: DeckScope,
        parameter_name: String,
        value: ParamValue,
    },
}

impl Action {
    /// Load `preset_name` on `deck`
    pub fn load_preset(deck: DeckId, preset_name: impl Into<String>) -> Self {
        Self::LoadPreset {
            deck,
            preset_name: Some(preset_name.into()),
            custom_values: String::new(),
        }
    }

    /// Clear whatever `deck` is showing
    pub fn clear_deck(deck: DeckId) -> Self {
        Self::LoadPreset {
            deck,
            preset_name: None,
            custom_values: String::new(),
        }
    }

    /// Crossfade action; rejects a zero duration
    pub fn crossfade(direction: CrossfadeDirection, duration_ms: u32) -> Result<Self, MidiError> {
        let action = Self::Crossfade {
            direction,
            duration_ms,
        };
        action.validate()?;
        Ok(action)
    }

    pub fn control_parameter(
        scope: DeckScope,
        parameter_name: impl Into<String>,
        value: ParamValue,
    ) -> Self {
        Self::ControlParameter {
            scope,
            parameter_name: parameter_name.into(),
            value,
        }
    }

    /// Persisted type tag
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::LoadPreset { .. } => "load_preset",
            Self::Crossfade { .. } => "crossfade_action",
            Self::ControlParameter { .. } => "control_parameter",
        }
    }

    /// Check the variant's value constraints
    pub fn validate(&self) -> Result<(), MidiError> {
        match self {
            Self::Crossfade { duration_ms: 0, .. } => Err(MidiError::InvalidAction(
                "crossfade duration must be greater than zero".to_string(),
            )),
            Self::ControlParameter { parameter_name, .. } if parameter_name.trim().is_empty() => {
                Err(MidiError::InvalidAction(
                    "parameter name must not be empty".to_string(),
                ))
            }
            Self::ControlParameter {
                value: ParamValue::Number(v),
                ..
            } if !v.is_finite() => Err(MidiError::InvalidAction(format!(
                "parameter value {} is not finite",
                v
            ))),
            _ => Ok(()),
        }
    }

    /// Whether this action addresses exactly `deck`
    ///
    /// Crossfades and `Both`-scoped parameters belong to the mixer, not a deck.
    pub fn targets_deck(&self, deck: DeckId) -> bool {
        match self {
            Self::LoadPreset { deck: d, .. } => *d == deck,
            Self::ControlParameter { scope, .. } => *scope == DeckScope::from(deck),
            Self::Crossfade { .. } => false,
        }
    }
}

/// One entry of a `custom_values` override list
#[derive(Debug, Clone, PartialEq)]
pub enum CustomValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Parse a `name:value;name:value` override list
///
/// Pairs without a colon are skipped. Values are typed as integer, then
/// float, then left as text.
pub fn parse_custom_values(raw: &str) -> Vec<(String, CustomValue)> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim();
            let typed = if let Ok(i) = value.parse::<i64>() {
                CustomValue::Int(i)
            } else if let Ok(f) = value.parse::<f64>() {
                CustomValue::Float(f)
            } else {
                CustomValue::Text(value.to_string())
            };
            Some((name.to_string(), typed))
        })
        .collect()
}

/// A named (trigger, action) pair
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Unique, stable identifier
    pub id: String,
    /// What the trigger does
    pub action: Action,
    /// Physical control; `None` = unbound
    pub trigger: Option<TriggerKey>,
    /// Deck editing context this binding belongs to (display filter only)
    pub deck_scope: Option<DeckId>,
}

impl Binding {
    /// Create an unbound binding
    pub fn new(id: impl Into<String>, action: Action) -> Self {
        Self {
            id: id.into(),
            action,
            trigger: None,
            deck_scope: None,
        }
    }

    pub fn with_trigger(mut self, trigger: TriggerKey) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_deck_scope(mut self, deck: DeckId) -> Self {
        self.deck_scope = Some(deck);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.trigger.is_some()
    }

    /// Whether a deck-scoped editor for `deck` owns this binding
    pub fn belongs_to_deck(&self, deck: DeckId) -> bool {
        self.deck_scope == Some(deck) || self.action.targets_deck(deck)
    }

    /// Rank among bindings claiming the same trigger (higher keeps it)
    ///
    /// Id pattern first, then how complete the action is.
    fn settle_score(&self) -> u32 {
        let priority = SETTLE_PRIORITY
            .iter()
            .position(|pattern| self.id.contains(pattern))
            .map_or(0, |i| (SETTLE_PRIORITY.len() - i) as u32);
        let completeness = match &self.action {
            Action::LoadPreset {
                preset_name: Some(_),
                ..
            } => 15,
            Action::LoadPreset { .. } => 5,
            Action::Crossfade { .. } | Action::ControlParameter { .. } => 0,
        };
        priority * 100 + completeness
    }
}

/// A trigger removed from a binding while settling duplicates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Displaced {
    /// Binding left unbound
    pub binding_id: String,
    /// Trigger it had claimed
    pub trigger: TriggerKey,
    /// Binding that kept the trigger
    pub kept_by: String,
}

/// Binding id → binding, with a trigger reverse index
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    bindings: HashMap<String, Binding>,
    by_trigger: HashMap<TriggerKey, String>,
}

impl PartialEq for BindingTable {
    fn eq(&self, other: &Self) -> bool {
        // The index is derived from `bindings`
        self.bindings == other.bindings
    }
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a settled table from arbitrary bindings
    ///
    /// Later duplicates of an id replace earlier ones. When several bindings
    /// claim the same trigger, the strongest id pattern keeps it (`mix_action_`,
    /// then deck presets, deck clears and generated `note_` ids), then the
    /// most complete action, then the lowest id. The rest become unbound and
    /// are reported as [`Displaced`].
    pub fn from_bindings(bindings: impl IntoIterator<Item = Binding>) -> (Self, Vec<Displaced>) {
        let mut by_id: HashMap<String, Binding> = HashMap::new();
        for binding in bindings {
            by_id.insert(binding.id.clone(), binding);
        }

        let mut ordered: Vec<Binding> = by_id.into_values().collect();
        ordered.sort_by(|a, b| {
            b.settle_score()
                .cmp(&a.settle_score())
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut table = Self::new();
        let mut displaced = Vec::new();
        for mut binding in ordered {
            if let Some(trigger) = binding.trigger {
                if let Some(owner) = table.by_trigger.get(&trigger) {
                    displaced.push(Displaced {
                        binding_id: binding.id.clone(),
                        trigger,
                        kept_by: owner.clone(),
                    });
                    binding.trigger = None;
                }
            }
            table.put(binding);
        }
        (table, displaced)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Binding> {
        self.bindings.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bindings.contains_key(id)
    }

    /// Iterate bindings in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    /// Bindings ordered by id (for display and stable output)
    pub fn sorted(&self) -> Vec<&Binding> {
        let mut out: Vec<&Binding> = self.bindings.values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Number of bindings with a trigger
    pub fn bound_count(&self) -> usize {
        self.by_trigger.len()
    }

    /// Find the binding that owns a trigger
    pub fn lookup(&self, trigger: &TriggerKey) -> Option<&Binding> {
        self.by_trigger
            .get(trigger)
            .and_then(|id| self.bindings.get(id))
    }

    /// Id of the binding that owns a trigger
    pub fn owner_of(&self, trigger: &TriggerKey) -> Option<&str> {
        self.by_trigger.get(trigger).map(String::as_str)
    }

    /// Add a new binding
    pub fn insert(&mut self, binding: Binding) -> Result<(), MidiError> {
        if self.bindings.contains_key(&binding.id) {
            return Err(MidiError::DuplicateBinding(binding.id));
        }
        self.check_trigger_free(&binding.id, binding.trigger)?;
        binding.action.validate()?;
        self.put(binding);
        Ok(())
    }

    /// Insert or replace a binding by id, returning the previous value
    pub fn upsert(&mut self, binding: Binding) -> Result<Option<Binding>, MidiError> {
        self.check_trigger_free(&binding.id, binding.trigger)?;
        binding.action.validate()?;
        let previous = self.remove(&binding.id);
        self.put(binding);
        Ok(previous)
    }

    /// Remove a binding, returning it
    pub fn remove(&mut self, id: &str) -> Option<Binding> {
        let binding = self.bindings.remove(id)?;
        if let Some(trigger) = binding.trigger {
            self.by_trigger.remove(&trigger);
        }
        Some(binding)
    }

    /// Bind `trigger` to binding `id`, returning the trigger it had before
    ///
    /// Fails if another binding owns `trigger`.
    pub fn assign_trigger(
        &mut self,
        id: &str,
        trigger: TriggerKey,
    ) -> Result<Option<TriggerKey>, MidiError> {
        if !self.bindings.contains_key(id) {
            return Err(MidiError::UnknownBinding(id.to_string()));
        }
        self.check_trigger_free(id, Some(trigger))?;

        let previous = self.clear_trigger(id)?;
        if let Some(binding) = self.bindings.get_mut(id) {
            binding.trigger = Some(trigger);
            self.by_trigger.insert(trigger, id.to_string());
        }
        Ok(previous)
    }

    /// Leave binding `id` unbound, returning the trigger it had
    pub fn clear_trigger(&mut self, id: &str) -> Result<Option<TriggerKey>, MidiError> {
        let binding = self
            .bindings
            .get_mut(id)
            .ok_or_else(|| MidiError::UnknownBinding(id.to_string()))?;
        let previous = binding.trigger.take();
        if let Some(trigger) = previous {
            self.by_trigger.remove(&trigger);
        }
        Ok(previous)
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
        self.by_trigger.clear();
    }

    /// Bound bindings listening on a MIDI channel
    pub fn bindings_for_channel(&self, channel: u8) -> Vec<&Binding> {
        let mut out: Vec<&Binding> = self
            .bindings
            .values()
            .filter(|b| b.trigger.is_some_and(|t| t.channel() == channel))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Copy of the bindings a deck-scoped editor for `deck` works on
    pub fn scoped_view(&self, deck: DeckId) -> BindingTable {
        let mut view = BindingTable::new();
        for binding in self.bindings.values().filter(|b| b.belongs_to_deck(deck)) {
            view.put(binding.clone());
        }
        view
    }

    pub fn into_bindings(self) -> impl Iterator<Item = Binding> {
        self.bindings.into_values()
    }

    fn check_trigger_free(&self, id: &str, trigger: Option<TriggerKey>) -> Result<(), MidiError> {
        let Some(trigger) = trigger else {
            return Ok(());
        };
        match self.by_trigger.get(&trigger) {
            Some(owner) if owner != id => Err(MidiError::TriggerInUse {
                trigger,
                owner: owner.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Store a binding whose id and trigger are known to be free
    fn put(&mut self, binding: Binding) {
        if let Some(trigger) = binding.trigger {
            self.by_trigger.insert(trigger, binding.id.clone());
        }
        self.bindings.insert(binding.id.clone(), binding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(n: u8) -> TriggerKey {
        TriggerKey::note_on(0, n).unwrap()
    }

    #[test]
    fn test_lookup_by_trigger() {
        let mut table = BindingTable::new();
        table
            .insert(
                Binding::new("deck_a_preset_1", Action::load_preset(DeckId::A, "Wire Terrain"))
                    .with_trigger(note(37)),
            )
            .unwrap();

        let found = table.lookup(&note(37)).unwrap();
        assert_eq!(found.id, "deck_a_preset_1");
        assert!(table.lookup(&note(60)).is_none());
        assert_eq!(table.bound_count(), 1);
    }

    #[test]
    fn test_insert_rejects_taken_trigger() {
        let mut table = BindingTable::new();
        table
            .insert(Binding::new("x", Action::clear_deck(DeckId::A)).with_trigger(note(1)))
            .unwrap();

        let err = table
            .insert(Binding::new("y", Action::clear_deck(DeckId::B)).with_trigger(note(1)))
            .unwrap_err();
        assert!(matches!(err, MidiError::TriggerInUse { ref owner, .. } if owner == "x"));
        assert!(!table.contains("y"));

        let err = table
            .insert(Binding::new("x", Action::clear_deck(DeckId::B)))
            .unwrap_err();
        assert!(matches!(err, MidiError::DuplicateBinding(_)));
    }

    #[test]
    fn test_assign_and_clear_trigger() {
        let mut table = BindingTable::new();
        table
            .insert(Binding::new("x", Action::clear_deck(DeckId::A)).with_trigger(note(1)))
            .unwrap();

        let previous = table.assign_trigger("x", note(2)).unwrap();
        assert_eq!(previous, Some(note(1)));
        assert!(table.lookup(&note(1)).is_none());
        assert_eq!(table.owner_of(&note(2)), Some("x"));

        // Re-assigning the same key to its owner is fine
        assert_eq!(table.assign_trigger("x", note(2)).unwrap(), Some(note(2)));

        assert_eq!(table.clear_trigger("x").unwrap(), Some(note(2)));
        assert_eq!(table.bound_count(), 0);
        assert!(matches!(
            table.clear_trigger("missing"),
            Err(MidiError::UnknownBinding(_))
        ));
    }

    #[test]
    fn test_upsert_keeps_index_consistent() {
        let mut table = BindingTable::new();
        table
            .insert(Binding::new("x", Action::clear_deck(DeckId::A)).with_trigger(note(1)))
            .unwrap();

        let previous = table
            .upsert(Binding::new("x", Action::clear_deck(DeckId::B)).with_trigger(note(5)))
            .unwrap();
        assert!(previous.is_some());
        assert!(table.lookup(&note(1)).is_none());
        assert_eq!(table.lookup(&note(5)).unwrap().action, Action::clear_deck(DeckId::B));
    }

    #[test]
    fn test_from_bindings_settles_duplicates() {
        let (table, displaced) = BindingTable::from_bindings(vec![
            Binding::new("b", Action::clear_deck(DeckId::A)).with_trigger(note(9)),
            Binding::new("a", Action::clear_deck(DeckId::B)).with_trigger(note(9)),
            Binding::new("c", Action::clear_deck(DeckId::B)).with_trigger(note(10)),
        ]);

        assert_eq!(table.owner_of(&note(9)), Some("a"));
        assert!(!table.get("b").unwrap().is_bound());
        assert_eq!(
            displaced,
            vec![Displaced {
                binding_id: "b".to_string(),
                trigger: note(9),
                kept_by: "a".to_string(),
            }]
        );
        assert_eq!(table.owner_of(&note(10)), Some("c"));
    }

    #[test]
    fn test_from_bindings_prefers_standard_ids() {
        let (table, displaced) = BindingTable::from_bindings(vec![
            Binding::new("custom_1", Action::load_preset(DeckId::B, "Gradient"))
                .with_trigger(note(56)),
            Binding::new("note_on_ch0_note56", Action::load_preset(DeckId::B, "Gradient"))
                .with_trigger(note(56)),
            Binding::new("deck_b_preset_0", Action::load_preset(DeckId::B, "Gradient"))
                .with_trigger(note(56)),
        ]);
        assert_eq!(table.owner_of(&note(56)), Some("deck_b_preset_0"));
        assert_eq!(displaced.len(), 2);
        assert!(displaced.iter().all(|d| d.kept_by == "deck_b_preset_0"));

        // Mixer actions outrank deck presets; generated ids outrank custom ones
        let (table, _) = BindingTable::from_bindings(vec![
            Binding::new("deck_a_preset_0", Action::load_preset(DeckId::A, "Gradient"))
                .with_trigger(note(1)),
            Binding::new(
                "mix_action_1",
                Action::crossfade(CrossfadeDirection::AtoB, 500).unwrap(),
            )
            .with_trigger(note(1)),
            Binding::new("a_custom", Action::clear_deck(DeckId::A)).with_trigger(note(2)),
            Binding::new("note_2", Action::clear_deck(DeckId::A)).with_trigger(note(2)),
        ]);
        assert_eq!(table.owner_of(&note(1)), Some("mix_action_1"));
        assert_eq!(table.owner_of(&note(2)), Some("note_2"));
    }

    #[test]
    fn test_from_bindings_prefers_complete_action() {
        // Same id rank: a named preset load beats a bare clear
        let (table, _) = BindingTable::from_bindings(vec![
            Binding::new("a_clear", Action::clear_deck(DeckId::A)).with_trigger(note(7)),
            Binding::new("z_load", Action::load_preset(DeckId::A, "Plasma Clouds"))
                .with_trigger(note(7)),
        ]);
        assert_eq!(table.owner_of(&note(7)), Some("z_load"));
        assert!(!table.get("a_clear").unwrap().is_bound());
    }

    #[test]
    fn test_scoped_view_and_channel_filter() {
        let mut table = BindingTable::new();
        table
            .insert(
                Binding::new("a1", Action::load_preset(DeckId::A, "Gradient"))
                    .with_trigger(note(1)),
            )
            .unwrap();
        table
            .insert(
                Binding::new(
                    "b1",
                    Action::control_parameter(DeckScope::B, "speed", ParamValue::Number(0.5)),
                )
                .with_trigger(TriggerKey::control_change(1, 20).unwrap()),
            )
            .unwrap();
        table
            .insert(Binding::new(
                "mix",
                Action::crossfade(CrossfadeDirection::AtoB, 1000).unwrap(),
            ))
            .unwrap();
        table
            .insert(
                Binding::new(
                    "both",
                    Action::control_parameter(DeckScope::Both, "color", ParamValue::Index(2)),
                )
                .with_deck_scope(DeckId::A),
            )
            .unwrap();

        let view_a = table.scoped_view(DeckId::A);
        assert!(view_a.contains("a1"));
        assert!(view_a.contains("both"));
        assert!(!view_a.contains("b1"));
        assert!(!view_a.contains("mix"));

        let ch1: Vec<&str> = table
            .bindings_for_channel(1)
            .into_iter()
            .map(|b| b.id.as_str())
            .collect();
        assert_eq!(ch1, vec!["b1"]);
    }

    #[test]
    fn test_crossfade_rejects_zero_duration() {
        assert!(matches!(
            Action::crossfade(CrossfadeDirection::BtoA, 0),
            Err(MidiError::InvalidAction(_))
        ));
        assert_eq!(CrossfadeDirection::parse("A to B"), Some(CrossfadeDirection::AtoB));
        assert_eq!(CrossfadeDirection::parse("b_to_a"), Some(CrossfadeDirection::BtoA));
        assert_eq!(CrossfadeDirection::parse("Reset Mix"), None);
    }

    #[test]
    fn test_parse_custom_values() {
        let parsed = parse_custom_values("speed: 3; size:1.5;mode:spiral;broken;:x");
        assert_eq!(
            parsed,
            vec![
                ("speed".to_string(), CustomValue::Int(3)),
                ("size".to_string(), CustomValue::Float(1.5)),
                ("mode".to_string(), CustomValue::Text("spiral".to_string())),
            ]
        );
        assert!(parse_custom_values("").is_empty());
    }
}

//! Mapping document codec
//!
//! The persisted form is a JSON object keyed by binding id:
//!
//! ```json
//! {
//!   "deck_a_preset_1": {
//!     "type": "load_preset",
//!     "params": {"deck_id": "A", "preset_name": "Wire Terrain", "custom_values": ""},
//!     "midi": "note_on_ch0_note37"
//!   },
//!   "mix_a_to_b": {
//!     "type": "crossfade_action",
//!     "params": {"direction": "a_to_b", "duration_ms": 2000},
//!     "midi": "Sin asignar"
//!   }
//! }
//! ```
//!
//! Decoding never fails as a whole: bad entries are skipped and reported as
//! [`DecodeWarning`]s. Older profiles stored crossfades as
//! `{"preset": "A to B", "duration": "1.5s"}` and parameters as
//! `{"target": "deckA", "preset": <name>, "values": ..}`; both are accepted.

use crate::binding::{Action, Binding, BindingTable, CrossfadeDirection, Displaced, ParamValue};
use crate::types::{DeckId, DeckScope, TriggerKey};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;

/// Persisted mapping document
pub type Document = serde_json::Map<String, Value>;

/// Trigger string written for unbound bindings
pub const UNASSIGNED: &str = "Sin asignar";

/// Crossfade duration assumed when an older entry has none
const DEFAULT_CROSSFADE_MS: u32 = 1000;

/// Duration older profiles used for the instant mixer jumps
const INSTANT_CROSSFADE_MS: u32 = 50;

/// An entry skipped (or altered) while decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    pub binding_id: String,
    pub reason: String,
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.binding_id, self.reason)
    }
}

impl From<Displaced> for DecodeWarning {
    fn from(d: Displaced) -> Self {
        Self {
            reason: format!("{} already used by '{}', left unassigned", d.trigger, d.kept_by),
            binding_id: d.binding_id,
        }
    }
}

/// Result of decoding a document
#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    pub table: BindingTable,
    pub warnings: Vec<DecodeWarning>,
}

// ============================================================================
// Encode
// ============================================================================

/// Encode a table into a document
pub fn encode(table: &BindingTable) -> Document {
    table
        .sorted()
        .into_iter()
        .map(|binding| (binding.id.clone(), encode_binding(binding)))
        .collect()
}

/// Encode one binding entry
pub fn encode_binding(binding: &Binding) -> Value {
    let params = match &binding.action {
        Action::LoadPreset {
            deck,
            preset_name,
            custom_values,
        } => json!({
            "deck_id": deck.as_str(),
            "preset_name": preset_name,
            "custom_values": custom_values,
        }),
        Action::Crossfade {
            direction,
            duration_ms,
        } => json!({
            "direction": direction.as_str(),
            "duration_ms": duration_ms,
        }),
        Action::ControlParameter {
            scope,
            parameter_name,
            value,
        } => {
            let mut params = json!({
                "deck_scope": scope.as_str(),
                "parameter_name": parameter_name,
            });
            match value {
                ParamValue::Number(v) => params["value"] = json!(v),
                ParamValue::Index(i) => params["value_index"] = json!(i),
            }
            params
        }
    };

    let midi = binding
        .trigger
        .map_or_else(|| UNASSIGNED.to_string(), |t| t.to_string());

    let mut entry = json!({
        "type": binding.action.type_name(),
        "params": params,
        "midi": midi,
    });
    if let Some(deck) = binding.deck_scope {
        entry["deck_scope"] = json!(deck.as_str());
    }
    entry
}

// ============================================================================
// Decode
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    midi: Option<String>,
    #[serde(default)]
    deck_scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoadPresetParams {
    deck_id: String,
    #[serde(default)]
    preset_name: Option<String>,
    #[serde(default)]
    custom_values: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CrossfadeParams {
    direction: Option<String>,
    duration_ms: Option<u64>,
    // Older shape
    preset: Option<String>,
    duration: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ControlParams {
    deck_scope: Option<String>,
    parameter_name: Option<String>,
    value: Option<f64>,
    value_index: Option<u32>,
    // Older shapes
    deck_id: Option<String>,
    target: Option<String>,
    preset: Option<String>,
    values: Option<Value>,
}

/// Decode a document into a settled table
///
/// Entries are processed in id order so warnings come out stable.
pub fn decode(document: &Document) -> DecodeReport {
    let mut ids: Vec<&String> = document.keys().collect();
    ids.sort();

    let mut warnings = Vec::new();
    let mut bindings = Vec::with_capacity(ids.len());
    for id in ids {
        match decode_binding(id, &document[id.as_str()]) {
            Ok(binding) => bindings.push(binding),
            Err(reason) => {
                log::warn!("MIDI: Skipping mapping '{}': {}", id, reason);
                warnings.push(DecodeWarning {
                    binding_id: id.clone(),
                    reason,
                });
            }
        }
    }

    let (table, displaced) = BindingTable::from_bindings(bindings);
    for d in displaced {
        log::warn!(
            "MIDI: Duplicate trigger {} on '{}', kept by '{}'",
            d.trigger,
            d.binding_id,
            d.kept_by
        );
        warnings.push(d.into());
    }

    DecodeReport { table, warnings }
}

/// Decode a single entry; the error is a human-readable reason
pub fn decode_binding(id: &str, value: &Value) -> Result<Binding, String> {
    let raw = RawEntry::deserialize(value).map_err(|e| format!("malformed entry: {}", e))?;

    let action = match raw.kind.as_str() {
        "load_preset" => decode_load_preset(&raw.params)?,
        "crossfade_action" => decode_crossfade(&raw.params)?,
        "control_parameter" => decode_control_parameter(&raw.params)?,
        other => return Err(format!("unknown action type '{}'", other)),
    };
    action.validate().map_err(|e| e.to_string())?;

    let mut binding = Binding::new(id, action);
    binding.trigger = decode_trigger(raw.midi.as_deref())?;
    if let Some(scope) = raw.deck_scope.as_deref() {
        let deck = DeckId::parse(scope).ok_or_else(|| format!("invalid deck_scope '{}'", scope))?;
        binding.deck_scope = Some(deck);
    }
    Ok(binding)
}

/// Parse a `midi` field; the unbound sentinels map to `None`
fn decode_trigger(midi: Option<&str>) -> Result<Option<TriggerKey>, String> {
    let Some(s) = midi.map(str::trim) else {
        return Ok(None);
    };
    if s.is_empty() || s == UNASSIGNED || s.eq_ignore_ascii_case("unassigned") {
        return Ok(None);
    }
    s.parse::<TriggerKey>().map(Some).map_err(|e| e.to_string())
}

fn params<T: DeserializeOwned>(value: &Value) -> Result<T, String> {
    let result = if value.is_null() {
        T::deserialize(&Value::Object(Default::default()))
    } else {
        T::deserialize(value)
    };
    result.map_err(|e| format!("invalid params: {}", e))
}

fn decode_load_preset(value: &Value) -> Result<Action, String> {
    let p: LoadPresetParams = params(value)?;
    let deck = DeckId::parse(&p.deck_id).ok_or_else(|| format!("invalid deck_id '{}'", p.deck_id))?;
    Ok(Action::LoadPreset {
        deck,
        preset_name: p.preset_name,
        custom_values: p.custom_values.unwrap_or_default(),
    })
}

fn decode_crossfade(value: &Value) -> Result<Action, String> {
    let p: CrossfadeParams = params(value)?;

    if let Some(direction) = p.direction.as_deref() {
        let direction = CrossfadeDirection::parse(direction)
            .ok_or_else(|| format!("invalid direction '{}'", direction))?;
        let duration_ms = match p.duration_ms {
            Some(ms) => u32::try_from(ms).map_err(|_| format!("duration {} ms too large", ms))?,
            None => DEFAULT_CROSSFADE_MS,
        };
        return Ok(Action::Crossfade {
            direction,
            duration_ms,
        });
    }

    // Older shape: a named preset plus a duration string
    let preset = p.preset.as_deref().unwrap_or("A to B");
    let (direction, duration_ms) = match preset.trim() {
        "Instant A" => (CrossfadeDirection::BtoA, INSTANT_CROSSFADE_MS),
        "Instant B" => (CrossfadeDirection::AtoB, INSTANT_CROSSFADE_MS),
        other => {
            let direction = CrossfadeDirection::parse(other)
                .ok_or_else(|| format!("unsupported crossfade preset '{}'", other))?;
            (direction, parse_duration(p.duration.as_ref())?)
        }
    };
    Ok(Action::Crossfade {
        direction,
        duration_ms,
    })
}

/// Parse "1500ms", "1.5s", a bare number of milliseconds, or nothing
fn parse_duration(value: Option<&Value>) -> Result<u32, String> {
    let invalid = |v: &dyn fmt::Display| format!("invalid duration '{}'", v);
    match value {
        None | Some(Value::Null) => Ok(DEFAULT_CROSSFADE_MS),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|ms| u32::try_from(ms).ok())
            .ok_or_else(|| invalid(n)),
        Some(Value::String(s)) => {
            let s = s.trim().to_ascii_lowercase();
            if s.is_empty() {
                return Ok(DEFAULT_CROSSFADE_MS);
            }
            let ms = if let Some(ms) = s.strip_suffix("ms") {
                ms.trim().parse::<f64>().ok()
            } else if let Some(secs) = s.strip_suffix('s') {
                secs.trim().parse::<f64>().ok().map(|secs| secs * 1000.0)
            } else {
                s.parse::<f64>().ok()
            };
            match ms {
                Some(ms) if ms.is_finite() && ms >= 0.0 && ms <= u32::MAX as f64 => {
                    Ok(ms.round() as u32)
                }
                _ => Err(invalid(&s)),
            }
        }
        Some(other) => Err(invalid(other)),
    }
}

fn decode_control_parameter(value: &Value) -> Result<Action, String> {
    let p: ControlParams = params(value)?;

    let scope_str = p
        .deck_scope
        .as_deref()
        .or(p.deck_id.as_deref())
        .or(p.target.as_deref())
        .ok_or("missing deck_scope")?;
    let scope =
        DeckScope::parse(scope_str).ok_or_else(|| format!("invalid deck_scope '{}'", scope_str))?;

    let parameter_name = p
        .parameter_name
        .or(p.preset)
        .ok_or("missing parameter_name")?;

    let value = if let Some(index) = p.value_index {
        ParamValue::Index(index)
    } else if let Some(v) = p.value {
        ParamValue::Number(v)
    } else {
        legacy_value(p.values.as_ref())?
    };

    Ok(Action::ControlParameter {
        scope,
        parameter_name,
        value,
    })
}

fn legacy_value(values: Option<&Value>) -> Result<ParamValue, String> {
    match values {
        None | Some(Value::Null) => Ok(ParamValue::Number(0.0)),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(ParamValue::Number)
            .ok_or_else(|| format!("invalid value '{}'", n)),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(ParamValue::Number(0.0)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(ParamValue::Number)
            .map_err(|_| format!("invalid value '{}'", s)),
        Some(other) => Err(format!("invalid value '{}'", other)),
    }
}

// ============================================================================
// Deck-scoped merge
// ============================================================================

/// Replace the part of `existing` a deck editor owns with `incoming`
///
/// Bindings scoped to `deck` (or whose action targets it) are dropped from
/// `existing`. Everything else survives unchanged: an incoming entry whose
/// id belongs to a surviving binding is skipped, and one whose trigger a
/// surviving binding owns is added unbound. Both are reported.
pub fn merge_scoped(
    existing: &BindingTable,
    incoming: BindingTable,
    deck: DeckId,
) -> (BindingTable, Vec<DecodeWarning>) {
    let kept = existing
        .iter()
        .filter(|b| !b.belongs_to_deck(deck))
        .cloned();
    // A subset of a settled table never displaces anything
    let (mut merged, _) = BindingTable::from_bindings(kept);

    let mut warnings = Vec::new();
    let mut entries: Vec<Binding> = incoming.into_bindings().collect();
    entries.sort_by(|a, b| a.id.cmp(&b.id));

    for mut binding in entries {
        if merged.contains(&binding.id) {
            log::warn!(
                "MIDI: Deck {} mapping '{}' clashes with an id outside the deck, skipped",
                deck,
                binding.id
            );
            warnings.push(DecodeWarning {
                reason: format!("id already used outside deck {}, entry skipped", deck),
                binding_id: binding.id,
            });
            continue;
        }

        if let Some(trigger) = binding.trigger {
            if let Some(owner) = merged.owner_of(&trigger) {
                let displaced = Displaced {
                    binding_id: binding.id.clone(),
                    trigger,
                    kept_by: owner.to_string(),
                };
                log::warn!(
                    "MIDI: Deck {} mapping '{}' wants {}, kept by '{}'",
                    deck,
                    displaced.binding_id,
                    trigger,
                    displaced.kept_by
                );
                warnings.push(displaced.into());
                binding.trigger = None;
            }
        }

        let id = binding.id.clone();
        if let Err(e) = merged.insert(binding) {
            log::warn!("MIDI: Skipping deck {} mapping '{}': {}", deck, id, e);
            warnings.push(DecodeWarning {
                binding_id: id,
                reason: e.to_string(),
            });
        }
    }

    (merged, warnings)
}

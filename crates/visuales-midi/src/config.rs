//! Engine settings and mapping file I/O
//!
//! Engine settings are stored as YAML, mapping profiles as JSON.
//! Default locations:
//! - ~/.config/visuales/midi.yaml
//! - ~/.config/visuales/midi_mappings.json

use crate::codec::Document;
use crate::types::{DeckId, MAX_CHANNEL};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a learn session waits for input
    pub learn_timeout_ms: u64,

    /// MIDI channels (0-15) the engine listens to; anything else is dropped
    pub accepted_channels: Vec<u8>,

    /// Mapping profile loaded at startup (default path if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings_path: Option<PathBuf>,

    /// Input port opened last, reconnected on startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_device: Option<String>,

    /// Channel each deck's generated preset bindings listen on
    pub deck_channels: DeckChannels,

    /// First note of the generated preset bindings
    pub start_note: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            learn_timeout_ms: 10_000,
            accepted_channels: (0..=MAX_CHANNEL).collect(),
            mappings_path: None,
            last_device: None,
            deck_channels: DeckChannels::default(),
            start_note: 56,
        }
    }
}

impl EngineConfig {
    pub fn learn_timeout(&self) -> Duration {
        Duration::from_millis(self.learn_timeout_ms)
    }

    /// Accepted channels as a bitmask (bit n = channel n)
    ///
    /// Out-of-range entries are ignored.
    pub fn channel_mask(&self) -> u16 {
        channel_mask(&self.accepted_channels)
    }

    /// Mapping profile path, falling back to the default location
    pub fn mappings_path(&self) -> PathBuf {
        self.mappings_path
            .clone()
            .unwrap_or_else(default_mappings_path)
    }
}

/// MIDI channel per deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckChannels {
    pub a: u8,
    pub b: u8,
}

impl Default for DeckChannels {
    fn default() -> Self {
        Self { a: 12, b: 13 }
    }
}

impl DeckChannels {
    pub fn get(&self, deck: DeckId) -> u8 {
        match deck {
            DeckId::A => self.a,
            DeckId::B => self.b,
        }
    }
}

/// Build a channel bitmask from a channel list
pub fn channel_mask(channels: &[u8]) -> u16 {
    channels
        .iter()
        .filter(|&&ch| {
            let valid = ch <= MAX_CHANNEL;
            if !valid {
                log::warn!("MIDI: Ignoring accepted channel {} (valid range 0-15)", ch);
            }
            valid
        })
        .fold(0u16, |mask, &ch| mask | (1 << ch))
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("visuales")
}

/// Get the default engine settings path
///
/// Returns: ~/.config/visuales/midi.yaml
pub fn default_engine_config_path() -> PathBuf {
    config_dir().join("midi.yaml")
}

/// Get the default mapping profile path
///
/// Returns: ~/.config/visuales/midi_mappings.json
pub fn default_mappings_path() -> PathBuf {
    config_dir().join("midi_mappings.json")
}

/// Load engine settings from a YAML file
///
/// A missing or invalid file yields the defaults (with a warning when invalid).
pub fn load_engine_config(path: &Path) -> EngineConfig {
    log::info!("load_engine_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_engine_config: Config file doesn't exist, using defaults");
        return EngineConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<EngineConfig>(&contents) {
            Ok(config) => {
                log::info!(
                    "load_engine_config: learn timeout {} ms, {} accepted channel(s), last device {:?}",
                    config.learn_timeout_ms,
                    config.accepted_channels.len(),
                    config.last_device
                );
                config
            }
            Err(e) => {
                log::warn!("load_engine_config: Failed to parse config: {}", e);
                EngineConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_engine_config: Failed to read config file: {}", e);
            EngineConfig::default()
        }
    }
}

/// Save engine settings to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_engine_config(config: &EngineConfig, path: &Path) -> anyhow::Result<()> {
    log::info!("save_engine_config: Saving to {:?}", path);

    ensure_parent_dir(path)?;
    let yaml = serde_yaml::to_string(config).context("Failed to serialize engine config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write engine config file: {:?}", path))?;

    log::info!("save_engine_config: Config saved successfully");
    Ok(())
}

/// Read a mapping profile
pub fn load_mappings_file(path: &Path) -> anyhow::Result<Document> {
    log::info!("load_mappings_file: Loading from {:?}", path);

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping file: {:?}", path))?;
    let document: Document = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse mapping file: {:?}", path))?;

    log::info!("load_mappings_file: {} entries", document.len());
    Ok(document)
}

/// Write a mapping profile (pretty-printed JSON)
///
/// Creates parent directories if they don't exist.
pub fn save_mappings_file(document: &Document, path: &Path) -> anyhow::Result<()> {
    log::info!("save_mappings_file: Saving {} entries to {:?}", document.len(), path);

    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(document).context("Failed to serialize mappings")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write mapping file: {:?}", path))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    Ok(())
}

/// Normalize a MIDI port name by removing hardware-specific identifiers
///
/// ALSA port names include dynamic IDs that change between reconnections:
///
/// 1. Bracketed hardware IDs: `[hw:3,0,0]`
/// 2. ALSA sequencer client:port IDs: trailing `28:0` or `20:0`
///
/// Examples:
/// - "APC MINI MIDI 1 [hw:2,0,0]" -> "APC MINI MIDI 1"
/// - "APC MINI:APC MINI MIDI 1 24:0" -> "APC MINI:APC MINI MIDI 1"
pub fn normalize_port_name(name: &str) -> String {
    let mut result = name.trim();

    if let Some(bracket_pos) = result.rfind('[') {
        result = result[..bracket_pos].trim();
    }

    // Trailing "digits:digits"
    if let Some(last_space) = result.rfind(' ') {
        let is_client_port = result[last_space + 1..]
            .split_once(':')
            .is_some_and(|(client, port)| {
                !client.is_empty()
                    && !port.is_empty()
                    && client.chars().all(|c| c.is_ascii_digit())
                    && port.chars().all(|c| c.is_ascii_digit())
            });
        if is_client_port {
            result = result[..last_space].trim();
        }
    }

    result.to_string()
}

/// Check if a port name matches a remembered device name
///
/// Exact (case-insensitive) match of the normalized names first, then a
/// substring match so "APC MINI" finds "APC MINI:APC MINI MIDI 1 24:0".
pub fn port_matches(actual_port: &str, wanted: &str) -> bool {
    let actual = normalize_port_name(actual_port).to_lowercase();
    let wanted = normalize_port_name(wanted).to_lowercase();
    if wanted.is_empty() {
        return false;
    }
    actual == wanted || actual.contains(&wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.learn_timeout(), Duration::from_secs(10));
        assert_eq!(config.channel_mask(), 0xFFFF);
        assert_eq!(config.deck_channels.get(DeckId::A), 12);
        assert_eq!(config.deck_channels.get(DeckId::B), 13);
        assert_eq!(config.start_note, 56);
    }

    #[test]
    fn test_yaml_parsing_partial() {
        let yaml = r#"
learn_timeout_ms: 5000
accepted_channels: [0, 9, 12]
last_device: "APC MINI"
deck_channels:
  b: 2
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.learn_timeout_ms, 5000);
        assert_eq!(config.channel_mask(), (1 << 0) | (1 << 9) | (1 << 12));
        assert_eq!(config.last_device.as_deref(), Some("APC MINI"));
        assert_eq!(config.deck_channels, DeckChannels { a: 12, b: 2 });
        assert_eq!(config.start_note, 56);
    }

    #[test]
    fn test_channel_mask_ignores_out_of_range() {
        assert_eq!(channel_mask(&[1, 16, 200]), 1 << 1);
        assert_eq!(channel_mask(&[]), 0);
    }

    #[test]
    fn test_engine_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("midi.yaml");

        let config = EngineConfig {
            learn_timeout_ms: 2500,
            accepted_channels: vec![12, 13],
            last_device: Some("Launchpad Mini MK3".to_string()),
            ..Default::default()
        };
        save_engine_config(&config, &path).unwrap();
        assert_eq!(load_engine_config(&path), config);
    }

    #[test]
    fn test_load_engine_config_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert_eq!(load_engine_config(&missing), EngineConfig::default());

        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "learn_timeout_ms: [not, a, number]").unwrap();
        assert_eq!(load_engine_config(&broken), EngineConfig::default());
    }

    #[test]
    fn test_mappings_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles").join("live.json");

        let document: Document = serde_json::from_str(
            r#"{"deck_a_clear": {"type": "load_preset", "params": {"deck_id": "A", "preset_name": null}, "midi": "Sin asignar"}}"#,
        )
        .unwrap();
        save_mappings_file(&document, &path).unwrap();
        assert_eq!(load_mappings_file(&path).unwrap(), document);
    }

    #[test]
    fn test_load_mappings_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_mappings_file(&dir.path().join("nope.json")).is_err());

        let not_object = dir.path().join("list.json");
        std::fs::write(&not_object, "[1, 2, 3]").unwrap();
        let err = load_mappings_file(&not_object).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse mapping file"));
    }

    #[test]
    fn test_normalize_port_name() {
        assert_eq!(normalize_port_name("APC MINI MIDI 1 [hw:2,0,0]"), "APC MINI MIDI 1");
        assert_eq!(
            normalize_port_name("APC MINI:APC MINI MIDI 1 24:0"),
            "APC MINI:APC MINI MIDI 1"
        );
        assert_eq!(
            normalize_port_name("Midi Through:Midi Through Port-0 14:0"),
            "Midi Through:Midi Through Port-0"
        );
        assert_eq!(normalize_port_name("  Padded Name  "), "Padded Name");
        assert_eq!(normalize_port_name("Ratio 3:2"), "Ratio");
        assert_eq!(normalize_port_name("Ends with colon 3:"), "Ends with colon 3:");
        assert_eq!(normalize_port_name(""), "");
        assert_eq!(normalize_port_name("[only brackets]"), "");
    }

    #[test]
    fn test_port_matches() {
        assert!(port_matches("APC MINI:APC MINI MIDI 1 24:0", "APC MINI:APC MINI MIDI 1 20:0"));
        assert!(port_matches("apc mini midi 1 [hw:1,0,0]", "APC MINI MIDI 1"));
        assert!(port_matches("APC MINI:APC MINI MIDI 1 24:0", "apc mini"));
        assert!(!port_matches("Launchpad Mini", "APC MINI"));
        assert!(!port_matches("Launchpad Mini", ""));
    }
}

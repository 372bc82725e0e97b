//! MIDI trigger binding and dispatch for the visuales performance tool
//!
//! This crate provides:
//! - MIDI device connection and input handling via midir
//! - MIDI message parsing via midly
//! - Trigger-to-action bindings (load preset, crossfade, control parameter)
//! - MIDI learn with duplicate-trigger conflict resolution and timeout
//! - JSON mapping profiles, including deck-scoped editing
//! - Flume channel bridge from the driver thread to the owning thread
//!
//! # Architecture
//!
//! ```text
//! MIDI Device → midir callback → flume channel → MidiEngine::tick() → learn / dispatch → ActionSink
//! ```
//!
//! The midir callback only parses and queues events. Everything else
//! (learn, table mutation, dispatch) happens on the thread that owns the
//! [`MidiEngine`], once per application tick.

pub mod binding;
pub mod codec;
pub mod config;
pub mod connection;
pub mod defaults;
pub mod dispatch;
pub mod events;
pub mod input;
pub mod learn;
pub mod tempo;
pub mod types;

pub use binding::{
    parse_custom_values, Action, Binding, BindingTable, CrossfadeDirection, CustomValue,
    Displaced, ParamValue,
};
pub use codec::{DecodeReport, DecodeWarning, Document, UNASSIGNED};
pub use config::{
    default_engine_config_path, default_mappings_path, load_engine_config, save_engine_config,
    DeckChannels, EngineConfig,
};
pub use connection::{MidiConnectionError, MidiTransport, MidirTransport};
pub use dispatch::Dispatcher;
pub use events::{ActionSink, EngineEvent, EventBus};
pub use input::MidiInputEvent;
pub use learn::{LearnHandle, LearnOutcome, LearnSession, LearnStatus};
pub use tempo::TempoTracker;
pub use types::{note_name, DeckId, DeckScope, TriggerError, TriggerKey, TriggerKind};

use config::normalize_port_name;
use flume::{Receiver, Sender};
use std::path::Path;
use std::time::Instant;

/// Intake queue depth between the driver callback and the owner
const INTAKE_CAPACITY: usize = 256;

/// Error type for MIDI engine operations
#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("Unknown binding: {0}")]
    UnknownBinding(String),

    #[error("Binding already exists: {0}")]
    DuplicateBinding(String),

    #[error("{trigger} is already bound to '{owner}'")]
    TriggerInUse { trigger: TriggerKey, owner: String },

    #[error("Invalid trigger: {0}")]
    InvalidTrigger(#[from] TriggerError),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("No learn conflict is waiting for confirmation")]
    NotResolving,

    #[error("No MIDI transport attached")]
    NoTransport,

    #[error("MIDI connection error: {0}")]
    ConnectionError(#[from] MidiConnectionError),

    #[error("Failed to load or save MIDI settings: {0}")]
    ConfigError(#[from] anyhow::Error),
}

/// An action resolved during a tick
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub binding_id: String,
    pub action: Action,
    /// Velocity, CC value or program number of the triggering message
    pub value: u8,
}

/// Main MIDI engine
///
/// Owns the binding table, the learn session and the intake queue. Not
/// shared between threads: the transport only holds a sender.
pub struct MidiEngine {
    config: EngineConfig,
    /// Accepted channels (bit n = channel n)
    channel_mask: u16,
    dispatcher: Dispatcher,
    learn: LearnSession,
    /// Outcome of the last learn step, until taken
    learn_outcome: Option<LearnOutcome>,
    tempo: TempoTracker,
    events: EventBus,
    intake_tx: Sender<MidiInputEvent>,
    intake_rx: Receiver<MidiInputEvent>,
    transport: Option<Box<dyn MidiTransport>>,
}

impl Default for MidiEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl MidiEngine {
    /// Create an engine with an empty table and no transport
    pub fn new(config: EngineConfig) -> Self {
        let (intake_tx, intake_rx) = flume::bounded(INTAKE_CAPACITY);
        Self {
            channel_mask: config.channel_mask(),
            learn: LearnSession::new(config.learn_timeout()),
            config,
            dispatcher: Dispatcher::default(),
            learn_outcome: None,
            tempo: TempoTracker::new(),
            events: EventBus::new(),
            intake_tx,
            intake_rx,
            transport: None,
        }
    }

    /// Create an engine from a settings file, loading its mapping profile
    ///
    /// Missing or broken files are not fatal: the engine starts with
    /// defaults and an empty table.
    pub fn open(config_path: Option<&Path>) -> Self {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_engine_config_path);
        let config = load_engine_config(&config_path);
        let mappings_path = config.mappings_path();

        let mut engine = Self::new(config);
        if mappings_path.exists() {
            if let Err(e) = engine.load_mappings(&mappings_path) {
                log::warn!("MIDI: Failed to load mappings from {:?}: {:#}", mappings_path, e);
            }
        } else {
            log::info!("MIDI: No mapping profile at {:?}, starting empty", mappings_path);
        }
        engine
    }

    /// Attach a device transport
    pub fn with_transport(mut self, transport: impl MidiTransport + 'static) -> Self {
        self.set_transport(Box::new(transport));
        self
    }

    pub fn set_transport(&mut self, transport: Box<dyn MidiTransport>) {
        self.transport = Some(transport);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Save the current settings (including the last used device)
    pub fn save_config(&self, path: &Path) -> Result<(), MidiError> {
        save_engine_config(&self.config, path)?;
        Ok(())
    }

    /// Sender feeding the intake queue
    ///
    /// For input sources that are not a [`MidiTransport`].
    pub fn intake_sender(&self) -> Sender<MidiInputEvent> {
        self.intake_tx.clone()
    }

    /// Register for engine notifications
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Channel filter
    // ------------------------------------------------------------------

    /// Restrict input to the given channels (0-15)
    pub fn set_accepted_channels(&mut self, channels: &[u8]) {
        self.channel_mask = config::channel_mask(channels);
        let accepted: Vec<u8> = (0..=types::MAX_CHANNEL)
            .filter(|ch| self.accepts_channel(*ch))
            .collect();
        self.config.accepted_channels = accepted;
        log::info!("MIDI: Accepting channels {:?}", self.config.accepted_channels);
    }

    pub fn accepted_channels(&self) -> &[u8] {
        &self.config.accepted_channels
    }

    fn accepts_channel(&self, channel: u8) -> bool {
        channel <= types::MAX_CHANNEL && self.channel_mask & (1 << channel) != 0
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Drain the intake queue and handle every pending event
    ///
    /// Call this in the application's Tick handler.
    pub fn tick(&mut self) -> Vec<Dispatched> {
        self.tick_at(Instant::now())
    }

    /// [`tick`](Self::tick) with an explicit clock
    pub fn tick_at(&mut self, now: Instant) -> Vec<Dispatched> {
        self.check_learn_deadline(now);

        let pending: Vec<MidiInputEvent> = self.intake_rx.try_iter().collect();
        pending
            .into_iter()
            .filter_map(|event| self.handle_event_at(event, now))
            .collect()
    }

    /// Drain the intake queue, executing resolved actions on `sink`
    ///
    /// Returns the number of actions executed.
    pub fn tick_with_sink(&mut self, sink: &mut dyn ActionSink) -> usize {
        let dispatched = self.tick();
        for d in &dispatched {
            sink.execute(&d.binding_id, &d.action, d.value);
        }
        dispatched.len()
    }

    /// Handle one decoded event immediately
    ///
    /// Returns the resolved action, or `None` when the event is unmapped,
    /// filtered, not dispatchable, or taken by a learn session.
    pub fn handle_midi_message(&mut self, event: MidiInputEvent) -> Option<Action> {
        self.handle_event_at(event, Instant::now()).map(|d| d.action)
    }

    /// Handle one event with an explicit clock
    pub fn handle_event_at(&mut self, event: MidiInputEvent, now: Instant) -> Option<Dispatched> {
        if !self.accepts_channel(event.channel()) {
            log::trace!("MIDI: Ignoring {:?} (channel not accepted)", event);
            return None;
        }

        if let Some(trigger) = event.trigger_key() {
            self.events.publish(EngineEvent::MessageReceived {
                trigger: trigger.to_string(),
            });
        }

        if event.is_press() {
            if let Some(bpm) = self.tempo.on_press(now) {
                self.events.publish(EngineEvent::TempoChanged { bpm });
            }
        }

        self.check_learn_deadline(now);
        if self.learn.is_intercepting() {
            if let Some(outcome) = self.learn.capture(&event, self.dispatcher.table_mut()) {
                self.report_learn(outcome);
            }
            return None;
        }

        let (binding, value) = self.dispatcher.dispatch_binding(&event)?;
        let dispatched = Dispatched {
            binding_id: binding.id.clone(),
            action: binding.action.clone(),
            value,
        };
        log::debug!(
            "MIDI: {} -> {} ({})",
            event.trigger_key().map_or_else(String::new, |t| t.to_string()),
            dispatched.binding_id,
            dispatched.action.type_name()
        );
        self.events.publish(EngineEvent::ActionTriggered {
            binding_id: dispatched.binding_id.clone(),
            action: dispatched.action.clone(),
            value,
        });
        Some(dispatched)
    }

    /// Resolve a trigger as if its control had been pressed
    pub fn resolve_trigger(&self, trigger: &TriggerKey) -> Option<Action> {
        self.dispatcher.resolve_trigger(trigger)
    }

    /// Last tempo estimate from note-on presses
    pub fn tempo_bpm(&self) -> Option<f64> {
        self.tempo.bpm()
    }

    // ------------------------------------------------------------------
    // Learn
    // ------------------------------------------------------------------

    /// Start listening for a new trigger for binding `id`
    pub fn start_learn(&mut self, id: &str) -> Result<LearnHandle, MidiError> {
        self.start_learn_at(id, Instant::now())
    }

    pub fn start_learn_at(&mut self, id: &str, now: Instant) -> Result<LearnHandle, MidiError> {
        if !self.dispatcher.table().contains(id) {
            return Err(MidiError::UnknownBinding(id.to_string()));
        }
        let (handle, cancelled) = self.learn.start(id, now);
        if let Some(previous) = cancelled {
            log::info!("MIDI: Learn for '{}' replaced by '{}'", previous, id);
        }
        self.learn_outcome = None;
        Ok(handle)
    }

    /// Answer a pending learn conflict
    pub fn confirm_reassign(&mut self, accept: bool) -> Result<LearnOutcome, MidiError> {
        self.confirm_reassign_at(accept, Instant::now())
    }

    pub fn confirm_reassign_at(
        &mut self,
        accept: bool,
        now: Instant,
    ) -> Result<LearnOutcome, MidiError> {
        let outcome = self
            .learn
            .confirm_reassign(accept, self.dispatcher.table_mut(), now)?;
        self.report_learn(outcome.clone());
        Ok(outcome)
    }

    /// Stop any learn session without touching the table
    pub fn cancel_learn(&mut self) -> bool {
        self.learn.cancel()
    }

    pub fn learn_status(&self) -> &LearnStatus {
        self.learn.status()
    }

    /// Take the outcome of the last learn step (for polling UIs)
    pub fn take_learn_outcome(&mut self) -> Option<LearnOutcome> {
        self.learn_outcome.take()
    }

    fn check_learn_deadline(&mut self, now: Instant) {
        if let Some(outcome) = self.learn.tick(now) {
            self.report_learn(outcome);
        }
    }

    fn report_learn(&mut self, outcome: LearnOutcome) {
        match &outcome {
            LearnOutcome::Assigned {
                binding_id,
                trigger,
                ..
            } => self.events.publish(EngineEvent::Learned {
                binding_id: binding_id.clone(),
                trigger: trigger.to_string(),
            }),
            LearnOutcome::Conflict {
                target,
                candidate,
                conflicting,
            } => self.events.publish(EngineEvent::LearnConflict {
                binding_id: target.clone(),
                trigger: candidate.to_string(),
                conflicting: conflicting.clone(),
            }),
            LearnOutcome::TimedOut { target } => self.events.publish(EngineEvent::LearnTimedOut {
                binding_id: target.clone(),
            }),
            LearnOutcome::Declined { .. } | LearnOutcome::TargetMissing { .. } => {}
        }
        self.learn_outcome = Some(outcome);
    }

    // ------------------------------------------------------------------
    // Binding table
    // ------------------------------------------------------------------

    /// Live table (read-only)
    pub fn bindings(&self) -> &BindingTable {
        self.dispatcher.table()
    }

    pub fn snapshot(&self) -> BindingTable {
        self.dispatcher.snapshot()
    }

    /// Swap in a whole table, returning the previous one
    ///
    /// Cancels any learn session.
    pub fn replace_table(&mut self, table: BindingTable) -> BindingTable {
        self.learn.cancel();
        self.dispatcher.replace(table)
    }

    pub fn add_binding(&mut self, binding: Binding) -> Result<(), MidiError> {
        log::debug!("MIDI: Adding binding '{}'", binding.id);
        self.dispatcher.table_mut().insert(binding)
    }

    /// Add a binding under a generated `custom_<n>` id, returning the id
    pub fn add_custom_binding(
        &mut self,
        action: Action,
        trigger: Option<TriggerKey>,
    ) -> Result<String, MidiError> {
        let table = self.dispatcher.table();
        let id = (1..)
            .map(|n| format!("custom_{}", n))
            .find(|id| !table.contains(id))
            .unwrap_or_default();

        let mut binding = Binding::new(id.clone(), action);
        binding.trigger = trigger;
        self.add_binding(binding)?;
        Ok(id)
    }

    pub fn remove_binding(&mut self, id: &str) -> Result<Binding, MidiError> {
        let removed = self
            .dispatcher
            .table_mut()
            .remove(id)
            .ok_or_else(|| MidiError::UnknownBinding(id.to_string()))?;
        log::debug!("MIDI: Removed binding '{}'", id);
        Ok(removed)
    }

    /// Replace an existing binding (same id), returning the old one
    pub fn replace_binding(&mut self, binding: Binding) -> Result<Binding, MidiError> {
        if !self.dispatcher.table().contains(&binding.id) {
            return Err(MidiError::UnknownBinding(binding.id));
        }
        let id = binding.id.clone();
        self.dispatcher
            .table_mut()
            .upsert(binding)?
            .ok_or(MidiError::UnknownBinding(id))
    }

    /// Remove every binding
    pub fn clear_all_bindings(&mut self) {
        self.learn.cancel();
        self.dispatcher.table_mut().clear();
        log::info!("MIDI: Cleared all bindings");
    }

    /// Fill an empty table with the generated preset bindings
    ///
    /// Returns false (and leaves the table alone) if it already has bindings.
    pub fn generate_default_bindings(&mut self, preset_names: &[String]) -> bool {
        if !self.dispatcher.table().is_empty() {
            log::debug!("MIDI: Table not empty, skipping default bindings");
            return false;
        }
        let table = defaults::generate_default_bindings(
            preset_names,
            self.config.deck_channels,
            self.config.start_note,
        );
        self.dispatcher.replace(table);
        true
    }

    // ------------------------------------------------------------------
    // Documents and files
    // ------------------------------------------------------------------

    /// Encode the live table
    pub fn get_midi_mappings(&self) -> Document {
        codec::encode(self.dispatcher.table())
    }

    /// Replace the whole table from a document
    ///
    /// Cancels any learn session. Skipped entries are returned as warnings.
    pub fn set_midi_mappings(&mut self, document: &Document) -> Vec<DecodeWarning> {
        if self.learn.cancel() {
            log::info!("MIDI: Learn cancelled by mapping reload");
        }
        let report = codec::decode(document);
        log::info!(
            "MIDI: Loaded {} mappings ({} bound, {} warning(s))",
            report.table.len(),
            report.table.bound_count(),
            report.warnings.len()
        );
        self.dispatcher.replace(report.table);
        report.warnings
    }

    /// Replace only the bindings a deck editor owns
    ///
    /// Bindings outside `deck` are left as they are; incoming entries that
    /// clash with them are reported.
    pub fn set_scoped_mappings(&mut self, document: &Document, deck: DeckId) -> Vec<DecodeWarning> {
        let report = codec::decode(document);
        let (merged, merge_warnings) =
            codec::merge_scoped(self.dispatcher.table(), report.table, deck);

        let mut warnings = report.warnings;
        warnings.extend(merge_warnings);
        log::info!(
            "MIDI: Applied deck {} mappings ({} total, {} warning(s))",
            deck,
            merged.len(),
            warnings.len()
        );
        self.dispatcher.replace(merged);
        warnings
    }

    /// Load a mapping profile from disk (full replace)
    pub fn load_mappings(&mut self, path: &Path) -> Result<Vec<DecodeWarning>, MidiError> {
        let document = config::load_mappings_file(path)?;
        Ok(self.set_midi_mappings(&document))
    }

    /// Write the live table to disk
    pub fn save_mappings(&self, path: &Path) -> Result<(), MidiError> {
        config::save_mappings_file(&self.get_midi_mappings(), path)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    fn transport(&self) -> Result<&dyn MidiTransport, MidiError> {
        self.transport.as_deref().ok_or(MidiError::NoTransport)
    }

    pub fn list_input_ports(&self) -> Result<Vec<String>, MidiError> {
        Ok(self.transport()?.list_input_ports()?)
    }

    /// Open an input port and remember it as the last used device
    pub fn open_input_port(&mut self, name: &str) -> Result<String, MidiError> {
        let events = self.intake_tx.clone();
        let transport = self.transport.as_mut().ok_or(MidiError::NoTransport)?;
        let previous = transport.connected_port_name();
        let result = transport.open_input_port(name, events);

        if let Some(previous) = previous {
            self.events.publish(EngineEvent::DeviceDisconnected { name: previous });
        }
        let opened = result?;

        self.config.last_device = Some(normalize_port_name(&opened));
        self.events.publish(EngineEvent::DeviceConnected {
            name: opened.clone(),
        });
        Ok(opened)
    }

    /// Close the open input port, if any
    pub fn close_input_port(&mut self) -> Result<Option<String>, MidiError> {
        let transport = self.transport.as_mut().ok_or(MidiError::NoTransport)?;
        let closed = transport.close_input_port();
        if let Some(name) = &closed {
            self.events.publish(EngineEvent::DeviceDisconnected {
                name: name.clone(),
            });
        }
        Ok(closed)
    }

    /// Reopen the device used last time, if one is remembered
    pub fn reconnect_last_device(&mut self) -> Result<Option<String>, MidiError> {
        match self.config.last_device.clone() {
            Some(name) => self.open_input_port(&name).map(Some),
            None => Ok(None),
        }
    }

    pub fn is_port_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_port_open())
    }

    pub fn connected_port_name(&self) -> Option<String> {
        self.transport.as_ref().and_then(|t| t.connected_port_name())
    }
}

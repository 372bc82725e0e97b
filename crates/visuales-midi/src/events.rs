//! Engine notifications and the action sink seam
//!
//! Every subscriber gets its own bounded flume channel, so a slow UI cannot
//! stall dispatch: a full subscriber misses events, a dropped receiver is
//! pruned on the next publish.

use crate::binding::Action;
use flume::{Receiver, Sender, TrySendError};

/// Per-subscriber queue depth
const SUBSCRIBER_CAPACITY: usize = 1024;

/// Events broadcast to every subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    // --- Input ---
    /// A qualifying message arrived (fired for unmapped keys and while learning)
    MessageReceived { trigger: String },

    /// A trigger resolved to a bound action
    ActionTriggered {
        binding_id: String,
        action: Action,
        value: u8,
    },

    // --- Learn ---
    /// A learn session assigned a trigger
    Learned { binding_id: String, trigger: String },

    /// The captured trigger belongs to another binding; waiting for a decision
    LearnConflict {
        binding_id: String,
        trigger: String,
        conflicting: String,
    },

    /// No input arrived before the learn deadline
    LearnTimedOut { binding_id: String },

    // --- Tempo ---
    TempoChanged { bpm: f64 },

    // --- Device ---
    DeviceConnected { name: String },
    DeviceDisconnected { name: String },
}

/// Fan-out of [`EngineEvent`]s to any number of receivers
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<EngineEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = flume::bounded(SUBSCRIBER_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    /// Number of live subscribers (as of the last publish)
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Publish an event to all subscribers
    pub fn publish(&mut self, event: EngineEvent) {
        self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("MIDI: Subscriber queue full, dropping {:?}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("MIDI: Pruning disconnected subscriber");
                false
            }
        });
    }
}

/// Executes resolved actions
///
/// Implemented by the decks/mixer side of the application. `value` is the
/// raw data byte of the triggering message (velocity, CC value or program)
/// for sinks that scale continuous parameters.
pub trait ActionSink {
    fn execute(&mut self, binding_id: &str, action: &Action, value: u8);
}

/// Closures work as sinks
impl<F> ActionSink for F
where
    F: FnMut(&str, &Action, u8),
{
    fn execute(&mut self, binding_id: &str, action: &Action, value: u8) {
        self(binding_id, action, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeckId;

    #[test]
    fn test_event_bus_fan_out() {
        let mut bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();

        bus.publish(EngineEvent::DeviceConnected {
            name: "APC mini".to_string(),
        });

        for rx in [&rx1, &rx2] {
            match rx.try_recv().unwrap() {
                EngineEvent::DeviceConnected { name } => assert_eq!(name, "APC mini"),
                other => panic!("Wrong event type: {:?}", other),
            }
        }
    }

    #[test]
    fn test_event_bus_prunes_dropped_receivers() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(EngineEvent::TempoChanged { bpm: 120.0 });
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::TempoChanged { bpm: 120.0 });
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |id: &str, action: &Action, value: u8| {
                seen.push((id.to_string(), action.clone(), value));
            };
            sink.execute("deck_b_clear", &Action::clear_deck(DeckId::B), 64);
        }
        assert_eq!(
            seen,
            vec![("deck_b_clear".to_string(), Action::clear_deck(DeckId::B), 64)]
        );
    }
}

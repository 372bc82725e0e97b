//! MIDI port discovery and connection
//!
//! Uses midir for cross-platform MIDI I/O (ALSA on Linux, CoreMIDI on macOS, WinMM on Windows).
//! The midir callback runs on the driver thread; it only parses bytes and
//! pushes [`MidiInputEvent`]s into the engine's intake channel.

use crate::config::{normalize_port_name, port_matches};
use crate::input::MidiInputEvent;
use flume::{Sender, TrySendError};
use midir::{Ignore, MidiInput, MidiInputConnection};

const CLIENT_NAME: &str = "visuales-midi-in";

/// Error type for MIDI connection operations
#[derive(Debug, thiserror::Error)]
pub enum MidiConnectionError {
    #[error("Failed to initialize MIDI input: {0}")]
    InputInitError(String),

    #[error("No MIDI input ports available")]
    NoInputPorts,

    #[error("No MIDI port found matching: {0}")]
    PortNotFound(String),

    #[error("Failed to connect to MIDI port: {0}")]
    ConnectionError(String),

    #[error("Failed to get port info: {0}")]
    PortInfoError(String),
}

/// Input device access
///
/// The engine only talks to devices through this trait, so it can run
/// against a real driver or a scripted source in tests.
pub trait MidiTransport {
    /// Names of the available input ports
    fn list_input_ports(&self) -> Result<Vec<String>, MidiConnectionError>;

    /// Open the port matching `name`, delivering decoded events to `events`
    ///
    /// Any open port is closed first. Returns the full name of the port opened.
    fn open_input_port(
        &mut self,
        name: &str,
        events: Sender<MidiInputEvent>,
    ) -> Result<String, MidiConnectionError>;

    /// Close the open port, returning its name
    fn close_input_port(&mut self) -> Option<String>;

    fn is_port_open(&self) -> bool;

    fn connected_port_name(&self) -> Option<String>;
}

/// Callback data passed to midir
struct CallbackData {
    events: Sender<MidiInputEvent>,
}

/// midir-backed transport
#[derive(Default)]
pub struct MidirTransport {
    connection: Option<MidiInputConnection<CallbackData>>,
    port_name: Option<String>,
}

impl MidirTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn midi_input() -> Result<MidiInput, MidiConnectionError> {
        let mut midi_in = MidiInput::new(CLIENT_NAME)
            .map_err(|e| MidiConnectionError::InputInitError(e.to_string()))?;
        // Sysex, timing and active sensing never reach the engine
        midi_in.ignore(Ignore::All);
        Ok(midi_in)
    }

    /// The midir callback function
    ///
    /// Called from the MIDI driver thread whenever a message is received.
    /// Must be fast and non-blocking.
    fn midi_callback(_timestamp: u64, data: &[u8], callback_data: &mut CallbackData) {
        let Some(event) = MidiInputEvent::parse(data) else {
            return;
        };
        log::debug!("[MIDI IN] {:?}", event);

        match callback_data.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("MIDI: Intake channel full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("MIDI: Intake channel closed, dropping {:?}", event);
            }
        }
    }
}

impl MidiTransport for MidirTransport {
    fn list_input_ports(&self) -> Result<Vec<String>, MidiConnectionError> {
        let midi_in = Self::midi_input()?;
        let ports: Vec<String> = midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect();
        Ok(ports)
    }

    fn open_input_port(
        &mut self,
        name: &str,
        events: Sender<MidiInputEvent>,
    ) -> Result<String, MidiConnectionError> {
        self.close_input_port();

        let midi_in = Self::midi_input()?;
        let in_ports = midi_in.ports();
        if in_ports.is_empty() {
            return Err(MidiConnectionError::NoInputPorts);
        }

        // Prefer an exact (normalized) name before falling back to substring matching
        let wanted = normalize_port_name(name);
        let named: Vec<(String, &midir::MidiInputPort)> = in_ports
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok().map(|n| (n, port)))
            .collect();
        let (port_name, port) = named
            .iter()
            .find(|(n, _)| normalize_port_name(n).eq_ignore_ascii_case(&wanted))
            .or_else(|| named.iter().find(|(n, _)| port_matches(n, name)))
            .map(|(n, p)| (n.clone(), (*p).clone()))
            .ok_or_else(|| MidiConnectionError::PortNotFound(name.to_string()))?;

        log::info!("MIDI: Found input port: {}", port_name);

        let connection = midi_in
            .connect(
                &port,
                "visuales-midi-input",
                Self::midi_callback,
                CallbackData { events },
            )
            .map_err(|e| MidiConnectionError::ConnectionError(e.to_string()))?;

        log::info!("MIDI: Connected to {}", port_name);
        self.connection = Some(connection);
        self.port_name = Some(port_name.clone());
        Ok(port_name)
    }

    fn close_input_port(&mut self) -> Option<String> {
        let connection = self.connection.take()?;
        let _ = connection.close();
        let name = self.port_name.take();
        log::info!("MIDI: Disconnected from {:?}", name);
        name
    }

    fn is_port_open(&self) -> bool {
        self.connection.is_some()
    }

    fn connected_port_name(&self) -> Option<String> {
        self.port_name.clone()
    }
}

impl Drop for MidirTransport {
    fn drop(&mut self) {
        self.close_input_port();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just verifies we can enumerate ports without crashing
        // Actual port availability depends on the system
        let transport = MidirTransport::new();
        let _input_ports = transport.list_input_ports();
        assert!(!transport.is_port_open());
    }

    #[test]
    fn test_open_unknown_port_fails() {
        let mut transport = MidirTransport::new();
        let (tx, _rx) = flume::bounded(4);
        let result = transport.open_input_port("No Such Controller 9000", tx);
        assert!(result.is_err());
        assert!(!transport.is_port_open());
        assert_eq!(transport.connected_port_name(), None);
        assert_eq!(transport.close_input_port(), None);
    }

    #[test]
    fn test_callback_forwards_and_drops_when_full() {
        let (tx, rx) = flume::bounded(1);
        let mut data = CallbackData { events: tx };

        MidirTransport::midi_callback(0, &[0x90, 0x25, 0x64], &mut data);
        MidirTransport::midi_callback(1, &[0xF8], &mut data); // clock, ignored
        MidirTransport::midi_callback(2, &[0xB0, 0x01, 0x7F], &mut data); // dropped, full

        assert_eq!(
            rx.try_recv().unwrap(),
            MidiInputEvent::NoteOn {
                channel: 0,
                note: 0x25,
                velocity: 0x64
            }
        );
        assert!(rx.try_recv().is_err());
    }
}

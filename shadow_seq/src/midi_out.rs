//! MIDI output seam for the sequencer engine.
//!
//! The engine never talks to hardware directly; everything it emits goes
//! through a [`MidiSink`]. The plugin build wires the sink to the host's
//! `midi_send_external` callback, tests use [`CollectSink`].

use shadow_shared::{UsbMidiPacket, CABLE_EXTERNAL, MIDI_CLOCK, MIDI_START, MIDI_STOP};

pub trait MidiSink {
    fn send(&mut self, pkt: UsbMidiPacket);

    fn note_on(&mut self, note: u8, velocity: u8, channel: u8) {
        self.send(UsbMidiPacket::note_on(CABLE_EXTERNAL, channel, note, velocity));
    }

    fn note_off(&mut self, note: u8, channel: u8) {
        self.send(UsbMidiPacket::note_off(CABLE_EXTERNAL, channel, note));
    }

    fn control_change(&mut self, cc: u8, value: u8, channel: u8) {
        self.send(UsbMidiPacket::control_change(CABLE_EXTERNAL, channel, cc, value));
    }

    fn clock(&mut self) {
        self.send(UsbMidiPacket::realtime(CABLE_EXTERNAL, MIDI_CLOCK));
    }

    fn start(&mut self) {
        self.send(UsbMidiPacket::realtime(CABLE_EXTERNAL, MIDI_START));
    }

    fn stop(&mut self) {
        self.send(UsbMidiPacket::realtime(CABLE_EXTERNAL, MIDI_STOP));
    }
}

/// Sink that drops everything (engine without a host attached).
#[derive(Debug, Default)]
pub struct NullSink;

impl MidiSink for NullSink {
    fn send(&mut self, _pkt: UsbMidiPacket) {}
}

/// Sink that records every packet, for tests and headless inspection.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub packets: Vec<UsbMidiPacket>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    /// Channel-voice packets only (clock bytes filtered out).
    pub fn voice_packets(&self) -> Vec<UsbMidiPacket> {
        self.packets
            .iter()
            .copied()
            .filter(|p| p.cin().map(|c| c.is_channel_voice()).unwrap_or(false))
            .collect()
    }
}

impl MidiSink for CollectSink {
    fn send(&mut self, pkt: UsbMidiPacket) {
        self.packets.push(pkt);
    }
}

/// Collecting sink whose buffer stays inspectable after the engine takes
/// ownership of the sink box.
#[derive(Debug, Clone, Default)]
pub struct SharedSink {
    packets: std::rc::Rc<std::cell::RefCell<Vec<UsbMidiPacket>>>,
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<UsbMidiPacket> {
        std::mem::take(&mut self.packets.borrow_mut())
    }

    pub fn snapshot(&self) -> Vec<UsbMidiPacket> {
        self.packets.borrow().clone()
    }

    pub fn voice_packets(&self) -> Vec<UsbMidiPacket> {
        self.packets
            .borrow()
            .iter()
            .copied()
            .filter(|p| p.cin().map(|c| c.is_channel_voice()).unwrap_or(false))
            .collect()
    }
}

impl MidiSink for SharedSink {
    fn send(&mut self, pkt: UsbMidiPacket) {
        self.packets.borrow_mut().push(pkt);
    }
}

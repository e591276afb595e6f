pub mod abi;
pub mod manifest;
pub mod settings;
pub mod wire;

use serde::{Deserialize, Serialize};

/// Move hardware audio format: 44.1kHz stereo, 128-frame blocks (~2.9ms).
pub const SAMPLE_RATE: u32 = 44_100;
pub const FRAMES_PER_BLOCK: usize = 128;

/// Hardware mailbox layout (4096-byte shared page, swapped by ioctl).
pub const MAILBOX_SIZE: usize = 4096;
pub const MIDI_OUT_OFFSET: usize = 0;
pub const MIDI_BUFFER_SIZE: usize = 256;
pub const AUDIO_OUT_OFFSET: usize = 256;
pub const AUDIO_BYTES_PER_BLOCK: usize = FRAMES_PER_BLOCK * 2 * 2; // stereo i16
pub const DISPLAY_OFFSET: usize = 768;
pub const DISPLAY_REGION_SIZE: usize = 1280;
pub const MIDI_IN_OFFSET: usize = 2048;
pub const AUDIO_IN_OFFSET: usize = 2304;

/// USB-MIDI cable numbers used by the Move firmware.
/// Cable 0 carries the internal control surface (pads, knobs, buttons),
/// cable 2 the physical MIDI-in/out jacks.
pub const CABLE_INTERNAL: u8 = 0;
pub const CABLE_EXTERNAL: u8 = 2;

/// Pad note range on the internal surface (32 pads, 4 rows of 8).
pub const PAD_NOTE_FIRST: u8 = 68;
pub const PAD_NOTE_LAST: u8 = 99;

/// Control surface CC numbers consumed or tracked by the host.
pub const CC_JOG_CLICK: u8 = 3;
pub const CC_SHIFT: u8 = 49;
pub const CC_BACK: u8 = 51;
pub const CC_DOWN: u8 = 54;
pub const CC_UP: u8 = 55;
pub const CC_MASTER_KNOB: u8 = 79;

/// MIDI real-time bytes.
pub const MIDI_CLOCK: u8 = 0xF8;
pub const MIDI_START: u8 = 0xFA;
pub const MIDI_CONTINUE: u8 = 0xFB;
pub const MIDI_STOP: u8 = 0xFC;

/// Where a MIDI message entered (or was synthesized by) the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiSource {
    /// User hardware: pads, knobs, buttons (cable 0).
    Internal,
    /// Physical MIDI-in jack (cable 2).
    External,
    /// Synthesized by the host (e.g. MIDI clock).
    Host,
    /// Broadcast to all audio-FX slots irrespective of channel routing.
    FxBroadcast,
}

impl MidiSource {
    pub fn to_raw(self) -> i32 {
        match self {
            MidiSource::Internal => 0,
            MidiSource::External => 1,
            MidiSource::Host => 2,
            MidiSource::FxBroadcast => 3,
        }
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(MidiSource::Internal),
            1 => Some(MidiSource::External),
            2 => Some(MidiSource::Host),
            3 => Some(MidiSource::FxBroadcast),
            _ => None,
        }
    }
}

/// Code Index Number of a USB-MIDI packet (low nibble of byte 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cin {
    SysexStartOrContinue,
    SysexEndSingle,
    SysexEndTwo,
    SysexEndThree,
    NoteOff,
    NoteOn,
    PolyKeyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    SingleByte,
}

impl Cin {
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble & 0x0F {
            0x4 => Some(Cin::SysexStartOrContinue),
            0x5 => Some(Cin::SysexEndSingle),
            0x6 => Some(Cin::SysexEndTwo),
            0x7 => Some(Cin::SysexEndThree),
            0x8 => Some(Cin::NoteOff),
            0x9 => Some(Cin::NoteOn),
            0xA => Some(Cin::PolyKeyPressure),
            0xB => Some(Cin::ControlChange),
            0xC => Some(Cin::ProgramChange),
            0xD => Some(Cin::ChannelPressure),
            0xE => Some(Cin::PitchBend),
            0xF => Some(Cin::SingleByte),
            _ => None,
        }
    }

    pub fn to_nibble(self) -> u8 {
        match self {
            Cin::SysexStartOrContinue => 0x4,
            Cin::SysexEndSingle => 0x5,
            Cin::SysexEndTwo => 0x6,
            Cin::SysexEndThree => 0x7,
            Cin::NoteOff => 0x8,
            Cin::NoteOn => 0x9,
            Cin::PolyKeyPressure => 0xA,
            Cin::ControlChange => 0xB,
            Cin::ProgramChange => 0xC,
            Cin::ChannelPressure => 0xD,
            Cin::PitchBend => 0xE,
            Cin::SingleByte => 0xF,
        }
    }

    /// Channel voice messages carry three MIDI bytes the host can route.
    pub fn is_channel_voice(self) -> bool {
        matches!(
            self,
            Cin::NoteOff
                | Cin::NoteOn
                | Cin::PolyKeyPressure
                | Cin::ControlChange
                | Cin::ProgramChange
                | Cin::ChannelPressure
                | Cin::PitchBend
        )
    }
}

/// One 4-byte USB-MIDI packet: `[cable<<4 | CIN, status, data1, data2]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsbMidiPacket {
    pub bytes: [u8; 4],
}

impl UsbMidiPacket {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self { bytes }
    }

    pub fn channel_voice(cable: u8, status: u8, data1: u8, data2: u8) -> Self {
        let cin = (status >> 4) & 0x0F;
        Self { bytes: [(cable << 4) | cin, status, data1, data2] }
    }

    pub fn note_on(cable: u8, channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_voice(cable, 0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F)
    }

    pub fn note_off(cable: u8, channel: u8, note: u8) -> Self {
        Self::channel_voice(cable, 0x80 | (channel & 0x0F), note & 0x7F, 0x00)
    }

    pub fn control_change(cable: u8, channel: u8, cc: u8, value: u8) -> Self {
        Self::channel_voice(cable, 0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F)
    }

    /// Single-byte realtime message (clock, start, stop) on CIN 0xF.
    pub fn realtime(cable: u8, byte: u8) -> Self {
        Self { bytes: [(cable << 4) | 0x0F, byte, 0x00, 0x00] }
    }

    pub fn cable(&self) -> u8 {
        self.bytes[0] >> 4
    }

    pub fn cin(&self) -> Option<Cin> {
        Cin::from_nibble(self.bytes[0])
    }

    pub fn status(&self) -> u8 {
        self.bytes[1]
    }

    pub fn message_type(&self) -> u8 {
        self.bytes[1] & 0xF0
    }

    pub fn channel(&self) -> u8 {
        self.bytes[1] & 0x0F
    }

    pub fn data1(&self) -> u8 {
        self.bytes[2]
    }

    pub fn data2(&self) -> u8 {
        self.bytes[3]
    }

    /// An all-zero slot in a mailbox MIDI ring.
    pub fn is_empty(&self) -> bool {
        self.bytes == [0, 0, 0, 0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_roundtrip() {
        let p = UsbMidiPacket::note_on(CABLE_EXTERNAL, 3, 60, 100);
        assert_eq!(p.bytes, [0x29, 0x93, 0x3C, 0x64]);
        assert_eq!(p.cable(), 2);
        assert_eq!(p.cin(), Some(Cin::NoteOn));
        assert_eq!(p.channel(), 3);
        assert_eq!(p.data1(), 60);
        assert_eq!(p.data2(), 100);
    }

    #[test]
    fn realtime_packet() {
        let p = UsbMidiPacket::realtime(CABLE_EXTERNAL, MIDI_CLOCK);
        assert_eq!(p.bytes, [0x2F, 0xF8, 0x00, 0x00]);
        assert_eq!(p.cin(), Some(Cin::SingleByte));
        assert!(!p.cin().unwrap().is_channel_voice());
    }

    #[test]
    fn note_off_packet() {
        let p = UsbMidiPacket::note_off(CABLE_EXTERNAL, 0, 60);
        assert_eq!(p.bytes, [0x28, 0x80, 0x3C, 0x00]);
    }

    #[test]
    fn mailbox_regions_do_not_overlap() {
        assert!(MIDI_OUT_OFFSET + MIDI_BUFFER_SIZE <= AUDIO_OUT_OFFSET);
        assert!(AUDIO_OUT_OFFSET + AUDIO_BYTES_PER_BLOCK <= DISPLAY_OFFSET);
        assert!(DISPLAY_OFFSET + DISPLAY_REGION_SIZE <= MIDI_IN_OFFSET);
        assert!(MIDI_IN_OFFSET + MIDI_BUFFER_SIZE <= AUDIO_IN_OFFSET);
        assert!(AUDIO_IN_OFFSET + AUDIO_BYTES_PER_BLOCK <= MAILBOX_SIZE);
    }

    #[test]
    fn midi_source_raw_roundtrip() {
        for src in [
            MidiSource::Internal,
            MidiSource::External,
            MidiSource::Host,
            MidiSource::FxBroadcast,
        ] {
            assert_eq!(MidiSource::from_raw(src.to_raw()), Some(src));
        }
        assert_eq!(MidiSource::from_raw(9), None);
    }
}

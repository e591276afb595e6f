//! Host settings: persistent user preferences for MIDI behavior.
//!
//! Stored as line-oriented `key=value` (comments start with `#`). Unknown
//! keys are ignored, out-of-range values clamp, so older files keep
//! loading after upgrades.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VelocityCurve {
    Linear,
    Soft,
    Hard,
    Full,
}

impl VelocityCurve {
    pub fn name(self) -> &'static str {
        match self {
            VelocityCurve::Linear => "linear",
            VelocityCurve::Soft => "soft",
            VelocityCurve::Hard => "hard",
            VelocityCurve::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "linear" => Some(VelocityCurve::Linear),
            "soft" => Some(VelocityCurve::Soft),
            "hard" => Some(VelocityCurve::Hard),
            "full" => Some(VelocityCurve::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PadLayout {
    /// Rows ascend by an octave (semitone-contiguous pads).
    Chromatic,
    /// Rows ascend by a fourth, like a string instrument.
    Fourth,
}

impl PadLayout {
    pub fn name(self) -> &'static str {
        match self {
            PadLayout::Chromatic => "chromatic",
            PadLayout::Fourth => "fourth",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chromatic" => Some(PadLayout::Chromatic),
            "fourth" => Some(PadLayout::Fourth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockMode {
    Off,
    Internal,
    External,
}

impl ClockMode {
    pub fn name(self) -> &'static str {
        match self {
            ClockMode::Off => "off",
            ClockMode::Internal => "internal",
            ClockMode::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ClockMode::Off),
            "internal" => Some(ClockMode::Internal),
            "external" => Some(ClockMode::External),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    pub velocity_curve: VelocityCurve,
    pub aftertouch_enabled: bool,
    /// Aftertouch values below this are squashed to 0 (0-50).
    pub aftertouch_deadzone: u8,
    pub pad_layout: PadLayout,
    pub clock_mode: ClockMode,
    pub tempo_bpm: u16,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            velocity_curve: VelocityCurve::Linear,
            aftertouch_enabled: true,
            aftertouch_deadzone: 0,
            pad_layout: PadLayout::Chromatic,
            clock_mode: ClockMode::Internal,
            tempo_bpm: 120,
        }
    }
}

impl HostSettings {
    /// Load from a settings file. A missing file yields defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(_) => {
                log::info!("settings: no settings file at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut s = Self::default();
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            s.apply(key, val);
        }
        s
    }

    /// Apply one key=value pair. Unknown keys and unparsable values are
    /// ignored; numeric values clamp into range.
    pub fn apply(&mut self, key: &str, val: &str) {
        match key {
            "velocity_curve" => {
                if let Some(c) = VelocityCurve::parse(val) {
                    self.velocity_curve = c;
                }
            }
            "aftertouch_enabled" => {
                if let Ok(n) = val.parse::<i32>() {
                    self.aftertouch_enabled = n != 0;
                }
            }
            "aftertouch_deadzone" => {
                if let Ok(n) = val.parse::<i64>() {
                    self.aftertouch_deadzone = n.clamp(0, 50) as u8;
                }
            }
            "pad_layout" => {
                if let Some(l) = PadLayout::parse(val) {
                    self.pad_layout = l;
                }
            }
            "clock_mode" => {
                if let Some(m) = ClockMode::parse(val) {
                    self.clock_mode = m;
                }
            }
            "tempo_bpm" => {
                if let Ok(n) = val.parse::<i64>() {
                    self.tempo_bpm = n.clamp(20, 300) as u16;
                }
            }
            _ => {}
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut f = std::fs::File::create(path)?;
        writeln!(f, "velocity_curve={}", self.velocity_curve.name())?;
        writeln!(f, "aftertouch_enabled={}", self.aftertouch_enabled as u8)?;
        writeln!(f, "aftertouch_deadzone={}", self.aftertouch_deadzone)?;
        writeln!(f, "pad_layout={}", self.pad_layout.name())?;
        writeln!(f, "clock_mode={}", self.clock_mode.name())?;
        writeln!(f, "tempo_bpm={}", self.tempo_bpm)?;
        Ok(())
    }

    /// Velocity curve transform for note-on. Velocity 0 passes untouched
    /// (it is a running-status note-off).
    pub fn apply_velocity(&self, velocity: u8) -> u8 {
        if velocity == 0 {
            return 0;
        }
        match self.velocity_curve {
            VelocityCurve::Linear => velocity,
            VelocityCurve::Soft => 64 + velocity / 2,
            VelocityCurve::Hard => ((velocity as u16 * velocity as u16) / 127) as u8,
            VelocityCurve::Full => 127,
        }
    }

    /// Aftertouch gate: `None` means drop the message entirely, otherwise
    /// the (possibly deadzoned) value to forward.
    pub fn apply_aftertouch(&self, value: u8) -> Option<u8> {
        if !self.aftertouch_enabled {
            return None;
        }
        if value < self.aftertouch_deadzone {
            Some(0)
        } else {
            Some(value)
        }
    }

    /// Pad layout remap for pad notes 68-99. Fourth layout maps pad
    /// `68 + 8*row + col` to `60 + 5*row + col`.
    pub fn remap_pad(&self, note: u8) -> u8 {
        match self.pad_layout {
            PadLayout::Chromatic => note,
            PadLayout::Fourth => {
                let pad = note - crate::PAD_NOTE_FIRST;
                let row = pad / 8;
                let col = pad % 8;
                60 + row * 5 + col
            }
        }
    }
}

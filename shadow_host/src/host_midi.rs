//! Host-level MIDI processing: input transforms and system shortcuts.
//!
//! Runs over cable-0 (internal surface) messages before they reach the
//! UI layer and the loaded module. Transforms mutate the message in
//! place; shortcuts consume it.

use shadow_shared::settings::HostSettings;
use shadow_shared::{
    CC_BACK, CC_DOWN, CC_JOG_CLICK, CC_MASTER_KNOB, CC_SHIFT, CC_UP, PAD_NOTE_FIRST, PAD_NOTE_LAST,
};

pub const TRANSPOSE_MIN: i32 = -48;
pub const TRANSPOSE_MAX: i32 = 48;

/// Shortcut state that persists across messages.
#[derive(Debug, Default)]
pub struct HostMidiState {
    pub shift_held: bool,
    /// Semitone transpose applied to pad notes.
    pub transpose: i32,
}

/// What the host decided about one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiOutcome {
    /// Forward the (possibly transformed) message.
    Pass,
    /// Swallow it silently (e.g. aftertouch disabled).
    Drop,
    Consumed(HostEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// Shift+Wheel chord: exit the host cleanly.
    Exit,
    /// Back button: reload the menu UI.
    ReturnToMenu,
    /// Master knob turned; delta already has the acceleration curve.
    VolumeDelta(i32),
    /// Shift+Up/Down changed the live transpose.
    Transposed(i32),
}

/// Notes on cable 0 that are controls, not playable pads: capacitive
/// touch (0-9), step buttons (16-31), track buttons (40-43).
pub fn is_internal_control_note(note: u8) -> bool {
    note < 10 || (16..=31).contains(&note) || (40..=43).contains(&note)
}

/// Relative-encoder acceleration: 1-63 clockwise, 65-127 counter-
/// clockwise, faster turns jump further.
fn encoder_delta(value: u8) -> i32 {
    match value {
        1..=63 => match value {
            v if v > 10 => 5,
            v if v > 3 => 2,
            _ => 1,
        },
        65..=127 => {
            let speed = 128 - value as i32;
            match speed {
                s if s > 10 => -5,
                s if s > 3 => -2,
                _ => -1,
            }
        }
        _ => 0,
    }
}

/// Context about the loaded module that changes routing decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleFlags {
    pub loaded: bool,
    pub claims_master_knob: bool,
    pub raw_ui: bool,
}

/// Process one cable-0 message. `msg` is `[status, data1, data2]` and is
/// transformed in place when `apply_transforms` is set (modules that
/// want raw MIDI skip transforms entirely).
pub fn process_host_midi(
    state: &mut HostMidiState,
    settings: &HostSettings,
    msg: &mut [u8; 3],
    apply_transforms: bool,
    module: ModuleFlags,
) -> MidiOutcome {
    let msg_type = msg[0] & 0xF0;

    if apply_transforms {
        // Velocity curve for note-on (velocity 0 untouched).
        if msg_type == 0x90 && msg[2] > 0 {
            msg[2] = settings.apply_velocity(msg[2]);
        }

        // Aftertouch gate: poly (value in data2) and channel (data1).
        if msg_type == 0xA0 || msg_type == 0xD0 {
            let value = if msg_type == 0xA0 { msg[2] } else { msg[1] };
            match settings.apply_aftertouch(value) {
                None => return MidiOutcome::Drop,
                Some(v) => {
                    if msg_type == 0xA0 {
                        msg[2] = v;
                    } else {
                        msg[1] = v;
                    }
                }
            }
        }

        // Pad layout and live transpose on playable pads only.
        if (msg_type == 0x90 || msg_type == 0x80)
            && (PAD_NOTE_FIRST..=PAD_NOTE_LAST).contains(&msg[1])
        {
            let mut note = settings.remap_pad(msg[1]) as i32;
            note += state.transpose;
            msg[1] = note.clamp(0, 127) as u8;
        }
    }

    if msg_type != 0xB0 {
        return MidiOutcome::Pass;
    }

    let cc = msg[1];
    let value = msg[2];

    // Shift is tracked but still forwarded so modules can track it too.
    if cc == CC_SHIFT {
        state.shift_held = value == 127;
        return MidiOutcome::Pass;
    }

    if cc == CC_JOG_CLICK && value == 127 && state.shift_held {
        return MidiOutcome::Consumed(HostEvent::Exit);
    }

    if cc == CC_BACK && value == 127 && module.loaded && !module.raw_ui {
        return MidiOutcome::Consumed(HostEvent::ReturnToMenu);
    }

    if cc == CC_MASTER_KNOB && !module.claims_master_knob {
        let delta = encoder_delta(value);
        if delta != 0 {
            return MidiOutcome::Consumed(HostEvent::VolumeDelta(delta));
        }
        return MidiOutcome::Consumed(HostEvent::VolumeDelta(0));
    }

    if state.shift_held && value == 127 {
        if cc == CC_UP {
            if state.transpose < TRANSPOSE_MAX {
                state.transpose += 1;
            }
            return MidiOutcome::Consumed(HostEvent::Transposed(state.transpose));
        }
        if cc == CC_DOWN {
            if state.transpose > TRANSPOSE_MIN {
                state.transpose -= 1;
            }
            return MidiOutcome::Consumed(HostEvent::Transposed(state.transpose));
        }
    }

    MidiOutcome::Pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadow_shared::settings::{PadLayout, VelocityCurve};

    fn setup() -> (HostMidiState, HostSettings) {
        (HostMidiState::default(), HostSettings::default())
    }

    #[test]
    fn velocity_curve_applies_to_note_on() {
        let (mut state, mut settings) = setup();
        settings.velocity_curve = VelocityCurve::Full;
        let mut msg = [0x90, 70, 40];
        assert_eq!(
            process_host_midi(&mut state, &settings, &mut msg, true, ModuleFlags::default()),
            MidiOutcome::Pass
        );
        assert_eq!(msg[2], 127);

        // Raw-midi modules skip transforms.
        let mut msg = [0x90, 70, 40];
        process_host_midi(&mut state, &settings, &mut msg, false, ModuleFlags::default());
        assert_eq!(msg[2], 40);
    }

    #[test]
    fn disabled_aftertouch_is_dropped() {
        let (mut state, mut settings) = setup();
        settings.aftertouch_enabled = false;
        let mut poly = [0xA0, 70, 60];
        assert_eq!(
            process_host_midi(&mut state, &settings, &mut poly, true, ModuleFlags::default()),
            MidiOutcome::Drop
        );

        settings.aftertouch_enabled = true;
        settings.aftertouch_deadzone = 30;
        let mut channel = [0xD0, 20, 0];
        process_host_midi(&mut state, &settings, &mut channel, true, ModuleFlags::default());
        assert_eq!(channel[1], 0); // below deadzone squashes to 0
    }

    #[test]
    fn fourth_layout_and_transpose_remap_pads() {
        let (mut state, mut settings) = setup();
        settings.pad_layout = PadLayout::Fourth;
        state.transpose = 2;

        let mut msg = [0x90, 76, 100]; // pad row 1, col 0
        process_host_midi(&mut state, &settings, &mut msg, true, ModuleFlags::default());
        assert_eq!(msg[1], 65 + 2);

        // Notes outside the pad range are untouched.
        let mut msg = [0x90, 40, 100];
        process_host_midi(&mut state, &settings, &mut msg, true, ModuleFlags::default());
        assert_eq!(msg[1], 40);
    }

    #[test]
    fn shift_wheel_exits() {
        let (mut state, settings) = setup();
        let mut shift = [0xB0, CC_SHIFT, 127];
        assert_eq!(
            process_host_midi(&mut state, &settings, &mut shift, true, ModuleFlags::default()),
            MidiOutcome::Pass
        );
        assert!(state.shift_held);

        let mut click = [0xB0, CC_JOG_CLICK, 127];
        assert_eq!(
            process_host_midi(&mut state, &settings, &mut click, true, ModuleFlags::default()),
            MidiOutcome::Consumed(HostEvent::Exit)
        );

        // Without shift the click passes through.
        let mut release = [0xB0, CC_SHIFT, 0];
        process_host_midi(&mut state, &settings, &mut release, true, ModuleFlags::default());
        let mut click = [0xB0, CC_JOG_CLICK, 127];
        assert_eq!(
            process_host_midi(&mut state, &settings, &mut click, true, ModuleFlags::default()),
            MidiOutcome::Pass
        );
    }

    #[test]
    fn back_returns_to_menu_unless_module_owns_ui() {
        let (mut state, settings) = setup();
        let mut back = [0xB0, CC_BACK, 127];

        let owned = ModuleFlags { loaded: true, raw_ui: true, ..Default::default() };
        assert_eq!(
            process_host_midi(&mut state, &settings, &mut back, true, owned),
            MidiOutcome::Pass
        );

        let normal = ModuleFlags { loaded: true, ..Default::default() };
        assert_eq!(
            process_host_midi(&mut state, &settings, &mut back, true, normal),
            MidiOutcome::Consumed(HostEvent::ReturnToMenu)
        );
    }

    #[test]
    fn master_knob_acceleration() {
        let (mut state, settings) = setup();
        for (value, delta) in [(1u8, 1i32), (5, 2), (20, 5), (127, -1), (124, -2), (100, -5)] {
            let mut msg = [0xB0, CC_MASTER_KNOB, value];
            assert_eq!(
                process_host_midi(&mut state, &settings, &mut msg, true, ModuleFlags::default()),
                MidiOutcome::Consumed(HostEvent::VolumeDelta(delta)),
                "value {value}"
            );
        }

        // A module claiming the knob sees the CC itself.
        let claims = ModuleFlags { loaded: true, claims_master_knob: true, ..Default::default() };
        let mut msg = [0xB0, CC_MASTER_KNOB, 5];
        assert_eq!(
            process_host_midi(&mut state, &settings, &mut msg, true, claims),
            MidiOutcome::Pass
        );
    }

    #[test]
    fn shift_up_down_transposes_with_bounds() {
        let (mut state, settings) = setup();
        let mut shift = [0xB0, CC_SHIFT, 127];
        process_host_midi(&mut state, &settings, &mut shift, true, ModuleFlags::default());

        let mut up = [0xB0, CC_UP, 127];
        assert_eq!(
            process_host_midi(&mut state, &settings, &mut up, true, ModuleFlags::default()),
            MidiOutcome::Consumed(HostEvent::Transposed(1))
        );

        state.transpose = TRANSPOSE_MAX;
        let mut up = [0xB0, CC_UP, 127];
        process_host_midi(&mut state, &settings, &mut up, true, ModuleFlags::default());
        assert_eq!(state.transpose, TRANSPOSE_MAX);

        state.transpose = TRANSPOSE_MIN;
        let mut down = [0xB0, CC_DOWN, 127];
        process_host_midi(&mut state, &settings, &mut down, true, ModuleFlags::default());
        assert_eq!(state.transpose, TRANSPOSE_MIN);
    }

    #[test]
    fn internal_control_notes() {
        assert!(is_internal_control_note(0));
        assert!(is_internal_control_note(9));
        assert!(!is_internal_control_note(10));
        assert!(is_internal_control_note(16));
        assert!(is_internal_control_note(31));
        assert!(is_internal_control_note(40));
        assert!(is_internal_control_note(43));
        assert!(!is_internal_control_note(68));
    }
}

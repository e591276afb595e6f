//! The string-keyed parameter surface.
//!
//! Hierarchical keys like `track_3_step_7_gate` arrive from the UI layer
//! as strings. Parsing happens once, here, into typed keys; the engine
//! applies typed keys only. Unrecognized keys parse to `None` and writes
//! with out-of-range values are ignored at apply time.

/// A fully parsed parameter address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKey {
    Global(GlobalKey),
    /// Newline-delimited `key\nvalue` pairs applied in order.
    BulkSet,
    Track(usize, TrackKey),
    Step { track: usize, step: usize, key: StepKey },
    Transpose(TransposeKey),
    /// Immediate CC transmit: `send_cc_CH_CC = value`.
    SendCc { channel: u8, cc: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKey {
    Bpm,
    Playing,
    SendClock,
    MasterReset,
    CurrentTranspose,
    LiveTranspose,
    NumTracks,
    BeatCount,
    /// Legacy read: track 0's current step.
    CurrentStep,
    DetectedScaleRoot,
    DetectedScaleName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKey {
    Channel,
    Mute,
    Length,
    Speed,
    Swing,
    ChordFollow,
    ArpMode,
    ArpSpeed,
    ArpOctave,
    LoopStart,
    LoopEnd,
    Pattern,
    CurrentStep,
    PreviewVelocity,
    PreviewNote,
    PreviewNoteOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKey {
    Note,
    Notes,
    NumNotes,
    Vel,
    Velocity,
    VelocityDelta,
    AddNote,
    RemoveNote,
    Clear,
    Gate,
    Cc1,
    Cc2,
    Probability,
    ConditionN,
    ConditionM,
    ConditionNot,
    ParamSparkN,
    ParamSparkM,
    ParamSparkNot,
    CompSparkN,
    CompSparkM,
    CompSparkNot,
    Jump,
    Ratchet,
    Length,
    Offset,
    ArpMode,
    ArpSpeed,
    ArpLayer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransposeKey {
    Clear,
    SequenceEnabled,
    StepCount,
    TotalSteps,
    /// Virtual playhead position (after jumps), read-only.
    CurrentStep,
    Step { idx: usize, field: TransposeField },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransposeField {
    Transpose,
    Duration,
    Jump,
    ConditionN,
    ConditionM,
    ConditionNot,
}

/// Split `"<digits>_rest"` into the index and the rest.
fn split_index(s: &str) -> Option<(usize, &str)> {
    let underscore = s.find('_')?;
    let idx: usize = s[..underscore].parse().ok()?;
    Some((idx, &s[underscore + 1..]))
}

fn parse_step_key(s: &str) -> Option<StepKey> {
    Some(match s {
        "note" => StepKey::Note,
        "notes" => StepKey::Notes,
        "num_notes" => StepKey::NumNotes,
        "vel" => StepKey::Vel,
        "velocity" => StepKey::Velocity,
        "velocity_delta" => StepKey::VelocityDelta,
        "add_note" => StepKey::AddNote,
        "remove_note" => StepKey::RemoveNote,
        "clear" => StepKey::Clear,
        "gate" => StepKey::Gate,
        "cc1" => StepKey::Cc1,
        "cc2" => StepKey::Cc2,
        "probability" => StepKey::Probability,
        "condition_n" => StepKey::ConditionN,
        "condition_m" => StepKey::ConditionM,
        "condition_not" => StepKey::ConditionNot,
        "param_spark_n" => StepKey::ParamSparkN,
        "param_spark_m" => StepKey::ParamSparkM,
        "param_spark_not" => StepKey::ParamSparkNot,
        "comp_spark_n" => StepKey::CompSparkN,
        "comp_spark_m" => StepKey::CompSparkM,
        "comp_spark_not" => StepKey::CompSparkNot,
        "jump" => StepKey::Jump,
        "ratchet" => StepKey::Ratchet,
        "length" => StepKey::Length,
        "offset" => StepKey::Offset,
        "arp_mode" => StepKey::ArpMode,
        "arp_speed" => StepKey::ArpSpeed,
        "arp_layer" => StepKey::ArpLayer,
        _ => return None,
    })
}

fn parse_track_rest(track: usize, rest: &str) -> Option<ParamKey> {
    if let Some(step_rest) = rest.strip_prefix("step_") {
        let (step, field) = split_index(step_rest)?;
        if step >= crate::track::NUM_STEPS {
            return None;
        }
        return Some(ParamKey::Step { track, step, key: parse_step_key(field)? });
    }

    let key = match rest {
        "channel" => TrackKey::Channel,
        "mute" => TrackKey::Mute,
        "length" => TrackKey::Length,
        "speed" => TrackKey::Speed,
        "swing" => TrackKey::Swing,
        "chord_follow" => TrackKey::ChordFollow,
        "arp_mode" => TrackKey::ArpMode,
        "arp_speed" => TrackKey::ArpSpeed,
        "arp_octave" => TrackKey::ArpOctave,
        "loop_start" => TrackKey::LoopStart,
        "loop_end" => TrackKey::LoopEnd,
        "pattern" => TrackKey::Pattern,
        "current_step" => TrackKey::CurrentStep,
        "preview_velocity" => TrackKey::PreviewVelocity,
        "preview_note" => TrackKey::PreviewNote,
        "preview_note_off" => TrackKey::PreviewNoteOff,
        _ => return None,
    };
    Some(ParamKey::Track(track, key))
}

/// Parse one string key into its typed address.
pub fn parse(key: &str) -> Option<ParamKey> {
    match key {
        "bulk_set" => return Some(ParamKey::BulkSet),
        "bpm" => return Some(ParamKey::Global(GlobalKey::Bpm)),
        "playing" => return Some(ParamKey::Global(GlobalKey::Playing)),
        "send_clock" => return Some(ParamKey::Global(GlobalKey::SendClock)),
        "master_reset" => return Some(ParamKey::Global(GlobalKey::MasterReset)),
        "current_transpose" => return Some(ParamKey::Global(GlobalKey::CurrentTranspose)),
        "live_transpose" => return Some(ParamKey::Global(GlobalKey::LiveTranspose)),
        "num_tracks" => return Some(ParamKey::Global(GlobalKey::NumTracks)),
        "beat_count" => return Some(ParamKey::Global(GlobalKey::BeatCount)),
        "current_step" => return Some(ParamKey::Global(GlobalKey::CurrentStep)),
        "detected_scale_root" => return Some(ParamKey::Global(GlobalKey::DetectedScaleRoot)),
        "detected_scale_name" => return Some(ParamKey::Global(GlobalKey::DetectedScaleName)),
        "transpose_clear" => return Some(ParamKey::Transpose(TransposeKey::Clear)),
        "transpose_sequence_enabled" => {
            return Some(ParamKey::Transpose(TransposeKey::SequenceEnabled))
        }
        "transpose_step_count" => return Some(ParamKey::Transpose(TransposeKey::StepCount)),
        "transpose_total_steps" => return Some(ParamKey::Transpose(TransposeKey::TotalSteps)),
        "current_transpose_step" => return Some(ParamKey::Transpose(TransposeKey::CurrentStep)),
        _ => {}
    }

    if let Some(rest) = key.strip_prefix("transpose_step_") {
        let (idx, field) = split_index(rest)?;
        let field = match field {
            "transpose" => TransposeField::Transpose,
            "duration" => TransposeField::Duration,
            "jump" => TransposeField::Jump,
            "condition_n" => TransposeField::ConditionN,
            "condition_m" => TransposeField::ConditionM,
            "condition_not" => TransposeField::ConditionNot,
            _ => return None,
        };
        return Some(ParamKey::Transpose(TransposeKey::Step { idx, field }));
    }

    if let Some(rest) = key.strip_prefix("send_cc_") {
        let (channel, cc_str) = split_index(rest)?;
        let cc: u8 = cc_str.parse().ok()?;
        if channel <= 15 && cc <= 127 {
            return Some(ParamKey::SendCc { channel: channel as u8, cc });
        }
        return None;
    }

    if let Some(rest) = key.strip_prefix("track_") {
        let (track, field) = split_index(rest)?;
        if track >= crate::track::NUM_TRACKS {
            return None;
        }
        return parse_track_rest(track, field);
    }

    // Legacy single-track addressing: step_S_note edits track 0.
    if let Some(rest) = key.strip_prefix("step_") {
        let (step, field) = split_index(rest)?;
        if step < crate::track::NUM_STEPS && field == "note" {
            return Some(ParamKey::Step { track: 0, step, key: StepKey::Note });
        }
        return None;
    }

    None
}

/// Iterate the `key\nvalue` pairs of a bulk_set payload. Nested
/// `bulk_set` keys are skipped to keep the recursion guarded.
pub fn bulk_pairs(payload: &str) -> impl Iterator<Item = (&str, &str)> {
    let mut lines = payload.split('\n');
    std::iter::from_fn(move || loop {
        let key = lines.next()?;
        let val = lines.next()?;
        if key.is_empty() || key == "bulk_set" {
            continue;
        }
        return Some((key, val));
    })
}

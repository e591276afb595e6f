//! End-to-end sequencer scenarios driven through the parameter surface,
//! with MIDI captured by a shared sink exactly as the host would see it.

use shadow_seq::midi_out::SharedSink;
use shadow_seq::SequencerEngine;
use shadow_shared::{UsbMidiPacket, FRAMES_PER_BLOCK};

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

fn engine_with_sink() -> (SequencerEngine, SharedSink) {
    let sink = SharedSink::new();
    let engine = SequencerEngine::new(Box::new(sink.clone()));
    (engine, sink)
}

fn run_block(engine: &mut SequencerEngine) {
    let mut buf = [0i16; FRAMES_PER_BLOCK * 2];
    engine.render_block(&mut buf, FRAMES_PER_BLOCK);
}

/// Render `blocks` blocks, returning each voice packet tagged with the
/// block index it was emitted in.
fn run_and_collect(
    engine: &mut SequencerEngine,
    sink: &SharedSink,
    blocks: usize,
) -> Vec<(usize, UsbMidiPacket)> {
    let mut out = Vec::new();
    for block in 0..blocks {
        run_block(engine);
        for pkt in sink.take() {
            if pkt.cin().map(|c| c.is_channel_voice()).unwrap_or(false) {
                out.push((block, pkt));
            }
        }
    }
    out
}

fn ons(events: &[(usize, UsbMidiPacket)]) -> Vec<(usize, UsbMidiPacket)> {
    events
        .iter()
        .copied()
        .filter(|(_, p)| p.message_type() == NOTE_ON && p.data2() > 0)
        .collect()
}

fn offs(events: &[(usize, UsbMidiPacket)]) -> Vec<(usize, UsbMidiPacket)> {
    events.iter().copied().filter(|(_, p)| p.message_type() == NOTE_OFF).collect()
}

/// Samples-to-block index for an event expected at a given step phase.
fn block_of_phase(phase: f64) -> usize {
    // 120 BPM: 8 steps/sec at 44.1kHz = 5512.5 samples per step.
    (phase * 5512.5 / FRAMES_PER_BLOCK as f64) as usize
}

#[test]
fn simple_sequence_emits_one_on_off_pair() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("send_clock", "0");
    engine.set_param("track_0_step_0_add_note", "60,100");
    engine.set_param("track_0_step_0_gate", "50");
    engine.set_param("track_0_step_0_length", "1");
    engine.set_param("playing", "1");
    sink.take(); // drop anything from the play transition

    // 100 blocks is well short of the 16-step loop point.
    let events = run_and_collect(&mut engine, &sink, 100);
    let ons = ons(&events);
    let offs = offs(&events);

    assert_eq!(ons.len(), 1);
    assert_eq!(offs.len(), 1);
    // Step 0 fires at phase 0: the very first block.
    assert_eq!(ons[0].0, 0);
    assert_eq!(ons[0].1.bytes, [0x29, 0x90, 0x3C, 0x64]);
    // Gate 50% of one step = 2756 samples.
    assert_eq!(offs[0].0, block_of_phase(0.5));
    assert_eq!(offs[0].1.bytes, [0x28, 0x80, 0x3C, 0x00]);
}

#[test]
fn flat_ratchet_subdivides_evenly() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("send_clock", "0");
    engine.set_param("track_0_step_0_add_note", "60,100");
    engine.set_param("track_0_step_0_gate", "100");
    engine.set_param("track_0_step_0_length", "2");
    engine.set_param("track_0_step_0_ratchet", "4");
    engine.set_param("playing", "1");
    sink.take();

    let events = run_and_collect(&mut engine, &sink, 120);
    let ons = ons(&events);
    assert_eq!(ons.len(), 4);

    // Sub-triggers land 0.5 steps apart, all at full velocity.
    for (r, (block, pkt)) in ons.iter().enumerate() {
        assert_eq!(pkt.data2(), 100);
        let expected = block_of_phase(r as f64 * 0.5);
        assert!(block.abs_diff(expected) <= 1, "ratchet {r} at block {block}, expected ~{expected}");
    }

    // Every sub-trigger also closes: 4 offs, each ~0.5 steps after its on.
    let offs = offs(&events);
    assert_eq!(offs.len(), 4);
}

#[test]
fn ramp_up_ratchet_scales_velocity() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("send_clock", "0");
    engine.set_param("track_0_step_0_add_note", "60,100");
    engine.set_param("track_0_step_0_gate", "100");
    engine.set_param("track_0_step_0_length", "2");
    engine.set_param("track_0_step_0_ratchet", "10"); // ramp-up, 2x
    engine.set_param("playing", "1");
    sink.take();

    let events = run_and_collect(&mut engine, &sink, 120);
    let velocities: Vec<u8> = ons(&events).iter().map(|(_, p)| p.data2()).collect();
    assert_eq!(velocities, vec![50, 100]);
}

#[test]
fn conflicting_note_is_truncated_not_stacked() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("send_clock", "0");
    // Step 0 holds note 60 across four steps; step 1 retriggers it.
    engine.set_param("track_0_step_0_add_note", "60,100");
    engine.set_param("track_0_step_0_gate", "100");
    engine.set_param("track_0_step_0_length", "4");
    engine.set_param("track_0_step_1_add_note", "60,100");
    engine.set_param("track_0_step_1_gate", "100");
    engine.set_param("playing", "1");
    sink.take();

    let events = run_and_collect(&mut engine, &sink, 150);
    let kinds: Vec<u8> = events.iter().map(|(_, p)| p.message_type()).collect();
    // Strict alternation: on, off, on, off. Never two sounding at once.
    assert_eq!(kinds, vec![NOTE_ON, NOTE_OFF, NOTE_ON, NOTE_OFF]);

    // The truncated off lands at step 1, not at the original 4-step end.
    let first_off_block = offs(&events)[0].0;
    assert!(first_off_block.abs_diff(block_of_phase(1.0)) <= 1);
}

#[test]
fn transpose_sequence_shifts_chord_follow_tracks() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("send_clock", "0");

    // Track 4 is chord-follow by default; note 60 on every step.
    for step in 0..16 {
        engine.set_param(&format!("track_4_step_{step}_add_note"), "60,100");
        engine.set_param(&format!("track_4_step_{step}_gate"), "50");
    }

    // +7 for 12 steps, then +12 for 12 steps.
    engine.set_param("transpose_step_0_transpose", "7");
    engine.set_param("transpose_step_0_duration", "12");
    engine.set_param("transpose_step_1_transpose", "12");
    engine.set_param("transpose_step_1_duration", "12");
    engine.set_param("transpose_step_count", "2");

    engine.set_param("playing", "1");
    sink.take();

    // ~36 steps of playback; one note-on per global step, in order.
    let events = run_and_collect(&mut engine, &sink, block_of_phase(36.5));
    let notes: Vec<u8> = ons(&events).iter().map(|(_, p)| p.data1()).collect();
    assert!(notes.len() >= 35);

    // Sample away from the boundaries: the scheduler sweep may land a
    // block after the boundary itself.
    for step in 2..10 {
        assert_eq!(notes[step], 67, "step {step}");
    }
    for step in 14..22 {
        assert_eq!(notes[step], 72, "step {step}");
    }
    for step in 26..34 {
        assert_eq!(notes[step], 67, "step {step}");
    }
}

#[test]
fn transpose_jump_diverges_from_linear_time() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("send_clock", "0");

    for step in 0..16 {
        engine.set_param(&format!("track_4_step_{step}_add_note"), "60,100");
        engine.set_param(&format!("track_4_step_{step}_gate"), "50");
    }

    // Three steps of 4; step 2 jumps back to step 1, so after the first
    // pass the playhead cycles 1-2-1-2 and never returns to +0.
    engine.set_param("transpose_step_0_transpose", "0");
    engine.set_param("transpose_step_0_duration", "4");
    engine.set_param("transpose_step_1_transpose", "5");
    engine.set_param("transpose_step_1_duration", "4");
    engine.set_param("transpose_step_2_transpose", "10");
    engine.set_param("transpose_step_2_duration", "4");
    engine.set_param("transpose_step_2_jump", "1");
    engine.set_param("transpose_step_count", "3");

    engine.set_param("playing", "1");
    sink.take();

    let events = run_and_collect(&mut engine, &sink, block_of_phase(22.5));
    let notes: Vec<u8> = ons(&events).iter().map(|(_, p)| p.data1()).collect();

    assert_eq!(notes[2], 60); // +0 band
    assert_eq!(notes[6], 65); // +5 band
    assert_eq!(notes[10], 70); // +10 band
    // Linear time would put steps 12-15 back at +0; the jump keeps +5.
    assert_eq!(notes[14], 65);
    assert_eq!(notes[18], 70);
}

#[test]
fn live_transpose_overrides_sequence_at_send_time() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("send_clock", "0");
    for step in 0..16 {
        engine.set_param(&format!("track_4_step_{step}_add_note"), "60,100");
        engine.set_param(&format!("track_4_step_{step}_gate"), "50");
    }
    engine.set_param("transpose_step_0_transpose", "7");
    engine.set_param("transpose_step_0_duration", "64");
    engine.set_param("transpose_step_count", "1");
    engine.set_param("playing", "1");
    sink.take();

    let events = run_and_collect(&mut engine, &sink, block_of_phase(4.5));
    let notes: Vec<u8> = ons(&events).iter().map(|(_, p)| p.data1()).collect();
    assert_eq!(notes[2], 67);

    // Live transpose takes precedence immediately.
    engine.set_param("live_transpose", "3");
    sink.take();
    let events = run_and_collect(&mut engine, &sink, block_of_phase(4.5));
    let notes: Vec<u8> = ons(&events).iter().map(|(_, p)| p.data1()).collect();
    assert!(notes.iter().skip(1).all(|&n| n == 63), "{notes:?}");

    // Clearing it falls back to the sequence.
    engine.set_param("live_transpose", "0");
    sink.take();
    let events = run_and_collect(&mut engine, &sink, block_of_phase(4.5));
    let notes: Vec<u8> = ons(&events).iter().map(|(_, p)| p.data1()).collect();
    assert!(notes.iter().skip(1).all(|&n| n == 67), "{notes:?}");
}

#[test]
fn stop_sends_all_notes_off_and_midi_stop() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("track_0_step_0_add_note", "60,100");
    engine.set_param("track_0_step_0_gate", "100");
    engine.set_param("track_0_step_0_length", "16");
    engine.set_param("playing", "1");
    sink.take();

    run_block(&mut engine);
    sink.take(); // the note-on

    engine.set_param("playing", "0");
    let packets = sink.take();
    // Note-off for the sounding note, then MIDI Stop (0xFC).
    assert!(packets.iter().any(|p| p.message_type() == NOTE_OFF && p.data1() == 60));
    assert_eq!(packets.last().unwrap().bytes[1], 0xFC);

    // Rendering while stopped emits nothing further.
    run_block(&mut engine);
    assert!(sink.take().is_empty());
}

#[test]
fn play_start_emits_midi_start_and_clock_runs() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("playing", "1");
    let packets = sink.take();
    assert_eq!(packets[0].bytes[1], 0xFA); // Start
    assert_eq!(packets[1].bytes[1], 0xF8); // first Clock

    // One second of blocks carries 48 clocks at 120 BPM.
    let mut clocks = 0;
    for _ in 0..345 {
        run_block(&mut engine);
        clocks += sink.take().iter().filter(|p| p.bytes[1] == 0xF8).count();
    }
    assert!((47..=49).contains(&clocks), "clocks = {clocks}");
}

#[test]
fn master_reset_rewinds_track_positions() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("send_clock", "0");
    engine.set_param("master_reset", "4");
    engine.set_param("track_0_step_0_add_note", "60,100");
    engine.set_param("track_0_step_1_add_note", "62,100");
    engine.set_param("track_0_step_4_add_note", "64,100");
    engine.set_param("playing", "1");
    sink.take();

    // Reset fires on boundaries 4 and 8, each rewinding to step 0 just
    // before the advance, so those boundaries land on step 1 again.
    // Without the reset the sequence would be 60, 62, 64 in the first
    // five steps; with it, step 4's note is pushed out to boundary 7.
    let events = run_and_collect(&mut engine, &sink, block_of_phase(8.5));
    let notes: Vec<u8> = ons(&events).iter().map(|(_, p)| p.data1()).collect();
    assert_eq!(notes, vec![60, 62, 62, 64, 62]);
}

#[test]
fn muted_track_is_silent_but_advances() {
    let (mut engine, sink) = engine_with_sink();
    engine.set_param("send_clock", "0");
    engine.set_param("track_0_step_0_add_note", "60,100");
    engine.set_param("track_0_mute", "1");
    engine.set_param("playing", "1");
    sink.take();

    let events = run_and_collect(&mut engine, &sink, 100);
    assert!(events.is_empty());
    // Position still tracks time.
    let step: usize = engine.get_param("track_0_current_step").unwrap().parse().unwrap();
    assert!(step > 0);
}

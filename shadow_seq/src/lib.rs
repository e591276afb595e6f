//! 16-track step sequencer engine for the Move shadow host.
//!
//! The engine is one owned value: tracks, note scheduler, clock,
//! transpose sequence, RNG and MIDI sink all live inside
//! [`SequencerEngine`]. The string parameter surface stays at the edge
//! (`set_param`/`get_param`); internally everything routes through typed
//! keys from [`params`].

pub mod arp;
pub mod clock;
pub mod midi_out;
pub mod params;
pub mod plugin;
pub mod scale;
pub mod scheduler;
pub mod track;
pub mod transpose;

use arp::{ArpLayer, ArpMode, ArpOctave, NUM_ARP_MODES, NUM_ARP_SPEEDS};
use clock::Clock;
use midi_out::MidiSink;
use params::{GlobalKey, ParamKey, StepKey, TrackKey, TransposeField, TransposeKey};
use scale::ScaleDetector;
use scheduler::NoteScheduler;
use track::{advance_track, trigger_track_step, Track, TriggerCtx, NUM_STEPS, NUM_TRACKS};
use transpose::TransposeSequencer;

/// RNG seed installed on every play start; fixed so probability gates
/// and random arps are reproducible run to run.
const PLAY_SEED: u64 = 12345;

pub struct SequencerEngine {
    clock: Clock,
    tracks: Vec<Track>,
    /// Chord-follow flags; these tracks get the global transpose.
    chord_follow: [bool; NUM_TRACKS],
    scheduler: NoteScheduler,
    transpose: TransposeSequencer,
    scale: ScaleDetector,
    rng: fastrand::Rng,
    /// Live transpose overrides the sequence while non-zero.
    live_transpose: i8,
    sink: Box<dyn MidiSink>,
}

impl SequencerEngine {
    pub fn new(sink: Box<dyn MidiSink>) -> Self {
        let mut chord_follow = [false; NUM_TRACKS];
        // Tracks 5-8 and 13-16 follow the transpose by default.
        for i in 0..NUM_TRACKS {
            chord_follow[i] = matches!(i, 4..=7 | 12..=15);
        }

        Self {
            clock: Clock::default(),
            tracks: (0..NUM_TRACKS).map(|i| Track::new(i as u8)).collect(),
            chord_follow,
            scheduler: NoteScheduler::default(),
            transpose: TransposeSequencer::default(),
            scale: ScaleDetector::default(),
            rng: fastrand::Rng::with_seed(1),
            live_transpose: 0,
            sink,
        }
    }

    /// Apply a module defaults blob (JSON). Only `bpm` is recognized;
    /// out-of-range values clamp.
    pub fn apply_defaults(&mut self, defaults: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(defaults) else {
            return;
        };
        if let Some(bpm) = value.get("bpm").and_then(|v| v.as_i64()) {
            self.clock.bpm = bpm.clamp(clock::MIN_BPM as i64, clock::MAX_BPM as i64) as u16;
        }
    }

    pub fn playing(&self) -> bool {
        self.clock.playing
    }

    pub fn global_phase(&self) -> f64 {
        self.clock.global_phase
    }

    pub fn scheduler(&self) -> &NoteScheduler {
        &self.scheduler
    }

    pub fn sink_mut(&mut self) -> &mut dyn MidiSink {
        &mut *self.sink
    }

    /// Effective transpose for a track at send time: live transpose wins
    /// over the sequence; non-chord-follow tracks get none.
    fn transpose_for(
        chord_follow: &[bool; NUM_TRACKS],
        live_transpose: i8,
        transpose: &TransposeSequencer,
        track_idx: usize,
    ) -> i32 {
        if !chord_follow.get(track_idx).copied().unwrap_or(false) {
            return 0;
        }
        if live_transpose != 0 {
            live_transpose as i32
        } else {
            transpose.value_at_current_step() as i32
        }
    }

    /// Render one audio block. The sequencer produces no audio (the
    /// buffer is zeroed); the work is advancing time and emitting MIDI.
    pub fn render_block(&mut self, out: &mut [i16], frames: usize) {
        let samples = (frames * 2).min(out.len());
        out[..samples].fill(0);

        if !self.clock.playing {
            return;
        }

        let Self {
            clock,
            tracks,
            chord_follow,
            scheduler,
            transpose,
            rng,
            live_transpose,
            sink,
            ..
        } = self;

        let step_inc = clock.step_increment();

        for _ in 0..frames {
            let events = clock.tick_frame();

            if let Some(step) = events.step_boundary {
                transpose.on_step_boundary(step);

                if clock.master_reset_due() {
                    // Rewind every track position; transpose playhead and
                    // loop counts survive.
                    for t in tracks.iter_mut() {
                        t.current_step = 0;
                        t.reset_counter = 0;
                    }
                }
            }

            if events.clock_pulse && clock.send_clock {
                sink.clock();
            }

            for (idx, t) in tracks.iter_mut().enumerate() {
                t.phase += step_inc * t.speed;
                if t.phase >= t.next_step_at {
                    t.phase -= t.next_step_at;
                    let sequence_transpose = if chord_follow[idx] {
                        transpose.value_at_current_step()
                    } else {
                        0
                    };
                    let mut ctx = TriggerCtx {
                        scheduler: &mut *scheduler,
                        rng: &mut *rng,
                        sink: &mut **sink,
                        global_phase: clock.global_phase,
                        track_idx: idx,
                        sequence_transpose,
                    };
                    advance_track(t, &mut ctx);
                }
            }
        }

        // One scheduler sweep per block (~2.9ms at 128/44.1k) keeps the
        // pool scan off the per-sample path; the resolution is finer than
        // 96 PPQN at 120 BPM.
        let global_phase = clock.global_phase;
        scheduler.process(
            global_phase,
            |track_idx| Self::transpose_for(chord_follow, *live_transpose, transpose, track_idx),
            &mut **sink,
        );
    }

    fn start_playback(&mut self) {
        self.scheduler.clear_all(&mut *self.sink);
        for t in self.tracks.iter_mut() {
            t.reset_for_play();
        }
        self.clock.reset_for_play();
        self.rng = fastrand::Rng::with_seed(PLAY_SEED);
        self.transpose.reset_for_play();

        if self.clock.send_clock {
            self.sink.start();
            self.sink.clock();
        }

        // Fire step 0 of every track immediately; the first advance
        // happens one step later.
        let Self { tracks, chord_follow, scheduler, transpose, rng, sink, .. } = self;
        for (idx, t) in tracks.iter_mut().enumerate() {
            let sequence_transpose =
                if chord_follow[idx] { transpose.value_at_current_step() } else { 0 };
            let mut ctx = TriggerCtx {
                scheduler: &mut *scheduler,
                rng: &mut *rng,
                sink: &mut **sink,
                global_phase: 0.0,
                track_idx: idx,
                sequence_transpose,
            };
            trigger_track_step(t, 0.0, &mut ctx);
        }
    }

    fn stop_playback(&mut self) {
        self.scheduler.clear_all(&mut *self.sink);
        if self.clock.send_clock {
            self.sink.stop();
        }
    }

    /// Pitch-class mask over every pattern of every chord-follow track.
    fn pitch_class_mask(&self) -> u16 {
        let notes = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(i, _)| self.chord_follow[*i])
            .flat_map(|(_, t)| t.patterns.iter())
            .flat_map(|p| p.steps.iter())
            .flat_map(|s| s.notes().iter().copied().collect::<Vec<_>>());
        scale::collect_pitch_classes(notes)
    }

    fn refresh_scale(&mut self) {
        if self.scale.is_dirty() {
            let mask = self.pitch_class_mask();
            self.scale.refresh(mask);
        }
    }

    // ------------------------------------------------------------------
    // Parameter surface
    // ------------------------------------------------------------------

    pub fn set_param(&mut self, key: &str, val: &str) {
        let Some(parsed) = params::parse(key) else {
            return;
        };
        match parsed {
            ParamKey::BulkSet => {
                // bulk_pairs skips nested bulk_set keys.
                for (k, v) in params::bulk_pairs(val) {
                    self.set_param(k, v);
                }
            }
            ParamKey::Global(g) => self.set_global(g, val),
            ParamKey::Track(t, k) => self.set_track(t, k, val),
            ParamKey::Step { track, step, key } => self.set_step(track, step, key, val),
            ParamKey::Transpose(k) => self.set_transpose_param(k, val),
            ParamKey::SendCc { channel, cc } => {
                if let Some(v) = parse_int(val) {
                    if (0..=127).contains(&v) {
                        self.sink.control_change(cc, v as u8, channel);
                    }
                }
            }
        }
    }

    pub fn get_param(&mut self, key: &str) -> Option<String> {
        let parsed = params::parse(key)?;
        match parsed {
            ParamKey::BulkSet | ParamKey::SendCc { .. } => None,
            ParamKey::Global(g) => self.get_global(g),
            ParamKey::Track(t, k) => self.get_track(t, k),
            ParamKey::Step { track, step, key } => self.get_step(track, step, key),
            ParamKey::Transpose(k) => self.get_transpose_param(k),
        }
    }

    fn set_global(&mut self, key: GlobalKey, val: &str) {
        match key {
            GlobalKey::Bpm => {
                if let Some(v) = parse_int(val) {
                    self.clock.set_bpm(v);
                }
            }
            GlobalKey::Playing => {
                let Some(v) = parse_int(val) else { return };
                let new_playing = v != 0;
                if new_playing && !self.clock.playing {
                    self.start_playback();
                } else if !new_playing && self.clock.playing {
                    self.stop_playback();
                }
                self.clock.playing = new_playing;
            }
            GlobalKey::SendClock => {
                if let Some(v) = parse_int(val) {
                    self.clock.send_clock = v != 0;
                }
            }
            GlobalKey::MasterReset => {
                if let Some(v) = parse_int(val) {
                    if (0..=256).contains(&v) {
                        self.clock.master_reset = v as u16;
                    }
                }
            }
            GlobalKey::CurrentTranspose => {
                if let Some(v) = parse_int(val) {
                    self.transpose.manual = v.clamp(-24, 24) as i8;
                }
            }
            GlobalKey::LiveTranspose => {
                if let Some(v) = parse_int(val) {
                    self.live_transpose = v.clamp(-24, 24) as i8;
                }
            }
            // Read-only keys.
            GlobalKey::NumTracks
            | GlobalKey::BeatCount
            | GlobalKey::CurrentStep
            | GlobalKey::DetectedScaleRoot
            | GlobalKey::DetectedScaleName => {}
        }
    }

    fn get_global(&mut self, key: GlobalKey) -> Option<String> {
        Some(match key {
            GlobalKey::Bpm => self.clock.bpm.to_string(),
            GlobalKey::Playing => (self.clock.playing as u8).to_string(),
            GlobalKey::SendClock => (self.clock.send_clock as u8).to_string(),
            GlobalKey::MasterReset => self.clock.master_reset.to_string(),
            GlobalKey::CurrentTranspose => self.transpose.value_at_current_step().to_string(),
            GlobalKey::LiveTranspose => self.live_transpose.to_string(),
            GlobalKey::NumTracks => NUM_TRACKS.to_string(),
            GlobalKey::BeatCount => self.clock.beat_count.to_string(),
            GlobalKey::CurrentStep => self.tracks[0].current_step.to_string(),
            GlobalKey::DetectedScaleRoot => {
                self.refresh_scale();
                self.scale.root.to_string()
            }
            GlobalKey::DetectedScaleName => {
                self.refresh_scale();
                self.scale.name().to_string()
            }
        })
    }

    fn set_track(&mut self, idx: usize, key: TrackKey, val: &str) {
        let t = &mut self.tracks[idx];
        match key {
            TrackKey::Channel => {
                if let Some(v) = parse_int(val) {
                    if (0..=15).contains(&v) {
                        t.midi_channel = v as u8;
                    }
                }
            }
            TrackKey::Mute => {
                if let Some(v) = parse_int(val) {
                    t.muted = v != 0;
                }
            }
            TrackKey::Length => {
                if let Some(v) = parse_int(val) {
                    if (1..=NUM_STEPS as i64).contains(&v) {
                        t.length = v as u8;
                    }
                }
            }
            TrackKey::Speed => {
                if let Ok(v) = val.parse::<f64>() {
                    if (0.1..=8.0).contains(&v) {
                        t.speed = v;
                    }
                }
            }
            TrackKey::Swing => {
                if let Some(v) = parse_int(val) {
                    if (0..=100).contains(&v) {
                        t.swing = v as u8;
                    }
                }
            }
            TrackKey::ChordFollow => {
                if let Some(v) = parse_int(val) {
                    self.chord_follow[idx] = v != 0;
                    self.scale.mark_dirty();
                }
            }
            TrackKey::ArpMode => {
                if let Some(v) = parse_int(val) {
                    if let Some(mode) = ArpMode::from_index(v as i32) {
                        t.arp_mode = mode;
                    }
                }
            }
            TrackKey::ArpSpeed => {
                if let Some(v) = parse_int(val) {
                    if (0..NUM_ARP_SPEEDS as i64).contains(&v) {
                        t.arp_speed = v as u8;
                    }
                }
            }
            TrackKey::ArpOctave => {
                if let Some(v) = parse_int(val) {
                    if let Some(oct) = ArpOctave::from_index(v as i32) {
                        t.arp_octave = oct;
                    }
                }
            }
            TrackKey::LoopStart => {
                if let Some(v) = parse_int(val) {
                    if (0..NUM_STEPS as i64).contains(&v) {
                        t.pattern_mut().loop_start = v as u8;
                    }
                }
            }
            TrackKey::LoopEnd => {
                if let Some(v) = parse_int(val) {
                    if (0..NUM_STEPS as i64).contains(&v) {
                        t.pattern_mut().loop_end = v as u8;
                    }
                }
            }
            TrackKey::Pattern => {
                if let Some(v) = parse_int(val) {
                    if (0..track::NUM_PATTERNS as i64).contains(&v) {
                        t.current_pattern = v as usize;
                    }
                }
            }
            TrackKey::PreviewVelocity => {
                if let Some(v) = parse_int(val) {
                    if (1..=127).contains(&v) {
                        t.preview_velocity = v as u8;
                    }
                }
            }
            TrackKey::PreviewNote => {
                if let Some(v) = parse_int(val) {
                    if (1..=127).contains(&v) {
                        let (note, vel, ch) = (v as u8, t.preview_velocity, t.midi_channel);
                        self.sink.note_on(note, vel, ch);
                    }
                }
            }
            TrackKey::PreviewNoteOff => {
                if let Some(v) = parse_int(val) {
                    if (1..=127).contains(&v) {
                        let (note, ch) = (v as u8, t.midi_channel);
                        self.sink.note_off(note, ch);
                    }
                }
            }
            TrackKey::CurrentStep => {} // read-only
        }
    }

    fn get_track(&mut self, idx: usize, key: TrackKey) -> Option<String> {
        let t = &self.tracks[idx];
        Some(match key {
            TrackKey::Channel => t.midi_channel.to_string(),
            TrackKey::Mute => (t.muted as u8).to_string(),
            TrackKey::Length => t.length.to_string(),
            TrackKey::Speed => format!("{:.4}", t.speed),
            TrackKey::Swing => t.swing.to_string(),
            TrackKey::ChordFollow => (self.chord_follow[idx] as u8).to_string(),
            TrackKey::ArpMode => t.arp_mode.to_index().to_string(),
            TrackKey::ArpSpeed => t.arp_speed.to_string(),
            TrackKey::ArpOctave => t.arp_octave.to_index().to_string(),
            TrackKey::LoopStart => t.pattern().loop_start.to_string(),
            TrackKey::LoopEnd => t.pattern().loop_end.to_string(),
            TrackKey::Pattern => t.current_pattern.to_string(),
            TrackKey::CurrentStep => t.current_step.to_string(),
            TrackKey::PreviewVelocity => t.preview_velocity.to_string(),
            TrackKey::PreviewNote | TrackKey::PreviewNoteOff => return None,
        })
    }

    fn mark_scale_dirty_if_following(&mut self, track_idx: usize) {
        if self.chord_follow[track_idx] {
            self.scale.mark_dirty();
        }
    }

    fn set_step(&mut self, track: usize, step: usize, key: StepKey, val: &str) {
        let s = &mut self.tracks[track].pattern_mut().steps[step];
        match key {
            StepKey::Note => {
                if let Some(v) = parse_int(val) {
                    if (0..=127).contains(&v) {
                        s.set_single_note(v as u8);
                        self.mark_scale_dirty_if_following(track);
                    }
                }
            }
            StepKey::AddNote => {
                // "note" or "note,velocity".
                let (note_str, vel) = match val.split_once(',') {
                    Some((n, v)) => (n, parse_int(v).unwrap_or(track::DEFAULT_VELOCITY as i64)),
                    None => (val, track::DEFAULT_VELOCITY as i64),
                };
                if let Some(note) = parse_int(note_str) {
                    if (1..=127).contains(&note) {
                        let vel = vel.clamp(1, 127) as u8;
                        if s.add_note(note as u8, vel) {
                            self.mark_scale_dirty_if_following(track);
                        }
                    }
                }
            }
            StepKey::RemoveNote => {
                if let Some(v) = parse_int(val) {
                    if (1..=127).contains(&v) && s.remove_note(v as u8) {
                        self.mark_scale_dirty_if_following(track);
                    }
                }
            }
            StepKey::Clear => {
                *s = track::Step::default();
                self.mark_scale_dirty_if_following(track);
            }
            StepKey::Vel | StepKey::Velocity => {
                if let Some(v) = parse_int(val) {
                    if (1..=127).contains(&v) {
                        s.set_all_velocities(v as u8);
                    }
                }
            }
            StepKey::VelocityDelta => {
                if let Some(v) = parse_int(val) {
                    s.nudge_velocities(v as i32);
                }
            }
            StepKey::Gate => {
                if let Some(v) = parse_int(val) {
                    if (1..=100).contains(&v) {
                        s.gate = v as u8;
                    }
                }
            }
            StepKey::Cc1 => {
                if let Some(v) = parse_int(val) {
                    if (-1..=127).contains(&v) {
                        s.cc1 = v as i8;
                    }
                }
            }
            StepKey::Cc2 => {
                if let Some(v) = parse_int(val) {
                    if (-1..=127).contains(&v) {
                        s.cc2 = v as i8;
                    }
                }
            }
            StepKey::Probability => {
                if let Some(v) = parse_int(val) {
                    if (1..=100).contains(&v) {
                        s.probability = v as u8;
                    }
                }
            }
            StepKey::ConditionN => set_spark_i8(&mut s.trigger_spark.n, val),
            StepKey::ConditionM => set_spark_i8(&mut s.trigger_spark.m, val),
            StepKey::ConditionNot => set_spark_not(&mut s.trigger_spark.not, val),
            StepKey::ParamSparkN => set_spark_i8(&mut s.param_spark.n, val),
            StepKey::ParamSparkM => set_spark_i8(&mut s.param_spark.m, val),
            StepKey::ParamSparkNot => set_spark_not(&mut s.param_spark.not, val),
            StepKey::CompSparkN => set_spark_i8(&mut s.comp_spark.n, val),
            StepKey::CompSparkM => set_spark_i8(&mut s.comp_spark.m, val),
            StepKey::CompSparkNot => set_spark_not(&mut s.comp_spark.not, val),
            StepKey::Jump => {
                if let Some(v) = parse_int(val) {
                    if (-1..NUM_STEPS as i64).contains(&v) {
                        s.jump = v as i8;
                    }
                }
            }
            StepKey::Ratchet => {
                if let Some(v) = parse_int(val) {
                    if track::ratchet_value_is_valid(v) {
                        s.ratchet = v as u8;
                    }
                }
            }
            StepKey::Length => {
                if let Some(v) = parse_int(val) {
                    if (1..=NUM_STEPS as i64).contains(&v) {
                        s.length = v as u8;
                    }
                }
            }
            StepKey::Offset => {
                if let Some(v) = parse_int(val) {
                    if (-24..=24).contains(&v) {
                        s.offset = v as i8;
                    }
                }
            }
            StepKey::ArpMode => {
                if let Some(v) = parse_int(val) {
                    if v == -1 {
                        s.arp_mode = None;
                    } else if (0..NUM_ARP_MODES as i64).contains(&v) {
                        s.arp_mode = ArpMode::from_index(v as i32);
                    }
                }
            }
            StepKey::ArpSpeed => {
                if let Some(v) = parse_int(val) {
                    if v == -1 {
                        s.arp_speed = None;
                    } else if (0..NUM_ARP_SPEEDS as i64).contains(&v) {
                        s.arp_speed = Some(v as u8);
                    }
                }
            }
            StepKey::ArpLayer => {
                if let Some(v) = parse_int(val) {
                    if let Some(layer) = ArpLayer::from_index(v as i32) {
                        s.arp_layer = layer;
                    }
                }
            }
            StepKey::Notes | StepKey::NumNotes => {} // read-only
        }
    }

    fn get_step(&mut self, track: usize, step: usize, key: StepKey) -> Option<String> {
        let s = &self.tracks[track].pattern().steps[step];
        Some(match key {
            StepKey::Note => s.notes().first().copied().unwrap_or(0).to_string(),
            StepKey::Notes => s
                .notes()
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(","),
            StepKey::NumNotes => s.num_notes.to_string(),
            StepKey::Vel | StepKey::Velocity => s
                .velocities()
                .first()
                .copied()
                .unwrap_or(track::DEFAULT_VELOCITY)
                .to_string(),
            StepKey::Gate => s.gate.to_string(),
            StepKey::Cc1 => s.cc1.to_string(),
            StepKey::Cc2 => s.cc2.to_string(),
            StepKey::Probability => s.probability.to_string(),
            StepKey::ConditionN => s.trigger_spark.n.to_string(),
            StepKey::ConditionM => s.trigger_spark.m.to_string(),
            StepKey::ConditionNot => (s.trigger_spark.not as u8).to_string(),
            StepKey::ParamSparkN => s.param_spark.n.to_string(),
            StepKey::ParamSparkM => s.param_spark.m.to_string(),
            StepKey::ParamSparkNot => (s.param_spark.not as u8).to_string(),
            StepKey::CompSparkN => s.comp_spark.n.to_string(),
            StepKey::CompSparkM => s.comp_spark.m.to_string(),
            StepKey::CompSparkNot => (s.comp_spark.not as u8).to_string(),
            StepKey::Jump => s.jump.to_string(),
            StepKey::Ratchet => s.ratchet.to_string(),
            StepKey::Length => s.length.to_string(),
            StepKey::Offset => s.offset.to_string(),
            StepKey::ArpMode => match s.arp_mode {
                Some(m) => m.to_index().to_string(),
                None => "-1".to_string(),
            },
            StepKey::ArpSpeed => match s.arp_speed {
                Some(v) => v.to_string(),
                None => "-1".to_string(),
            },
            StepKey::ArpLayer => s.arp_layer.to_index().to_string(),
            StepKey::AddNote | StepKey::RemoveNote | StepKey::Clear | StepKey::VelocityDelta => {
                return None
            }
        })
    }

    fn set_transpose_param(&mut self, key: TransposeKey, val: &str) {
        match key {
            TransposeKey::Clear => self.transpose.clear(),
            TransposeKey::SequenceEnabled => {
                if let Some(v) = parse_int(val) {
                    self.transpose.enabled = v != 0;
                }
            }
            TransposeKey::StepCount => {
                if let Some(v) = parse_int(val) {
                    if v >= 0 {
                        self.transpose.set_step_count(v as usize);
                    }
                }
            }
            TransposeKey::Step { idx, field } => {
                let Some(v) = parse_int(val) else { return };
                let t = &mut self.transpose;
                match field {
                    TransposeField::Transpose => {
                        t.set_transpose(idx, v);
                    }
                    TransposeField::Duration => {
                        t.set_duration(idx, v);
                    }
                    TransposeField::Jump => {
                        t.set_jump(idx, v);
                    }
                    TransposeField::ConditionN => {
                        t.set_condition_n(idx, v);
                    }
                    TransposeField::ConditionM => {
                        t.set_condition_m(idx, v);
                    }
                    TransposeField::ConditionNot => {
                        t.set_condition_not(idx, val == "1");
                    }
                }
            }
            TransposeKey::TotalSteps | TransposeKey::CurrentStep => {} // read-only
        }
    }

    fn get_transpose_param(&mut self, key: TransposeKey) -> Option<String> {
        Some(match key {
            TransposeKey::SequenceEnabled => (self.transpose.enabled as u8).to_string(),
            TransposeKey::StepCount => self.transpose.step_count().to_string(),
            TransposeKey::TotalSteps => self.transpose.total_steps().to_string(),
            TransposeKey::CurrentStep => self.transpose.current_virtual_step().to_string(),
            TransposeKey::Step { idx, field } => {
                let s = self.transpose.step(idx)?;
                match field {
                    TransposeField::Transpose => s.transpose.to_string(),
                    TransposeField::Duration => s.duration.to_string(),
                    TransposeField::Jump => s.jump.to_string(),
                    TransposeField::ConditionN => s.condition_n.to_string(),
                    TransposeField::ConditionM => s.condition_m.to_string(),
                    TransposeField::ConditionNot => (s.condition_not as u8).to_string(),
                }
            }
            TransposeKey::Clear => return None,
        })
    }
}

fn parse_int(val: &str) -> Option<i64> {
    val.trim().parse::<i64>().ok()
}

fn set_spark_i8(field: &mut i8, val: &str) {
    if let Some(v) = parse_int(val) {
        if (0..=127).contains(&v) {
            *field = v as i8;
        }
    }
}

fn set_spark_not(field: &mut bool, val: &str) {
    if let Some(v) = parse_int(val) {
        *field = v != 0;
    }
}

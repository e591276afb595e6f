//! Centralized note scheduler.
//!
//! A bounded pool of pending note events with on/off phases. Tracks push
//! requests in; one sweep per audio block emits note-on/off through the
//! MIDI sink. Pitch is resolved at send time (not schedule time) so live
//! transpose takes effect on held arp notes and long ratchets that span
//! transpose-sequence boundaries.

use crate::midi_out::MidiSink;

pub const MAX_SCHEDULED_NOTES: usize = 512;

/// Swing 50 = no delay, swing 100 = half a step of delay on upbeats.
pub const SWING_MAX_DELAY: f64 = 0.5;

/// Delay applied to a note starting at `on_phase`. Only upbeat positions
/// (odd global beats) swing; downbeats stay put.
pub fn swing_delay(swing: u8, on_phase: f64) -> f64 {
    if swing <= 50 {
        return 0.0;
    }
    let global_beat = on_phase as i64;
    if global_beat & 1 == 0 {
        return 0.0;
    }
    (swing as f64 - 50.0) / 100.0 * SWING_MAX_DELAY
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduledNote {
    /// Original untransposed note.
    pub note: u8,
    /// Pitch actually transmitted; recorded at note-on for the matching off.
    pub sent_note: u8,
    pub channel: u8,
    pub velocity: u8,
    pub on_phase: f64,
    pub off_phase: f64,
    pub on_sent: bool,
    pub off_sent: bool,
    pub active: bool,
    pub track_idx: u8,
    /// Sequence transpose captured at schedule time (diagnostic only;
    /// send-time resolution is authoritative).
    pub sequence_transpose: i8,
}

/// Everything `schedule` needs to place one note.
#[derive(Debug, Clone, Copy)]
pub struct NoteRequest {
    pub note: u8,
    pub velocity: u8,
    pub channel: u8,
    pub swing: u8,
    /// Global phase when the note should start (pre-swing).
    pub on_phase: f64,
    /// Note length in global steps.
    pub length: f64,
    /// Gate percentage (1-100) of the length.
    pub gate: u8,
    pub track_idx: u8,
    pub sequence_transpose: i8,
}

pub struct NoteScheduler {
    slots: Box<[ScheduledNote]>,
    /// Schedules dropped because the pool was full.
    pub dropped: u32,
}

impl Default for NoteScheduler {
    fn default() -> Self {
        Self {
            slots: vec![ScheduledNote::default(); MAX_SCHEDULED_NOTES].into_boxed_slice(),
            dropped: 0,
        }
    }
}

impl NoteScheduler {
    /// Schedule a note, truncating any conflicting note (same original
    /// note + channel still awaiting its off). Pool exhaustion drops the
    /// request silently.
    pub fn schedule(&mut self, req: NoteRequest, global_phase: f64, sink: &mut dyn MidiSink) {
        let swung_on = req.on_phase + swing_delay(req.swing, req.on_phase);
        let off_phase = swung_on + req.length * (req.gate as f64 / 100.0);

        if let Some(conflict) = self.slots.iter_mut().find(|s| {
            s.active && s.note == req.note && s.channel == req.channel && !s.off_sent
        }) {
            if swung_on < conflict.off_phase {
                // End the old note just before the new one starts.
                let early_off = swung_on - 0.001;
                if early_off > global_phase {
                    conflict.off_phase = early_off;
                } else if conflict.on_sent && !conflict.off_sent {
                    // Already past the truncation point: close it now and
                    // free the slot so it cannot leak.
                    sink.note_off(conflict.sent_note, conflict.channel);
                    conflict.off_sent = true;
                    conflict.active = false;
                }
            }
        }

        let Some(slot) = self.slots.iter_mut().find(|s| !s.active) else {
            self.dropped = self.dropped.wrapping_add(1);
            return;
        };

        *slot = ScheduledNote {
            note: req.note,
            sent_note: 0,
            channel: req.channel,
            velocity: req.velocity,
            on_phase: swung_on,
            off_phase,
            on_sent: false,
            off_sent: false,
            active: true,
            track_idx: req.track_idx,
            sequence_transpose: req.sequence_transpose,
        };
    }

    /// One sweep per audio block: fire due note-ons (resolving pitch via
    /// `transpose_for`, which returns the effective semitone offset for a
    /// track) and due note-offs.
    pub fn process(
        &mut self,
        global_phase: f64,
        mut transpose_for: impl FnMut(usize) -> i32,
        sink: &mut dyn MidiSink,
    ) {
        for slot in self.slots.iter_mut() {
            if !slot.active {
                continue;
            }

            if !slot.on_sent && global_phase >= slot.on_phase {
                let transpose = transpose_for(slot.track_idx as usize);
                let final_note = (slot.note as i32 + transpose).clamp(0, 127) as u8;
                sink.note_on(final_note, slot.velocity, slot.channel);
                slot.sent_note = final_note;
                slot.on_sent = true;
            }

            if slot.on_sent && !slot.off_sent && global_phase >= slot.off_phase {
                sink.note_off(slot.sent_note, slot.channel);
                slot.off_sent = true;
                slot.active = false;
            }
        }
    }

    /// Free every slot on a channel, closing sounding notes (Arp Layer =
    /// Cut, and stop).
    pub fn cut_channel(&mut self, channel: u8, sink: &mut dyn MidiSink) {
        for slot in self.slots.iter_mut() {
            if slot.active && slot.channel == channel {
                if slot.on_sent && !slot.off_sent {
                    sink.note_off(slot.sent_note, slot.channel);
                }
                slot.active = false;
                slot.on_sent = false;
                slot.off_sent = false;
            }
        }
    }

    /// Free every slot, closing sounding notes.
    pub fn clear_all(&mut self, sink: &mut dyn MidiSink) {
        for slot in self.slots.iter_mut() {
            if slot.active && slot.on_sent && !slot.off_sent {
                sink.note_off(slot.sent_note, slot.channel);
            }
            slot.active = false;
            slot.on_sent = false;
            slot.off_sent = false;
        }
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// Count of sounding (on sent, off pending) instances of a note on a
    /// channel; the per-(note, channel) invariant keeps this <= 1.
    pub fn sounding_count(&self, note: u8, channel: u8) -> usize {
        self.slots
            .iter()
            .filter(|s| s.active && s.note == note && s.channel == channel && s.on_sent && !s.off_sent)
            .count()
    }

    pub fn slots(&self) -> &[ScheduledNote] {
        &self.slots
    }
}

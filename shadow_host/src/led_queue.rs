//! Rate-limited LED output queue.
//!
//! LED colours ride on note-on / CC messages to cable 0. Writers can
//! repaint far faster than the outbound mailbox ring can absorb, so the
//! queue keeps only the latest colour per LED and flushes a bounded
//! number per tick, leaving headroom in the ring for real MIDI.

use shadow_shared::MIDI_BUFFER_SIZE;

/// Updates per tick in normal operation.
pub const LED_MAX_UPDATES_PER_TICK: usize = 16;
/// Updates per tick when the host owns the whole mailbox.
pub const LED_OVERTAKE_BUDGET: usize = 48;
/// Stay under this many bytes of the out ring so device packets coexist.
pub const LED_QUEUE_SAFE_BYTES: usize = 76;
/// Input-echo updates per tick; a separate budget so pad-touch echo
/// traffic cannot starve real LED updates.
pub const INPUT_LED_MAX_PER_TICK: usize = 24;

#[derive(Debug, Clone, Copy)]
struct PendingLed {
    /// Requested colour, -1 = nothing pending.
    color: i16,
    status: u8,
    cin: u8,
}

impl Default for PendingLed {
    fn default() -> Self {
        Self { color: -1, status: 0x90, cin: 0x09 }
    }
}

/// Find an empty 4-byte slot in the MIDI-out slab and write the packet.
pub fn write_packet_to_slab(slab: &mut [u8], packet: [u8; 4]) -> bool {
    for slot in slab.chunks_exact_mut(4) {
        if slot.iter().all(|&b| b == 0) {
            slot.copy_from_slice(&packet);
            return true;
        }
    }
    false
}

pub struct LedQueue {
    note: [PendingLed; 128],
    cc: [PendingLed; 128],
    /// Echoes for external (cable 2) note input.
    input_note: [PendingLed; 128],
}

impl Default for LedQueue {
    fn default() -> Self {
        Self {
            note: [PendingLed::default(); 128],
            cc: [PendingLed::default(); 128],
            input_note: [PendingLed::default(); 128],
        }
    }
}

impl LedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coalesce an LED update; the latest colour per index wins.
    pub fn queue(&mut self, cin: u8, status: u8, data1: u8, data2: u8) {
        let idx = (data1 & 0x7F) as usize;
        match status & 0xF0 {
            0x90 => self.note[idx] = PendingLed { color: data2 as i16, status, cin },
            0xB0 => self.cc[idx] = PendingLed { color: data2 as i16, status, cin },
            _ => {}
        }
    }

    /// Coalesce an input-side echo for an external note.
    pub fn queue_input_echo(&mut self, cin: u8, status: u8, note: u8, color: u8) {
        if status & 0xF0 == 0x90 {
            self.input_note[(note & 0x7F) as usize] =
                PendingLed { color: color as i16, status, cin };
        }
    }

    pub fn pending_count(&self) -> usize {
        self.note
            .iter()
            .chain(self.cc.iter())
            .chain(self.input_note.iter())
            .filter(|p| p.color >= 0)
            .count()
    }

    /// Flush pending output colours (notes then CCs) into the MIDI-out
    /// slab, bounded by the per-tick budget and the safe byte limit.
    /// Returns packets written. Input echoes are flushed separately by
    /// [`flush_input`](Self::flush_input) so they never compete for this
    /// budget.
    pub fn flush(&mut self, midi_out: &mut [u8], host_owns_mailbox: bool) -> usize {
        let used: usize =
            midi_out.chunks_exact(4).filter(|slot| slot.iter().any(|&b| b != 0)).count() * 4;

        let max_bytes = if host_owns_mailbox { MIDI_BUFFER_SIZE } else { LED_QUEUE_SAFE_BYTES };
        let budget =
            if host_owns_mailbox { LED_OVERTAKE_BUDGET } else { LED_MAX_UPDATES_PER_TICK };

        let available = max_bytes.saturating_sub(used) / 4;
        let budget = budget.min(available);
        if budget == 0 {
            return 0;
        }

        let mut sent = 0;
        for queue in [&mut self.note, &mut self.cc] {
            for (idx, pending) in queue.iter_mut().enumerate() {
                if sent >= budget {
                    return sent;
                }
                if pending.color < 0 {
                    continue;
                }
                let packet =
                    [pending.cin, pending.status, idx as u8, pending.color as u8];
                if !write_packet_to_slab(midi_out, packet) {
                    return sent;
                }
                pending.color = -1;
                sent += 1;
            }
        }
        sent
    }

    /// Flush pending input echoes under their own per-tick cap,
    /// independent of the output queue's budget and byte limit.
    pub fn flush_input(&mut self, dest: &mut [u8]) -> usize {
        let mut sent = 0;
        for (idx, pending) in self.input_note.iter_mut().enumerate() {
            if sent >= INPUT_LED_MAX_PER_TICK {
                break;
            }
            if pending.color < 0 {
                continue;
            }
            let packet = [pending.cin, pending.status, idx as u8, pending.color as u8];
            if !write_packet_to_slab(dest, packet) {
                break;
            }
            pending.color = -1;
            sent += 1;
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_colour_wins() {
        let mut q = LedQueue::new();
        q.queue(0x09, 0x90, 36, 10);
        q.queue(0x09, 0x90, 36, 99);
        assert_eq!(q.pending_count(), 1);

        let mut slab = [0u8; MIDI_BUFFER_SIZE];
        assert_eq!(q.flush(&mut slab, false), 1);
        assert_eq!(&slab[..4], &[0x09, 0x90, 36, 99]);
        // Flushed entries clear.
        assert_eq!(q.pending_count(), 0);
    }

    #[test]
    fn budget_limits_updates_per_tick() {
        let mut q = LedQueue::new();
        for i in 0..40u8 {
            q.queue(0x09, 0x90, i, 1);
        }

        let mut slab = [0u8; MIDI_BUFFER_SIZE];
        assert_eq!(q.flush(&mut slab, false), LED_MAX_UPDATES_PER_TICK);
        assert_eq!(q.pending_count(), 40 - LED_MAX_UPDATES_PER_TICK);

        // Overtake mode gets the bigger budget on a fresh slab.
        let mut slab = [0u8; MIDI_BUFFER_SIZE];
        assert_eq!(q.flush(&mut slab, true), 40 - LED_MAX_UPDATES_PER_TICK);
    }

    #[test]
    fn safe_bytes_respects_existing_traffic() {
        let mut q = LedQueue::new();
        for i in 0..20u8 {
            q.queue(0x0B, 0xB0, i, 5);
        }

        // 64 of the 76 safe bytes already used: 3 slots left.
        let mut slab = [0u8; MIDI_BUFFER_SIZE];
        for slot in 0..16 {
            slab[slot * 4] = 0x29;
            slab[slot * 4 + 1] = 0x90;
            slab[slot * 4 + 2] = 1;
            slab[slot * 4 + 3] = 1;
        }
        assert_eq!(q.flush(&mut slab, false), 3);
    }

    #[test]
    fn notes_and_ccs_are_separate_indices() {
        let mut q = LedQueue::new();
        q.queue(0x09, 0x90, 50, 1);
        q.queue(0x0B, 0xB0, 50, 2);
        assert_eq!(q.pending_count(), 2);

        let mut slab = [0u8; MIDI_BUFFER_SIZE];
        assert_eq!(q.flush(&mut slab, false), 2);
        assert_eq!(&slab[..4], &[0x09, 0x90, 50, 1]);
        assert_eq!(&slab[4..8], &[0x0B, 0xB0, 50, 2]);
    }

    #[test]
    fn input_echo_has_its_own_flush() {
        let mut q = LedQueue::new();
        q.queue_input_echo(0x09, 0x90, 60, 21);
        q.queue(0x09, 0x90, 61, 22);

        // The output flush leaves input echoes alone.
        let mut slab = [0u8; MIDI_BUFFER_SIZE];
        assert_eq!(q.flush(&mut slab, false), 1);
        assert_eq!(&slab[..4], &[0x09, 0x90, 61, 22]);
        assert_eq!(q.pending_count(), 1);

        assert_eq!(q.flush_input(&mut slab), 1);
        assert_eq!(&slab[4..8], &[0x09, 0x90, 60, 21]);
        assert_eq!(q.pending_count(), 0);
    }

    #[test]
    fn input_echo_budget_is_independent_of_output_budget() {
        let mut q = LedQueue::new();
        // Saturate the output queue and pile up echoes.
        for i in 0..40u8 {
            q.queue(0x09, 0x90, i, 1);
        }
        for i in 0..30u8 {
            q.queue_input_echo(0x09, 0x90, 64 + i, 2);
        }

        let mut out_slab = [0u8; MIDI_BUFFER_SIZE];
        let mut echo_slab = [0u8; MIDI_BUFFER_SIZE];
        // Output flush exhausts its budget; echoes still get their own
        // full allotment.
        assert_eq!(q.flush(&mut out_slab, false), LED_MAX_UPDATES_PER_TICK);
        assert_eq!(q.flush_input(&mut echo_slab), INPUT_LED_MAX_PER_TICK);
        assert_eq!(q.flush_input(&mut echo_slab), 30 - INPUT_LED_MAX_PER_TICK);
    }

    #[test]
    fn write_packet_skips_used_slots() {
        let mut slab = [0u8; 16];
        assert!(write_packet_to_slab(&mut slab, [1, 2, 3, 4]));
        assert!(write_packet_to_slab(&mut slab, [5, 6, 7, 8]));
        assert_eq!(&slab[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut full = [1u8; 8];
        assert!(!write_packet_to_slab(&mut full, [9, 9, 9, 9]));
    }
}

//! Link-audio publisher: streams host-produced shadow audio back to
//! Live as chnnlsv channels.
//!
//! The render path deposits 128-frame blocks into per-slot accumulator
//! rings; the publisher thread wakes on the block tick and drains
//! 125-frame wire packets, announcing its session roughly once a second
//! and honoring inbound channel requests.

use crate::ring::{self, Consumer, Producer};
use shadow_shared::wire::{self, ChannelEntry, SAMPLES_PER_PACKET};
use shadow_shared::FRAMES_PER_BLOCK;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const SHADOW_CHANNELS: usize = 4;

/// Accumulator: 1024 stereo frames per slot, power of two.
pub const PUB_RING_FRAMES: usize = 1024;
pub const PUB_RING_SAMPLES: usize = PUB_RING_FRAMES * 2;

/// Block ticks between session announcements (~1s at 344 blocks/s).
pub const SESSION_INTERVAL_TICKS: u32 = 344;

struct SlotFlags {
    active: AtomicBool,
    subscribed: AtomicBool,
}

/// Render-side handle: deposit rendered blocks.
pub struct PublisherHandle {
    producers: Vec<Producer>,
    flags: Arc<Vec<SlotFlags>>,
}

impl PublisherHandle {
    /// Write one 128-frame stereo block into a slot's accumulator.
    /// Inactive or unsubscribed slots ignore the write so a silent
    /// accumulator never overruns.
    pub fn write_block(&mut self, slot: usize, samples: &[i16]) -> bool {
        let Some(flags) = self.flags.get(slot) else { return false };
        flags.active.store(true, Ordering::Relaxed);
        if !flags.subscribed.load(Ordering::Relaxed) {
            return false;
        }
        let n = samples.len().min(FRAMES_PER_BLOCK * 2);
        self.producers[slot].push_slice(&samples[..n])
    }
}

/// One outbound datagram the core wants sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub payload: Vec<u8>,
    pub dest: Option<SocketAddr>,
}

/// Publisher state machine, free of sockets so the repacketization and
/// subscription logic is directly testable.
pub struct PublisherCore {
    peer_id: [u8; 8],
    session_id: [u8; 8],
    names: Vec<String>,
    channel_ids: Vec<[u8; 8]>,
    sequences: Vec<u32>,
    consumers: Vec<Consumer>,
    flags: Arc<Vec<SlotFlags>>,
    tick_counter: u32,
    /// Overrides the captured destination once a requester shows up.
    dest_override: Option<SocketAddr>,
    pub packets_published: u32,
}

pub fn publisher(peer_id: [u8; 8], session_id: [u8; 8]) -> (PublisherHandle, PublisherCore) {
    let mut producers = Vec::with_capacity(SHADOW_CHANNELS);
    let mut consumers = Vec::with_capacity(SHADOW_CHANNELS);
    let mut channel_ids = Vec::with_capacity(SHADOW_CHANNELS);
    let mut names = Vec::with_capacity(SHADOW_CHANNELS);
    let mut flag_vec = Vec::with_capacity(SHADOW_CHANNELS);

    for slot in 0..SHADOW_CHANNELS {
        let (tx, rx) = ring::spsc_ring(PUB_RING_SAMPLES);
        producers.push(tx);
        consumers.push(rx);

        // Deterministic per-slot channel ids derived from the peer id.
        let mut id = peer_id;
        id[7] = id[7].wrapping_add(slot as u8 + 1);
        channel_ids.push(id);
        names.push(format!("Shadow-{}", slot + 1));
        flag_vec.push(SlotFlags {
            active: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
        });
    }

    let flags = Arc::new(flag_vec);
    (
        PublisherHandle { producers, flags: Arc::clone(&flags) },
        PublisherCore {
            peer_id,
            session_id,
            names,
            channel_ids,
            sequences: vec![0; SHADOW_CHANNELS],
            consumers,
            flags,
            tick_counter: 0,
            dest_override: None,
            packets_published: 0,
        },
    )
}

impl PublisherCore {
    pub fn subscribed(&self, slot: usize) -> bool {
        self.flags.get(slot).map(|f| f.subscribed.load(Ordering::Relaxed)).unwrap_or(false)
    }

    /// Force a subscription state (tests, or config-driven always-on).
    pub fn set_subscribed(&self, slot: usize, on: bool) {
        if let Some(f) = self.flags.get(slot) {
            f.subscribed.store(on, Ordering::Relaxed);
        }
    }

    /// Handle an inbound datagram; a channel request toggles the slot's
    /// subscription on and retargets the destination to the requester.
    pub fn on_datagram(&mut self, pkt: &[u8], from: SocketAddr) -> Option<usize> {
        let requested = wire::parse_channel_request(pkt)?;
        let slot = self.channel_ids.iter().position(|id| *id == requested)?;
        self.flags[slot].subscribed.store(true, Ordering::Relaxed);
        self.dest_override = Some(from);
        log::info!("publisher: channel {slot} subscribed by {from}");
        Some(slot)
    }

    fn active_channels(&self) -> Vec<ChannelEntry> {
        (0..SHADOW_CHANNELS)
            .filter(|&i| self.flags[i].active.load(Ordering::Relaxed))
            .map(|i| ChannelEntry { name: self.names[i].clone(), id: self.channel_ids[i] })
            .collect()
    }

    /// One publisher tick: session announcement on schedule, then drain
    /// every subscribed slot to 125-frame packets.
    pub fn on_tick(&mut self, now_ns: u64, emit: &mut dyn FnMut(Outgoing)) {
        self.tick_counter = self.tick_counter.wrapping_add(1);

        if self.tick_counter % SESSION_INTERVAL_TICKS == 0 {
            let payload = wire::build_session_announcement(
                &self.peer_id,
                &self.session_id,
                "ME",
                &self.active_channels(),
                now_ns,
            );
            emit(Outgoing { payload, dest: self.dest_override });
        }

        for slot in 0..SHADOW_CHANNELS {
            if !self.flags[slot].subscribed.load(Ordering::Relaxed)
                || !self.flags[slot].active.load(Ordering::Relaxed)
            {
                continue;
            }

            let mut frame_buf = [0i16; SAMPLES_PER_PACKET];
            while self.consumers[slot].available() >= SAMPLES_PER_PACKET as u32 {
                if !self.consumers[slot].pop_exact(&mut frame_buf) {
                    break;
                }
                let pkt = wire::build_audio_packet(
                    &self.peer_id,
                    &self.channel_ids[slot],
                    self.sequences[slot],
                    now_ns,
                    &frame_buf,
                );
                self.sequences[slot] = self.sequences[slot].wrapping_add(1);
                self.packets_published += 1;
                emit(Outgoing { payload: pkt.to_vec(), dest: self.dest_override });
            }
        }
    }
}

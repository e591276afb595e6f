//! Link-audio interception: per-channel rings fed from the device's
//! outgoing "chnnlsv" UDP stream.
//!
//! The producer half lives on the network (sendto-intercept) thread and
//! parses packets into per-channel SPSC rings; the consumer half hands
//! channel audio to the DSP renderer. Channels are discovered from
//! session announcements or, failing that, from the first audio packet
//! carrying an unknown channel id, and are never removed.

use crate::ring::{self, Consumer, Producer};
use shadow_shared::wire::{self, AudioHeader, SessionInfo, SAMPLES_PER_PACKET};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Tracks 1-4 plus Main.
pub const MOVE_CHANNELS: usize = 5;

/// 512 stereo frames (~11.6ms) absorbs the 125-vs-128 frame mismatch.
pub const RING_FRAMES: usize = 512;
pub const RING_SAMPLES: usize = RING_FRAMES * 2;

#[derive(Debug, Clone, Default)]
pub struct ChannelInfo {
    pub id: [u8; 8],
    pub name: String,
    pub active: bool,
}

/// Network endpoints captured from the first observed session
/// announcement; the publisher reuses them to talk back to Live.
#[derive(Debug, Clone)]
pub struct CapturedEndpoint {
    pub dest: SocketAddr,
    pub local: Option<SocketAddr>,
}

#[derive(Default)]
struct Meta {
    move_peer_id: [u8; 8],
    session_id: Option<[u8; 8]>,
    channels: Vec<ChannelInfo>,
    session_parsed: bool,
    endpoint: Option<CapturedEndpoint>,
    endpoint_written: bool,
}

struct ChannelStats {
    active: AtomicBool,
    peak: AtomicU32,
    pkt_count: AtomicU32,
    sequence: AtomicU32,
}

impl Default for ChannelStats {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(false),
            peak: AtomicU32::new(0),
            pkt_count: AtomicU32::new(0),
            sequence: AtomicU32::new(0),
        }
    }
}

struct Shared {
    meta: Mutex<Meta>,
    stats: [ChannelStats; MOVE_CHANNELS],
    packets_intercepted: AtomicU32,
}

/// Producer half: feed it everything the firmware sends.
pub struct LinkAudioIntercept {
    shared: Arc<Shared>,
    producers: Vec<Producer>,
    endpoint_path: Option<PathBuf>,
}

/// Consumer half: per-channel reads for the renderer.
pub struct LinkAudioReader {
    shared: Arc<Shared>,
    consumers: Vec<Consumer>,
}

pub fn link_audio(endpoint_path: Option<PathBuf>) -> (LinkAudioIntercept, LinkAudioReader) {
    let shared = Arc::new(Shared {
        meta: Mutex::new(Meta::default()),
        stats: Default::default(),
        packets_intercepted: AtomicU32::new(0),
    });

    let mut producers = Vec::with_capacity(MOVE_CHANNELS);
    let mut consumers = Vec::with_capacity(MOVE_CHANNELS);
    for _ in 0..MOVE_CHANNELS {
        let (tx, rx) = ring::spsc_ring(RING_SAMPLES);
        producers.push(tx);
        consumers.push(rx);
    }

    (
        LinkAudioIntercept { shared: Arc::clone(&shared), producers, endpoint_path },
        LinkAudioReader { shared, consumers },
    )
}

impl LinkAudioIntercept {
    /// Entry point for the sendto intercept. Non-chnnlsv traffic is
    /// ignored cheaply.
    pub fn on_sendto(&mut self, pkt: &[u8], local: Option<SocketAddr>, dest: Option<SocketAddr>) {
        match wire::message_type(pkt) {
            Some(wire::MSG_AUDIO) if pkt.len() == wire::PACKET_SIZE => self.intercept_audio(pkt),
            Some(wire::MSG_SESSION) => self.parse_session(pkt, local, dest),
            _ => {}
        }
    }

    fn parse_session(&mut self, pkt: &[u8], local: Option<SocketAddr>, dest: Option<SocketAddr>) {
        let Some(info) = wire::parse_session(pkt) else { return };
        let SessionInfo { peer_id, session_id, channels } = info;

        let mut meta = self.shared.meta.lock().unwrap();
        meta.move_peer_id = peer_id;
        if session_id.is_some() {
            meta.session_id = session_id;
        }

        // Capture the network endpoints once; the publisher reuses them.
        if meta.endpoint.is_none() {
            if let Some(dest) = dest {
                meta.endpoint = Some(CapturedEndpoint { dest, local });
                log::info!("link audio: captured dest={dest}, local={local:?}");
            }
        }

        if !meta.endpoint_written {
            if let (Some(path), Some(local)) = (&self.endpoint_path, local) {
                if let Ok(mut f) = std::fs::File::create(path) {
                    let _ = writeln!(f, "{} {}", local.ip(), local.port());
                    meta.endpoint_written = true;
                }
            }
        }

        for entry in channels {
            if meta.channels.len() >= MOVE_CHANNELS {
                break;
            }
            if meta.channels.iter().any(|c| c.id == entry.id) {
                continue;
            }
            let idx = meta.channels.len();
            meta.channels.push(ChannelInfo { id: entry.id, name: entry.name, active: true });
            self.shared.stats[idx].active.store(true, Ordering::Relaxed);
        }

        if !meta.session_parsed && !meta.channels.is_empty() {
            meta.session_parsed = true;
            log::info!("link audio: session parsed, {} channels discovered", meta.channels.len());
            for (i, ch) in meta.channels.iter().enumerate() {
                log::info!("link audio:   [{i}] \"{}\"", ch.name);
            }
        }
    }

    fn intercept_audio(&mut self, pkt: &[u8]) {
        let Some(header) = AudioHeader::parse(pkt) else { return };

        let idx = {
            let mut meta = self.shared.meta.lock().unwrap();
            match meta.channels.iter().position(|c| c.id == header.channel_id) {
                Some(idx) => idx,
                None if meta.channels.len() < MOVE_CHANNELS => {
                    // Auto-discover from audio packets when no session
                    // announcement has named the channel yet.
                    let idx = meta.channels.len();
                    meta.channels.push(ChannelInfo {
                        id: header.channel_id,
                        name: format!("ch{idx}"),
                        active: true,
                    });
                    meta.move_peer_id = header.peer_id;
                    self.shared.stats[idx].active.store(true, Ordering::Relaxed);
                    log::info!(
                        "link audio: auto-discovered channel {idx} (id {:02x?})",
                        header.channel_id
                    );
                    idx
                }
                None => return,
            }
        };

        // Byte-swap the big-endian payload into native samples.
        let payload = &pkt[wire::HEADER_SIZE..];
        let mut samples = [0i16; SAMPLES_PER_PACKET];
        let mut peak = 0i32;
        for (i, s) in samples.iter_mut().enumerate() {
            *s = i16::from_be_bytes([payload[i * 2], payload[i * 2 + 1]]);
            peak = peak.max((*s as i32).abs());
        }

        if !self.producers[idx].push_slice(&samples) {
            // Ring full: the overrun is counted by the ring; the packet
            // is dropped without touching stats.
            return;
        }

        let stats = &self.shared.stats[idx];
        stats.peak.fetch_max(peak.min(32767) as u32, Ordering::Relaxed);
        stats.pkt_count.fetch_add(1, Ordering::Relaxed);
        stats.sequence.store(header.sequence, Ordering::Relaxed);
        self.shared.packets_intercepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_intercepted(&self) -> u32 {
        self.shared.packets_intercepted.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u32 {
        self.producers.iter().map(|p| p.overruns()).sum()
    }

    /// Clear session/channel registration for a subscriber restart.
    /// Ring contents drain naturally on the consumer side.
    pub fn reset_state(&mut self) {
        let mut meta = self.shared.meta.lock().unwrap();
        meta.channels.clear();
        meta.session_parsed = false;
        self.shared.packets_intercepted.store(0, Ordering::Relaxed);
        for stats in &self.shared.stats {
            stats.active.store(false, Ordering::Relaxed);
            stats.pkt_count.store(0, Ordering::Relaxed);
            stats.peak.store(0, Ordering::Relaxed);
        }
    }
}

impl LinkAudioReader {
    pub fn channel_count(&self) -> usize {
        self.shared.meta.lock().unwrap().channels.len()
    }

    pub fn channel_info(&self, idx: usize) -> Option<ChannelInfo> {
        self.shared.meta.lock().unwrap().channels.get(idx).cloned()
    }

    pub fn captured_endpoint(&self) -> Option<CapturedEndpoint> {
        self.shared.meta.lock().unwrap().endpoint.clone()
    }

    pub fn move_peer_id(&self) -> [u8; 8] {
        self.shared.meta.lock().unwrap().move_peer_id
    }

    /// Read `frames` stereo frames from a channel into `out`. On
    /// underrun the buffer is zeroed and false returned; when the ring
    /// has built up more than four times the request the read skips to
    /// the freshest audio.
    pub fn read_channel(&mut self, idx: usize, out: &mut [i16], frames: usize) -> bool {
        let samples = frames * 2;
        if idx >= self.channel_count() || samples > out.len() {
            out.fill(0);
            return false;
        }
        self.consumers[idx].pop_latest(&mut out[..samples])
    }

    pub fn underruns(&self) -> u32 {
        self.consumers.iter().map(|c| c.underruns()).sum()
    }

    pub fn peak(&self, idx: usize) -> i16 {
        self.shared.stats.get(idx).map(|s| s.peak.load(Ordering::Relaxed) as i16).unwrap_or(0)
    }

    pub fn pkt_count(&self, idx: usize) -> u32 {
        self.shared.stats.get(idx).map(|s| s.pkt_count.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn packets_intercepted(&self) -> u32 {
        self.shared.packets_intercepted.load(Ordering::Relaxed)
    }
}

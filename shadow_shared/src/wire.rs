//! Link-audio ("chnnlsv") wire format.
//!
//! The Move firmware streams per-track audio over UDP/IPv6. All multi-byte
//! fields are big-endian. An audio packet is exactly 574 bytes: a 74-byte
//! header followed by 500 bytes of payload (125 stereo i16 frames).
//! Session announcements carry TLV entries; channel-request messages ask
//! the publisher to start streaming a channel.

pub const MAGIC: &[u8; 7] = b"chnnlsv";
pub const VERSION: u8 = 0x01;

pub const MSG_SESSION: u8 = 1;
pub const MSG_REQUEST: u8 = 3;
pub const MSG_AUDIO: u8 = 6;

pub const HEADER_SIZE: usize = 74;
pub const PAYLOAD_SIZE: usize = 500;
pub const PACKET_SIZE: usize = 574;
pub const FRAMES_PER_PACKET: usize = 125;
pub const SAMPLES_PER_PACKET: usize = FRAMES_PER_PACKET * 2;

/// Format tag + magic format bytes observed on the wire.
pub const FORMAT_TAG: u32 = 6;
pub const FORMAT_BYTES: [u8; 3] = [0xd5, 0x11, 0x01];

pub fn read_u16_be(p: &[u8]) -> u16 {
    u16::from_be_bytes([p[0], p[1]])
}

pub fn read_u32_be(p: &[u8]) -> u32 {
    u32::from_be_bytes([p[0], p[1], p[2], p[3]])
}

pub fn read_u64_be(p: &[u8]) -> u64 {
    u64::from_be_bytes([p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7]])
}

pub fn write_u16_be(p: &mut [u8], v: u16) {
    p[..2].copy_from_slice(&v.to_be_bytes());
}

pub fn write_u32_be(p: &mut [u8], v: u32) {
    p[..4].copy_from_slice(&v.to_be_bytes());
}

pub fn write_u64_be(p: &mut [u8], v: u64) {
    p[..8].copy_from_slice(&v.to_be_bytes());
}

/// Payload samples are big-endian i16; the host works in native (LE).
pub fn swap_i16(v: i16) -> i16 {
    v.swap_bytes()
}

/// True when `pkt` starts with the chnnlsv magic and protocol version.
pub fn has_magic(pkt: &[u8]) -> bool {
    pkt.len() >= 12 && &pkt[..7] == MAGIC && pkt[7] == VERSION
}

pub fn message_type(pkt: &[u8]) -> Option<u8> {
    if has_magic(pkt) {
        Some(pkt[8])
    } else {
        None
    }
}

/// Fixed-offset fields of an audio packet (valid only for 574-byte
/// packets that passed `has_magic`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    pub peer_id: [u8; 8],
    pub channel_id: [u8; 8],
    pub sequence: u32,
    pub frame_count: u16,
    pub timestamp: u64,
    pub sample_rate: u32,
    pub channels: u8,
    pub payload_size: u16,
}

impl AudioHeader {
    pub fn parse(pkt: &[u8]) -> Option<Self> {
        if pkt.len() != PACKET_SIZE || message_type(pkt) != Some(MSG_AUDIO) {
            return None;
        }
        let mut peer_id = [0u8; 8];
        let mut channel_id = [0u8; 8];
        peer_id.copy_from_slice(&pkt[12..20]);
        channel_id.copy_from_slice(&pkt[20..28]);
        Some(AudioHeader {
            peer_id,
            channel_id,
            sequence: read_u32_be(&pkt[44..]),
            frame_count: read_u16_be(&pkt[48..]),
            timestamp: read_u64_be(&pkt[52..]),
            sample_rate: read_u32_be(&pkt[67..]),
            channels: pkt[71],
            payload_size: read_u16_be(&pkt[72..]),
        })
    }
}

/// Build a 574-byte audio packet from native-endian interleaved samples.
pub fn build_audio_packet(
    peer_id: &[u8; 8],
    channel_id: &[u8; 8],
    sequence: u32,
    timestamp_ns: u64,
    samples_le: &[i16; SAMPLES_PER_PACKET],
) -> [u8; PACKET_SIZE] {
    let mut pkt = [0u8; PACKET_SIZE];
    pkt[..7].copy_from_slice(MAGIC);
    pkt[7] = VERSION;
    pkt[8] = MSG_AUDIO;
    pkt[12..20].copy_from_slice(peer_id);
    pkt[20..28].copy_from_slice(channel_id);
    pkt[28..36].copy_from_slice(peer_id);
    write_u32_be(&mut pkt[36..], 1);
    write_u32_be(&mut pkt[44..], sequence);
    write_u16_be(&mut pkt[48..], FRAMES_PER_PACKET as u16);
    write_u64_be(&mut pkt[52..], timestamp_ns);
    write_u32_be(&mut pkt[60..], FORMAT_TAG);
    pkt[64..67].copy_from_slice(&FORMAT_BYTES);
    write_u32_be(&mut pkt[67..], crate::SAMPLE_RATE);
    pkt[71] = 2;
    write_u16_be(&mut pkt[72..], PAYLOAD_SIZE as u16);

    for (i, &s) in samples_le.iter().enumerate() {
        let off = HEADER_SIZE + i * 2;
        pkt[off..off + 2].copy_from_slice(&s.to_be_bytes());
    }
    pkt
}

/// One announced channel: display name plus its 8-byte wire id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub name: String,
    pub id: [u8; 8],
}

/// Parsed session announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub peer_id: [u8; 8],
    pub session_id: Option<[u8; 8]>,
    pub channels: Vec<ChannelEntry>,
}

/// Parse the TLV body of a session announcement. Tolerates unknown tags
/// and truncated trailing entries.
pub fn parse_session(pkt: &[u8]) -> Option<SessionInfo> {
    if message_type(pkt) != Some(MSG_SESSION) || pkt.len() < 20 {
        return None;
    }

    let mut info = SessionInfo::default();
    info.peer_id.copy_from_slice(&pkt[12..20]);

    let mut pos = 20;
    while pos + 8 <= pkt.len() {
        let tag = &pkt[pos..pos + 4];
        let tlen = read_u32_be(&pkt[pos + 4..]) as usize;
        pos += 8;
        if pos + tlen > pkt.len() {
            break;
        }
        let body = &pkt[pos..pos + tlen];

        match tag {
            b"sess" if tlen == 8 => {
                let mut sid = [0u8; 8];
                sid.copy_from_slice(body);
                info.session_id = Some(sid);
            }
            b"auca" if tlen >= 4 => {
                let count = read_u32_be(body) as usize;
                let mut p = 4;
                for _ in 0..count {
                    if p + 4 > body.len() {
                        break;
                    }
                    let name_len = read_u32_be(&body[p..]) as usize;
                    p += 4;
                    if p + name_len + 8 > body.len() {
                        break;
                    }
                    let name = String::from_utf8_lossy(&body[p..p + name_len]).into_owned();
                    p += name_len;
                    let mut id = [0u8; 8];
                    id.copy_from_slice(&body[p..p + 8]);
                    p += 8;
                    info.channels.push(ChannelEntry { name, id });
                }
            }
            // "__pi" (peer info) and "__ht" (host timestamp) carry nothing
            // the intercept path needs.
            _ => {}
        }

        pos += tlen;
    }

    Some(info)
}

/// Build a session announcement advertising `channels`.
pub fn build_session_announcement(
    peer_id: &[u8; 8],
    session_id: &[u8; 8],
    peer_name: &str,
    channels: &[ChannelEntry],
    timestamp_ns: u64,
) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(128);
    pkt.extend_from_slice(MAGIC);
    pkt.push(VERSION);
    pkt.push(MSG_SESSION);
    pkt.extend_from_slice(&[0, 0, 0]);
    pkt.extend_from_slice(peer_id);

    let mut push_tlv = |pkt: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]| {
        pkt.extend_from_slice(tag);
        pkt.extend_from_slice(&(body.len() as u32).to_be_bytes());
        pkt.extend_from_slice(body);
    };

    push_tlv(&mut pkt, b"sess", session_id);

    let mut pi = Vec::new();
    pi.extend_from_slice(&(peer_name.len() as u32).to_be_bytes());
    pi.extend_from_slice(peer_name.as_bytes());
    push_tlv(&mut pkt, b"__pi", &pi);

    let mut auca = Vec::new();
    auca.extend_from_slice(&(channels.len() as u32).to_be_bytes());
    for ch in channels {
        auca.extend_from_slice(&(ch.name.len() as u32).to_be_bytes());
        auca.extend_from_slice(ch.name.as_bytes());
        auca.extend_from_slice(&ch.id);
    }
    push_tlv(&mut pkt, b"auca", &auca);

    push_tlv(&mut pkt, b"__ht", &timestamp_ns.to_be_bytes());

    pkt
}

/// Extract the requested channel id from a channel-request message.
pub fn parse_channel_request(pkt: &[u8]) -> Option<[u8; 8]> {
    if pkt.len() < 28 || message_type(pkt) != Some(MSG_REQUEST) {
        return None;
    }
    let mut id = [0u8; 8];
    id.copy_from_slice(&pkt[20..28]);
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_packet_roundtrip() {
        let mut samples = [0i16; SAMPLES_PER_PACKET];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = (i as i16).wrapping_mul(257).wrapping_sub(300);
        }
        let pkt = build_audio_packet(&[1; 8], &[2; 8], 42, 1_000_000, &samples);
        assert_eq!(pkt.len(), PACKET_SIZE);
        assert!(has_magic(&pkt));

        let hdr = AudioHeader::parse(&pkt).unwrap();
        assert_eq!(hdr.peer_id, [1; 8]);
        assert_eq!(hdr.channel_id, [2; 8]);
        assert_eq!(hdr.sequence, 42);
        assert_eq!(hdr.frame_count, 125);
        assert_eq!(hdr.sample_rate, 44_100);
        assert_eq!(hdr.channels, 2);
        assert_eq!(hdr.payload_size, 500);

        // Payload is big-endian on the wire.
        for (i, &s) in samples.iter().enumerate() {
            let off = HEADER_SIZE + i * 2;
            let wire = i16::from_be_bytes([pkt[off], pkt[off + 1]]);
            assert_eq!(wire, s);
        }
    }

    #[test]
    fn session_roundtrip() {
        let channels = vec![
            ChannelEntry { name: "1-MIDI".into(), id: [0xAA; 8] },
            ChannelEntry { name: "Main".into(), id: [0xBB; 8] },
        ];
        let pkt = build_session_announcement(&[7; 8], &[9; 8], "ME", &channels, 123);
        let info = parse_session(&pkt).unwrap();
        assert_eq!(info.peer_id, [7; 8]);
        assert_eq!(info.session_id, Some([9; 8]));
        assert_eq!(info.channels, channels);
    }

    #[test]
    fn rejects_wrong_magic_and_version() {
        let mut pkt = build_session_announcement(&[0; 8], &[0; 8], "x", &[], 0);
        assert!(has_magic(&pkt));
        pkt[7] = 0x02;
        assert!(!has_magic(&pkt));
        pkt[7] = VERSION;
        pkt[0] = b'x';
        assert!(!has_magic(&pkt));
    }

    #[test]
    fn channel_request_parse() {
        let mut pkt = vec![0u8; 36];
        pkt[..7].copy_from_slice(MAGIC);
        pkt[7] = VERSION;
        pkt[8] = MSG_REQUEST;
        pkt[20..28].copy_from_slice(&[5; 8]);
        assert_eq!(parse_channel_request(&pkt), Some([5; 8]));

        pkt[8] = MSG_AUDIO;
        assert_eq!(parse_channel_request(&pkt), None);
    }

    #[test]
    fn truncated_tlv_does_not_panic() {
        let mut pkt = build_session_announcement(&[1; 8], &[2; 8], "peer", &[], 0);
        pkt.truncate(26); // cut inside the first TLV
        let info = parse_session(&pkt).unwrap();
        assert_eq!(info.session_id, None);
    }
}

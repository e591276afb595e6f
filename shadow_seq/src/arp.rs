//! Arpeggiator pattern generation.
//!
//! `generate` is pure apart from the RNG used by Random mode: sorted
//! input chord + mode + octave extension in, ordered note sequence out.
//! The caller schedules the notes; nothing here touches timing.

/// Max pattern length: 7 notes * 5 octave copies, rounded up for the
/// ping-pong modes.
pub const MAX_ARP_PATTERN: usize = 64;

/// Steps per arp note for each musical speed value
/// (1/32, 1/24, 1/16, 1/12, 1/8, 1/6, 1/4, 1/3, 1/2, 1/1).
pub const ARP_STEP_RATES: [f64; 10] = [
    0.5,
    2.0 / 3.0,
    1.0,
    4.0 / 3.0,
    2.0,
    8.0 / 3.0,
    4.0,
    16.0 / 3.0,
    8.0,
    16.0,
];

pub const NUM_ARP_SPEEDS: usize = ARP_STEP_RATES.len();
pub const DEFAULT_ARP_SPEED: u8 = 2; // 1/16 = one note per step

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpMode {
    Off,
    Up,
    Down,
    /// Up then down, endpoints repeated: C-E-G-E.
    UpDown,
    /// Down then up, endpoints repeated: G-E-C-E.
    DownUp,
    /// Up then down, endpoints played twice in a row: C-E-G-G-E-C.
    UpAndDown,
    DownAndUp,
    Random,
    /// Whole chord at each arp position.
    Chord,
    /// Outer pitches alternating inward: G-C-E.
    OutsideIn,
    /// Median outward: E-G-C.
    InsideOut,
    /// Low/high pairs moving in: C-G-E.
    Converge,
    /// Same arrangement as InsideOut.
    Diverge,
    /// Lowest note pedals between the others: C-C-E-C-G.
    Thumb,
    /// Highest note pedals: G-G-E-G-C.
    Pinky,
}

pub const NUM_ARP_MODES: usize = 15;

impl ArpMode {
    pub fn from_index(idx: i32) -> Option<Self> {
        match idx {
            0 => Some(ArpMode::Off),
            1 => Some(ArpMode::Up),
            2 => Some(ArpMode::Down),
            3 => Some(ArpMode::UpDown),
            4 => Some(ArpMode::DownUp),
            5 => Some(ArpMode::UpAndDown),
            6 => Some(ArpMode::DownAndUp),
            7 => Some(ArpMode::Random),
            8 => Some(ArpMode::Chord),
            9 => Some(ArpMode::OutsideIn),
            10 => Some(ArpMode::InsideOut),
            11 => Some(ArpMode::Converge),
            12 => Some(ArpMode::Diverge),
            13 => Some(ArpMode::Thumb),
            14 => Some(ArpMode::Pinky),
            _ => None,
        }
    }

    pub fn to_index(self) -> u8 {
        match self {
            ArpMode::Off => 0,
            ArpMode::Up => 1,
            ArpMode::Down => 2,
            ArpMode::UpDown => 3,
            ArpMode::DownUp => 4,
            ArpMode::UpAndDown => 5,
            ArpMode::DownAndUp => 6,
            ArpMode::Random => 7,
            ArpMode::Chord => 8,
            ArpMode::OutsideIn => 9,
            ArpMode::InsideOut => 10,
            ArpMode::Converge => 11,
            ArpMode::Diverge => 12,
            ArpMode::Thumb => 13,
            ArpMode::Pinky => 14,
        }
    }
}

/// Octave extension: shifted copies appended around the base pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArpOctave {
    #[default]
    None,
    Up1,
    Up2,
    Down1,
    Down2,
    Both1,
    Both2,
}

pub const NUM_ARP_OCTAVES: usize = 7;

impl ArpOctave {
    pub fn from_index(idx: i32) -> Option<Self> {
        match idx {
            0 => Some(ArpOctave::None),
            1 => Some(ArpOctave::Up1),
            2 => Some(ArpOctave::Up2),
            3 => Some(ArpOctave::Down1),
            4 => Some(ArpOctave::Down2),
            5 => Some(ArpOctave::Both1),
            6 => Some(ArpOctave::Both2),
            _ => None,
        }
    }

    pub fn to_index(self) -> u8 {
        match self {
            ArpOctave::None => 0,
            ArpOctave::Up1 => 1,
            ArpOctave::Up2 => 2,
            ArpOctave::Down1 => 3,
            ArpOctave::Down2 => 4,
            ArpOctave::Both1 => 5,
            ArpOctave::Both2 => 6,
        }
    }

    /// Semitone shifts applied, in playback order (0 = base pattern).
    fn shifts(self) -> &'static [i16] {
        match self {
            ArpOctave::None => &[0],
            ArpOctave::Up1 => &[0, 12],
            ArpOctave::Up2 => &[0, 12, 24],
            ArpOctave::Down1 => &[-12, 0],
            ArpOctave::Down2 => &[-24, -12, 0],
            ArpOctave::Both1 => &[-12, 0, 12],
            ArpOctave::Both2 => &[-24, -12, 0, 12, 24],
        }
    }
}

/// How a step's arp interacts with notes already sounding on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArpLayer {
    /// Arps play over each other.
    #[default]
    Layer,
    /// New step kills previous notes on the channel first.
    Cut,
    /// Reserved for smooth transition; currently behaves like Layer.
    Legato,
}

pub const NUM_ARP_LAYERS: usize = 3;

impl ArpLayer {
    pub fn from_index(idx: i32) -> Option<Self> {
        match idx {
            0 => Some(ArpLayer::Layer),
            1 => Some(ArpLayer::Cut),
            2 => Some(ArpLayer::Legato),
            _ => None,
        }
    }

    pub fn to_index(self) -> u8 {
        match self {
            ArpLayer::Layer => 0,
            ArpLayer::Cut => 1,
            ArpLayer::Legato => 2,
        }
    }
}

fn push(out: &mut Vec<u8>, note: u8) {
    if out.len() < MAX_ARP_PATTERN {
        out.push(note);
    }
}

/// Generate the arp pattern for a chord.
///
/// Input notes are sorted by pitch before arranging. Octave-shifted
/// copies that would leave 0..=127 are dropped, not clipped.
pub fn generate(
    notes: &[u8],
    mode: ArpMode,
    octave: ArpOctave,
    rng: &mut fastrand::Rng,
) -> Vec<u8> {
    if notes.is_empty() || mode == ArpMode::Off {
        return Vec::new();
    }

    let mut sorted: Vec<u8> = notes.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();

    let mut base = Vec::with_capacity(MAX_ARP_PATTERN);
    match mode {
        ArpMode::Off => unreachable!(),
        ArpMode::Up | ArpMode::Chord => {
            for &note in &sorted {
                push(&mut base, note);
            }
        }
        ArpMode::Down => {
            for &note in sorted.iter().rev() {
                push(&mut base, note);
            }
        }
        ArpMode::UpDown => {
            for &note in &sorted {
                push(&mut base, note);
            }
            for i in (1..n.saturating_sub(1)).rev() {
                push(&mut base, sorted[i]);
            }
        }
        ArpMode::DownUp => {
            for &note in sorted.iter().rev() {
                push(&mut base, note);
            }
            for i in 1..n.saturating_sub(1) {
                push(&mut base, sorted[i]);
            }
        }
        ArpMode::UpAndDown => {
            for &note in &sorted {
                push(&mut base, note);
            }
            for &note in sorted.iter().rev() {
                push(&mut base, note);
            }
        }
        ArpMode::DownAndUp => {
            for &note in sorted.iter().rev() {
                push(&mut base, note);
            }
            for &note in &sorted {
                push(&mut base, note);
            }
        }
        ArpMode::Random => {
            base.extend_from_slice(&sorted);
            // Fisher-Yates over the sorted set.
            for i in (1..base.len()).rev() {
                let j = rng.usize(0..=i);
                base.swap(i, j);
            }
        }
        ArpMode::OutsideIn => {
            for i in 0..(n + 1) / 2 {
                push(&mut base, sorted[n - 1 - i]);
                if i != n - 1 - i {
                    push(&mut base, sorted[i]);
                }
            }
        }
        ArpMode::InsideOut | ArpMode::Diverge => {
            let mid = n / 2;
            push(&mut base, sorted[mid]);
            for i in 1..=mid {
                if mid + i < n {
                    push(&mut base, sorted[mid + i]);
                }
                if mid >= i {
                    push(&mut base, sorted[mid - i]);
                }
            }
        }
        ArpMode::Converge => {
            for i in 0..(n + 1) / 2 {
                push(&mut base, sorted[i]);
                if i != n - 1 - i {
                    push(&mut base, sorted[n - 1 - i]);
                }
            }
        }
        ArpMode::Thumb => {
            push(&mut base, sorted[0]);
            for i in 1..n {
                push(&mut base, sorted[0]);
                push(&mut base, sorted[i]);
            }
        }
        ArpMode::Pinky => {
            push(&mut base, sorted[n - 1]);
            for i in (0..n - 1).rev() {
                push(&mut base, sorted[n - 1]);
                push(&mut base, sorted[i]);
            }
        }
    }

    if octave == ArpOctave::None {
        return base;
    }

    let mut out = Vec::with_capacity(MAX_ARP_PATTERN);
    for &shift in octave.shifts() {
        for &note in &base {
            let shifted = note as i16 + shift;
            if (0..=127).contains(&shifted) {
                push(&mut out, shifted as u8);
            }
        }
    }
    out
}

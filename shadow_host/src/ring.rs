//! Lock-free SPSC sample ring.
//!
//! Positions are monotonic `u32` counters that wrap naturally; the fill
//! gauge is plain difference arithmetic (`wp - rp`). Storage capacity is
//! a power of two so wrapping is a mask. The ring is split into producer
//! and consumer endpoints that can live on different threads; position
//! publication uses acquire/release ordering.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct Shared {
    buf: UnsafeCell<Box<[i16]>>,
    mask: u32,
    write_pos: AtomicU32,
    read_pos: AtomicU32,
    overruns: AtomicU32,
    underruns: AtomicU32,
}

// Soundness: exactly one producer touches `buf` cells in [rp, wp) gaps
// and exactly one consumer reads published cells; the atomics order the
// handoff. Endpoint types below are !Clone, which enforces the single
// producer / single consumer discipline.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

pub struct Producer {
    shared: Arc<Shared>,
}

pub struct Consumer {
    shared: Arc<Shared>,
}

/// Create a ring holding `capacity` samples (must be a power of two).
pub fn spsc_ring(capacity: usize) -> (Producer, Consumer) {
    assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
    let shared = Arc::new(Shared {
        buf: UnsafeCell::new(vec![0i16; capacity].into_boxed_slice()),
        mask: capacity as u32 - 1,
        write_pos: AtomicU32::new(0),
        read_pos: AtomicU32::new(0),
        overruns: AtomicU32::new(0),
        underruns: AtomicU32::new(0),
    });
    (Producer { shared: Arc::clone(&shared) }, Consumer { shared })
}

impl Producer {
    /// Write all of `samples` or none: a write that would overflow the
    /// ring counts an overrun and drops the whole slice.
    pub fn push_slice(&mut self, samples: &[i16]) -> bool {
        let shared = &*self.shared;
        let wp = shared.write_pos.load(Ordering::Relaxed);
        let rp = shared.read_pos.load(Ordering::Acquire);

        let capacity = shared.mask + 1;
        if wp.wrapping_sub(rp) + samples.len() as u32 > capacity {
            shared.overruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let buf = unsafe { &mut *shared.buf.get() };
        let mut pos = wp;
        for &s in samples {
            buf[(pos & shared.mask) as usize] = s;
            pos = pos.wrapping_add(1);
        }

        shared.write_pos.store(pos, Ordering::Release);
        true
    }

    pub fn fill(&self) -> u32 {
        let wp = self.shared.write_pos.load(Ordering::Relaxed);
        let rp = self.shared.read_pos.load(Ordering::Acquire);
        wp.wrapping_sub(rp)
    }

    pub fn overruns(&self) -> u32 {
        self.shared.overruns.load(Ordering::Relaxed)
    }
}

impl Consumer {
    pub fn available(&self) -> u32 {
        let wp = self.shared.write_pos.load(Ordering::Acquire);
        let rp = self.shared.read_pos.load(Ordering::Relaxed);
        wp.wrapping_sub(rp)
    }

    fn copy_out(&self, rp: u32, out: &mut [i16]) -> u32 {
        let shared = &*self.shared;
        let buf = unsafe { &*shared.buf.get() };
        let mut pos = rp;
        for s in out.iter_mut() {
            *s = buf[(pos & shared.mask) as usize];
            pos = pos.wrapping_add(1);
        }
        pos
    }

    /// Read exactly `out.len()` samples. On underrun the output is
    /// zeroed, the counter bumps, and the read position is untouched.
    pub fn pop_exact(&mut self, out: &mut [i16]) -> bool {
        let shared = &*self.shared;
        let wp = shared.write_pos.load(Ordering::Acquire);
        let rp = shared.read_pos.load(Ordering::Relaxed);

        if wp.wrapping_sub(rp) < out.len() as u32 {
            out.fill(0);
            shared.underruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let pos = self.copy_out(rp, out);
        shared.read_pos.store(pos, Ordering::Release);
        true
    }

    /// Like `pop_exact`, but when the fill has grown past four times the
    /// request the read position first fast-forwards to the freshest
    /// data. Old audio is dropped rather than letting latency grow.
    pub fn pop_latest(&mut self, out: &mut [i16]) -> bool {
        let shared = &*self.shared;
        let wp = shared.write_pos.load(Ordering::Acquire);
        let mut rp = shared.read_pos.load(Ordering::Relaxed);

        let avail = wp.wrapping_sub(rp);
        let needed = out.len() as u32;

        if avail < needed {
            out.fill(0);
            shared.underruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if avail > needed * 4 {
            rp = wp.wrapping_sub(needed);
        }

        let pos = self.copy_out(rp, out);
        shared.read_pos.store(pos, Ordering::Release);
        true
    }

    pub fn underruns(&self) -> u32 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u32 {
        self.shared.overruns.load(Ordering::Relaxed)
    }
}

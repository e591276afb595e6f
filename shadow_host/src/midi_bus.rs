//! Outbound MIDI bus between plugin callbacks and the tick loop.
//!
//! The plugin ABI hands modules two stateless C function pointers
//! (`midi_send_internal` / `midi_send_external`). Both feed this
//! process-wide queue; the tick loop drains it every block into the LED
//! queue and the mailbox MIDI-out ring.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use shadow_shared::UsbMidiPacket;
use std::os::raw::c_int;
use std::sync::OnceLock;

fn bus() -> &'static (Sender<UsbMidiPacket>, Receiver<UsbMidiPacket>) {
    static BUS: OnceLock<(Sender<UsbMidiPacket>, Receiver<UsbMidiPacket>)> = OnceLock::new();
    BUS.get_or_init(unbounded)
}

pub fn push(pkt: UsbMidiPacket) {
    let _ = bus().0.send(pkt);
}

/// Drain everything queued since the last tick.
pub fn drain(mut f: impl FnMut(UsbMidiPacket)) {
    let rx = &bus().1;
    loop {
        match rx.try_recv() {
            Ok(pkt) => f(pkt),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
        }
    }
}

/// Shared body for both ABI callbacks: accepts whole 4-byte USB-MIDI
/// packets (possibly several back to back).
unsafe fn enqueue_raw(msg: *const u8, len: c_int) -> c_int {
    if msg.is_null() || len < 4 {
        return 0;
    }
    let bytes = std::slice::from_raw_parts(msg, len as usize);
    let mut sent = 0;
    for chunk in bytes.chunks_exact(4) {
        push(UsbMidiPacket::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        sent += 4;
    }
    sent
}

pub unsafe extern "C" fn midi_send_internal_cb(msg: *const u8, len: c_int) -> c_int {
    enqueue_raw(msg, len)
}

pub unsafe extern "C" fn midi_send_external_cb(msg: *const u8, len: c_int) -> c_int {
    enqueue_raw(msg, len)
}

/// Serializes tests that assert on the process-wide bus.
#[cfg(test)]
pub(crate) fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

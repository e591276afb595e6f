//! Hardware mailbox: the 4096-byte shared page exchanged with the
//! device over ioctl transactions.
//!
//! The page is mmapped from the SPI character device. Only the host
//! thread holds the handle; plugins see the raw pointer plus offsets
//! through the host ABI and may touch it only during `render_block`.
//! An in-memory variant backs tests and headless runs.

use shadow_shared::{
    AUDIO_BYTES_PER_BLOCK, AUDIO_IN_OFFSET, AUDIO_OUT_OFFSET, DISPLAY_OFFSET,
    DISPLAY_REGION_SIZE, FRAMES_PER_BLOCK, MAILBOX_SIZE, MIDI_BUFFER_SIZE, MIDI_IN_OFFSET,
    MIDI_OUT_OFFSET,
};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use thiserror::Error;

/// ioctl request codes for the SPI mailbox driver (type 0, no data
/// direction): 0x0a swaps MIDI/audio, 0x0b starts the stream.
const IOCTL_SWAP: libc::c_ulong = 0x0a;
const IOCTL_START: libc::c_ulong = 0x0b;
const IOCTL_SWAP_ARG: libc::c_ulong = 0x300;
const IOCTL_START_ARG: libc::c_ulong = 0x1312d00;

/// Failing to open the mailbox is fatal at startup.
#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("cannot open mailbox device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot map mailbox device {path}: {source}")]
    Map {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
enum Backing {
    Device { fd: libc::c_int, mem: *mut u8 },
    Memory(Box<[u8; MAILBOX_SIZE]>),
}

#[derive(Debug)]
pub struct Mailbox {
    backing: Backing,
}

impl Mailbox {
    /// Open and map the hardware device.
    pub fn open(path: &Path) -> Result<Self, MailboxError> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| MailboxError::Open {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        })?;

        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(MailboxError::Open {
                path: path.display().to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        let mem = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                MAILBOX_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(MailboxError::Map { path: path.display().to_string(), source: err });
        }

        let mut mailbox = Mailbox { backing: Backing::Device { fd, mem: mem as *mut u8 } };
        mailbox.bytes_mut().fill(0);
        log::info!("mailbox: mapped {} ({} bytes)", path.display(), MAILBOX_SIZE);
        Ok(mailbox)
    }

    /// Memory-backed mailbox for tests and headless operation.
    pub fn in_memory() -> Self {
        Mailbox { backing: Backing::Memory(Box::new([0u8; MAILBOX_SIZE])) }
    }

    /// Raw base pointer handed to plugins through the host ABI.
    pub fn base_ptr(&mut self) -> *mut u8 {
        match &mut self.backing {
            Backing::Device { mem, .. } => *mem,
            Backing::Memory(buf) => buf.as_mut_ptr(),
        }
    }

    fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Device { mem, .. } => unsafe {
                std::slice::from_raw_parts(*mem, MAILBOX_SIZE)
            },
            Backing::Memory(buf) => &buf[..],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::Device { mem, .. } => unsafe {
                std::slice::from_raw_parts_mut(*mem, MAILBOX_SIZE)
            },
            Backing::Memory(buf) => &mut buf[..],
        }
    }

    // Scoped slab borrows; callers never see offsets.

    pub fn midi_out_mut(&mut self) -> &mut [u8] {
        &mut self.bytes_mut()[MIDI_OUT_OFFSET..MIDI_OUT_OFFSET + MIDI_BUFFER_SIZE]
    }

    pub fn midi_in(&self) -> &[u8] {
        &self.bytes()[MIDI_IN_OFFSET..MIDI_IN_OFFSET + MIDI_BUFFER_SIZE]
    }

    pub fn midi_in_mut(&mut self) -> &mut [u8] {
        &mut self.bytes_mut()[MIDI_IN_OFFSET..MIDI_IN_OFFSET + MIDI_BUFFER_SIZE]
    }

    pub fn display_mut(&mut self) -> &mut [u8] {
        &mut self.bytes_mut()[DISPLAY_OFFSET..DISPLAY_OFFSET + DISPLAY_REGION_SIZE]
    }

    /// Copy one rendered stereo block into the audio-out slab.
    pub fn write_audio_out(&mut self, samples: &[i16]) {
        let n = samples.len().min(FRAMES_PER_BLOCK * 2);
        let dst = &mut self.bytes_mut()[AUDIO_OUT_OFFSET..AUDIO_OUT_OFFSET + AUDIO_BYTES_PER_BLOCK];
        for (i, &s) in samples[..n].iter().enumerate() {
            dst[i * 2..i * 2 + 2].copy_from_slice(&s.to_le_bytes());
        }
    }

    pub fn silence_audio_out(&mut self) {
        self.bytes_mut()[AUDIO_OUT_OFFSET..AUDIO_OUT_OFFSET + AUDIO_BYTES_PER_BLOCK].fill(0);
    }

    /// Copy the device's audio-in slab out as samples.
    pub fn read_audio_in(&self, out: &mut [i16]) {
        let src = &self.bytes()[AUDIO_IN_OFFSET..AUDIO_IN_OFFSET + AUDIO_BYTES_PER_BLOCK];
        let n = out.len().min(FRAMES_PER_BLOCK * 2);
        for (i, s) in out[..n].iter_mut().enumerate() {
            *s = i16::from_le_bytes([src[i * 2], src[i * 2 + 1]]);
        }
    }

    /// Kick off the device stream.
    pub fn start_stream(&self) {
        if let Backing::Device { fd, .. } = &self.backing {
            unsafe { libc::ioctl(*fd, IOCTL_START, IOCTL_START_ARG) };
        }
    }

    /// Request a mailbox swap: the device consumes MIDI/audio out and
    /// publishes fresh MIDI/audio in. Blocks on the hardware.
    pub fn swap(&self) {
        if let Backing::Device { fd, .. } = &self.backing {
            unsafe { libc::ioctl(*fd, IOCTL_SWAP, IOCTL_SWAP_ARG) };
        }
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        if let Backing::Device { fd, mem } = &self.backing {
            unsafe {
                libc::munmap(*mem as *mut libc::c_void, MAILBOX_SIZE);
                libc::close(*fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_device_fails() {
        let err = Mailbox::open(Path::new("/dev/does-not-exist-mailbox")).unwrap_err();
        assert!(matches!(err, MailboxError::Open { .. }));
    }

    #[test]
    fn audio_roundtrip_through_slabs() {
        let mut mb = Mailbox::in_memory();
        let block: Vec<i16> = (0..FRAMES_PER_BLOCK as i16 * 2).map(|i| i - 100).collect();
        mb.write_audio_out(&block);

        // Simulate the device looping audio-out back to audio-in.
        let bytes = mb.bytes_mut();
        let (lo, hi) = bytes.split_at_mut(AUDIO_IN_OFFSET);
        hi[..AUDIO_BYTES_PER_BLOCK]
            .copy_from_slice(&lo[AUDIO_OUT_OFFSET..AUDIO_OUT_OFFSET + AUDIO_BYTES_PER_BLOCK]);

        let mut readback = vec![0i16; FRAMES_PER_BLOCK * 2];
        mb.read_audio_in(&mut readback);
        assert_eq!(readback, block);
    }

    #[test]
    fn slabs_are_disjoint() {
        let mut mb = Mailbox::in_memory();
        mb.midi_out_mut().fill(0xAA);
        mb.write_audio_out(&[0x0101; FRAMES_PER_BLOCK * 2]);
        mb.display_mut().fill(0xCC);

        assert!(mb.midi_out_mut().iter().all(|&b| b == 0xAA));
        assert!(mb.midi_in().iter().all(|&b| b == 0));
    }

    #[test]
    fn ioctls_are_noops_in_memory() {
        let mb = Mailbox::in_memory();
        mb.start_stream();
        mb.swap();
    }
}

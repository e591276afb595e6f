//! Shadow host: runtime host for DSP modules on the Ableton Move.
//!
//! Owns the hardware mailbox, discovers and loads modules against the
//! versioned plugin ABI, runs the per-block tick loop, intercepts the
//! device's link-audio streams into lock-free rings, and publishes
//! shadow audio back out.

pub mod display;
pub mod host_midi;
pub mod led_queue;
pub mod link_audio;
pub mod mailbox;
pub mod midi_bus;
pub mod module_manager;
pub mod monitor;
pub mod publisher;
pub mod ring;
pub mod subscriber;
pub mod tick;

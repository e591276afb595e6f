//! C ABI between the host and DSP plugins.
//!
//! Two versions are supported. v1 is a singleton table (one plugin per
//! process); v2 is instance-based (`create_instance`/`destroy_instance`
//! with an opaque handle) so the host can run several copies of the same
//! library. Both are plain function-pointer tables; no unwinding may
//! cross this boundary (the workspace builds with `panic = "abort"`).

use std::os::raw::{c_char, c_int, c_void};

pub const PLUGIN_API_VERSION_1: c_int = 1;
pub const PLUGIN_API_VERSION_2: c_int = 2;

/// Entry symbols resolved from the plugin library, v2 preferred.
pub const PLUGIN_INIT_V1_SYMBOL: &[u8] = b"move_plugin_init_v1\0";
pub const PLUGIN_INIT_V2_SYMBOL: &[u8] = b"move_plugin_init_v2\0";

/// Host capabilities handed to the plugin at init.
///
/// `mapped_memory` is the raw hardware mailbox; plugins may only touch it
/// through `audio_out_offset`/`audio_in_offset` during `render_block`,
/// which the host invokes from its own tick thread.
#[repr(C)]
pub struct HostApiV1 {
    pub api_version: c_int,
    pub sample_rate: c_int,
    pub frames_per_block: c_int,
    pub mapped_memory: *mut u8,
    pub audio_out_offset: c_int,
    pub audio_in_offset: c_int,
    pub log: Option<unsafe extern "C" fn(msg: *const c_char)>,
    pub midi_send_internal: Option<unsafe extern "C" fn(msg: *const u8, len: c_int) -> c_int>,
    pub midi_send_external: Option<unsafe extern "C" fn(msg: *const u8, len: c_int) -> c_int>,
}

/// v1 plugin table: one implicit instance per process.
#[repr(C)]
pub struct PluginApiV1 {
    pub api_version: c_int,
    pub on_load:
        Option<unsafe extern "C" fn(module_dir: *const c_char, defaults: *const c_char) -> c_int>,
    pub on_unload: Option<unsafe extern "C" fn()>,
    pub on_midi: Option<unsafe extern "C" fn(msg: *const u8, len: c_int, source: c_int)>,
    pub set_param: Option<unsafe extern "C" fn(key: *const c_char, val: *const c_char)>,
    pub get_param:
        Option<unsafe extern "C" fn(key: *const c_char, buf: *mut c_char, len: c_int) -> c_int>,
    pub render_block: Option<unsafe extern "C" fn(out_interleaved_lr: *mut i16, frames: c_int)>,
}

/// v2 plugin table: explicit instance handles.
#[repr(C)]
pub struct PluginApiV2 {
    pub api_version: c_int,
    pub create_instance: Option<
        unsafe extern "C" fn(module_dir: *const c_char, defaults: *const c_char) -> *mut c_void,
    >,
    pub destroy_instance: Option<unsafe extern "C" fn(instance: *mut c_void)>,
    pub on_midi:
        Option<unsafe extern "C" fn(instance: *mut c_void, msg: *const u8, len: c_int, source: c_int)>,
    pub set_param:
        Option<unsafe extern "C" fn(instance: *mut c_void, key: *const c_char, val: *const c_char)>,
    pub get_param: Option<
        unsafe extern "C" fn(
            instance: *mut c_void,
            key: *const c_char,
            buf: *mut c_char,
            len: c_int,
        ) -> c_int,
    >,
    pub get_error: Option<unsafe extern "C" fn(instance: *mut c_void) -> *const c_char>,
    pub render_block:
        Option<unsafe extern "C" fn(instance: *mut c_void, out_interleaved_lr: *mut i16, frames: c_int)>,
}

pub type PluginInitV1Fn = unsafe extern "C" fn(host: *const HostApiV1) -> *mut PluginApiV1;
pub type PluginInitV2Fn = unsafe extern "C" fn(host: *const HostApiV1) -> *mut PluginApiV2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_symbols_are_nul_terminated() {
        assert_eq!(*PLUGIN_INIT_V1_SYMBOL.last().unwrap(), 0);
        assert_eq!(*PLUGIN_INIT_V2_SYMBOL.last().unwrap(), 0);
    }

    #[test]
    fn null_fn_pointers_are_representable() {
        // Option<extern fn> niche keeps the tables pointer-compatible with C.
        assert_eq!(
            std::mem::size_of::<Option<unsafe extern "C" fn()>>(),
            std::mem::size_of::<usize>()
        );
    }
}

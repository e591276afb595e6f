//! The sequencer as a loadable Move plugin (v2 ABI).
//!
//! The cdylib build exports `move_plugin_init_v2`; the host resolves it,
//! hands over its callback table, and creates engine instances through
//! the returned function table. Each instance is a boxed
//! [`SequencerEngine`] whose MIDI sink forwards to the host's external
//! MIDI callback.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};

use shadow_shared::abi::{HostApiV1, PluginApiV2, PLUGIN_API_VERSION_1, PLUGIN_API_VERSION_2};
use shadow_shared::UsbMidiPacket;

use crate::midi_out::MidiSink;
use crate::SequencerEngine;

/// Host callback table, set once at init. The host guarantees the table
/// outlives every instance it creates.
static HOST: AtomicPtr<HostApiV1> = AtomicPtr::new(std::ptr::null_mut());

fn host_api() -> Option<&'static HostApiV1> {
    let ptr = HOST.load(Ordering::Acquire);
    if ptr.is_null() {
        None
    } else {
        // Host tables are immutable after init.
        Some(unsafe { &*ptr })
    }
}

fn host_log(msg: &str) {
    if let Some(host) = host_api() {
        if let Some(log) = host.log {
            let mut bytes = msg.as_bytes().to_vec();
            bytes.push(0);
            unsafe { log(bytes.as_ptr() as *const c_char) };
        }
    }
}

/// Sink that pushes packets through `midi_send_external`.
struct HostSink;

impl MidiSink for HostSink {
    fn send(&mut self, pkt: UsbMidiPacket) {
        if let Some(host) = host_api() {
            if let Some(send) = host.midi_send_external {
                unsafe { send(pkt.bytes.as_ptr(), pkt.bytes.len() as c_int) };
            }
        }
    }
}

unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        None
    } else {
        CStr::from_ptr(ptr).to_str().ok()
    }
}

unsafe extern "C" fn create_instance(
    module_dir: *const c_char,
    defaults: *const c_char,
) -> *mut c_void {
    let mut engine = SequencerEngine::new(Box::new(HostSink));
    if let Some(defaults) = cstr(defaults) {
        engine.apply_defaults(defaults);
    }

    if let Some(dir) = cstr(module_dir) {
        host_log(&format!("sequencer loading from: {dir}"));
    }
    host_log("sequencer ready: 16 tracks");

    Box::into_raw(Box::new(engine)) as *mut c_void
}

unsafe extern "C" fn destroy_instance(instance: *mut c_void) {
    if instance.is_null() {
        return;
    }
    let mut engine = Box::from_raw(instance as *mut SequencerEngine);
    // Close anything still sounding before the library goes away.
    engine.set_param("playing", "0");
    host_log("sequencer unloaded");
}

unsafe extern "C" fn on_midi(_instance: *mut c_void, _msg: *const u8, _len: c_int, _source: c_int) {
    // No MIDI input handling; the Move surface drives the sequencer
    // through the parameter surface.
}

unsafe extern "C" fn set_param(instance: *mut c_void, key: *const c_char, val: *const c_char) {
    if instance.is_null() {
        return;
    }
    let engine = &mut *(instance as *mut SequencerEngine);
    if let (Some(key), Some(val)) = (cstr(key), cstr(val)) {
        engine.set_param(key, val);
    }
}

unsafe extern "C" fn get_param(
    instance: *mut c_void,
    key: *const c_char,
    buf: *mut c_char,
    len: c_int,
) -> c_int {
    if instance.is_null() || buf.is_null() || len <= 0 {
        return -1;
    }
    let engine = &mut *(instance as *mut SequencerEngine);
    let Some(key) = cstr(key) else { return -1 };
    let Some(value) = engine.get_param(key) else { return -1 };

    let out = std::slice::from_raw_parts_mut(buf as *mut u8, len as usize);
    let n = value.len().min(len as usize - 1);
    out[..n].copy_from_slice(&value.as_bytes()[..n]);
    out[n] = 0;
    n as c_int
}

unsafe extern "C" fn get_error(_instance: *mut c_void) -> *const c_char {
    std::ptr::null()
}

unsafe extern "C" fn render_block(instance: *mut c_void, out: *mut i16, frames: c_int) {
    if instance.is_null() || out.is_null() || frames <= 0 {
        return;
    }
    let engine = &mut *(instance as *mut SequencerEngine);
    let buf = std::slice::from_raw_parts_mut(out, frames as usize * 2);
    engine.render_block(buf, frames as usize);
}

static PLUGIN_API_V2: PluginApiV2 = PluginApiV2 {
    api_version: PLUGIN_API_VERSION_2,
    create_instance: Some(create_instance),
    destroy_instance: Some(destroy_instance),
    on_midi: Some(on_midi),
    set_param: Some(set_param),
    get_param: Some(get_param),
    get_error: Some(get_error),
    render_block: Some(render_block),
};

/// Plugin entry point resolved by the module manager.
///
/// # Safety
/// `host` must point to a v1 host table that stays valid for the life of
/// the library.
#[no_mangle]
pub unsafe extern "C" fn move_plugin_init_v2(host: *const HostApiV1) -> *mut PluginApiV2 {
    if host.is_null() {
        return std::ptr::null_mut();
    }

    if (*host).api_version != PLUGIN_API_VERSION_1 {
        // Can't use host_log before storing the pointer.
        if let Some(log) = (*host).log {
            let msg = format!(
                "API version mismatch: host={}, plugin expects {}\0",
                (*host).api_version,
                PLUGIN_API_VERSION_1
            );
            log(msg.as_ptr() as *const c_char);
        }
        return std::ptr::null_mut();
    }

    HOST.store(host as *mut HostApiV1, Ordering::Release);
    host_log("sequencer plugin initialized (v2)");

    &PLUGIN_API_V2 as *const PluginApiV2 as *mut PluginApiV2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    // Leaked so the table outlives the process: the HOST pointer is a
    // process-wide static and tests run concurrently.
    fn make_host_with_version(api_version: c_int) -> &'static HostApiV1 {
        Box::leak(Box::new(HostApiV1 {
            api_version,
            sample_rate: shadow_shared::SAMPLE_RATE as c_int,
            frames_per_block: shadow_shared::FRAMES_PER_BLOCK as c_int,
            mapped_memory: std::ptr::null_mut(),
            audio_out_offset: shadow_shared::AUDIO_OUT_OFFSET as c_int,
            audio_in_offset: shadow_shared::AUDIO_IN_OFFSET as c_int,
            log: None,
            midi_send_internal: None,
            midi_send_external: None,
        }))
    }

    fn make_host() -> &'static HostApiV1 {
        make_host_with_version(PLUGIN_API_VERSION_1)
    }

    #[test]
    fn init_rejects_wrong_host_version() {
        let host = make_host_with_version(99);
        let api = unsafe { move_plugin_init_v2(host) };
        assert!(api.is_null());
    }

    #[test]
    fn full_instance_lifecycle() {
        let host = make_host();
        let api = unsafe { move_plugin_init_v2(host) };
        assert!(!api.is_null());
        let api = unsafe { &*api };
        assert_eq!(api.api_version, PLUGIN_API_VERSION_2);

        let dir = CString::new("/modules/seq").unwrap();
        let defaults = CString::new(r#"{"bpm": 90}"#).unwrap();
        let instance =
            unsafe { api.create_instance.unwrap()(dir.as_ptr(), defaults.as_ptr()) };
        assert!(!instance.is_null());

        // Defaults applied: read bpm back through the ABI.
        let key = CString::new("bpm").unwrap();
        let mut buf = [0 as c_char; 32];
        let n = unsafe {
            api.get_param.unwrap()(instance, key.as_ptr(), buf.as_mut_ptr(), buf.len() as c_int)
        };
        assert_eq!(n, 2);
        let text = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_str().unwrap();
        assert_eq!(text, "90");

        // Render with playback stopped produces silence.
        let mut audio = [1i16; shadow_shared::FRAMES_PER_BLOCK * 2];
        unsafe {
            api.render_block.unwrap()(instance, audio.as_mut_ptr(), 128);
        }
        assert!(audio.iter().all(|&s| s == 0));

        unsafe { api.destroy_instance.unwrap()(instance) };
    }

    #[test]
    fn get_param_unknown_key_is_negative() {
        let host = make_host();
        let api = unsafe { &*move_plugin_init_v2(host) };
        let instance = unsafe {
            api.create_instance.unwrap()(std::ptr::null(), std::ptr::null())
        };
        let key = CString::new("no_such_key").unwrap();
        let mut buf = [0 as c_char; 8];
        let n = unsafe {
            api.get_param.unwrap()(instance, key.as_ptr(), buf.as_mut_ptr(), buf.len() as c_int)
        };
        assert_eq!(n, -1);
        unsafe { api.destroy_instance.unwrap()(instance) };
    }
}

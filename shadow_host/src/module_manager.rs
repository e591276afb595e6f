//! Module discovery, loading and lifecycle.
//!
//! Modules live in a root directory plus fixed category subdirectories,
//! each with a `module.json` manifest and (optionally) a DSP shared
//! library. Loading resolves the v2 entry symbol first, falling back to
//! v1. A failed load leaves the host running with the error retained
//! for the UI; exactly one module is loaded at a time.

use libloading::os::unix::Library as UnixLibrary;
use libloading::Library;
use shadow_shared::abi::{
    HostApiV1, PluginApiV1, PluginApiV2, PluginInitV1Fn, PluginInitV2Fn, PLUGIN_API_VERSION_1,
    PLUGIN_API_VERSION_2, PLUGIN_INIT_V1_SYMBOL, PLUGIN_INIT_V2_SYMBOL,
};
use shadow_shared::manifest::ModuleManifest;
use shadow_shared::{MidiSource, FRAMES_PER_BLOCK, SAMPLE_RATE};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use thiserror::Error;

pub const MAX_MODULES: usize = 32;

/// Category subdirectories scanned below the modules root.
pub const CATEGORY_DIRS: [&str; 5] =
    ["sound_generators", "audio_fx", "midi_fx", "utilities", "other"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid module index {0}")]
    InvalidIndex(usize),
    #[error("module not found: {0}")]
    NotFound(String),
    #[error("module '{id}' requires API v{requested}, host supports v1 and v2")]
    ApiVersion { id: String, requested: i32 },
    #[error("cannot open DSP library {path}: {source}")]
    Dlopen {
        path: String,
        #[source]
        source: libloading::Error,
    },
    #[error("no plugin entry symbol in {0}")]
    MissingEntry(String),
    #[error("plugin init returned null (API mismatch?)")]
    InitFailed,
    #[error("v2 create_instance failed")]
    CreateFailed,
    #[error("v1 on_load failed with {0}")]
    OnLoadFailed(i32),
}

enum PluginHandle {
    V1(*mut PluginApiV1),
    V2 { api: *mut PluginApiV2, instance: *mut std::os::raw::c_void },
}

struct LoadedModule {
    index: usize,
    plugin: Option<PluginHandle>,
    /// Kept alive until after the plugin is destroyed; dropping releases
    /// the dlopen handle.
    _lib: Option<Library>,
}

unsafe extern "C" fn host_log_cb(msg: *const c_char) {
    if !msg.is_null() {
        log::info!("[plugin] {}", CStr::from_ptr(msg).to_string_lossy());
    }
}

pub struct ModuleManager {
    modules: Vec<ModuleManifest>,
    /// Boxed so its address stays stable across the plugin's lifetime.
    host_api: Box<HostApiV1>,
    loaded: Option<LoadedModule>,
    /// 0-100, applied post-render unless the module claims the knob.
    host_volume: i32,
    last_error: Option<String>,
    audio_out: Vec<i16>,
}

impl ModuleManager {
    pub fn new(
        mapped_memory: *mut u8,
        midi_send_internal: unsafe extern "C" fn(*const u8, c_int) -> c_int,
        midi_send_external: unsafe extern "C" fn(*const u8, c_int) -> c_int,
    ) -> Self {
        let host_api = Box::new(HostApiV1 {
            api_version: PLUGIN_API_VERSION_1,
            sample_rate: SAMPLE_RATE as c_int,
            frames_per_block: FRAMES_PER_BLOCK as c_int,
            mapped_memory,
            audio_out_offset: shadow_shared::AUDIO_OUT_OFFSET as c_int,
            audio_in_offset: shadow_shared::AUDIO_IN_OFFSET as c_int,
            log: Some(host_log_cb),
            midi_send_internal: Some(midi_send_internal),
            midi_send_external: Some(midi_send_external),
        });

        Self {
            modules: Vec::new(),
            host_api,
            loaded: None,
            host_volume: 100,
            last_error: None,
            audio_out: vec![0i16; FRAMES_PER_BLOCK * 2],
        }
    }

    /// Scan the modules root and its category subdirectories. Broken
    /// manifests are skipped with a warning; the scan never fails.
    pub fn scan(&mut self, modules_dir: &Path) -> usize {
        self.modules.clear();
        self.scan_directory(modules_dir);
        for sub in CATEGORY_DIRS {
            self.scan_directory(&modules_dir.join(sub));
        }
        log::info!("mm: found {} modules", self.modules.len());
        self.modules.len()
    }

    fn scan_directory(&mut self, dir: &Path) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return; // a missing category directory is not an error
        };

        let mut paths: Vec<_> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.join(shadow_shared::manifest::MANIFEST_FILE).is_file())
            .collect();
        paths.sort();

        for path in paths {
            if self.modules.len() >= MAX_MODULES {
                log::warn!("mm: module limit reached, ignoring {}", path.display());
                return;
            }
            match ModuleManifest::load(&path) {
                Ok(m) => {
                    log::info!("mm: parsed module '{}' ({}) v{}", m.name, m.id, m.version);
                    self.modules.push(m);
                }
                Err(e) => log::warn!("mm: skipping {}: {e}", path.display()),
            }
        }
    }

    pub fn count(&self) -> usize {
        self.modules.len()
    }

    pub fn info(&self, index: usize) -> Option<&ModuleManifest> {
        self.modules.get(index)
    }

    pub fn find_by_id(&self, id: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.id == id)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn current(&self) -> Option<&ModuleManifest> {
        self.loaded.as_ref().and_then(|l| self.modules.get(l.index))
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn load_by_id(&mut self, id: &str) -> Result<(), LoadError> {
        match self.find_by_id(id) {
            Some(index) => self.load(index),
            None => {
                let err = LoadError::NotFound(id.to_string());
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub fn load(&mut self, index: usize) -> Result<(), LoadError> {
        self.unload();

        let result = self.load_inner(index);
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
            log::warn!("mm: load failed: {e}");
        } else {
            self.last_error = None;
        }
        result
    }

    fn load_inner(&mut self, index: usize) -> Result<(), LoadError> {
        let info = self.modules.get(index).ok_or(LoadError::InvalidIndex(index))?.clone();

        if info.api_version != PLUGIN_API_VERSION_1 as i32
            && info.api_version != PLUGIN_API_VERSION_2 as i32
        {
            return Err(LoadError::ApiVersion { id: info.id, requested: info.api_version });
        }

        // UI-only modules have no DSP library and load trivially.
        if !info.has_dsp() {
            log::info!("mm: no DSP plugin for module '{}' (UI-only)", info.id);
            self.loaded = Some(LoadedModule { index, plugin: None, _lib: None });
            return Ok(());
        }

        log::info!("mm: loading DSP plugin: {}", info.dsp_path.display());
        let lib = unsafe {
            UnixLibrary::open(
                Some(info.dsp_path.as_os_str()),
                libc::RTLD_NOW | libc::RTLD_LOCAL,
            )
        }
        .map(Library::from)
        .map_err(|source| LoadError::Dlopen {
            path: info.dsp_path.display().to_string(),
            source,
        })?;

        let dir_c = CString::new(info.module_dir.as_os_str().as_bytes()).unwrap_or_default();
        let defaults_c = info.defaults_json.as_deref().map(|d| CString::new(d).unwrap_or_default());
        let defaults_ptr = defaults_c.as_ref().map_or(std::ptr::null(), |c| c.as_ptr());

        // Copy the entry fn pointers out of their Symbols so the library
        // handle can move into the loaded-module record.
        let init_v2_fn: Option<PluginInitV2Fn> =
            unsafe { lib.get::<PluginInitV2Fn>(PLUGIN_INIT_V2_SYMBOL) }.ok().map(|s| *s);
        let init_v1_fn: Option<PluginInitV1Fn> =
            unsafe { lib.get::<PluginInitV1Fn>(PLUGIN_INIT_V1_SYMBOL) }.ok().map(|s| *s);

        // Prefer the v2 (instance) entry, fall back to v1 (singleton).
        if let Some(init_v2) = init_v2_fn {
            let api = unsafe { init_v2(&*self.host_api) };
            if !api.is_null() && unsafe { (*api).api_version } == PLUGIN_API_VERSION_2 {
                let create = unsafe { (*api).create_instance }.ok_or(LoadError::CreateFailed)?;
                let instance = unsafe { create(dir_c.as_ptr(), defaults_ptr) };
                if instance.is_null() {
                    return Err(LoadError::CreateFailed);
                }
                log::info!("mm: loaded v2 plugin for '{}'", info.id);
                self.loaded = Some(LoadedModule {
                    index,
                    plugin: Some(PluginHandle::V2 { api, instance }),
                    _lib: Some(lib),
                });
                return Ok(());
            }
            log::info!("mm: v2 init declined, trying v1");
        }

        let init_v1 = init_v1_fn
            .ok_or_else(|| LoadError::MissingEntry(info.dsp_path.display().to_string()))?;

        let api = unsafe { init_v1(&*self.host_api) };
        if api.is_null() {
            return Err(LoadError::InitFailed);
        }
        if unsafe { (*api).api_version } != PLUGIN_API_VERSION_1 {
            return Err(LoadError::InitFailed);
        }
        if let Some(on_load) = unsafe { (*api).on_load } {
            let ret = unsafe { on_load(dir_c.as_ptr(), defaults_ptr) };
            if ret != 0 {
                return Err(LoadError::OnLoadFailed(ret));
            }
        }

        log::info!("mm: loaded v1 plugin for '{}'", info.id);
        self.loaded =
            Some(LoadedModule { index, plugin: Some(PluginHandle::V1(api)), _lib: Some(lib) });
        Ok(())
    }

    /// Unload the current module: destroy the instance (or call
    /// `on_unload`), then release the library handle.
    pub fn unload(&mut self) {
        let Some(loaded) = self.loaded.take() else { return };

        match loaded.plugin {
            Some(PluginHandle::V2 { api, instance }) => unsafe {
                if let Some(destroy) = (*api).destroy_instance {
                    destroy(instance);
                }
            },
            Some(PluginHandle::V1(api)) => unsafe {
                if let Some(on_unload) = (*api).on_unload {
                    on_unload();
                }
            },
            None => {}
        }
        // loaded._lib drops here, after the instance is gone.
    }

    pub fn on_midi(&mut self, msg: &[u8], source: MidiSource) {
        let Some(loaded) = &self.loaded else { return };
        match &loaded.plugin {
            Some(PluginHandle::V2 { api, instance }) => unsafe {
                if let Some(f) = (**api).on_midi {
                    f(*instance, msg.as_ptr(), msg.len() as c_int, source.to_raw());
                }
            },
            Some(PluginHandle::V1(api)) => unsafe {
                if let Some(f) = (**api).on_midi {
                    f(msg.as_ptr(), msg.len() as c_int, source.to_raw());
                }
            },
            None => {}
        }
    }

    pub fn set_param(&mut self, key: &str, val: &str) {
        let Some(loaded) = &self.loaded else { return };
        let (Ok(key_c), Ok(val_c)) = (CString::new(key), CString::new(val)) else { return };
        match &loaded.plugin {
            Some(PluginHandle::V2 { api, instance }) => unsafe {
                if let Some(f) = (**api).set_param {
                    f(*instance, key_c.as_ptr(), val_c.as_ptr());
                }
            },
            Some(PluginHandle::V1(api)) => unsafe {
                if let Some(f) = (**api).set_param {
                    f(key_c.as_ptr(), val_c.as_ptr());
                }
            },
            None => {}
        }
    }

    pub fn get_param(&mut self, key: &str) -> Option<String> {
        let loaded = self.loaded.as_ref()?;
        let key_c = CString::new(key).ok()?;
        let mut buf = [0u8; 256];

        let n = match &loaded.plugin {
            Some(PluginHandle::V2 { api, instance }) => unsafe {
                let f = (**api).get_param?;
                f(*instance, key_c.as_ptr(), buf.as_mut_ptr() as *mut c_char, buf.len() as c_int)
            },
            Some(PluginHandle::V1(api)) => unsafe {
                let f = (**api).get_param?;
                f(key_c.as_ptr(), buf.as_mut_ptr() as *mut c_char, buf.len() as c_int)
            },
            None => return None,
        };

        if n < 0 {
            return None;
        }
        let n = (n as usize).min(buf.len());
        Some(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// Render one block from the current module into the internal buffer
    /// and apply host volume. Returns the buffer (silence when no module
    /// or no renderer).
    pub fn render_block(&mut self) -> &[i16] {
        let frames = FRAMES_PER_BLOCK;
        let mut rendered = false;

        if let Some(loaded) = &self.loaded {
            match &loaded.plugin {
                Some(PluginHandle::V2 { api, instance }) => unsafe {
                    if let Some(f) = (**api).render_block {
                        f(*instance, self.audio_out.as_mut_ptr(), frames as c_int);
                        rendered = true;
                    }
                },
                Some(PluginHandle::V1(api)) => unsafe {
                    if let Some(f) = (**api).render_block {
                        f(self.audio_out.as_mut_ptr(), frames as c_int);
                        rendered = true;
                    }
                },
                None => {}
            }
        }

        if !rendered {
            self.audio_out.fill(0);
        } else if self.host_volume < 100 {
            // The master-knob claim only gates who handles the volume
            // CC; an already-lowered host volume always attenuates.
            for s in self.audio_out.iter_mut() {
                *s = ((*s as i32 * self.host_volume) / 100) as i16;
            }
        }

        &self.audio_out
    }

    pub fn set_host_volume(&mut self, volume: i32) {
        self.host_volume = volume.clamp(0, 100);
    }

    pub fn host_volume(&self) -> i32 {
        self.host_volume
    }

    pub fn claims_master_knob(&self) -> bool {
        self.current().map(|m| m.caps.claims_master_knob).unwrap_or(false)
    }

    pub fn wants_raw_midi(&self) -> bool {
        self.current().map(|m| m.caps.raw_midi).unwrap_or(false)
    }

    pub fn wants_raw_ui(&self) -> bool {
        self.current().map(|m| m.caps.raw_ui).unwrap_or(false)
    }
}

impl Drop for ModuleManager {
    fn drop(&mut self) {
        self.unload();
    }
}

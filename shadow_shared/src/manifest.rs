//! Module manifest (`module.json`) parsing.
//!
//! Every module directory carries a small JSON descriptor. A manifest
//! that fails to parse skips that module during the scan; it never aborts
//! the host.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "module.json";
pub const MAX_MANIFEST_BYTES: u64 = 8192;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest too large: {0}")]
    TooLarge(PathBuf),
    #[error("invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("manifest {0} is missing required field 'id'")]
    MissingId(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    SoundGenerator,
    AudioFx,
    MidiFx,
    Utility,
    Other,
}

impl Default for ComponentType {
    fn default() -> Self {
        Self::Other
    }
}

/// Raw JSON shape. Unknown fields are ignored so newer manifests still
/// load on older hosts.
#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    ui: Option<String>,
    #[serde(default)]
    dsp: Option<String>,
    #[serde(default)]
    api_version: Option<i32>,
    #[serde(default)]
    component_type: Option<ComponentType>,
    #[serde(default)]
    audio_out: bool,
    #[serde(default)]
    audio_in: bool,
    #[serde(default)]
    midi_in: bool,
    #[serde(default)]
    midi_out: bool,
    #[serde(default)]
    aftertouch: bool,
    #[serde(default)]
    claims_master_knob: bool,
    #[serde(default)]
    raw_midi: bool,
    #[serde(default)]
    raw_ui: bool,
    #[serde(default)]
    defaults: Option<serde_json::Value>,
}

/// Capability flags declared by a module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub audio_out: bool,
    pub audio_in: bool,
    pub midi_in: bool,
    pub midi_out: bool,
    pub aftertouch: bool,
    /// Module handles the master volume knob itself.
    pub claims_master_knob: bool,
    /// Module wants untransformed MIDI (and the control-CC stream).
    pub raw_midi: bool,
    /// Module owns the whole UI; host keeps the script layer out.
    pub raw_ui: bool,
}

/// Parsed module descriptor with resolved paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub module_dir: PathBuf,
    pub ui_script: PathBuf,
    pub dsp_path: PathBuf,
    pub api_version: i32,
    pub component_type: ComponentType,
    pub caps: Capabilities,
    /// The `defaults` object re-serialized verbatim; passed to `on_load`.
    pub defaults_json: Option<String>,
}

impl ModuleManifest {
    /// Load and resolve `module.json` from a module directory.
    pub fn load(module_dir: &Path) -> Result<Self, ManifestError> {
        let path = module_dir.join(MANIFEST_FILE);

        let meta = std::fs::metadata(&path)
            .map_err(|source| ManifestError::Io { path: path.clone(), source })?;
        if meta.len() > MAX_MANIFEST_BYTES {
            return Err(ManifestError::TooLarge(path));
        }

        let text = std::fs::read_to_string(&path)
            .map_err(|source| ManifestError::Io { path: path.clone(), source })?;
        Self::parse(module_dir, &text, &path)
    }

    fn parse(module_dir: &Path, text: &str, path: &Path) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(text)
            .map_err(|source| ManifestError::Parse { path: path.to_path_buf(), source })?;

        if raw.id.is_empty() {
            return Err(ManifestError::MissingId(path.to_path_buf()));
        }

        let name = if raw.name.is_empty() { raw.id.clone() } else { raw.name };
        let ui_file = raw.ui.unwrap_or_else(|| "ui.js".to_string());
        let dsp_file = raw.dsp.unwrap_or_else(|| "dsp.so".to_string());

        let defaults_json = match raw.defaults {
            Some(v) if v.is_object() => Some(v.to_string()),
            _ => None,
        };

        Ok(ModuleManifest {
            id: raw.id,
            name,
            version: raw.version,
            module_dir: module_dir.to_path_buf(),
            ui_script: module_dir.join(ui_file),
            dsp_path: module_dir.join(dsp_file),
            api_version: raw.api_version.unwrap_or(1),
            component_type: raw.component_type.unwrap_or_default(),
            caps: Capabilities {
                audio_out: raw.audio_out,
                audio_in: raw.audio_in,
                midi_in: raw.midi_in,
                midi_out: raw.midi_out,
                aftertouch: raw.aftertouch,
                claims_master_knob: raw.claims_master_knob,
                raw_midi: raw.raw_midi,
                raw_ui: raw.raw_ui,
            },
            defaults_json,
        })
    }

    /// Modules without a DSP library are UI-only and load without dlopen.
    pub fn has_dsp(&self) -> bool {
        self.dsp_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ModuleManifest, ManifestError> {
        ModuleManifest::parse(Path::new("/modules/demo"), text, Path::new("/modules/demo/module.json"))
    }

    #[test]
    fn minimal_manifest_gets_defaults() {
        let m = parse(r#"{"id": "seq"}"#).unwrap();
        assert_eq!(m.name, "seq");
        assert_eq!(m.api_version, 1);
        assert_eq!(m.ui_script, PathBuf::from("/modules/demo/ui.js"));
        assert_eq!(m.dsp_path, PathBuf::from("/modules/demo/dsp.so"));
        assert_eq!(m.component_type, ComponentType::Other);
        assert!(!m.caps.claims_master_knob);
        assert!(m.defaults_json.is_none());
    }

    #[test]
    fn full_manifest() {
        let m = parse(
            r#"{
                "id": "stepseq",
                "name": "Step Sequencer",
                "version": "1.2.0",
                "ui": "main.js",
                "dsp": "libseq.so",
                "api_version": 2,
                "component_type": "midi_fx",
                "midi_out": true,
                "raw_midi": true,
                "defaults": {"bpm": 128}
            }"#,
        )
        .unwrap();
        assert_eq!(m.name, "Step Sequencer");
        assert_eq!(m.api_version, 2);
        assert_eq!(m.component_type, ComponentType::MidiFx);
        assert!(m.caps.midi_out);
        assert!(m.caps.raw_midi);
        assert!(!m.caps.audio_out);
        assert_eq!(m.defaults_json.as_deref(), Some(r#"{"bpm":128}"#));
    }

    #[test]
    fn missing_id_is_an_error() {
        assert!(matches!(parse(r#"{"name": "x"}"#), Err(ManifestError::MissingId(_))));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(parse("{nope"), Err(ManifestError::Parse { .. })));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let m = parse(r#"{"id": "x", "future_field": [1, 2, 3]}"#).unwrap();
        assert_eq!(m.id, "x");
    }
}

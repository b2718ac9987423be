use serde::{Deserialize, Serialize};

/// Version tag written into every descriptor produced by the current
/// probe-transcript parser. Buckets holding descriptors with a different
/// tag are treated as stale and rebuilt from scratch.
pub const PLUGIN_QUERY_API_VERSION: u32 = 7;

/// Hint bits reported by probes and the cached catalog.
pub mod hints {
    pub const IS_BRIDGE: u32 = 0x001;
    pub const IS_RTSAFE: u32 = 0x002;
    pub const IS_SYNTH: u32 = 0x004;
    pub const HAS_CUSTOM_UI: u32 = 0x010;
    pub const CAN_DRYWET: u32 = 0x020;
    pub const CAN_VOLUME: u32 = 0x040;
    pub const CAN_BALANCE: u32 = 0x080;
    pub const CAN_PANNING: u32 = 0x100;
}

/// ABI target of a probed binary, independent of the host architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryArch {
    None,
    Native,
    Posix32,
    Posix64,
    Win32,
    Win64,
    Other,
}

impl BinaryArch {
    /// Decodes the numeric `build` value emitted on the probe wire.
    pub fn from_probe_code(code: u32) -> Self {
        match code {
            1 => BinaryArch::Posix32,
            2 => BinaryArch::Posix64,
            3 => BinaryArch::Win32,
            4 => BinaryArch::Win64,
            5 => BinaryArch::Other,
            _ => BinaryArch::None,
        }
    }

    /// Concrete architecture the `Native` slot resolves to on this host.
    pub fn host_native() -> Self {
        let is_64bit = cfg!(target_pointer_width = "64");
        if cfg!(windows) {
            if is_64bit {
                BinaryArch::Win64
            } else {
                BinaryArch::Win32
            }
        } else if cfg!(unix) {
            if is_64bit {
                BinaryArch::Posix64
            } else {
                BinaryArch::Posix32
            }
        } else {
            BinaryArch::Other
        }
    }

    /// Suffix used in cache-bucket keys, e.g. the `native` in `LADSPA_native`.
    pub fn key(self) -> &'static str {
        match self {
            BinaryArch::None => "none",
            BinaryArch::Native => "native",
            BinaryArch::Posix32 => "posix32",
            BinaryArch::Posix64 => "posix64",
            BinaryArch::Win32 => "win32",
            BinaryArch::Win64 => "win64",
            BinaryArch::Other => "other",
        }
    }

    pub fn is_wine(self) -> bool {
        cfg!(unix) && matches!(self, BinaryArch::Win32 | BinaryArch::Win64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginFormat {
    None,
    Internal,
    Ladspa,
    Dssi,
    Lv2,
    Vst2,
    Vst3,
    Au,
    Sf2,
    Sfz,
    Jsfx,
}

impl PluginFormat {
    /// Prefix used in cache-bucket keys and on the probe command line.
    pub fn key(self) -> &'static str {
        match self {
            PluginFormat::None => "NONE",
            PluginFormat::Internal => "INTERNAL",
            PluginFormat::Ladspa => "LADSPA",
            PluginFormat::Dssi => "DSSI",
            PluginFormat::Lv2 => "LV2",
            PluginFormat::Vst2 => "VST2",
            PluginFormat::Vst3 => "VST3",
            PluginFormat::Au => "AU",
            PluginFormat::Sf2 => "SF2",
            PluginFormat::Sfz => "SFZ",
            PluginFormat::Jsfx => "JSFX",
        }
    }

    /// Numeric plugin-type code used at the native utils ABI.
    pub fn code(self) -> u32 {
        match self {
            PluginFormat::None => 0,
            PluginFormat::Internal => 1,
            PluginFormat::Ladspa => 2,
            PluginFormat::Dssi => 3,
            PluginFormat::Lv2 => 4,
            PluginFormat::Vst2 => 5,
            PluginFormat::Vst3 => 6,
            PluginFormat::Au => 7,
            PluginFormat::Sf2 => 8,
            PluginFormat::Sfz => 9,
            PluginFormat::Jsfx => 10,
        }
    }

    /// Formats whose full index lives in the in-process native catalog.
    pub fn is_cached(self) -> bool {
        matches!(
            self,
            PluginFormat::Lv2 | PluginFormat::Au | PluginFormat::Sfz | PluginFormat::Jsfx
        )
    }
}

/// Key of the cache bucket holding one (format, architecture) pass.
///
/// Cached-catalog units carry no architecture suffix; their catalog is
/// architecture-independent.
pub fn bucket_key(format: PluginFormat, arch: Option<BinaryArch>) -> String {
    match arch {
        Some(arch) => format!("{}_{}", format.key(), arch.key()),
        None => format.key().to_string(),
    }
}

/// Metadata for one discovered plugin, as reported by a probe process or
/// converted from the cached catalog. Immutable once committed; superseded
/// wholesale on the next scan of its bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub api: u32,
    pub valid: bool,
    pub build: BinaryArch,
    pub format: PluginFormat,
    pub hints: u32,
    pub category: String,
    pub filename: String,
    pub name: String,
    pub label: String,
    pub maker: String,
    pub unique_id: i64,
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub cv_ins: u32,
    pub cv_outs: u32,
    pub midi_ins: u32,
    pub midi_outs: u32,
    pub parameter_ins: u32,
    pub parameter_outs: u32,
}

impl PluginDescriptor {
    /// Empty descriptor seeded with the plugin format, as opened by an
    /// `init` protocol line.
    pub fn new(format: PluginFormat) -> Self {
        Self {
            api: PLUGIN_QUERY_API_VERSION,
            valid: true,
            build: BinaryArch::None,
            format,
            hints: 0,
            category: String::new(),
            filename: String::new(),
            name: String::new(),
            label: String::new(),
            maker: String::new(),
            unique_id: 0,
            audio_ins: 0,
            audio_outs: 0,
            cv_ins: 0,
            cv_outs: 0,
            midi_ins: 0,
            midi_outs: 0,
            parameter_ins: 0,
            parameter_outs: 0,
        }
    }

    pub fn is_synth(&self) -> bool {
        self.hints & hints::IS_SYNTH != 0
    }

    pub fn has_custom_ui(&self) -> bool {
        self.hints & hints::HAS_CUSTOM_UI != 0
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn descriptor_roundtrip() {
        let mut descriptor = PluginDescriptor::new(PluginFormat::Ladspa);
        descriptor.name = "Gain".into();
        descriptor.label = "gain".into();
        descriptor.audio_ins = 2;
        let json = serde_json::to_string(&descriptor).unwrap();
        let roundtrip: PluginDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip, descriptor);
    }

    #[test]
    fn bucket_keys() {
        assert_eq!(
            bucket_key(PluginFormat::Ladspa, Some(BinaryArch::Native)),
            "LADSPA_native"
        );
        assert_eq!(
            bucket_key(PluginFormat::Vst3, Some(BinaryArch::Win64)),
            "VST3_win64"
        );
        assert_eq!(bucket_key(PluginFormat::Lv2, None), "LV2");
    }

    #[test]
    fn host_native_resolves_to_a_concrete_architecture() {
        let native = BinaryArch::host_native();
        assert_ne!(native, BinaryArch::Native);
        assert_ne!(native, BinaryArch::None);
    }

    #[test]
    fn probe_build_codes() {
        assert_eq!(BinaryArch::from_probe_code(0), BinaryArch::None);
        assert_eq!(BinaryArch::from_probe_code(2), BinaryArch::Posix64);
        assert_eq!(BinaryArch::from_probe_code(5), BinaryArch::Other);
        assert_eq!(BinaryArch::from_probe_code(99), BinaryArch::None);
    }
}

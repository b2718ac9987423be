use std::ffi::{c_char, CStr, CString};
use std::path::Path;

use thiserror::Error;

use ostinato_plugin_db::{BinaryArch, PluginDescriptor, PluginFormat};

/// How many queries may pass between idle pumps of an AU batch.
const IDLE_PUMP_INTERVAL: u32 = 50;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to load native utils library: {0}")]
    Load(#[from] libloading::Error),
}

/// One entry of the in-process native catalog, before format-specific
/// conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedPluginInfo {
    pub valid: bool,
    pub category: String,
    pub hints: u32,
    pub name: String,
    pub label: String,
    pub maker: String,
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub cv_ins: u32,
    pub cv_outs: u32,
    pub midi_ins: u32,
    pub midi_outs: u32,
    pub parameter_ins: u32,
    pub parameter_outs: u32,
}

/// In-process catalog for formats that do not need subprocess probing
/// (LV2, AU, SFZ, JSFX).
pub trait NativeCatalog: Send + Sync {
    fn cached_plugin_count(&self, format: PluginFormat, path_hint: &str) -> u32;
    fn cached_plugin_info(&self, format: PluginFormat, index: u32) -> Option<CachedPluginInfo>;

    /// AU queries must run inside an init/cleanup bracket; `juce_idle` lets
    /// the native layer service its event loop and must return within a
    /// bounded slice.
    fn juce_init(&self) {}
    fn juce_idle(&self) {}
    fn juce_cleanup(&self) {}
}

/// Catalog used when no native utils library is available; reports an empty
/// index for every format.
#[derive(Debug, Default)]
pub struct NullCatalog;

impl NativeCatalog for NullCatalog {
    fn cached_plugin_count(&self, _format: PluginFormat, _path_hint: &str) -> u32 {
        0
    }

    fn cached_plugin_info(&self, _format: PluginFormat, _index: u32) -> Option<CachedPluginInfo> {
        None
    }
}

/// Scoped batch of cached-catalog queries for one format.
///
/// Wraps AU batches in the required `juce_init`/`juce_cleanup` bracket and
/// pumps `juce_idle` every [`IDLE_PUMP_INTERVAL`] queries; cleanup also runs
/// when the batch is dropped mid-way by a cancelled scan.
pub struct CatalogBatch<'a> {
    catalog: &'a dyn NativeCatalog,
    format: PluginFormat,
    queries: u32,
}

impl<'a> CatalogBatch<'a> {
    pub fn begin(
        catalog: &'a dyn NativeCatalog,
        format: PluginFormat,
        path_hint: &str,
    ) -> (Self, u32) {
        if format == PluginFormat::Au {
            catalog.juce_init();
        }
        let count = catalog.cached_plugin_count(format, path_hint);
        (
            Self {
                catalog,
                format,
                queries: 0,
            },
            count,
        )
    }

    pub fn descriptor_at(&mut self, index: u32) -> Option<CachedPluginInfo> {
        let info = self.catalog.cached_plugin_info(self.format, index);
        if self.format == PluginFormat::Au {
            self.queries += 1;
            if self.queries % IDLE_PUMP_INTERVAL == 0 {
                self.catalog.juce_idle();
            }
        }
        info
    }
}

impl Drop for CatalogBatch<'_> {
    fn drop(&mut self) {
        if self.format == PluginFormat::Au {
            self.catalog.juce_cleanup();
        }
    }
}

/// Format-specific remap from a raw catalog entry to a descriptor.
///
/// LV2 entries pack "bundle-path/label" into the label and are split on the
/// first OS path separator; SFZ entries carry the soundfile path in the
/// label slot and swap it into the filename.
pub fn convert_cached(info: &CachedPluginInfo, format: PluginFormat) -> PluginDescriptor {
    let mut descriptor = PluginDescriptor::new(format);
    descriptor.build = BinaryArch::Native;
    descriptor.hints = info.hints;
    descriptor.category = info.category.clone();
    descriptor.name = info.name.clone();
    descriptor.label = info.label.clone();
    descriptor.maker = info.maker.clone();
    descriptor.audio_ins = info.audio_ins;
    descriptor.audio_outs = info.audio_outs;
    descriptor.cv_ins = info.cv_ins;
    descriptor.cv_outs = info.cv_outs;
    descriptor.midi_ins = info.midi_ins;
    descriptor.midi_outs = info.midi_outs;
    descriptor.parameter_ins = info.parameter_ins;
    descriptor.parameter_outs = info.parameter_outs;

    match format {
        PluginFormat::Lv2 => {
            if let Some((bundle, label)) = info.label.split_once(std::path::MAIN_SEPARATOR) {
                descriptor.filename = bundle.to_string();
                descriptor.label = label.to_string();
            }
        }
        PluginFormat::Sfz => {
            descriptor.filename = info.label.clone();
            descriptor.label = info.name.clone();
        }
        _ => {}
    }
    descriptor
}

/// Raw catalog entry as returned by the native utils library.
#[repr(C)]
pub struct RawCachedPluginInfo {
    pub valid: bool,
    pub category: u32,
    pub hints: u32,
    pub name: *const c_char,
    pub label: *const c_char,
    pub maker: *const c_char,
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub cv_ins: u32,
    pub cv_outs: u32,
    pub midi_ins: u32,
    pub midi_outs: u32,
    pub parameter_ins: u32,
    pub parameter_outs: u32,
}

fn category_name(code: u32) -> &'static str {
    match code {
        1 => "synth",
        2 => "delay",
        3 => "eq",
        4 => "filter",
        5 => "dynamics",
        6 => "modulator",
        7 => "utility",
        8 => "other",
        _ => "",
    }
}

unsafe fn owned_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// `libloading`-backed catalog over the native utils library shipped with
/// the host engine.
pub struct NativeUtilsLib {
    lib: libloading::Library,
}

impl NativeUtilsLib {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        // Safety: the utils library runs no initialization routines beyond
        // symbol registration.
        let lib = unsafe { libloading::Library::new(path)? };
        Ok(Self { lib })
    }

    fn call_void(&self, symbol: &[u8]) {
        unsafe {
            if let Ok(func) = self.lib.get::<unsafe extern "C" fn()>(symbol) {
                func();
            }
        }
    }
}

impl NativeCatalog for NativeUtilsLib {
    fn cached_plugin_count(&self, format: PluginFormat, path_hint: &str) -> u32 {
        let Ok(hint) = CString::new(path_hint) else {
            return 0;
        };
        unsafe {
            match self
                .lib
                .get::<unsafe extern "C" fn(u32, *const c_char) -> u32>(
                    b"ostinato_get_cached_plugin_count",
                ) {
                Ok(func) => func(format.code(), hint.as_ptr()),
                Err(err) => {
                    tracing::warn!("native catalog count unavailable: {err}");
                    0
                }
            }
        }
    }

    fn cached_plugin_info(&self, format: PluginFormat, index: u32) -> Option<CachedPluginInfo> {
        unsafe {
            let func = self
                .lib
                .get::<unsafe extern "C" fn(u32, u32) -> *const RawCachedPluginInfo>(
                    b"ostinato_get_cached_plugin_info",
                )
                .ok()?;
            let raw = func(format.code(), index);
            if raw.is_null() {
                return None;
            }
            let raw = &*raw;
            Some(CachedPluginInfo {
                valid: raw.valid,
                category: category_name(raw.category).to_string(),
                hints: raw.hints,
                name: owned_string(raw.name),
                label: owned_string(raw.label),
                maker: owned_string(raw.maker),
                audio_ins: raw.audio_ins,
                audio_outs: raw.audio_outs,
                cv_ins: raw.cv_ins,
                cv_outs: raw.cv_outs,
                midi_ins: raw.midi_ins,
                midi_outs: raw.midi_outs,
                parameter_ins: raw.parameter_ins,
                parameter_outs: raw.parameter_outs,
            })
        }
    }

    fn juce_init(&self) {
        self.call_void(b"ostinato_juce_init");
    }

    fn juce_idle(&self) {
        self.call_void(b"ostinato_juce_idle");
    }

    fn juce_cleanup(&self) {
        self.call_void(b"ostinato_juce_cleanup");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct RecordingCatalog {
        count: u32,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingCatalog {
        fn with_count(count: u32) -> Self {
            Self {
                count,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl NativeCatalog for RecordingCatalog {
        fn cached_plugin_count(&self, _format: PluginFormat, _path_hint: &str) -> u32 {
            self.record("count");
            self.count
        }

        fn cached_plugin_info(
            &self,
            _format: PluginFormat,
            index: u32,
        ) -> Option<CachedPluginInfo> {
            self.record(format!("info {index}"));
            Some(CachedPluginInfo {
                valid: true,
                name: format!("plugin {index}"),
                label: format!("plugin_{index}"),
                ..CachedPluginInfo::default()
            })
        }

        fn juce_init(&self) {
            self.record("init");
        }

        fn juce_idle(&self) {
            self.record("idle");
        }

        fn juce_cleanup(&self) {
            self.record("cleanup");
        }
    }

    #[test]
    fn au_batches_bracket_queries_and_pump_idle() {
        let catalog = RecordingCatalog::with_count(120);
        {
            let (mut batch, count) = CatalogBatch::begin(&catalog, PluginFormat::Au, "");
            assert_eq!(count, 120);
            for index in 0..count {
                batch.descriptor_at(index);
            }
        }
        let calls = catalog.calls.lock().unwrap();
        assert_eq!(calls.first().map(String::as_str), Some("init"));
        assert_eq!(calls.last().map(String::as_str), Some("cleanup"));
        let idle_positions: Vec<_> = calls
            .iter()
            .enumerate()
            .filter(|(_, call)| call.as_str() == "idle")
            .map(|(position, _)| position)
            .collect();
        assert_eq!(idle_positions.len(), 2);
        assert_eq!(calls[idle_positions[0] - 1], "info 49");
    }

    #[test]
    fn non_au_batches_skip_the_juce_bracket() {
        let catalog = RecordingCatalog::with_count(60);
        {
            let (mut batch, count) = CatalogBatch::begin(&catalog, PluginFormat::Lv2, "/usr/lib/lv2");
            for index in 0..count {
                batch.descriptor_at(index);
            }
        }
        let calls = catalog.calls.lock().unwrap();
        assert!(!calls.iter().any(|call| call == "init"));
        assert!(!calls.iter().any(|call| call == "idle"));
        assert!(!calls.iter().any(|call| call == "cleanup"));
    }

    #[test]
    fn cancelled_au_batch_still_cleans_up() {
        let catalog = RecordingCatalog::with_count(10);
        {
            let (mut batch, _count) = CatalogBatch::begin(&catalog, PluginFormat::Au, "");
            batch.descriptor_at(0);
            // batch dropped early, as on cancellation
        }
        let calls = catalog.calls.lock().unwrap();
        assert_eq!(calls.last().map(String::as_str), Some("cleanup"));
    }

    #[test]
    fn generic_conversion_copies_ports_and_marks_native() {
        let info = CachedPluginInfo {
            valid: true,
            category: "synth".into(),
            hints: ostinato_plugin_db::hints::IS_SYNTH,
            name: "Mini".into(),
            label: "mini".into(),
            maker: "Example".into(),
            audio_outs: 2,
            midi_ins: 1,
            parameter_ins: 12,
            ..CachedPluginInfo::default()
        };
        let descriptor = convert_cached(&info, PluginFormat::Jsfx);
        assert_eq!(descriptor.build, BinaryArch::Native);
        assert_eq!(descriptor.name, "Mini");
        assert_eq!(descriptor.label, "mini");
        assert_eq!(descriptor.filename, "");
        assert_eq!(descriptor.audio_outs, 2);
        assert_eq!(descriptor.midi_ins, 1);
        assert_eq!(descriptor.parameter_ins, 12);
        assert!(descriptor.is_synth());
    }

    #[test]
    fn lv2_conversion_splits_bundle_from_label() {
        let info = CachedPluginInfo {
            valid: true,
            label: format!("amp.lv2{}urn:example:amp", std::path::MAIN_SEPARATOR),
            ..CachedPluginInfo::default()
        };
        let descriptor = convert_cached(&info, PluginFormat::Lv2);
        assert_eq!(descriptor.filename, "amp.lv2");
        assert_eq!(descriptor.label, "urn:example:amp");
    }

    #[test]
    fn sfz_conversion_swaps_filename_and_label() {
        let info = CachedPluginInfo {
            valid: true,
            name: "Strings".into(),
            label: "/srv/sfz/strings.sfz".into(),
            ..CachedPluginInfo::default()
        };
        let descriptor = convert_cached(&info, PluginFormat::Sfz);
        assert_eq!(descriptor.filename, "/srv/sfz/strings.sfz");
        assert_eq!(descriptor.label, "Strings");
    }
}

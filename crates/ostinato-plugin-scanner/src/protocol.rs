use std::path::Path;

use ostinato_plugin_db::{BinaryArch, PluginDescriptor, PluginFormat};

pub const PROTOCOL_PREFIX: &str = "carla-discovery::";
pub const PROTOCOL_INIT: &str = "carla-discovery::init::-----------";
pub const PROTOCOL_END: &str = "carla-discovery::end::------------";

const CRASH_LINE: &str = "Segmentation fault";
const WINE_DLL_WARNING: &str = "err:module:import_dll Library";

/// Sentinel filename for formats the probe enumerates at the OS level.
pub const SCAN_ALL: &str = ":all";

/// Incremental parser for the line-oriented probe wire protocol.
///
/// `init` opens a descriptor accumulator seeded with the plugin format,
/// `end` commits it, `key::value` lines update fields. Malformed input never
/// fails the parse; it is logged and skipped.
#[derive(Debug)]
pub struct TranscriptParser {
    format: PluginFormat,
    filename: String,
    fallback_label: String,
    current: Option<PluginDescriptor>,
    committed: Vec<PluginDescriptor>,
}

impl TranscriptParser {
    pub fn new(format: PluginFormat, filename: &str) -> Self {
        let stored = if filename == SCAN_ALL { "" } else { filename };
        Self {
            format,
            filename: stored.to_string(),
            fallback_label: fallback_label(filename),
            current: None,
            committed: Vec::new(),
        }
    }

    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        if line == PROTOCOL_INIT {
            let mut descriptor = PluginDescriptor::new(self.format);
            descriptor.filename = self.filename.clone();
            self.current = Some(descriptor);
        } else if line == PROTOCOL_END {
            if let Some(descriptor) = self.current.take() {
                self.committed.push(descriptor);
            }
        } else if line == CRASH_LINE {
            tracing::warn!("probe crashed while inspecting {}", self.filename);
        } else if line.starts_with(WINE_DLL_WARNING) {
            tracing::warn!("{line}");
        } else if let Some(rest) = line.strip_prefix(PROTOCOL_PREFIX) {
            self.feed_property(rest);
        } else {
            tracing::debug!("ignoring unexpected probe output: {line}");
        }
    }

    fn feed_property(&mut self, rest: &str) {
        let Some((prop, value)) = rest.split_once("::") else {
            tracing::debug!("malformed probe line for {}: {rest}", self.filename);
            return;
        };

        match prop {
            "info" | "warning" | "error" => {
                tracing::info!("probe {prop} for {}: {value}", self.filename);
                return;
            }
            _ => {}
        }

        if prop == "uri" && value.is_empty() {
            // an LV2 plugin without a URI cannot be instantiated
            self.current = None;
            return;
        }

        let Some(descriptor) = self.current.as_mut() else {
            return;
        };

        match prop {
            "build" => {
                if let Some(code) = parse_digits(value) {
                    descriptor.build = BinaryArch::from_probe_code(code as u32);
                }
            }
            "name" => {
                descriptor.name = non_empty_or(value, &self.fallback_label);
            }
            "label" => {
                descriptor.label = non_empty_or(value, &self.fallback_label);
            }
            "filename" => descriptor.filename = value.to_string(),
            "maker" => descriptor.maker = value.to_string(),
            "category" => descriptor.category = value.to_string(),
            "uniqueId" => {
                if let Some(id) = parse_digits(value) {
                    descriptor.unique_id = id;
                }
            }
            "hints" => {
                if let Some(hints) = parse_digits(value) {
                    descriptor.hints = hints as u32;
                }
            }
            "audio.ins" => set_count(&mut descriptor.audio_ins, value),
            "audio.outs" => set_count(&mut descriptor.audio_outs, value),
            "cv.ins" => set_count(&mut descriptor.cv_ins, value),
            "cv.outs" => set_count(&mut descriptor.cv_outs, value),
            "midi.ins" => set_count(&mut descriptor.midi_ins, value),
            "midi.outs" => set_count(&mut descriptor.midi_outs, value),
            "parameters.ins" => set_count(&mut descriptor.parameter_ins, value),
            "parameters.outs" => set_count(&mut descriptor.parameter_outs, value),
            "uri" => descriptor.label = value.to_string(),
            unknown => {
                tracing::warn!("unknown probe property {unknown} for {}", self.filename);
            }
        }
    }

    /// Committed descriptors; an accumulator still open at stream end is
    /// dropped.
    pub fn finish(self) -> Vec<PluginDescriptor> {
        self.committed
    }
}

/// Base name of the probed file without its final extension, used when the
/// probe reports an empty `name` or `label`.
fn fallback_label(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => base,
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Numeric protocol values accept only digit strings; anything else is
/// skipped, leaving the field at its previous value.
fn parse_digits(value: &str) -> Option<i64> {
    if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn set_count(field: &mut u32, value: &str) {
    if let Some(count) = parse_digits(value) {
        *field = count as u32;
    }
}

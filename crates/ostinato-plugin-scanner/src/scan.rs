use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use ostinato_plugin_db::{bucket_key, BinaryArch, PluginDescriptor, PluginFormat, SettingsDb};

use crate::catalog::{convert_cached, CatalogBatch, NativeCatalog};
use crate::locate::{find_bundle_dirs, find_flat_binaries, find_mac_bundles, TargetOs};
use crate::paths::{path_list_separator, search_paths};
use crate::probe::{run_probe, ProcessSlot, WineConfig};

/// Architecture and format selection for one scan run.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub native: bool,
    pub posix32: bool,
    pub posix64: bool,
    pub win32: bool,
    pub win64: bool,

    pub ladspa: bool,
    pub dssi: bool,
    pub lv2: bool,
    pub vst2: bool,
    pub vst3: bool,
    pub au: bool,
    pub sf2: bool,
    pub sfz: bool,
    pub jsfx: bool,

    pub wine: Option<WineConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Progress report: overall percentage plus the path or label currently
    /// being inspected.
    PluginLook { percent: f32, label: String },
    /// Terminal event; `changed` reports whether any bucket was persisted.
    Finished { changed: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanUnit {
    Probe {
        format: PluginFormat,
        arch: BinaryArch,
    },
    Cached {
        format: PluginFormat,
    },
}

fn enabled_arches(request: &ScanRequest) -> Vec<BinaryArch> {
    let flags = [
        (request.native, BinaryArch::Native),
        (request.posix32, BinaryArch::Posix32),
        (request.posix64, BinaryArch::Posix64),
        (request.win32, BinaryArch::Win32),
        (request.win64, BinaryArch::Win64),
    ];
    flags
        .into_iter()
        .filter_map(|(enabled, arch)| enabled.then_some(arch))
        .collect()
}

fn vst3_arch_supported(arch: BinaryArch, os: TargetOs) -> bool {
    match arch {
        BinaryArch::Native => matches!(os, TargetOs::Linux | TargetOs::MacOs | TargetOs::Windows),
        BinaryArch::Posix32 | BinaryArch::Posix64 => {
            matches!(os, TargetOs::Linux | TargetOs::MacOs)
        }
        BinaryArch::Win32 | BinaryArch::Win64 => true,
        _ => false,
    }
}

/// Full scan plan in the fixed execution order; one entry per unit.
fn plan_units(request: &ScanRequest, os: TargetOs, have_native_tool: bool) -> Vec<ScanUnit> {
    let arches = enabled_arches(request);
    let mut units = Vec::new();

    if request.ladspa {
        for &arch in &arches {
            units.push(ScanUnit::Probe {
                format: PluginFormat::Ladspa,
                arch,
            });
        }
    }
    if request.dssi {
        for &arch in &arches {
            units.push(ScanUnit::Probe {
                format: PluginFormat::Dssi,
                arch,
            });
        }
    }
    if request.lv2 {
        units.push(ScanUnit::Cached {
            format: PluginFormat::Lv2,
        });
    }
    if request.vst2 {
        for &arch in &arches {
            units.push(ScanUnit::Probe {
                format: PluginFormat::Vst2,
                arch,
            });
        }
    }
    if request.vst3 {
        for &arch in &arches {
            if vst3_arch_supported(arch, os) {
                units.push(ScanUnit::Probe {
                    format: PluginFormat::Vst3,
                    arch,
                });
            }
        }
    }
    if request.au && os == TargetOs::MacOs {
        units.push(ScanUnit::Cached {
            format: PluginFormat::Au,
        });
        if request.posix32 {
            units.push(ScanUnit::Probe {
                format: PluginFormat::Au,
                arch: BinaryArch::Posix32,
            });
        }
    }
    // soundfile probing runs through the native tool only
    if request.sf2 && request.native && have_native_tool {
        units.push(ScanUnit::Probe {
            format: PluginFormat::Sf2,
            arch: BinaryArch::Native,
        });
    }
    if request.sfz {
        units.push(ScanUnit::Cached {
            format: PluginFormat::Sfz,
        });
    }
    if request.jsfx {
        units.push(ScanUnit::Cached {
            format: PluginFormat::Jsfx,
        });
    }
    units
}

const TOOL_PREFIX: &str = "ostinato-discovery";

fn tool_filename(arch: BinaryArch) -> String {
    let suffix = match arch {
        BinaryArch::Native => {
            if cfg!(windows) {
                if cfg!(target_pointer_width = "64") {
                    "win64.exe"
                } else {
                    "win32.exe"
                }
            } else {
                "native"
            }
        }
        BinaryArch::Posix32 => "posix32",
        BinaryArch::Posix64 => "posix64",
        BinaryArch::Win32 => "win32.exe",
        BinaryArch::Win64 => "win64.exe",
        BinaryArch::None | BinaryArch::Other => "native",
    };
    format!("{TOOL_PREFIX}-{suffix}")
}

fn unit_label(format: PluginFormat, arch: BinaryArch, os: TargetOs) -> String {
    let noun = match format {
        PluginFormat::Vst2 | PluginFormat::Vst3 if os == TargetOs::MacOs && !arch.is_wine() => {
            "bundles"
        }
        PluginFormat::Sf2 => "files",
        _ => "plugins",
    };
    format!("{} {noun}...", format.key())
}

/// Background scan driver: plans the format×architecture matrix, walks it
/// in a fixed order on a dedicated worker thread, reports progress and
/// persists one cache bucket per completed unit.
pub struct ScanOrchestrator {
    settings: Arc<SettingsDb>,
    catalog: Arc<dyn NativeCatalog>,
    tool_dir: PathBuf,
    events_tx: Sender<ScanEvent>,
    events_rx: Receiver<ScanEvent>,
    cancel: Arc<AtomicBool>,
    changed: Arc<AtomicBool>,
    slot: ProcessSlot,
    state: Arc<Mutex<ScanState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScanOrchestrator {
    pub fn new(
        settings: Arc<SettingsDb>,
        catalog: Arc<dyn NativeCatalog>,
        tool_dir: impl Into<PathBuf>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            settings,
            catalog,
            tool_dir: tool_dir.into(),
            events_tx,
            events_rx,
            cancel: Arc::new(AtomicBool::new(false)),
            changed: Arc::new(AtomicBool::new(false)),
            slot: ProcessSlot::new(),
            state: Arc::new(Mutex::new(ScanState::Idle)),
            worker: Mutex::new(None),
        }
    }

    /// Stream of [`ScanEvent`]s; ends each run with `Finished`.
    pub fn events(&self) -> Receiver<ScanEvent> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock()
    }

    /// Whether the most recent run persisted at least one bucket.
    pub fn has_something_changed(&self) -> bool {
        self.changed.load(Ordering::Relaxed)
    }

    /// Starts a scan on the background worker. Returns `false` when a run
    /// is already in flight.
    pub fn start(&self, request: ScanRequest) -> bool {
        {
            let mut state = self.state.lock();
            if *state == ScanState::Running {
                return false;
            }
            *state = ScanState::Running;
        }
        self.cancel.store(false, Ordering::Relaxed);
        self.changed.store(false, Ordering::Relaxed);

        let mut worker = ScanWorker {
            settings: Arc::clone(&self.settings),
            catalog: Arc::clone(&self.catalog),
            tool_dir: self.tool_dir.clone(),
            request,
            cancel: Arc::clone(&self.cancel),
            changed: Arc::clone(&self.changed),
            slot: self.slot.clone(),
            events: self.events_tx.clone(),
            unit_percent: 0.0,
            last_value: 0.0,
        };
        let state = Arc::clone(&self.state);
        let handle = std::thread::Builder::new()
            .name("plugin-scan".into())
            .spawn(move || {
                worker.run();
                let cancelled = worker.cancelled();
                *state.lock() = if cancelled {
                    ScanState::Cancelled
                } else {
                    ScanState::Completed
                };
                let changed = worker.changed.load(Ordering::Relaxed);
                let _ = worker.events.send(ScanEvent::Finished { changed });
            })
            .expect("failed to spawn scan worker");
        *self.worker.lock() = Some(handle);
        true
    }

    /// Cooperative cancellation: sets the stop flag, force-terminates any
    /// in-flight probe and waits for the worker to wind down. Previously
    /// synced buckets are untouched; the in-progress bucket is discarded.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.slot.kill();
        self.join();
    }

    /// Blocks until the current run (if any) has finished.
    pub fn join(&self) {
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ScanOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ScanWorker {
    settings: Arc<SettingsDb>,
    catalog: Arc<dyn NativeCatalog>,
    tool_dir: PathBuf,
    request: ScanRequest,
    cancel: Arc<AtomicBool>,
    changed: Arc<AtomicBool>,
    slot: ProcessSlot,
    events: Sender<ScanEvent>,
    unit_percent: f32,
    last_value: f32,
}

impl ScanWorker {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn plugin_look(&self, percent: f32, label: &str) {
        let _ = self.events.send(ScanEvent::PluginLook {
            percent,
            label: label.to_string(),
        });
    }

    fn run(&mut self) {
        let os = TargetOs::host();
        let native_tool = self.tool_dir.join(tool_filename(BinaryArch::Native));
        let units = plan_units(&self.request, os, native_tool.exists());
        if units.is_empty() {
            return;
        }
        self.unit_percent = 100.0 / units.len() as f32;

        for unit in units {
            if self.cancelled() {
                return;
            }
            match unit {
                ScanUnit::Probe { format, arch } => self.run_probe_unit(format, arch, os),
                ScanUnit::Cached { format } => self.run_cached_unit(format),
            }
        }
        if !self.cancelled() {
            self.plugin_look(100.0, "");
        }
    }

    fn enumerate(&self, format: PluginFormat, arch: BinaryArch, os: TargetOs) -> Vec<PathBuf> {
        let target_os = if arch.is_wine() { TargetOs::Windows } else { os };
        let mut files = BTreeSet::new();
        for root in search_paths(&self.settings, format) {
            let found = match format {
                PluginFormat::Vst2 if os == TargetOs::MacOs && !arch.is_wine() => {
                    find_mac_bundles(&root, false)
                }
                PluginFormat::Vst3 if os == TargetOs::MacOs && !arch.is_wine() => {
                    find_mac_bundles(&root, true)
                }
                PluginFormat::Vst3 => find_bundle_dirs(&root, ".vst3"),
                _ => find_flat_binaries(&root, format, target_os),
            };
            files.extend(found);
        }
        files.into_iter().collect()
    }

    fn run_probe_unit(&mut self, format: PluginFormat, arch: BinaryArch, os: TargetOs) {
        self.plugin_look(self.last_value, &unit_label(format, arch, os));

        let tool = self.tool_dir.join(tool_filename(arch));
        let wine = if arch.is_wine() {
            Some(self.request.wine.clone().unwrap_or_default())
        } else {
            None
        };

        // AU probing enumerates at the OS level rather than per file
        let files = if format == PluginFormat::Au {
            vec![PathBuf::from(crate::protocol::SCAN_ALL)]
        } else {
            self.enumerate(format, arch, os)
        };

        let mut bucket = Vec::new();
        let total = files.len();
        for (index, file) in files.iter().enumerate() {
            if self.cancelled() {
                return;
            }
            let filename = file.to_string_lossy();
            let percent = self.last_value + (index as f32 / total as f32) * self.unit_percent;
            self.plugin_look(percent, &filename);
            let found = run_probe(format, format.key(), &filename, &tool, wine.as_ref(), &self.slot);
            bucket.extend(found);
        }

        self.last_value += self.unit_percent;
        self.persist(&bucket_key(format, Some(arch)), &bucket);
    }

    fn run_cached_unit(&mut self, format: PluginFormat) {
        self.plugin_look(self.last_value, &format!("{} plugins...", format.key()));

        let path_hint = if format == PluginFormat::Lv2 {
            let separator = path_list_separator().to_string();
            search_paths(&self.settings, format)
                .iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(&separator)
        } else {
            String::new()
        };

        let mut bucket = Vec::new();
        {
            let (mut batch, count) = CatalogBatch::begin(self.catalog.as_ref(), format, &path_hint);
            for index in 0..count {
                if self.cancelled() {
                    return;
                }
                let Some(info) = batch.descriptor_at(index) else {
                    continue;
                };
                let percent = self.last_value + (index as f32 / count as f32) * self.unit_percent;
                self.plugin_look(percent, &info.label);
                if !info.valid {
                    tracing::warn!("skipping invalid cached {} plugin {}", format.key(), index);
                    continue;
                }
                bucket.push(convert_cached(&info, format));
            }
        }

        self.last_value += self.unit_percent;
        self.persist(&bucket_key(format, None), &bucket);
    }

    fn persist(&self, key: &str, bucket: &[PluginDescriptor]) {
        self.settings.set_bucket(key, bucket);
        if let Err(err) = self.settings.sync() {
            tracing::warn!("failed to sync plugin bucket {key}: {err}");
            return;
        }
        self.changed.store(true, Ordering::Relaxed);
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ostinato_plugin_db::{PluginFormat, SettingsDb};
use ostinato_plugin_scanner::{
    NativeCatalog, NativeUtilsLib, NullCatalog, ScanEvent, ScanOrchestrator, ScanRequest,
    WineConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "ostinato-plugin-scanner",
    about = "Scans installed audio plugins into the Ostinato cache"
)]
struct Args {
    /// Restrict scanning to the given plugin formats (defaults to all)
    #[arg(long = "format", value_name = "FORMAT", value_parser = parse_format)]
    formats: Vec<PluginFormat>,

    /// Binary architectures to probe (defaults to native)
    #[arg(long = "arch", value_name = "ARCH", value_parser = parse_arch)]
    arches: Vec<ArchFlag>,

    /// Directory holding the discovery probe tools
    #[arg(long, value_name = "DIR")]
    bindir: Option<PathBuf>,

    /// Native utils library servicing the cached-catalog formats
    #[arg(long, value_name = "FILE")]
    utils_lib: Option<PathBuf>,

    /// Wine executable used for win32/win64 probe passes
    #[arg(long, value_name = "EXE")]
    wine: Option<PathBuf>,

    /// Wine prefix used when none can be derived from the plugin path
    #[arg(long, value_name = "DIR")]
    wine_prefix: Option<PathBuf>,

    /// Settings database file (defaults to the per-user location)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchFlag {
    Native,
    Posix32,
    Posix64,
    Win32,
    Win64,
}

fn parse_format(value: &str) -> Result<PluginFormat, String> {
    match value.to_ascii_lowercase().as_str() {
        "ladspa" => Ok(PluginFormat::Ladspa),
        "dssi" => Ok(PluginFormat::Dssi),
        "lv2" => Ok(PluginFormat::Lv2),
        "vst2" | "vst" => Ok(PluginFormat::Vst2),
        "vst3" => Ok(PluginFormat::Vst3),
        "au" => Ok(PluginFormat::Au),
        "sf2" => Ok(PluginFormat::Sf2),
        "sfz" => Ok(PluginFormat::Sfz),
        "jsfx" => Ok(PluginFormat::Jsfx),
        other => Err(format!("unsupported format: {other}")),
    }
}

fn parse_arch(value: &str) -> Result<ArchFlag, String> {
    match value.to_ascii_lowercase().as_str() {
        "native" => Ok(ArchFlag::Native),
        "posix32" => Ok(ArchFlag::Posix32),
        "posix64" => Ok(ArchFlag::Posix64),
        "win32" => Ok(ArchFlag::Win32),
        "win64" => Ok(ArchFlag::Win64),
        other => Err(format!("unsupported architecture: {other}")),
    }
}

fn build_request(args: &Args) -> ScanRequest {
    let formats = if args.formats.is_empty() {
        vec![
            PluginFormat::Ladspa,
            PluginFormat::Dssi,
            PluginFormat::Lv2,
            PluginFormat::Vst2,
            PluginFormat::Vst3,
            PluginFormat::Au,
            PluginFormat::Sf2,
            PluginFormat::Sfz,
            PluginFormat::Jsfx,
        ]
    } else {
        args.formats.clone()
    };
    let arches = if args.arches.is_empty() {
        vec![ArchFlag::Native]
    } else {
        args.arches.clone()
    };

    let wine = if args.wine.is_some() || args.wine_prefix.is_some() {
        Some(WineConfig {
            executable: args.wine.clone().unwrap_or_else(|| PathBuf::from("wine")),
            auto_prefix: true,
            fallback_prefix: args.wine_prefix.clone(),
        })
    } else {
        None
    };

    ScanRequest {
        native: arches.contains(&ArchFlag::Native),
        posix32: arches.contains(&ArchFlag::Posix32),
        posix64: arches.contains(&ArchFlag::Posix64),
        win32: arches.contains(&ArchFlag::Win32),
        win64: arches.contains(&ArchFlag::Win64),
        ladspa: formats.contains(&PluginFormat::Ladspa),
        dssi: formats.contains(&PluginFormat::Dssi),
        lv2: formats.contains(&PluginFormat::Lv2),
        vst2: formats.contains(&PluginFormat::Vst2),
        vst3: formats.contains(&PluginFormat::Vst3),
        au: formats.contains(&PluginFormat::Au),
        sf2: formats.contains(&PluginFormat::Sf2),
        sfz: formats.contains(&PluginFormat::Sfz),
        jsfx: formats.contains(&PluginFormat::Jsfx),
        wine,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Args::parse();

    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => SettingsDb::default_path()?,
    };
    let settings = Arc::new(SettingsDb::open(&db_path)?);

    let catalog: Arc<dyn NativeCatalog> = match &args.utils_lib {
        Some(path) => Arc::new(
            NativeUtilsLib::load(path)
                .with_context(|| format!("loading native utils library {}", path.display()))?,
        ),
        None => Arc::new(NullCatalog),
    };

    let tool_dir = match &args.bindir {
        Some(dir) => dir.clone(),
        None => std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
            .context("cannot determine the probe tool directory")?,
    };

    let orchestrator = ScanOrchestrator::new(Arc::clone(&settings), catalog, tool_dir);
    let events = orchestrator.events();
    orchestrator.start(build_request(&args));

    let mut changed = false;
    while let Ok(event) = events.recv() {
        match event {
            ScanEvent::PluginLook { percent, label } => {
                if !label.is_empty() {
                    println!("[{percent:5.1}%] {label}");
                }
            }
            ScanEvent::Finished {
                changed: did_change,
            } => {
                changed = did_change;
                break;
            }
        }
    }
    orchestrator.join();

    for key in settings.bucket_keys() {
        let Some(bucket) = settings.bucket(&key) else {
            continue;
        };
        for plugin in bucket {
            println!("{} [{}] {}", key, plugin.label, plugin.name);
        }
    }
    if !changed {
        println!("plugin cache unchanged");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn format_and_arch_values_parse() {
        assert_eq!(parse_format("VST2"), Ok(PluginFormat::Vst2));
        assert_eq!(parse_format("jsfx"), Ok(PluginFormat::Jsfx));
        assert!(parse_format("aax").is_err());
        assert_eq!(parse_arch("win64"), Ok(ArchFlag::Win64));
        assert!(parse_arch("mips").is_err());
    }

    #[test]
    fn default_request_scans_every_format_natively() {
        let args = Args::parse_from(["ostinato-plugin-scanner"]);
        let request = build_request(&args);
        assert!(request.native);
        assert!(!request.posix32);
        assert!(request.ladspa && request.vst3 && request.jsfx);
        assert!(request.wine.is_none());
    }

    #[test]
    fn wine_flags_build_a_wine_config() {
        let args = Args::parse_from([
            "ostinato-plugin-scanner",
            "--arch",
            "win64",
            "--wine",
            "/usr/bin/wine",
            "--wine-prefix",
            "/srv/prefix",
        ]);
        let request = build_request(&args);
        assert!(request.win64 && !request.native);
        let wine = request.wine.unwrap();
        assert_eq!(wine.executable, PathBuf::from("/usr/bin/wine"));
        assert_eq!(wine.fallback_prefix, Some(PathBuf::from("/srv/prefix")));
    }
}

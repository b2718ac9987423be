use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;

use ostinato_plugin_db::{PluginDescriptor, PluginFormat};

use crate::protocol::TranscriptParser;

/// Wine setup used for win32/win64 probe passes on POSIX hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WineConfig {
    pub executable: PathBuf,
    pub auto_prefix: bool,
    pub fallback_prefix: Option<PathBuf>,
}

impl Default for WineConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("wine"),
            auto_prefix: true,
            fallback_prefix: None,
        }
    }
}

/// Slot holding the probe process currently in flight, shared between the
/// scan worker and the cancellation caller. Owned by one orchestrator
/// instance, so concurrent orchestrators never interfere.
#[derive(Debug, Clone, Default)]
pub struct ProcessSlot {
    inner: Arc<Mutex<Option<Child>>>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, child: Child) {
        *self.inner.lock() = Some(child);
    }

    fn take(&self) -> Option<Child> {
        self.inner.lock().take()
    }

    /// Force-terminates the in-flight probe, if any. The worker blocked on
    /// the child's stdout observes EOF and finishes the unit item.
    pub fn kill(&self) {
        if let Some(mut child) = self.take() {
            if let Err(err) = child.kill() {
                tracing::debug!("failed to kill probe process: {err}");
            }
            let _ = child.wait();
        }
    }
}

/// Resolves the Wine prefix for a probed file: a `dosdevices` ancestor of
/// the file wins, then `WINEPREFIX` from the environment, then the
/// configured fallback, then `~/.wine`.
pub fn resolve_wine_prefix(filename: &Path, wine: &WineConfig) -> PathBuf {
    let env_prefix = std::env::var_os("WINEPREFIX")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    resolve_wine_prefix_with_env(filename, wine, env_prefix)
}

fn resolve_wine_prefix_with_env(
    filename: &Path,
    wine: &WineConfig,
    env_prefix: Option<PathBuf>,
) -> PathBuf {
    if wine.auto_prefix {
        let mut dir = filename.parent();
        for _ in 0..10 {
            let Some(current) = dir else { break };
            if current.join("dosdevices").is_dir() {
                return current.to_path_buf();
            }
            dir = current.parent();
        }
    }
    if let Some(prefix) = env_prefix {
        return prefix;
    }
    if let Some(prefix) = &wine.fallback_prefix {
        return prefix.clone();
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".wine")
}

/// Argument vector for one probe invocation. On POSIX the probe runs under
/// `env` with a sanitized locale and preload, optionally wrapped in Wine.
pub fn probe_command(
    stype: &str,
    filename: &str,
    tool: &Path,
    wine: Option<&WineConfig>,
) -> (OsString, Vec<OsString>) {
    if cfg!(windows) {
        return (
            tool.as_os_str().to_os_string(),
            vec![stype.into(), filename.into()],
        );
    }

    let mut args: Vec<OsString> = vec!["LANG=C".into(), "LD_PRELOAD=".into()];
    if let Some(wine) = wine {
        args.push("WINEDEBUG=-all".into());
        let mut prefix = OsString::from("WINEPREFIX=");
        prefix.push(resolve_wine_prefix(Path::new(filename), wine));
        args.push(prefix);
        args.push(wine.executable.as_os_str().to_os_string());
    }
    args.push(tool.as_os_str().to_os_string());
    args.push(stype.into());
    args.push(filename.into());
    ("env".into(), args)
}

/// Runs one probe process for one (format, filename, tool) combination and
/// parses its stdout into descriptors.
///
/// Probe-side failures are never fatal: a missing tool, a crashing child or
/// malformed output all degrade to fewer (or zero) results.
pub fn run_probe(
    format: PluginFormat,
    stype: &str,
    filename: &str,
    tool: &Path,
    wine: Option<&WineConfig>,
    slot: &ProcessSlot,
) -> Vec<PluginDescriptor> {
    if !tool.exists() {
        tracing::warn!("probe tool {} does not exist", tool.display());
        return Vec::new();
    }

    let (program, args) = probe_command(stype, filename, tool, wine);
    let mut child = match Command::new(&program)
        .args(&args)
        .stdout(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            tracing::warn!("failed to spawn probe {}: {err}", tool.display());
            return Vec::new();
        }
    };

    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return Vec::new();
    };
    slot.put(child);

    let mut parser = TranscriptParser::new(format, filename);
    let mut reader = BufReader::new(stdout);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                // invalid byte sequences are dropped, not fatal
                let line = String::from_utf8_lossy(&buffer);
                parser.feed_line(&line);
            }
            Err(err) => {
                tracing::warn!("probe stdout read failed for {filename}: {err}");
                break;
            }
        }
    }

    if let Some(mut child) = slot.take() {
        let _ = child.wait();
    }
    parser.finish()
}

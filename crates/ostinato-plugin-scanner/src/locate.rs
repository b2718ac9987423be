use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use ostinato_plugin_db::PluginFormat;

/// Operating system a probe unit targets. Differs from the host OS for
/// win32/win64 passes run through Wine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
    MacOs,
    Windows,
    Haiku,
}

impl TargetOs {
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            TargetOs::MacOs
        } else if cfg!(target_os = "windows") {
            TargetOs::Windows
        } else if cfg!(target_os = "haiku") {
            TargetOs::Haiku
        } else {
            TargetOs::Linux
        }
    }
}

fn walk(root: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::debug!("skipping unreadable entry: {err}");
                None
            }
        })
}

fn file_name_lower(entry: &walkdir::DirEntry) -> String {
    entry.file_name().to_string_lossy().to_ascii_lowercase()
}

/// Recursively collects plain plugin files under `root`, filtered by the
/// file extension expected for `format` on `os`. Unordered; callers sort.
pub fn find_flat_binaries(root: &Path, format: PluginFormat, os: TargetOs) -> Vec<PathBuf> {
    let extensions: &[&str] = match (format, os) {
        // soundfiles carry the same extension on every OS
        (PluginFormat::Sf2, _) => &[".sf2"],
        (PluginFormat::Sfz, _) => &[".sfz"],
        (_, TargetOs::Windows) => &[".dll"],
        (_, TargetOs::MacOs) => &[".dylib", ".so"],
        (PluginFormat::Vst2, TargetOs::Haiku) => &[],
        (_, TargetOs::Linux | TargetOs::Haiku) => &[".so"],
    };

    walk(root)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = file_name_lower(entry);
            extensions.is_empty() || extensions.iter().any(|ext| name.ends_with(ext))
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// Directories at any depth whose name ends in `suffix` (`.vst3`, `.clap`).
pub fn find_bundle_dirs(root: &Path, suffix: &str) -> Vec<PathBuf> {
    walk(root)
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| file_name_lower(entry).ends_with(suffix))
        .map(|entry| entry.into_path())
        .collect()
}

/// LV2 bundles: directories below `root` (never `root` itself) directly
/// containing a `manifest.ttl`.
pub fn find_lv2_bundles(root: &Path) -> Vec<PathBuf> {
    walk(root)
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| entry.path() != root)
        .filter(|entry| entry.path().join("manifest.ttl").exists())
        .map(|entry| entry.into_path())
        .collect()
}

/// macOS `.vst`/`.vst3` bundle directories at any depth.
pub fn find_mac_bundles(root: &Path, is_vst3: bool) -> Vec<PathBuf> {
    let suffix = if is_vst3 { ".vst3" } else { ".vst" };
    find_bundle_dirs(root, suffix)
}

#[cfg(test)]
mod tests {
    use std::fs::{create_dir_all, File};

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn flat_binaries_filter_by_target_os() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("vendor/deep");
        create_dir_all(&nested).unwrap();
        File::create(nested.join("amp.so")).unwrap();
        File::create(nested.join("Amp.DLL")).unwrap();
        File::create(nested.join("readme.txt")).unwrap();

        let linux = find_flat_binaries(dir.path(), PluginFormat::Ladspa, TargetOs::Linux);
        assert_eq!(linux, vec![nested.join("amp.so")]);

        let windows = find_flat_binaries(dir.path(), PluginFormat::Ladspa, TargetOs::Windows);
        assert_eq!(windows, vec![nested.join("Amp.DLL")]);
    }

    #[test]
    fn haiku_vst2_accepts_extensionless_files() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("synth")).unwrap();
        let mut found = find_flat_binaries(dir.path(), PluginFormat::Vst2, TargetOs::Haiku);
        found.sort();
        assert_eq!(found, vec![dir.path().join("synth")]);
    }

    #[test]
    fn bundle_dirs_match_suffix_at_any_depth() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("sub/Eq.vst3");
        create_dir_all(&bundle).unwrap();
        create_dir_all(dir.path().join("sub/NotABundle")).unwrap();
        assert_eq!(find_bundle_dirs(dir.path(), ".vst3"), vec![bundle]);
    }

    #[test]
    fn lv2_bundles_need_manifest_and_exclude_root() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("manifest.ttl")).unwrap();
        let bundle = dir.path().join("amp.lv2");
        create_dir_all(&bundle).unwrap();
        File::create(bundle.join("manifest.ttl")).unwrap();
        create_dir_all(dir.path().join("empty.lv2")).unwrap();
        assert_eq!(find_lv2_bundles(dir.path()), vec![bundle]);
    }

    #[test]
    fn mac_bundles_distinguish_vst2_and_vst3() {
        let dir = tempdir().unwrap();
        let vst2 = dir.path().join("Comp.vst");
        let vst3 = dir.path().join("Comp.vst3");
        create_dir_all(&vst2).unwrap();
        create_dir_all(&vst3).unwrap();
        assert_eq!(find_mac_bundles(dir.path(), false), vec![vst2]);
        assert_eq!(find_mac_bundles(dir.path(), true), vec![vst3]);
    }

    #[test]
    fn soundfiles_match_their_own_extension_everywhere() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("kit.sf2")).unwrap();
        File::create(dir.path().join("kit.so")).unwrap();
        let found = find_flat_binaries(dir.path(), PluginFormat::Sf2, TargetOs::Windows);
        assert_eq!(found, vec![dir.path().join("kit.sf2")]);
    }

    #[test]
    fn missing_root_yields_empty() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(find_flat_binaries(&missing, PluginFormat::Ladspa, TargetOs::Linux).is_empty());
        assert!(find_lv2_bundles(&missing).is_empty());
    }
}

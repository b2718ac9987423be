use std::path::PathBuf;

use ostinato_plugin_db::{PluginFormat, SettingsDb};

/// Separator for path-list values in environment variables and settings.
pub fn path_list_separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

pub fn paths_settings_key(format: PluginFormat) -> String {
    format!("Paths/{}", format.key())
}

fn env_var_name(format: PluginFormat) -> Option<&'static str> {
    match format {
        PluginFormat::Ladspa => Some("LADSPA_PATH"),
        PluginFormat::Dssi => Some("DSSI_PATH"),
        PluginFormat::Lv2 => Some("LV2_PATH"),
        PluginFormat::Vst2 => Some("VST_PATH"),
        PluginFormat::Vst3 => Some("VST3_PATH"),
        PluginFormat::Sf2 => Some("SF2_PATH"),
        PluginFormat::Sfz => Some("SFZ_PATH"),
        PluginFormat::Jsfx => Some("JSFX_PATH"),
        _ => None,
    }
}

#[cfg(target_os = "macos")]
fn builtin_search_paths(format: PluginFormat) -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_default();
    let plugins = |name: &str| {
        vec![
            home.join("Library/Audio/Plug-Ins").join(name),
            PathBuf::from("/Library/Audio/Plug-Ins").join(name),
        ]
    };
    match format {
        PluginFormat::Ladspa => plugins("LADSPA"),
        PluginFormat::Dssi => plugins("DSSI"),
        PluginFormat::Lv2 => plugins("LV2"),
        PluginFormat::Vst2 => plugins("VST"),
        PluginFormat::Vst3 => plugins("VST3"),
        PluginFormat::Sf2 => vec![home.join(".sounds/sf2")],
        PluginFormat::Sfz => vec![home.join(".sounds/sfz")],
        PluginFormat::Jsfx => vec![home.join("Library/Application Support/REAPER/Effects")],
        _ => Vec::new(),
    }
}

#[cfg(windows)]
fn builtin_search_paths(format: PluginFormat) -> Vec<PathBuf> {
    let program_files =
        PathBuf::from(std::env::var("PROGRAMFILES").unwrap_or_else(|_| "C:\\Program Files".into()));
    let app_data = dirs::data_dir().unwrap_or_default();
    let common = PathBuf::from(
        std::env::var("COMMONPROGRAMFILES")
            .unwrap_or_else(|_| "C:\\Program Files\\Common Files".into()),
    );
    match format {
        PluginFormat::Ladspa => vec![app_data.join("LADSPA"), program_files.join("LADSPA")],
        PluginFormat::Dssi => vec![app_data.join("DSSI"), program_files.join("DSSI")],
        PluginFormat::Lv2 => vec![app_data.join("LV2"), common.join("LV2")],
        PluginFormat::Vst2 => vec![
            program_files.join("VstPlugins"),
            program_files.join("Steinberg\\VstPlugins"),
        ],
        PluginFormat::Vst3 => vec![common.join("VST3")],
        PluginFormat::Sf2 => vec![app_data.join("SF2")],
        PluginFormat::Sfz => vec![app_data.join("SFZ")],
        PluginFormat::Jsfx => vec![app_data.join("REAPER\\Effects")],
        _ => Vec::new(),
    }
}

#[cfg(not(any(target_os = "macos", windows)))]
fn builtin_search_paths(format: PluginFormat) -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_default();
    match format {
        PluginFormat::Ladspa => vec![
            home.join(".ladspa"),
            PathBuf::from("/usr/lib/ladspa"),
            PathBuf::from("/usr/local/lib/ladspa"),
        ],
        PluginFormat::Dssi => vec![
            home.join(".dssi"),
            PathBuf::from("/usr/lib/dssi"),
            PathBuf::from("/usr/local/lib/dssi"),
        ],
        PluginFormat::Lv2 => vec![
            home.join(".lv2"),
            PathBuf::from("/usr/lib/lv2"),
            PathBuf::from("/usr/local/lib/lv2"),
        ],
        PluginFormat::Vst2 => vec![
            home.join(".vst"),
            PathBuf::from("/usr/lib/vst"),
            PathBuf::from("/usr/local/lib/vst"),
        ],
        PluginFormat::Vst3 => vec![
            home.join(".vst3"),
            PathBuf::from("/usr/lib/vst3"),
            PathBuf::from("/usr/local/lib/vst3"),
        ],
        PluginFormat::Sf2 => vec![
            home.join(".sounds"),
            PathBuf::from("/usr/share/sounds/sf2"),
        ],
        PluginFormat::Sfz => vec![
            home.join(".sounds"),
            PathBuf::from("/usr/share/sounds/sfz"),
        ],
        PluginFormat::Jsfx => vec![home.join(".config/REAPER/Effects")],
        _ => Vec::new(),
    }
}

/// Search roots for one format: the settings store wins, then the format's
/// environment variable, then the OS defaults.
pub fn search_paths(settings: &SettingsDb, format: PluginFormat) -> Vec<PathBuf> {
    if let Some(paths) = settings.get_string_list(&paths_settings_key(format)) {
        return paths.into_iter().map(PathBuf::from).collect();
    }
    if let Some(name) = env_var_name(format) {
        if let Ok(value) = std::env::var(name) {
            if !value.is_empty() {
                return value
                    .split(path_list_separator())
                    .filter(|part| !part.is_empty())
                    .map(PathBuf::from)
                    .collect();
            }
        }
    }
    builtin_search_paths(format)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn settings_override_wins() {
        let dir = tempdir().unwrap();
        let settings = SettingsDb::open(dir.path().join("plugins.json")).unwrap();
        settings.set(
            "Paths/LADSPA",
            serde_json::json!(["/srv/ladspa", "/opt/ladspa"]),
        );
        assert_eq!(
            search_paths(&settings, PluginFormat::Ladspa),
            vec![PathBuf::from("/srv/ladspa"), PathBuf::from("/opt/ladspa")]
        );
    }

    #[test]
    fn builtin_defaults_are_nonempty_for_scannable_formats() {
        for format in [
            PluginFormat::Ladspa,
            PluginFormat::Dssi,
            PluginFormat::Lv2,
            PluginFormat::Vst2,
            PluginFormat::Vst3,
            PluginFormat::Sf2,
            PluginFormat::Sfz,
            PluginFormat::Jsfx,
        ] {
            assert!(!builtin_search_paths(format).is_empty(), "{format:?}");
        }
    }

    #[test]
    fn internal_formats_have_no_roots() {
        assert!(builtin_search_paths(PluginFormat::Internal).is_empty());
        assert!(env_var_name(PluginFormat::Au).is_none());
    }
}

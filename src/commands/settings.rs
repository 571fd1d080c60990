//! Engine settings persisted across sessions

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tauri::Manager;

use crate::audio::device::StreamParams;
use crate::audio::engine::AudioEngine;
use crate::audio::plugin::PluginRegistry;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    pub audio: Option<StreamParams>,
    #[serde(default)]
    pub plugin_paths: Vec<String>,
}

fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("woodshed")
        .join("settings.json")
}

pub fn load() -> Settings {
    load_from(&settings_path())
}

fn load_from(path: &Path) -> Settings {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            log::warn!("Ignoring malformed settings file: {}", e);
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}

pub fn save(settings: &Settings) {
    save_to(settings, &settings_path());
}

fn save_to(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match serde_json::to_string_pretty(settings) {
        Ok(json) => {
            if let Err(e) = fs::write(path, json) {
                log::warn!("Failed to write settings: {}", e);
            }
        }
        Err(e) => log::warn!("Failed to serialize settings: {}", e),
    }
}

/// Snapshot the current engine and registry state to disk
pub fn persist(app_handle: &tauri::AppHandle) {
    let engine = app_handle.state::<AudioEngine>();
    let registry = app_handle.state::<PluginRegistry>();
    let settings = Settings {
        audio: Some(engine.stream_params()),
        plugin_paths: registry
            .plugin_paths()
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
    };
    save(&settings);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn settings_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            audio: Some(StreamParams {
                host: "ALSA".to_string(),
                input_device: None,
                output_device: Some("default".to_string()),
                sample_rate: 44100,
                buffer_size: 256,
            }),
            plugin_paths: vec!["/usr/lib/clap".to_string()],
        };
        save_to(&settings, &path);

        let loaded = load_from(&path);
        let audio = loaded.audio.unwrap();
        assert_eq!(audio.host, "ALSA");
        assert_eq!(audio.sample_rate, 44100);
        assert_eq!(audio.buffer_size, 256);
        assert_eq!(loaded.plugin_paths, vec!["/usr/lib/clap"]);
    }

    #[test]
    fn missing_or_malformed_files_yield_defaults() {
        let dir = tempdir().unwrap();
        let missing = load_from(&dir.path().join("nope.json"));
        assert!(missing.audio.is_none());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        let malformed = load_from(&bad);
        assert!(malformed.audio.is_none());
        assert!(malformed.plugin_paths.is_empty());
    }
}

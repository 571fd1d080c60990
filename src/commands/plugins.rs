//! Tauri commands for plugin discovery, loading, and editors

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tauri::State;

use crate::audio::chain::{InstanceId, LoadedPlugin};
use crate::audio::error::{EngineError, LoadError};
use crate::audio::plugin::{EditorWindows, PluginHost, PluginRegistry};
use crate::commands::settings;

#[tauri::command]
pub fn get_plugin_paths(registry: State<'_, PluginRegistry>) -> Vec<String> {
    registry
        .plugin_paths()
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}

#[tauri::command]
pub fn set_plugin_paths(
    app_handle: tauri::AppHandle,
    registry: State<'_, PluginRegistry>,
    paths: Vec<String>,
) {
    registry.set_plugin_paths(paths.into_iter().map(PathBuf::from).collect());
    settings::persist(&app_handle);
}

/// Walk the configured directories and return the paths of the resulting
/// catalogue. Probe failures are skipped, never fatal.
#[tauri::command]
pub fn scan_plugins(registry: State<'_, PluginRegistry>) -> Vec<String> {
    registry
        .scan()
        .into_iter()
        .map(|d| d.path.to_string_lossy().into_owned())
        .collect()
}

#[tauri::command]
pub fn get_discovered_plugins(registry: State<'_, PluginRegistry>) -> Vec<String> {
    registry
        .discovered_paths()
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}

#[tauri::command]
pub fn load_plugin(
    host: State<'_, PluginHost>,
    registry: State<'_, PluginRegistry>,
    path: String,
) -> Result<LoadedPlugin, EngineError> {
    let path = Path::new(&path);
    let loaded = host.load_plugin(path)?;
    // Cache the descriptor so later lookups skip the probe
    if let Err(e) = registry.ensure_descriptor(path) {
        log::warn!("Loaded {:?} but probing it for the catalogue failed: {}", path, e);
    }
    Ok(loaded)
}

#[tauri::command]
pub fn remove_plugin(host: State<'_, PluginHost>, plugin_id: u64) -> Result<(), EngineError> {
    host.remove_plugin(InstanceId(plugin_id))
}

#[tauri::command]
pub fn get_loaded_plugins(host: State<'_, PluginHost>) -> Vec<LoadedPlugin> {
    host.list_loaded()
}

#[tauri::command]
pub fn set_plugin_enabled(
    host: State<'_, PluginHost>,
    plugin_id: u64,
    enabled: bool,
) -> Result<(), EngineError> {
    host.set_enabled(InstanceId(plugin_id), enabled)
}

#[tauri::command]
pub fn set_plugin_bypass(
    host: State<'_, PluginHost>,
    plugin_id: u64,
    bypassed: bool,
) -> Result<(), EngineError> {
    host.set_bypass(InstanceId(plugin_id), bypassed)
}

/// Open (or focus) the instance's editor window in its host process
#[tauri::command]
pub fn open_plugin_editor(
    host: State<'_, PluginHost>,
    editors: State<'_, Arc<EditorWindows>>,
    plugin_id: u64,
) -> Result<(), EngineError> {
    let id = InstanceId(plugin_id);
    let module_path = host.module_path(id).ok_or(EngineError::NotFound)?;
    let state_tx = host.editor_state_sender(id).ok_or(EngineError::NotFound)?;
    editors.open(id, &module_path, state_tx).map_err(|e| {
        log::error!("Failed to open editor for instance {}: {}", plugin_id, e);
        EngineError::Load {
            reason: LoadError::InitFailed,
        }
    })
}

#[tauri::command]
pub fn close_plugin_editor(editors: State<'_, Arc<EditorWindows>>, plugin_id: u64) {
    editors.close(InstanceId(plugin_id));
}

/// Out-of-band directory chooser; the result arrives as an event, not as
/// this command's return value.
#[tauri::command]
pub fn browse_directory(app_handle: tauri::AppHandle) -> Result<(), String> {
    use tauri::Emitter;
    use tauri_plugin_dialog::DialogExt;

    app_handle
        .dialog()
        .file()
        .set_title("Select Plugin Directory")
        .pick_folder(move |result| match result {
            Some(path) => {
                let path_str = path
                    .as_path()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let _ = app_handle.emit("directory-selected", path_str);
            }
            None => {
                let _ = app_handle.emit("directory-cancelled", ());
            }
        });

    Ok(())
}

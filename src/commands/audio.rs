//! Tauri commands for host, device, and stream configuration

use tauri::State;

use crate::audio::engine::AudioEngine;
use crate::audio::error::EngineError;

#[tauri::command]
pub fn list_hosts(engine: State<'_, AudioEngine>) -> Vec<String> {
    engine.list_hosts()
}

#[tauri::command]
pub fn get_host(engine: State<'_, AudioEngine>) -> String {
    engine.current_host()
}

#[tauri::command]
pub fn select_host(engine: State<'_, AudioEngine>, host: String) -> Result<(), EngineError> {
    engine.select_host(&host)
}

#[tauri::command]
pub fn list_input_devices(engine: State<'_, AudioEngine>) -> Vec<String> {
    engine.list_input_devices()
}

#[tauri::command]
pub fn list_output_devices(engine: State<'_, AudioEngine>) -> Vec<String> {
    engine.list_output_devices()
}

#[tauri::command]
pub fn get_input_device(engine: State<'_, AudioEngine>) -> Result<String, EngineError> {
    engine.current_input().ok_or(EngineError::NotFound)
}

#[tauri::command]
pub fn get_output_device(engine: State<'_, AudioEngine>) -> Result<String, EngineError> {
    engine.current_output().ok_or(EngineError::NotFound)
}

#[tauri::command]
pub fn select_input(
    engine: State<'_, AudioEngine>,
    input_device: String,
) -> Result<(), EngineError> {
    engine.select_input(&input_device)
}

#[tauri::command]
pub fn select_output(
    engine: State<'_, AudioEngine>,
    output_device: String,
) -> Result<(), EngineError> {
    engine.select_output(&output_device)
}

#[tauri::command]
pub fn get_buffer_size(engine: State<'_, AudioEngine>) -> u32 {
    engine.buffer_size()
}

/// Applies the nearest supported size; a `CapabilityMismatch` error still
/// means the substituted value is now active.
#[tauri::command]
pub fn set_buffer_size(engine: State<'_, AudioEngine>, size: u32) -> Result<u32, EngineError> {
    engine.set_buffer_size(size)
}

#[tauri::command]
pub fn get_sample_rate(engine: State<'_, AudioEngine>) -> u32 {
    engine.sample_rate()
}

#[tauri::command]
pub fn set_sample_rate(engine: State<'_, AudioEngine>, rate: u32) -> Result<u32, EngineError> {
    engine.set_sample_rate(rate)
}

/// Smoothed render-callback load in [0, 100]
#[tauri::command]
pub fn get_cpu_usage(engine: State<'_, AudioEngine>) -> f32 {
    engine.shared().meter.cpu_usage()
}

/// Smoothed output peaks (left, right), linear 0.0 - 1.0
#[tauri::command]
pub fn get_output_levels(engine: State<'_, AudioEngine>) -> (f32, f32) {
    engine.shared().meter.output_levels()
}

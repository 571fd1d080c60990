use std::sync::Arc;

use tauri::{Manager, RunEvent};

pub mod audio;
mod commands;

use audio::engine::{AudioEngine, EngineShared};
use audio::plugin::{EditorWindows, PluginHost, PluginRegistry};

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    commands::logging::init_logging();

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            app.handle().plugin(
                tauri_plugin_log::Builder::default()
                    .level(log::LevelFilter::Info)
                    .build(),
            )?;

            let settings = commands::settings::load();

            let shared = Arc::new(EngineShared::new());
            let engine = AudioEngine::new(Arc::clone(&shared));
            if let Some(audio) = &settings.audio {
                engine.restore(audio);
            }

            let editors = Arc::new(EditorWindows::new());
            let host = PluginHost::new(shared, Arc::clone(&editors));

            let registry = PluginRegistry::new();
            let paths = if settings.plugin_paths.is_empty() {
                PluginRegistry::default_directories()
            } else {
                settings.plugin_paths.iter().map(Into::into).collect()
            };
            registry.set_plugin_paths(paths);

            // Bring the stream up on the restored configuration; a machine
            // with no usable devices still gets a working control surface
            if let Err(e) = engine.start() {
                log::warn!("Audio engine not started: {}", e);
            }

            app.manage(engine);
            app.manage(host);
            app.manage(registry);
            app.manage(editors);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::audio::list_hosts,
            commands::audio::get_host,
            commands::audio::select_host,
            commands::audio::list_input_devices,
            commands::audio::list_output_devices,
            commands::audio::get_input_device,
            commands::audio::get_output_device,
            commands::audio::select_input,
            commands::audio::select_output,
            commands::audio::get_buffer_size,
            commands::audio::set_buffer_size,
            commands::audio::get_sample_rate,
            commands::audio::set_sample_rate,
            commands::audio::get_cpu_usage,
            commands::audio::get_output_levels,
            commands::plugins::get_plugin_paths,
            commands::plugins::set_plugin_paths,
            commands::plugins::scan_plugins,
            commands::plugins::get_discovered_plugins,
            commands::plugins::load_plugin,
            commands::plugins::remove_plugin,
            commands::plugins::get_loaded_plugins,
            commands::plugins::set_plugin_enabled,
            commands::plugins::set_plugin_bypass,
            commands::plugins::open_plugin_editor,
            commands::plugins::close_plugin_editor,
            commands::plugins::browse_directory,
            commands::logging::get_log_file_path,
            commands::logging::read_log_file,
        ])
        .build(tauri::generate_context!())
        .expect("error while running tauri application")
        .run(|app, event| {
            if let RunEvent::ExitRequested { .. } = event {
                log::info!("Shutting down");
                commands::settings::persist(app);
                app.state::<Arc<EditorWindows>>().close_all();
                app.state::<AudioEngine>().stop();
            }
        });
}

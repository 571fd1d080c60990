//! Plugin editor host
//!
//! A separate process that owns one plugin's native editor window, so the
//! plugin GUI never shares an event loop or address space with the main
//! webview. Protocol with the parent:
//! - argv: module path, optionally window position `x y`
//! - stdout lines: `ready`, `closed`, `state:<base64>` (parameter state
//!   sync), `error:<message>`
//! - stdin lines: `close`, `focus`
//! Exits when the window is closed or a `close` command arrives.

use std::env;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[cfg(target_os = "macos")]
use base64::Engine as _;

#[cfg(target_os = "macos")]
use woodshed_lib::audio::plugin::host::take_callback_request;
use woodshed_lib::audio::plugin::host::PluginInstance;

/// Event-loop iterations between state syncs (~16ms each)
#[cfg(target_os = "macos")]
const STATE_SYNC_INTERVAL: u32 = 3;

#[cfg(target_os = "macos")]
use objc2::MainThreadMarker;
#[cfg(target_os = "macos")]
use objc2_app_kit::{NSApplication, NSApplicationActivationPolicy, NSEventMask};
#[cfg(target_os = "macos")]
use objc2_foundation::{NSDate, NSDefaultRunLoopMode};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: woodshed-editor-host <module-path> [x y]");
        println!("error:missing module path argument");
        std::process::exit(1);
    }
    let module_path = &args[1];

    let position: Option<(f64, f64)> = if args.len() >= 4 {
        match (args[2].parse::<f64>(), args[3].parse::<f64>()) {
            (Ok(x), Ok(y)) => Some((x, y)),
            _ => None,
        }
    } else {
        None
    };

    match run_editor(module_path, position) {
        Ok(()) => {
            println!("closed");
        }
        Err(e) => {
            log::error!("Editor host failed: {}", e);
            println!("error:{}", e);
            std::process::exit(1);
        }
    }
}

fn run_editor(module_path: &str, position: Option<(f64, f64)>) -> Result<(), String> {
    let path = Path::new(module_path);
    if !path.exists() {
        return Err(format!("module not found: {}", module_path));
    }

    // This instance exists for its GUI; it never processes audio, so the
    // stream parameters are nominal and the state channel goes unused
    let (_state_tx, state_rx) = mpsc::channel();
    let mut plugin =
        PluginInstance::load(path, 48000.0, 512, state_rx).map_err(|e| e.to_string())?;

    if !plugin.has_gui() {
        return Err("plugin has no GUI".to_string());
    }

    plugin.open_editor_window_at(position)?;

    // Explicit flush so the parent sees readiness immediately
    println!("ready");
    let _ = std::io::stdout().flush();

    let should_close = Arc::new(AtomicBool::new(false));
    let should_focus = Arc::new(AtomicBool::new(false));
    spawn_stdin_watcher(Arc::clone(&should_close), Arc::clone(&should_focus));

    #[cfg(target_os = "macos")]
    run_event_loop(&mut plugin, should_close, should_focus)?;

    #[cfg(not(target_os = "macos"))]
    {
        let _ = should_focus;
        while !should_close.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }
    }

    plugin.close_editor_window();
    Ok(())
}

/// Watch stdin for parent commands. EOF means the parent died; treat it as
/// a close so no orphan windows linger.
fn spawn_stdin_watcher(should_close: Arc<AtomicBool>, should_focus: Arc<AtomicBool>) {
    thread::spawn(move || {
        let reader = BufReader::new(std::io::stdin());
        for line in reader.lines() {
            match line {
                Ok(command) => match command.trim() {
                    "close" => {
                        should_close.store(true, Ordering::SeqCst);
                        break;
                    }
                    "focus" => should_focus.store(true, Ordering::SeqCst),
                    other => log::warn!("Unknown command: {:?}", other),
                },
                Err(e) => {
                    log::warn!("Error reading stdin (parent gone?): {}", e);
                    break;
                }
            }
        }
        should_close.store(true, Ordering::SeqCst);
    });
}

#[cfg(target_os = "macos")]
fn run_event_loop(
    plugin: &mut PluginInstance,
    should_close: Arc<AtomicBool>,
    should_focus: Arc<AtomicBool>,
) -> Result<(), String> {
    let mtm = MainThreadMarker::new().ok_or("not on the main thread")?;
    let app = NSApplication::sharedApplication(mtm);
    app.setActivationPolicy(NSApplicationActivationPolicy::Regular);
    #[allow(deprecated)]
    app.activateIgnoringOtherApps(true);

    let mut iterations: u32 = 0;
    let mut last_state: Option<Vec<u8>> = None;

    loop {
        if should_close.load(Ordering::SeqCst) {
            break;
        }
        if should_focus.swap(false, Ordering::SeqCst) {
            plugin.focus_editor_window();
        }
        if !plugin.is_editor_window_visible() {
            log::info!("Editor window closed by user");
            break;
        }

        // Drain the whole event queue each pass; slider drags queue many
        // mouse events between iterations
        let distant_past = NSDate::distantPast();
        loop {
            let event = unsafe {
                app.nextEventMatchingMask_untilDate_inMode_dequeue(
                    NSEventMask::Any,
                    Some(&distant_past),
                    NSDefaultRunLoopMode,
                    true,
                )
            };
            match event {
                Some(event) => app.sendEvent(&event),
                None => break,
            }
        }
        app.updateWindows();

        if take_callback_request() {
            plugin.call_on_main_thread();
        }

        // Commit GUI parameter changes, then snapshot state so the sync
        // below carries this frame's values
        plugin.flush_params();

        iterations += 1;
        if iterations >= STATE_SYNC_INTERVAL {
            iterations = 0;
            if let Ok(state) = plugin.save_state() {
                let changed = last_state.as_ref() != Some(&state);
                if changed {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&state);
                    println!("state:{}", encoded);
                    let _ = std::io::stdout().flush();
                    last_state = Some(state);
                }
            }
        }

        thread::sleep(Duration::from_millis(16));
    }

    Ok(())
}

//! Plugin probe worker
//!
//! Loads one candidate module, extracts its descriptor without creating a
//! processing instance, and prints a single protocol line on stdout:
//! `descriptor:<json>` or `error:<message>`. Runs as a child of the main
//! process so a module that crashes during probing only kills this worker.

use std::path::PathBuf;

use woodshed_lib::audio::plugin::probe::{descriptor_line, error_line, probe_in_process};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let mut args = std::env::args_os().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        eprintln!("Usage: woodshed-scanner <module-path>");
        println!("{}", error_line("missing module path argument"));
        std::process::exit(2);
    };

    match probe_in_process(&path) {
        Ok(descriptor) => {
            println!("{}", descriptor_line(&descriptor));
        }
        Err(message) => {
            log::warn!("Probe of {:?} failed: {}", path, message);
            println!("{}", error_line(&message));
            std::process::exit(1);
        }
    }
}

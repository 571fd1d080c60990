//! File logging for the main process
//!
//! Bundled apps have nowhere useful for stderr, so startup and lifecycle
//! markers also go to a log file the UI can surface.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;

static LOG_FILE: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

fn log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("woodshed")
        .join("logs")
        .join("woodshed.log")
}

pub fn init_logging() {
    let path = log_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Ok(mut file) = LOG_FILE.lock() {
        *file = Some(path);
    }
    log_message("INFO", "woodshed", "Application started");
}

/// Append one line to the log file; also mirrors to stderr for dev runs
pub fn log_message(level: &str, module: &str, message: &str) {
    eprintln!("[{}] [{}] {}", level, module, message);

    let path = log_path();
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(file, "[{}] [{}] [{}] {}", timestamp, level, module, message);
    }
}

#[tauri::command]
pub fn get_log_file_path() -> Result<String, String> {
    Ok(log_path().to_string_lossy().into_owned())
}

#[tauri::command]
pub fn read_log_file() -> Result<String, String> {
    let path = log_path();
    if !path.exists() {
        return Ok(String::new());
    }
    fs::read_to_string(&path).map_err(|e| format!("failed to read log file: {}", e))
}

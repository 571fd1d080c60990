//! Editor window lifecycle across process boundaries
//!
//! Each open editor is a `woodshed-editor-host` child process bound to one
//! plugin instance. The child owns the native window and its event loop;
//! parameter changes made in the GUI come back as `state:<base64>` lines on
//! its stdout and are forwarded into the instance's pending-state channel,
//! which the render context drains. At most one editor per instance.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::Engine as _;
use parking_lot::Mutex;

use crate::audio::chain::InstanceId;

const EDITOR_HOST_BIN: &str = "woodshed-editor-host";

struct EditorChild {
    child: Child,
    stdin: ChildStdin,
    /// Distinguishes this spawn from a later one under the same instance id
    token: u64,
}

pub struct EditorWindows {
    open: Arc<Mutex<HashMap<u64, EditorChild>>>,
    next_token: Mutex<u64>,
}

impl EditorWindows {
    pub fn new() -> Self {
        Self {
            open: Arc::new(Mutex::new(HashMap::new())),
            next_token: Mutex::new(0),
        }
    }

    pub fn is_open(&self, id: InstanceId) -> bool {
        self.open.lock().contains_key(&id.0)
    }

    /// Open the instance's editor, or focus it if it is already up.
    pub fn open(
        &self,
        id: InstanceId,
        module_path: &Path,
        state_tx: Sender<Vec<u8>>,
    ) -> Result<(), String> {
        let mut open = self.open.lock();

        if let Some(entry) = open.get_mut(&id.0) {
            let exited = entry.child.try_wait().map(|s| s.is_some()).unwrap_or(true);
            if !exited {
                let _ = writeln!(entry.stdin, "focus");
                let _ = entry.stdin.flush();
                return Ok(());
            }
            // The user closed the window and the child is gone
            open.remove(&id.0);
        }

        let binary = helper_binary(EDITOR_HOST_BIN)
            .ok_or_else(|| format!("{} binary not found", EDITOR_HOST_BIN))?;

        log::info!("Spawning editor host for instance {} ({:?})", id.0, module_path);
        let mut child = Command::new(binary)
            .arg(module_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| format!("failed to spawn editor host: {}", e))?;

        let stdin = child.stdin.take().ok_or("editor host has no stdin")?;
        let stdout = child.stdout.take().ok_or("editor host has no stdout")?;

        let token = {
            let mut next = self.next_token.lock();
            *next += 1;
            *next
        };

        let map = Arc::clone(&self.open);
        thread::spawn(move || {
            read_editor_output(stdout, id, state_tx);
            // The child is done; forget the handle unless a newer editor
            // already replaced it
            let mut open = map.lock();
            if open.get(&id.0).map(|e| e.token) == Some(token) {
                open.remove(&id.0);
            }
        });

        open.insert(
            id.0,
            EditorChild {
                child,
                stdin,
                token,
            },
        );
        Ok(())
    }

    /// Destroy the instance's editor if present; idempotent otherwise.
    pub fn close(&self, id: InstanceId) {
        let Some(mut entry) = self.open.lock().remove(&id.0) else {
            return;
        };
        log::info!("Closing editor for instance {}", id.0);
        let _ = writeln!(entry.stdin, "close");
        let _ = entry.stdin.flush();

        // Reap off-thread; escalate to kill if the child ignores us
        thread::spawn(move || {
            for _ in 0..40 {
                match entry.child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) => thread::sleep(Duration::from_millis(50)),
                    Err(_) => break,
                }
            }
            log::warn!("Editor host did not exit, killing it");
            let _ = entry.child.kill();
            let _ = entry.child.wait();
        });
    }

    pub fn close_all(&self) {
        let ids: Vec<u64> = self.open.lock().keys().copied().collect();
        for id in ids {
            self.close(InstanceId(id));
        }
    }
}

impl Default for EditorWindows {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume one editor child's stdout until it exits
fn read_editor_output(
    stdout: std::process::ChildStdout,
    id: InstanceId,
    state_tx: Sender<Vec<u8>>,
) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        match parse_editor_line(&line) {
            EditorLine::Ready => log::info!("Editor for instance {} is ready", id.0),
            EditorLine::State(encoded) => {
                match base64::engine::general_purpose::STANDARD.decode(encoded) {
                    Ok(state) => {
                        if state_tx.send(state).is_err() {
                            // Instance is gone; nothing left to sync into
                            break;
                        }
                    }
                    Err(e) => log::warn!("Dropping malformed state line: {}", e),
                }
            }
            EditorLine::Closed => {
                log::info!("Editor for instance {} closed", id.0);
                break;
            }
            EditorLine::Error(message) => {
                log::warn!("Editor for instance {}: {}", id.0, message)
            }
            EditorLine::Other => {}
        }
    }
}

enum EditorLine<'a> {
    Ready,
    Closed,
    State(&'a str),
    Error(&'a str),
    Other,
}

fn parse_editor_line(line: &str) -> EditorLine<'_> {
    let line = line.trim();
    if line == "ready" {
        EditorLine::Ready
    } else if line == "closed" {
        EditorLine::Closed
    } else if let Some(encoded) = line.strip_prefix("state:") {
        EditorLine::State(encoded)
    } else if let Some(message) = line.strip_prefix("error:") {
        EditorLine::Error(message)
    } else {
        EditorLine::Other
    }
}

/// Locate a sibling helper binary next to the running executable
pub(crate) fn helper_binary(name: &str) -> Option<std::path::PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    let file = if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };
    let candidate = dir.join(file);
    candidate.exists().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_protocol_lines_parse() {
        assert!(matches!(parse_editor_line("ready"), EditorLine::Ready));
        assert!(matches!(parse_editor_line("closed"), EditorLine::Closed));
        assert!(matches!(
            parse_editor_line("state:AAECAw=="),
            EditorLine::State("AAECAw==")
        ));
        assert!(matches!(
            parse_editor_line("error:no gui"),
            EditorLine::Error("no gui")
        ));
        assert!(matches!(
            parse_editor_line("info:event_loop_started"),
            EditorLine::Other
        ));
    }

    #[test]
    fn close_without_open_editor_is_idempotent() {
        let windows = EditorWindows::new();
        windows.close(InstanceId(42));
        windows.close(InstanceId(42));
        assert!(!windows.is_open(InstanceId(42)));
    }
}

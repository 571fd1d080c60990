//! Plugin probing: descriptor extraction without a live instance
//!
//! The default prober shells out to the `woodshed-scanner` worker so a
//! crashing or hostile module takes down a child process, not the engine.
//! The worker speaks a one-line protocol on stdout: `descriptor:<json>` on
//! success, `error:<message>` otherwise.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use libloading::{Library, Symbol};
use serde::{Deserialize, Serialize};

use super::clap_abi::{ClapPluginEntry, ClapPluginFactory, CLAP_ENTRY_SYMBOL, CLAP_PLUGIN_FACTORY_ID};
use super::host::resolve_dylib_path;

/// Load-independent metadata captured during scanning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub path: PathBuf,
}

const DESCRIPTOR_PREFIX: &str = "descriptor:";
const ERROR_PREFIX: &str = "error:";

/// Render a descriptor as a protocol line for the worker's stdout
pub fn descriptor_line(descriptor: &PluginDescriptor) -> String {
    let json = serde_json::to_string(descriptor).unwrap_or_else(|_| "{}".to_string());
    format!("{}{}", DESCRIPTOR_PREFIX, json)
}

pub fn error_line(message: &str) -> String {
    // Keep the protocol line-oriented
    format!("{}{}", ERROR_PREFIX, message.replace('\n', " "))
}

/// Parse worker stdout back into a descriptor
pub fn parse_probe_output(stdout: &str) -> Result<PluginDescriptor, String> {
    for line in stdout.lines() {
        if let Some(json) = line.strip_prefix(DESCRIPTOR_PREFIX) {
            return serde_json::from_str(json)
                .map_err(|e| format!("malformed descriptor line: {}", e));
        }
        if let Some(message) = line.strip_prefix(ERROR_PREFIX) {
            return Err(message.to_string());
        }
    }
    Err("probe produced no descriptor".to_string())
}

/// How the registry turns a candidate path into a descriptor. Tests inject
/// deterministic implementations.
pub trait Prober: Send + Sync {
    fn probe(&self, path: &Path) -> Result<PluginDescriptor, String>;
}

/// Production prober: out-of-process via the scanner worker, with an
/// in-process fallback when the worker binary is missing (dev builds).
pub struct WorkerProber;

impl Prober for WorkerProber {
    fn probe(&self, path: &Path) -> Result<PluginDescriptor, String> {
        match super::editors::helper_binary(SCANNER_BIN) {
            Some(worker) => {
                let output = Command::new(&worker)
                    .arg(path)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .output()
                    .map_err(|e| format!("failed to spawn scanner worker: {}", e))?;
                if !output.status.success() {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    return Err(parse_probe_output(&stdout)
                        .err()
                        .unwrap_or_else(|| format!("scanner worker exited with {}", output.status)));
                }
                parse_probe_output(&String::from_utf8_lossy(&output.stdout))
            }
            None => {
                log::warn!("Scanner worker not found, probing {:?} in-process", path);
                probe_in_process(path)
            }
        }
    }
}

const SCANNER_BIN: &str = "woodshed-scanner";

/// Walk entry → factory → first descriptor and tear the module back down,
/// never constructing a processing instance.
pub fn probe_in_process(path: &Path) -> Result<PluginDescriptor, String> {
    let dylib_path = resolve_dylib_path(path).ok_or("no module binary found")?;

    let library = unsafe {
        Library::new(&dylib_path).map_err(|e| format!("not a loadable module: {}", e))?
    };
    let entry: *const ClapPluginEntry = unsafe {
        let symbol: Symbol<*const ClapPluginEntry> = library
            .get(CLAP_ENTRY_SYMBOL)
            .map_err(|e| format!("no entry symbol: {}", e))?;
        *symbol
    };
    if entry.is_null() {
        return Err("entry symbol is null".to_string());
    }
    let entry_ref = unsafe { &*entry };
    if !entry_ref.clap_version.is_compatible() {
        return Err(format!(
            "unsupported ABI version {}.{}.{}",
            entry_ref.clap_version.major,
            entry_ref.clap_version.minor,
            entry_ref.clap_version.revision
        ));
    }

    let path_cstr = std::ffi::CString::new(path.to_string_lossy().as_bytes())
        .map_err(|_| "unrepresentable path".to_string())?;
    let init = entry_ref.init.ok_or("entry has no init")?;
    if !unsafe { init(path_cstr.as_ptr()) } {
        return Err("entry init() returned false".to_string());
    }

    let result = (|| {
        let get_factory = entry_ref.get_factory.ok_or("entry has no get_factory")?;
        let factory = unsafe {
            get_factory(CLAP_PLUGIN_FACTORY_ID.as_ptr() as *const _) as *const ClapPluginFactory
        };
        if factory.is_null() {
            return Err("no plugin factory".to_string());
        }
        let factory_ref = unsafe { &*factory };

        let count_fn = factory_ref.get_plugin_count.ok_or("factory has no count")?;
        if unsafe { count_fn(factory) } == 0 {
            return Err("module exports no plugins".to_string());
        }

        let descriptor_fn = factory_ref
            .get_plugin_descriptor
            .ok_or("factory has no descriptor accessor")?;
        let descriptor = unsafe { descriptor_fn(factory, 0) };
        if descriptor.is_null() {
            return Err("null descriptor".to_string());
        }
        let desc = unsafe { &*descriptor };

        let read = |ptr: *const std::os::raw::c_char, fallback: &str| -> String {
            if ptr.is_null() {
                fallback.to_string()
            } else {
                unsafe { std::ffi::CStr::from_ptr(ptr) }
                    .to_string_lossy()
                    .into_owned()
            }
        };

        Ok(PluginDescriptor {
            id: read(desc.id, "unknown"),
            name: read(desc.name, "Unknown Plugin"),
            vendor: read(desc.vendor, "Unknown"),
            version: read(desc.version, "0.0.0"),
            path: path.to_path_buf(),
        })
    })();

    if let Some(deinit) = entry_ref.deinit {
        unsafe { deinit() };
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor() -> PluginDescriptor {
        PluginDescriptor {
            id: "com.example.verb".to_string(),
            name: "Example Verb".to_string(),
            vendor: "Example".to_string(),
            version: "1.2.0".to_string(),
            path: PathBuf::from("/plugins/verb.clap"),
        }
    }

    #[test]
    fn descriptor_line_round_trips() {
        let descriptor = sample_descriptor();
        let line = descriptor_line(&descriptor);
        assert!(line.starts_with("descriptor:"));
        assert_eq!(parse_probe_output(&line).unwrap(), descriptor);
    }

    #[test]
    fn error_line_surfaces_as_err() {
        let out = format!("{}\n", error_line("entry init() returned false"));
        let err = parse_probe_output(&out).unwrap_err();
        assert_eq!(err, "entry init() returned false");
    }

    #[test]
    fn noise_before_the_descriptor_line_is_ignored() {
        let descriptor = sample_descriptor();
        let out = format!("some stray logging\n{}\n", descriptor_line(&descriptor));
        assert_eq!(parse_probe_output(&out).unwrap(), descriptor);
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(parse_probe_output("").is_err());
    }
}

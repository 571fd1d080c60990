//! CLAP ABI surface consumed by the engine
//!
//! Hand-written `#[repr(C)]` mirrors of the CLAP C API, limited to what the
//! host actually calls: entry/factory/descriptor discovery, the plugin
//! lifecycle, 32-bit audio processing, and the gui/state/params extensions.
//! Reference: https://github.com/free-audio/clap

use std::ffi::c_void;
use std::os::raw::c_char;

pub const CLAP_VERSION_MAJOR: u32 = 1;
pub const CLAP_VERSION_MINOR: u32 = 2;
pub const CLAP_VERSION_REVISION: u32 = 0;

/// Exported entry symbol name, including the trailing NUL for `libloading`
pub const CLAP_ENTRY_SYMBOL: &[u8] = b"clap_entry\0";

pub const CLAP_PLUGIN_FACTORY_ID: &[u8] = b"clap.plugin-factory\0";
pub const CLAP_EXT_GUI: &[u8] = b"clap.gui\0";
pub const CLAP_EXT_STATE: &[u8] = b"clap.state\0";
pub const CLAP_EXT_PARAMS: &[u8] = b"clap.params\0";

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClapVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl ClapVersion {
    pub const CURRENT: Self = Self {
        major: CLAP_VERSION_MAJOR,
        minor: CLAP_VERSION_MINOR,
        revision: CLAP_VERSION_REVISION,
    };

    /// Compatibility rule from the CLAP spec: 1.x hosts accept any 1.x
    /// plugin; everything pre-1.0 is rejected.
    pub fn is_compatible(&self) -> bool {
        self.major >= 1
    }
}

/// The module's exported `clap_entry`
#[repr(C)]
pub struct ClapPluginEntry {
    pub clap_version: ClapVersion,
    pub init: Option<unsafe extern "C" fn(plugin_path: *const c_char) -> bool>,
    pub deinit: Option<unsafe extern "C" fn()>,
    pub get_factory: Option<unsafe extern "C" fn(factory_id: *const c_char) -> *const c_void>,
}

#[repr(C)]
pub struct ClapPluginFactory {
    pub get_plugin_count: Option<unsafe extern "C" fn(factory: *const ClapPluginFactory) -> u32>,
    pub get_plugin_descriptor: Option<
        unsafe extern "C" fn(
            factory: *const ClapPluginFactory,
            index: u32,
        ) -> *const ClapPluginDescriptor,
    >,
    pub create_plugin: Option<
        unsafe extern "C" fn(
            factory: *const ClapPluginFactory,
            host: *const ClapHost,
            plugin_id: *const c_char,
        ) -> *const ClapPlugin,
    >,
}

#[repr(C)]
pub struct ClapPluginDescriptor {
    pub clap_version: ClapVersion,
    pub id: *const c_char,
    pub name: *const c_char,
    pub vendor: *const c_char,
    pub url: *const c_char,
    pub manual_url: *const c_char,
    pub support_url: *const c_char,
    pub version: *const c_char,
    pub description: *const c_char,
    pub features: *const *const c_char,
}

/// Host callbacks handed to the plugin at creation. All strings must outlive
/// the plugin instance.
#[repr(C)]
pub struct ClapHost {
    pub clap_version: ClapVersion,
    pub host_data: *mut c_void,
    pub name: *const c_char,
    pub vendor: *const c_char,
    pub url: *const c_char,
    pub version: *const c_char,
    pub get_extension: Option<
        unsafe extern "C" fn(host: *const ClapHost, extension_id: *const c_char) -> *const c_void,
    >,
    pub request_restart: Option<unsafe extern "C" fn(host: *const ClapHost)>,
    pub request_process: Option<unsafe extern "C" fn(host: *const ClapHost)>,
    pub request_callback: Option<unsafe extern "C" fn(host: *const ClapHost)>,
}

#[repr(C)]
pub struct ClapPlugin {
    pub desc: *const ClapPluginDescriptor,
    pub plugin_data: *mut c_void,
    pub init: Option<unsafe extern "C" fn(plugin: *const ClapPlugin) -> bool>,
    pub destroy: Option<unsafe extern "C" fn(plugin: *const ClapPlugin)>,
    pub activate: Option<
        unsafe extern "C" fn(
            plugin: *const ClapPlugin,
            sample_rate: f64,
            min_frames_count: u32,
            max_frames_count: u32,
        ) -> bool,
    >,
    pub deactivate: Option<unsafe extern "C" fn(plugin: *const ClapPlugin)>,
    pub start_processing: Option<unsafe extern "C" fn(plugin: *const ClapPlugin) -> bool>,
    pub stop_processing: Option<unsafe extern "C" fn(plugin: *const ClapPlugin)>,
    pub reset: Option<unsafe extern "C" fn(plugin: *const ClapPlugin)>,
    pub process:
        Option<unsafe extern "C" fn(plugin: *const ClapPlugin, process: *const ClapProcess) -> i32>,
    pub get_extension:
        Option<unsafe extern "C" fn(plugin: *const ClapPlugin, id: *const c_char) -> *const c_void>,
    pub on_main_thread: Option<unsafe extern "C" fn(plugin: *const ClapPlugin)>,
}

pub const CLAP_PROCESS_ERROR: i32 = 0;

#[repr(C)]
pub struct ClapAudioBuffer {
    pub data32: *mut *mut f32,
    pub data64: *mut *mut f64,
    pub channel_count: u32,
    pub latency: u32,
    pub constant_mask: u64,
}

#[repr(C)]
pub struct ClapProcess {
    pub steady_time: i64,
    pub frames_count: u32,
    /// Transport info; this host never supplies one
    pub transport: *const c_void,
    pub audio_inputs: *const ClapAudioBuffer,
    pub audio_outputs: *mut ClapAudioBuffer,
    pub audio_inputs_count: u32,
    pub audio_outputs_count: u32,
    pub in_events: *const ClapInputEvents,
    pub out_events: *const ClapOutputEvents,
}

#[repr(C)]
pub struct ClapEventHeader {
    pub size: u32,
    pub time: u32,
    pub space_id: u16,
    pub type_: u16,
    pub flags: u32,
}

#[repr(C)]
pub struct ClapInputEvents {
    pub ctx: *mut c_void,
    pub size: Option<unsafe extern "C" fn(list: *const ClapInputEvents) -> u32>,
    pub get: Option<
        unsafe extern "C" fn(list: *const ClapInputEvents, index: u32) -> *const ClapEventHeader,
    >,
}

#[repr(C)]
pub struct ClapOutputEvents {
    pub ctx: *mut c_void,
    pub try_push: Option<
        unsafe extern "C" fn(list: *const ClapOutputEvents, event: *const ClapEventHeader) -> bool,
    >,
}

/// Effects chains carry no events; every process call gets these empty lists.
pub unsafe extern "C" fn empty_input_events_size(_list: *const ClapInputEvents) -> u32 {
    0
}

pub unsafe extern "C" fn empty_input_events_get(
    _list: *const ClapInputEvents,
    _index: u32,
) -> *const ClapEventHeader {
    std::ptr::null()
}

pub unsafe extern "C" fn empty_output_events_push(
    _list: *const ClapOutputEvents,
    _event: *const ClapEventHeader,
) -> bool {
    true
}

impl ClapInputEvents {
    pub fn empty() -> Self {
        Self {
            ctx: std::ptr::null_mut(),
            size: Some(empty_input_events_size),
            get: Some(empty_input_events_get),
        }
    }
}

impl ClapOutputEvents {
    pub fn empty() -> Self {
        Self {
            ctx: std::ptr::null_mut(),
            try_push: Some(empty_output_events_push),
        }
    }
}

// ---------------------------------------------------------------------------
// GUI extension
// ---------------------------------------------------------------------------

#[cfg(target_os = "macos")]
pub const CLAP_WINDOW_API: &[u8] = b"cocoa\0";
#[cfg(target_os = "windows")]
pub const CLAP_WINDOW_API: &[u8] = b"win32\0";
#[cfg(target_os = "linux")]
pub const CLAP_WINDOW_API: &[u8] = b"x11\0";

#[repr(C)]
pub union ClapWindowHandle {
    pub cocoa: *mut c_void,
    pub win32: *mut c_void,
    pub x11: u64,
    pub ptr: *mut c_void,
}

#[repr(C)]
pub struct ClapWindow {
    pub api: *const c_char,
    pub handle: ClapWindowHandle,
}

impl ClapWindow {
    /// Wrap a native parent view/handle for `set_parent`
    pub fn with_native(handle: *mut c_void) -> Self {
        Self {
            api: CLAP_WINDOW_API.as_ptr() as *const c_char,
            handle: ClapWindowHandle { ptr: handle },
        }
    }

    /// A null parent; passing this to `set_parent` unparents the GUI
    pub fn detached() -> Self {
        Self::with_native(std::ptr::null_mut())
    }
}

#[repr(C)]
pub struct ClapGuiResizeHints {
    pub can_resize_horizontally: bool,
    pub can_resize_vertically: bool,
    pub preserve_aspect_ratio: bool,
    pub aspect_ratio_width: u32,
    pub aspect_ratio_height: u32,
}

#[repr(C)]
pub struct ClapPluginGui {
    pub is_api_supported: Option<
        unsafe extern "C" fn(
            plugin: *const ClapPlugin,
            api: *const c_char,
            is_floating: bool,
        ) -> bool,
    >,
    pub get_preferred_api: Option<
        unsafe extern "C" fn(
            plugin: *const ClapPlugin,
            api: *mut *const c_char,
            is_floating: *mut bool,
        ) -> bool,
    >,
    pub create: Option<
        unsafe extern "C" fn(
            plugin: *const ClapPlugin,
            api: *const c_char,
            is_floating: bool,
        ) -> bool,
    >,
    pub destroy: Option<unsafe extern "C" fn(plugin: *const ClapPlugin)>,
    pub set_scale: Option<unsafe extern "C" fn(plugin: *const ClapPlugin, scale: f64) -> bool>,
    pub get_size: Option<
        unsafe extern "C" fn(plugin: *const ClapPlugin, width: *mut u32, height: *mut u32) -> bool,
    >,
    pub can_resize: Option<unsafe extern "C" fn(plugin: *const ClapPlugin) -> bool>,
    pub get_resize_hints: Option<
        unsafe extern "C" fn(plugin: *const ClapPlugin, hints: *mut ClapGuiResizeHints) -> bool,
    >,
    pub adjust_size: Option<
        unsafe extern "C" fn(plugin: *const ClapPlugin, width: *mut u32, height: *mut u32) -> bool,
    >,
    pub set_size:
        Option<unsafe extern "C" fn(plugin: *const ClapPlugin, width: u32, height: u32) -> bool>,
    pub set_parent: Option<
        unsafe extern "C" fn(plugin: *const ClapPlugin, window: *const ClapWindow) -> bool,
    >,
    pub set_transient: Option<
        unsafe extern "C" fn(plugin: *const ClapPlugin, window: *const ClapWindow) -> bool,
    >,
    pub suggest_title:
        Option<unsafe extern "C" fn(plugin: *const ClapPlugin, title: *const c_char)>,
    pub show: Option<unsafe extern "C" fn(plugin: *const ClapPlugin) -> bool>,
    pub hide: Option<unsafe extern "C" fn(plugin: *const ClapPlugin) -> bool>,
}

// ---------------------------------------------------------------------------
// State extension
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct ClapInputStream {
    pub ctx: *mut c_void,
    pub read: Option<
        unsafe extern "C" fn(stream: *const ClapInputStream, buffer: *mut c_void, size: u64) -> i64,
    >,
}

#[repr(C)]
pub struct ClapOutputStream {
    pub ctx: *mut c_void,
    pub write: Option<
        unsafe extern "C" fn(
            stream: *const ClapOutputStream,
            buffer: *const c_void,
            size: u64,
        ) -> i64,
    >,
}

#[repr(C)]
pub struct ClapPluginState {
    pub save: Option<
        unsafe extern "C" fn(plugin: *const ClapPlugin, stream: *const ClapOutputStream) -> bool,
    >,
    pub load: Option<
        unsafe extern "C" fn(plugin: *const ClapPlugin, stream: *const ClapInputStream) -> bool,
    >,
}

// ---------------------------------------------------------------------------
// Params extension
// ---------------------------------------------------------------------------

/// Host side: the plugin notifies us about its parameter list
#[repr(C)]
pub struct ClapHostParams {
    pub rescan: Option<unsafe extern "C" fn(host: *const ClapHost, flags: u32)>,
    pub clear: Option<unsafe extern "C" fn(host: *const ClapHost, param_id: u32, flags: u32)>,
    pub request_flush: Option<unsafe extern "C" fn(host: *const ClapHost)>,
}

/// Plugin side: parameter enumeration and the flush entry point the host
/// must call when the GUI changes values while audio is idle
#[repr(C)]
pub struct ClapPluginParams {
    pub count: Option<unsafe extern "C" fn(plugin: *const ClapPlugin) -> u32>,
    pub get_info: Option<
        unsafe extern "C" fn(
            plugin: *const ClapPlugin,
            param_index: u32,
            param_info: *mut ClapParamInfo,
        ) -> bool,
    >,
    pub get_value: Option<
        unsafe extern "C" fn(plugin: *const ClapPlugin, param_id: u32, out_value: *mut f64) -> bool,
    >,
    pub value_to_text: Option<
        unsafe extern "C" fn(
            plugin: *const ClapPlugin,
            param_id: u32,
            value: f64,
            out_buffer: *mut c_char,
            out_buffer_capacity: u32,
        ) -> bool,
    >,
    pub text_to_value: Option<
        unsafe extern "C" fn(
            plugin: *const ClapPlugin,
            param_id: u32,
            param_value_text: *const c_char,
            out_value: *mut f64,
        ) -> bool,
    >,
    pub flush: Option<
        unsafe extern "C" fn(
            plugin: *const ClapPlugin,
            in_events: *const ClapInputEvents,
            out_events: *const ClapOutputEvents,
        ),
    >,
}

#[repr(C)]
pub struct ClapParamInfo {
    pub id: u32,
    pub flags: u32,
    pub cookie: *mut c_void,
    pub name: [c_char; 256],
    pub module: [c_char; 1024],
    pub min_value: f64,
    pub max_value: f64,
    pub default_value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_compatibility_follows_clap_rule() {
        assert!(ClapVersion::CURRENT.is_compatible());
        let pre_release = ClapVersion {
            major: 0,
            minor: 26,
            revision: 0,
        };
        assert!(!pre_release.is_compatible());
    }

    #[test]
    fn empty_event_lists_report_no_events() {
        let input = ClapInputEvents::empty();
        let count = unsafe { (input.size.unwrap())(&input) };
        assert_eq!(count, 0);
        let output = ClapOutputEvents::empty();
        let accepted = unsafe { (output.try_push.unwrap())(&output, std::ptr::null()) };
        assert!(accepted);
    }
}

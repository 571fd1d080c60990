//! CLAP module loading and the chain-level plugin host
//!
//! `PluginInstance` wraps one dynamically loaded module behind the
//! `ChainProcessor` seam; `PluginHost` owns the control-side chain
//! operations (load, remove, enable, bypass) and publishes every mutation
//! as a fresh snapshot.

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use libloading::{Library, Symbol};
use parking_lot::Mutex;

use super::clap_abi::*;
use super::editors::EditorWindows;
use crate::audio::chain::{ChainProcessor, ChainSlot, IdAllocator, InstanceId, LoadedPlugin};
use crate::audio::engine::EngineShared;
use crate::audio::error::{EngineError, LoadError};

/// Largest block the engine will ever hand a plugin; activation uses this
/// so buffer-size changes below it need no reactivation
pub const MAX_BLOCK_FRAMES: u32 = 4096;

const HOST_NAME: &str = "woodshed";
const HOST_VENDOR: &str = "woodshed audio";
const HOST_URL: &str = "https://woodshed.audio";
const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Set when a plugin calls `request_callback`; the control loop checks it
/// and runs `on_main_thread` from the right thread.
static CALLBACK_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn take_callback_request() -> bool {
    CALLBACK_REQUESTED.swap(false, Ordering::SeqCst)
}

/// A loaded CLAP module instance
pub struct PluginInstance {
    /// Keeps the module mapped; dropped last
    _library: Library,
    entry: *const ClapPluginEntry,
    plugin: *const ClapPlugin,
    /// Host struct and its strings must outlive the plugin
    _host: Box<ClapHost>,
    _host_strings: Vec<CString>,

    pub name: String,
    pub vendor: String,
    pub version: String,
    pub plugin_id: String,

    sample_rate: f64,
    max_frames: u32,
    is_active: bool,
    is_processing: bool,

    // Preallocated non-interleaved channel buffers and their pointer tables
    input_data: Vec<Vec<f32>>,
    output_data: Vec<Vec<f32>>,
    input_ptrs: Vec<*mut f32>,
    output_ptrs: Vec<*mut f32>,

    /// Editor-originated state updates, drained at the top of each render
    /// callback
    state_rx: Receiver<Vec<u8>>,

    // Window handle when this instance hosts its own editor (editor-host
    // process only)
    #[cfg(target_os = "macos")]
    editor_window: Option<*mut std::ffi::c_void>,
}

// The raw pointers never move after load and the instance is only ever
// driven from behind a Mutex (render try_lock / control lock), so handing
// the box between threads is sound.
unsafe impl Send for PluginInstance {}

impl PluginInstance {
    /// Load a module and bring it to the activated state.
    ///
    /// On any failure the partially constructed module is torn down and no
    /// instance exists afterwards.
    pub fn load(
        module_path: &Path,
        sample_rate: f64,
        max_frames: u32,
        state_rx: Receiver<Vec<u8>>,
    ) -> Result<Self, LoadError> {
        log::info!("Loading plugin module {:?}", module_path);

        let dylib_path = resolve_dylib_path(module_path).ok_or(LoadError::IncompatibleFormat)?;

        let library = unsafe {
            Library::new(&dylib_path).map_err(|e| {
                log::warn!("Not a loadable module {:?}: {}", dylib_path, e);
                LoadError::IncompatibleFormat
            })?
        };

        let entry: *const ClapPluginEntry = unsafe {
            let symbol: Symbol<*const ClapPluginEntry> =
                library.get(CLAP_ENTRY_SYMBOL).map_err(|e| {
                    log::warn!("Module has no entry symbol: {}", e);
                    LoadError::EntryPointMissing
                })?;
            *symbol
        };
        if entry.is_null() {
            return Err(LoadError::EntryPointMissing);
        }

        let entry_ref = unsafe { &*entry };
        if !entry_ref.clap_version.is_compatible() {
            log::warn!(
                "Module speaks ABI {}.{}.{}, rejected",
                entry_ref.clap_version.major,
                entry_ref.clap_version.minor,
                entry_ref.clap_version.revision
            );
            return Err(LoadError::IncompatibleFormat);
        }

        let path_cstr = CString::new(module_path.to_string_lossy().as_bytes())
            .map_err(|_| LoadError::IncompatibleFormat)?;
        let entry_init = entry_ref.init.ok_or(LoadError::EntryPointMissing)?;
        if !unsafe { entry_init(path_cstr.as_ptr()) } {
            return Err(LoadError::InitFailed);
        }

        // From here on, failure paths must deinit the entry
        let teardown = |reason: LoadError| {
            if let Some(deinit) = entry_ref.deinit {
                unsafe { deinit() };
            }
            reason
        };

        let get_factory = entry_ref
            .get_factory
            .ok_or_else(|| teardown(LoadError::EntryPointMissing))?;
        let factory = unsafe {
            get_factory(CLAP_PLUGIN_FACTORY_ID.as_ptr() as *const _) as *const ClapPluginFactory
        };
        if factory.is_null() {
            return Err(teardown(LoadError::InitFailed));
        }
        let factory_ref = unsafe { &*factory };

        let count_fn = factory_ref
            .get_plugin_count
            .ok_or_else(|| teardown(LoadError::InitFailed))?;
        if unsafe { count_fn(factory) } == 0 {
            log::warn!("Module {:?} exports no plugins", module_path);
            return Err(teardown(LoadError::InitFailed));
        }

        let descriptor_fn = factory_ref
            .get_plugin_descriptor
            .ok_or_else(|| teardown(LoadError::InitFailed))?;
        let descriptor = unsafe { descriptor_fn(factory, 0) };
        if descriptor.is_null() {
            return Err(teardown(LoadError::InitFailed));
        }
        let desc_ref = unsafe { &*descriptor };

        let plugin_id = read_cstr(desc_ref.id, "unknown");
        let name = read_cstr(desc_ref.name, "Unknown Plugin");
        let vendor = read_cstr(desc_ref.vendor, "Unknown");
        let version = read_cstr(desc_ref.version, "0.0.0");
        log::info!("Instantiating {} {} by {}", name, version, vendor);

        // Host callbacks handed to the plugin; strings stay alive in the box
        let host_strings = vec![
            CString::new(HOST_NAME).expect("static"),
            CString::new(HOST_VENDOR).expect("static"),
            CString::new(HOST_URL).expect("static"),
            CString::new(HOST_VERSION).expect("static"),
        ];
        let host = Box::new(ClapHost {
            clap_version: ClapVersion::CURRENT,
            host_data: ptr::null_mut(),
            name: host_strings[0].as_ptr(),
            vendor: host_strings[1].as_ptr(),
            url: host_strings[2].as_ptr(),
            version: host_strings[3].as_ptr(),
            get_extension: Some(host_get_extension),
            request_restart: Some(host_request_restart),
            request_process: Some(host_request_process),
            request_callback: Some(host_request_callback),
        });

        let create_fn = factory_ref
            .create_plugin
            .ok_or_else(|| teardown(LoadError::InitFailed))?;
        let id_cstr =
            CString::new(plugin_id.as_bytes()).map_err(|_| teardown(LoadError::InitFailed))?;
        let plugin = unsafe { create_fn(factory, host.as_ref(), id_cstr.as_ptr()) };
        if plugin.is_null() {
            return Err(teardown(LoadError::InitFailed));
        }

        let plugin_ref = unsafe { &*plugin };
        let plugin_init = plugin_ref
            .init
            .ok_or_else(|| teardown(LoadError::InitFailed))?;
        if !unsafe { plugin_init(plugin) } {
            if let Some(destroy) = plugin_ref.destroy {
                unsafe { destroy(plugin) };
            }
            return Err(teardown(LoadError::InitFailed));
        }

        let channels = 2usize;
        let mut input_data = Vec::with_capacity(channels);
        let mut output_data = Vec::with_capacity(channels);
        for _ in 0..channels {
            input_data.push(vec![0.0f32; max_frames as usize]);
            output_data.push(vec![0.0f32; max_frames as usize]);
        }

        let mut instance = Self {
            _library: library,
            entry,
            plugin,
            _host: host,
            _host_strings: host_strings,
            name,
            vendor,
            version,
            plugin_id,
            sample_rate,
            max_frames,
            is_active: false,
            is_processing: false,
            input_data,
            output_data,
            input_ptrs: Vec::with_capacity(channels),
            output_ptrs: Vec::with_capacity(channels),
            state_rx,
            #[cfg(target_os = "macos")]
            editor_window: None,
        };

        instance.activate()?;
        Ok(instance)
    }

    fn activate(&mut self) -> Result<(), LoadError> {
        if self.is_active {
            return Ok(());
        }
        let plugin_ref = unsafe { &*self.plugin };
        let activate_fn = plugin_ref.activate.ok_or(LoadError::InitFailed)?;
        if !unsafe { activate_fn(self.plugin, self.sample_rate, 1, self.max_frames) } {
            return Err(LoadError::InitFailed);
        }
        self.is_active = true;
        log::info!(
            "{} activated at {} Hz, max {} frames",
            self.name,
            self.sample_rate,
            self.max_frames
        );
        Ok(())
    }

    pub fn start_processing(&mut self) -> Result<(), LoadError> {
        if !self.is_active {
            return Err(LoadError::InitFailed);
        }
        if self.is_processing {
            return Ok(());
        }
        let plugin_ref = unsafe { &*self.plugin };
        if let Some(start_fn) = plugin_ref.start_processing {
            if !unsafe { start_fn(self.plugin) } {
                return Err(LoadError::InitFailed);
            }
        }
        self.is_processing = true;
        Ok(())
    }

    pub fn stop_processing(&mut self) {
        if !self.is_processing {
            return;
        }
        let plugin_ref = unsafe { &*self.plugin };
        if let Some(stop_fn) = plugin_ref.stop_processing {
            unsafe { stop_fn(self.plugin) };
        }
        self.is_processing = false;
    }

    pub fn has_gui(&self) -> bool {
        !self.extension(CLAP_EXT_GUI).is_null()
    }

    pub fn has_state(&self) -> bool {
        !self.extension(CLAP_EXT_STATE).is_null()
    }

    fn extension(&self, id: &[u8]) -> *const std::ffi::c_void {
        let plugin_ref = unsafe { &*self.plugin };
        match plugin_ref.get_extension {
            Some(get_ext) => unsafe { get_ext(self.plugin, id.as_ptr() as *const _) },
            None => ptr::null(),
        }
    }

    /// Commit GUI-side parameter changes while no audio is being pulled.
    /// The plugin asks for this via `request_flush`.
    pub fn flush_params(&self) {
        let params = self.extension(CLAP_EXT_PARAMS) as *const ClapPluginParams;
        if params.is_null() {
            return;
        }
        let Some(flush_fn) = (unsafe { (*params).flush }) else {
            return;
        };
        let in_events = ClapInputEvents::empty();
        let out_events = ClapOutputEvents::empty();
        unsafe { flush_fn(self.plugin, &in_events, &out_events) };
    }

    pub fn call_on_main_thread(&self) {
        let plugin_ref = unsafe { &*self.plugin };
        if let Some(cb) = plugin_ref.on_main_thread {
            unsafe { cb(self.plugin) };
        }
    }

    /// Serialize the plugin's full parameter state
    pub fn save_state(&self) -> Result<Vec<u8>, String> {
        let state = self.extension(CLAP_EXT_STATE) as *const ClapPluginState;
        if state.is_null() {
            return Err("plugin has no state extension".to_string());
        }
        let save_fn = unsafe { (*state).save }.ok_or("state extension has no save")?;

        unsafe extern "C" fn write_fn(
            stream: *const ClapOutputStream,
            data: *const std::ffi::c_void,
            size: u64,
        ) -> i64 {
            if stream.is_null() || data.is_null() {
                return -1;
            }
            let buffer = &mut *((*stream).ctx as *mut Vec<u8>);
            let slice = std::slice::from_raw_parts(data as *const u8, size as usize);
            buffer.extend_from_slice(slice);
            size as i64
        }

        let mut buffer: Vec<u8> = Vec::new();
        let stream = ClapOutputStream {
            ctx: &mut buffer as *mut Vec<u8> as *mut std::ffi::c_void,
            write: Some(write_fn),
        };

        if unsafe { save_fn(self.plugin, &stream) } {
            Ok(buffer)
        } else {
            Err("plugin state save failed".to_string())
        }
    }

    /// Restore serialized parameter state. Called from the render path when
    /// draining editor updates, so it never logs on success.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), String> {
        let state = self.extension(CLAP_EXT_STATE) as *const ClapPluginState;
        if state.is_null() {
            return Err("plugin has no state extension".to_string());
        }
        let load_fn = unsafe { (*state).load }.ok_or("state extension has no load")?;

        struct ReadCursor {
            data: *const u8,
            len: usize,
            pos: usize,
        }

        unsafe extern "C" fn read_fn(
            stream: *const ClapInputStream,
            buffer: *mut std::ffi::c_void,
            size: u64,
        ) -> i64 {
            if stream.is_null() || buffer.is_null() {
                return -1;
            }
            let cursor = &mut *((*stream).ctx as *mut ReadCursor);
            let to_read = (size as usize).min(cursor.len - cursor.pos);
            if to_read == 0 {
                return 0;
            }
            ptr::copy_nonoverlapping(cursor.data.add(cursor.pos), buffer as *mut u8, to_read);
            cursor.pos += to_read;
            to_read as i64
        }

        let mut cursor = ReadCursor {
            data: data.as_ptr(),
            len: data.len(),
            pos: 0,
        };
        let stream = ClapInputStream {
            ctx: &mut cursor as *mut ReadCursor as *mut std::ffi::c_void,
            read: Some(read_fn),
        };

        if unsafe { load_fn(self.plugin, &stream) } {
            Ok(())
        } else {
            Err("plugin state load failed".to_string())
        }
    }

    // -----------------------------------------------------------------
    // Direct editor window hosting, used only inside the editor-host
    // process where the plugin GUI may own the main thread
    // -----------------------------------------------------------------

    #[cfg(target_os = "macos")]
    pub fn open_editor_window_at(&mut self, position: Option<(f64, f64)>) -> Result<(), String> {
        if self.editor_window.is_some() {
            return Ok(());
        }
        if !self.has_gui() {
            return Err("plugin has no GUI".to_string());
        }
        let (window, _view) =
            unsafe { super::editor::create_editor_window_at(self.plugin, &self.name, position)? };
        self.editor_window = Some(window);
        Ok(())
    }

    #[cfg(target_os = "macos")]
    pub fn close_editor_window(&mut self) {
        if let Some(window) = self.editor_window.take() {
            unsafe { super::editor::destroy_editor_window(self.plugin, window) };
        }
    }

    #[cfg(target_os = "macos")]
    pub fn is_editor_window_visible(&self) -> bool {
        self.editor_window
            .map(super::editor::is_window_visible)
            .unwrap_or(false)
    }

    #[cfg(target_os = "macos")]
    pub fn editor_window_position(&self) -> Option<(f64, f64)> {
        self.editor_window
            .and_then(|w| unsafe { super::editor::get_window_position(w) })
    }

    #[cfg(target_os = "macos")]
    pub fn focus_editor_window(&self) {
        if let Some(window) = self.editor_window {
            super::editor::restore_window(window);
        }
    }

    #[cfg(not(target_os = "macos"))]
    pub fn open_editor_window_at(&mut self, _position: Option<(f64, f64)>) -> Result<(), String> {
        Err("plugin GUI not supported on this platform".to_string())
    }

    #[cfg(not(target_os = "macos"))]
    pub fn close_editor_window(&mut self) {}

    #[cfg(not(target_os = "macos"))]
    pub fn is_editor_window_visible(&self) -> bool {
        false
    }

    #[cfg(not(target_os = "macos"))]
    pub fn editor_window_position(&self) -> Option<(f64, f64)> {
        None
    }

    #[cfg(not(target_os = "macos"))]
    pub fn focus_editor_window(&self) {}
}

impl ChainProcessor for PluginInstance {
    fn apply_pending_state(&mut self) {
        // Keep only the newest pending update; intermediate ones are stale
        let mut latest: Option<Vec<u8>> = None;
        while let Ok(state) = self.state_rx.try_recv() {
            latest = Some(state);
        }
        if let Some(state) = latest {
            // Errors stay silent here; this runs on the render path
            let _ = self.load_state(&state);
        }
    }

    fn reconfigure(&mut self, sample_rate: f64) {
        if (self.sample_rate - sample_rate).abs() < f64::EPSILON {
            return;
        }
        self.stop_processing();
        if self.is_active {
            let plugin_ref = unsafe { &*self.plugin };
            if let Some(deactivate) = plugin_ref.deactivate {
                unsafe { deactivate(self.plugin) };
            }
            self.is_active = false;
        }
        self.sample_rate = sample_rate;
        match self.activate() {
            Ok(()) => {
                let _ = self.start_processing();
            }
            Err(e) => log::warn!("{} failed to reactivate at {} Hz: {}", self.name, sample_rate, e),
        }
    }

    fn process_in_place(&mut self, buffer: &mut [f32], frames: usize) -> bool {
        if !self.is_active || frames == 0 {
            return false;
        }
        if !self.is_processing && self.start_processing().is_err() {
            return false;
        }
        let frames = frames.min(self.max_frames as usize).min(buffer.len() / 2);

        for i in 0..frames {
            self.input_data[0][i] = buffer[i * 2];
            self.input_data[1][i] = buffer[i * 2 + 1];
            self.output_data[0][i] = 0.0;
            self.output_data[1][i] = 0.0;
        }

        self.input_ptrs.clear();
        self.output_ptrs.clear();
        for ch in &mut self.input_data {
            self.input_ptrs.push(ch.as_mut_ptr());
        }
        for ch in &mut self.output_data {
            self.output_ptrs.push(ch.as_mut_ptr());
        }

        let input_buffer = ClapAudioBuffer {
            data32: self.input_ptrs.as_mut_ptr(),
            data64: ptr::null_mut(),
            channel_count: 2,
            latency: 0,
            constant_mask: 0,
        };
        let mut output_buffer = ClapAudioBuffer {
            data32: self.output_ptrs.as_mut_ptr(),
            data64: ptr::null_mut(),
            channel_count: 2,
            latency: 0,
            constant_mask: 0,
        };
        let in_events = ClapInputEvents::empty();
        let out_events = ClapOutputEvents::empty();

        let process = ClapProcess {
            steady_time: -1,
            frames_count: frames as u32,
            transport: ptr::null(),
            audio_inputs: &input_buffer,
            audio_outputs: &mut output_buffer,
            audio_inputs_count: 1,
            audio_outputs_count: 1,
            in_events: &in_events,
            out_events: &out_events,
        };

        let plugin_ref = unsafe { &*self.plugin };
        let Some(process_fn) = plugin_ref.process else {
            return false;
        };
        let status = unsafe { process_fn(self.plugin, &process) };
        if status == CLAP_PROCESS_ERROR {
            return false;
        }

        for i in 0..frames {
            buffer[i * 2] = self.output_data[0][i];
            buffer[i * 2 + 1] = self.output_data[1][i];
        }
        true
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        log::info!("Unloading plugin {}", self.name);

        self.close_editor_window();
        self.stop_processing();

        let plugin_ref = unsafe { &*self.plugin };
        if self.is_active {
            if let Some(deactivate) = plugin_ref.deactivate {
                unsafe { deactivate(self.plugin) };
            }
            self.is_active = false;
        }
        if let Some(destroy) = plugin_ref.destroy {
            unsafe { destroy(self.plugin) };
        }
        let entry_ref = unsafe { &*self.entry };
        if let Some(deinit) = entry_ref.deinit {
            unsafe { deinit() };
        }
    }
}

fn read_cstr(ptr: *const std::os::raw::c_char, fallback: &str) -> String {
    if ptr.is_null() {
        fallback.to_string()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

/// Locate the shared library inside a module path. On macOS a `.clap` is an
/// app-style bundle; elsewhere it is the library itself.
pub fn resolve_dylib_path(module_path: &Path) -> Option<PathBuf> {
    if module_path.is_file() {
        return Some(module_path.to_path_buf());
    }
    let macos_dir = module_path.join("Contents").join("MacOS");
    let stem = module_path.file_stem()?.to_string_lossy();
    let named = macos_dir.join(stem.as_ref());
    if named.exists() {
        return Some(named);
    }
    // Bundle whose binary name differs from the bundle name
    if let Ok(entries) = std::fs::read_dir(&macos_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension().is_none() {
                return Some(path);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Host callbacks
// ---------------------------------------------------------------------------

static HOST_PARAMS: ClapHostParams = ClapHostParams {
    rescan: Some(host_params_rescan),
    clear: Some(host_params_clear),
    request_flush: Some(host_params_request_flush),
};

unsafe extern "C" fn host_get_extension(
    _host: *const ClapHost,
    extension_id: *const std::os::raw::c_char,
) -> *const std::ffi::c_void {
    if extension_id.is_null() {
        return ptr::null();
    }
    if CStr::from_ptr(extension_id).to_bytes_with_nul() == CLAP_EXT_PARAMS {
        return &HOST_PARAMS as *const ClapHostParams as *const _;
    }
    ptr::null()
}

unsafe extern "C" fn host_params_rescan(_host: *const ClapHost, _flags: u32) {
    log::debug!("Plugin requested param rescan");
}

unsafe extern "C" fn host_params_clear(_host: *const ClapHost, _param_id: u32, _flags: u32) {
    log::debug!("Plugin requested param clear");
}

unsafe extern "C" fn host_params_request_flush(_host: *const ClapHost) {
    // Parameters are picked up by the next process() or flush_params() call
    log::debug!("Plugin requested param flush");
}

unsafe extern "C" fn host_request_restart(_host: *const ClapHost) {
    log::debug!("Plugin requested restart");
}

unsafe extern "C" fn host_request_process(_host: *const ClapHost) {
    log::debug!("Plugin requested process");
}

unsafe extern "C" fn host_request_callback(_host: *const ClapHost) {
    CALLBACK_REQUESTED.store(true, Ordering::SeqCst);
}

// ---------------------------------------------------------------------------
// Chain-level host
// ---------------------------------------------------------------------------

/// Control-side owner of the plugin chain. Mutations are serialized by an
/// internal lock and become visible to the render thread only as complete
/// snapshots.
pub struct PluginHost {
    shared: Arc<EngineShared>,
    editors: Arc<EditorWindows>,
    ids: IdAllocator,
    mutation: Mutex<()>,
}

impl PluginHost {
    pub fn new(shared: Arc<EngineShared>, editors: Arc<EditorWindows>) -> Self {
        Self {
            shared,
            editors,
            ids: IdAllocator::new(),
            mutation: Mutex::new(()),
        }
    }

    /// Load a module, append it to the end of the chain enabled and
    /// non-bypassed, and return its id and display name. A failed load
    /// creates no instance and consumes no id.
    pub fn load_plugin(&self, path: &Path) -> Result<LoadedPlugin, EngineError> {
        if !self.shared.is_running() {
            return Err(EngineError::EngineStopped);
        }
        let _guard = self.mutation.lock();

        let sample_rate = self.shared.sample_rate() as f64;
        let (state_tx, state_rx) = mpsc::channel();
        let mut instance = PluginInstance::load(path, sample_rate, MAX_BLOCK_FRAMES, state_rx)?;
        if let Err(e) = instance.start_processing() {
            log::warn!("{} refused to start processing: {}", instance.name, e);
        }

        let id = self.ids.allocate();
        let name = instance.name.clone();
        let slot = Arc::new(ChainSlot::new(
            id,
            name.clone(),
            path.to_path_buf(),
            Box::new(instance),
            state_tx,
        ));

        let current = self.shared.chain.load_full();
        self.shared
            .chain
            .store(Arc::new(current.with_appended(slot)));

        log::info!("Loaded {} as instance {}", name, id.0);
        Ok(LoadedPlugin { id: id.0, name })
    }

    /// Remove an instance. The shrunken chain is published first; the
    /// instance is destroyed only after the render thread has moved past
    /// the publication point, so FFI teardown never races a callback.
    pub fn remove_plugin(&self, id: InstanceId) -> Result<(), EngineError> {
        if !self.shared.is_running() {
            return Err(EngineError::EngineStopped);
        }
        let _guard = self.mutation.lock();

        let current = self.shared.chain.load_full();
        if current.find(id).is_none() {
            return Err(EngineError::NotFound);
        }

        self.editors.close(id);

        let old = self.shared.chain.swap(Arc::new(current.without(id)));
        drop(current);
        self.shared.await_render_quiescent();
        drop(old);

        log::info!("Removed instance {}", id.0);
        Ok(())
    }

    pub fn set_enabled(&self, id: InstanceId, enabled: bool) -> Result<(), EngineError> {
        if !self.shared.is_running() {
            return Err(EngineError::EngineStopped);
        }
        let chain = self.shared.chain.load();
        let slot = chain.find(id).ok_or(EngineError::NotFound)?;
        slot.set_enabled(enabled);
        Ok(())
    }

    pub fn set_bypass(&self, id: InstanceId, bypassed: bool) -> Result<(), EngineError> {
        if !self.shared.is_running() {
            return Err(EngineError::EngineStopped);
        }
        let chain = self.shared.chain.load();
        let slot = chain.find(id).ok_or(EngineError::NotFound)?;
        slot.set_bypassed(bypassed);
        Ok(())
    }

    /// Current instances as {id, name} in chain order
    pub fn list_loaded(&self) -> Vec<LoadedPlugin> {
        self.shared.chain.load().infos()
    }

    /// Module path backing an instance, for the editor manager
    pub fn module_path(&self, id: InstanceId) -> Option<PathBuf> {
        self.shared.chain.load().find(id).map(|s| s.path.clone())
    }

    /// Editor state sender for an instance
    pub fn editor_state_sender(&self, id: InstanceId) -> Option<mpsc::Sender<Vec<u8>>> {
        self.shared
            .chain
            .load()
            .find(id)
            .map(|s| s.editor_state_sender())
    }
}

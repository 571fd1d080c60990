//! Native window glue for plugin editors
//!
//! Creates the platform window a plugin GUI embeds into. On macOS this is an
//! NSWindow whose content view is handed to the plugin via the CLAP gui
//! extension; AppKit requires all of it to happen on the main thread, so
//! every entry point dispatches there when called from elsewhere.

use std::ffi::c_void;

use super::clap_abi::{ClapPlugin, ClapPluginGui, ClapWindow, CLAP_EXT_GUI};

#[cfg(target_os = "macos")]
use super::clap_abi::CLAP_WINDOW_API;

/// Fetch the plugin's gui extension, if it exposes one
pub unsafe fn gui_extension(plugin: *const ClapPlugin) -> Option<*const ClapPluginGui> {
    let get_extension = (*plugin).get_extension?;
    let gui = get_extension(plugin, CLAP_EXT_GUI.as_ptr() as *const _);
    (!gui.is_null()).then_some(gui as *const ClapPluginGui)
}

/// Preferred GUI size, if the plugin reports one
pub unsafe fn gui_size(plugin: *const ClapPlugin) -> Option<(u32, u32)> {
    let gui = gui_extension(plugin)?;
    let get_size = (*gui).get_size?;
    let mut width = 0u32;
    let mut height = 0u32;
    get_size(plugin, &mut width, &mut height).then_some((width, height))
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use objc2::rc::{autoreleasepool, Retained};
    use objc2::{MainThreadMarker, MainThreadOnly};
    use objc2_app_kit::{
        NSApplication, NSApplicationActivationPolicy, NSBackingStoreType, NSColor, NSWindow,
        NSWindowStyleMask,
    };
    use objc2_foundation::{NSPoint, NSRect, NSSize, NSString, NSThread};

    // Grand Central Dispatch, for hopping onto the main thread
    #[repr(C)]
    struct DispatchQueueS {
        _private: [u8; 0],
    }
    type DispatchQueueT = *mut DispatchQueueS;

    #[link(name = "System", kind = "dylib")]
    extern "C" {
        static _dispatch_main_q: DispatchQueueS;
        fn dispatch_sync_f(
            queue: DispatchQueueT,
            context: *mut c_void,
            work: extern "C" fn(*mut c_void),
        );
    }

    fn main_queue() -> DispatchQueueT {
        unsafe { &_dispatch_main_q as *const _ as DispatchQueueT }
    }

    pub fn is_main_thread() -> bool {
        NSThread::isMainThread_class()
    }

    struct CreateContext {
        plugin: *const ClapPlugin,
        title: String,
        position: Option<(f64, f64)>,
        result: Option<Result<(*mut c_void, *mut c_void), String>>,
    }

    unsafe impl Send for CreateContext {}

    extern "C" fn create_on_main(context: *mut c_void) {
        autoreleasepool(|_pool| {
            let ctx = unsafe { &mut *(context as *mut CreateContext) };
            ctx.result =
                Some(unsafe { create_window_inner(ctx.plugin, &ctx.title, ctx.position) });
        });
    }

    /// Create the editor window, centered when `position` is `None`.
    /// Returns the retained window pointer and its content view.
    pub unsafe fn create_editor_window_at(
        plugin: *const ClapPlugin,
        title: &str,
        position: Option<(f64, f64)>,
    ) -> Result<(*mut c_void, *mut c_void), String> {
        if is_main_thread() {
            return create_window_inner(plugin, title, position);
        }
        let mut ctx = CreateContext {
            plugin,
            title: title.to_string(),
            position,
            result: None,
        };
        dispatch_sync_f(
            main_queue(),
            &mut ctx as *mut CreateContext as *mut c_void,
            create_on_main,
        );
        ctx.result
            .unwrap_or_else(|| Err("main thread dispatch failed".to_string()))
    }

    unsafe fn create_window_inner(
        plugin: *const ClapPlugin,
        title: &str,
        position: Option<(f64, f64)>,
    ) -> Result<(*mut c_void, *mut c_void), String> {
        let gui = gui_extension(plugin).ok_or("plugin has no gui extension")?;

        let supported = (*gui)
            .is_api_supported
            .map(|f| f(plugin, CLAP_WINDOW_API.as_ptr() as *const _, false))
            .unwrap_or(false);
        if !supported {
            return Err("plugin does not support the platform gui API".to_string());
        }

        let create = (*gui).create.ok_or("plugin gui has no create")?;
        if !create(plugin, CLAP_WINDOW_API.as_ptr() as *const _, false) {
            return Err("plugin gui create() failed".to_string());
        }

        let (width, height) = gui_size(plugin).unwrap_or((800, 600));
        log::info!("Creating editor window {}x{} for {:?}", width, height, title);

        let mtm = MainThreadMarker::new().ok_or("not on main thread")?;
        let frame = NSRect::new(
            NSPoint::new(100.0, 100.0),
            NSSize::new(width as f64, height as f64),
        );
        let style = NSWindowStyleMask::Titled
            | NSWindowStyleMask::Closable
            | NSWindowStyleMask::Miniaturizable;
        let window = NSWindow::initWithContentRect_styleMask_backing_defer(
            NSWindow::alloc(mtm),
            frame,
            style,
            NSBackingStoreType::Buffered,
            false,
        );

        // A programmatically created NSWindow self-releases on close unless
        // told otherwise; we manage its lifetime through Retained
        window.setReleasedWhenClosed(false);

        let content_view = window.contentView().ok_or("window has no content view")?;
        let content_view_ptr = Retained::as_ptr(&content_view) as *mut c_void;

        window.setOpaque(true);
        window.setBackgroundColor(Some(&NSColor::windowBackgroundColor()));
        window.setTitle(&NSString::from_str(title));

        let clap_window = ClapWindow::with_native(content_view_ptr);
        let set_parent = (*gui).set_parent.ok_or("plugin gui has no set_parent")?;
        if !set_parent(plugin, &clap_window) {
            window.close();
            if let Some(destroy) = (*gui).destroy {
                destroy(plugin);
            }
            return Err("plugin rejected the parent window".to_string());
        }

        if let Some(show) = (*gui).show {
            show(plugin);
        }

        let app = NSApplication::sharedApplication(mtm);
        app.setActivationPolicy(NSApplicationActivationPolicy::Regular);
        #[allow(deprecated)]
        app.activateIgnoringOtherApps(true);

        match position {
            Some((x, y)) => window.setFrameOrigin(NSPoint::new(x, y)),
            None => window.center(),
        }
        window.makeKeyAndOrderFront(None);
        window.orderFrontRegardless();

        let window_ptr = Retained::into_raw(window) as *mut c_void;
        Ok((window_ptr, content_view_ptr))
    }

    struct DestroyContext {
        plugin: *const ClapPlugin,
        window: *mut c_void,
    }

    unsafe impl Send for DestroyContext {}

    extern "C" fn destroy_on_main(context: *mut c_void) {
        autoreleasepool(|_pool| {
            let ctx = unsafe { &*(context as *const DestroyContext) };
            unsafe { destroy_window_inner(ctx.plugin, ctx.window) };
        });
    }

    /// Tear down the editor window. Call at most once per window; the
    /// pointer is invalid afterwards.
    pub unsafe fn destroy_editor_window(plugin: *const ClapPlugin, window: *mut c_void) {
        if is_main_thread() {
            destroy_window_inner(plugin, window);
        } else {
            let ctx = DestroyContext { plugin, window };
            dispatch_sync_f(
                main_queue(),
                &ctx as *const DestroyContext as *mut c_void,
                destroy_on_main,
            );
        }
    }

    unsafe fn destroy_window_inner(plugin: *const ClapPlugin, window: *mut c_void) {
        // Teardown order required by the gui extension: hide, unparent,
        // destroy — only then may the native window go away
        if let Some(gui) = gui_extension(plugin) {
            if let Some(hide) = (*gui).hide {
                hide(plugin);
            }
            if let Some(set_parent) = (*gui).set_parent {
                let detached = ClapWindow::detached();
                let _ = set_parent(plugin, &detached);
            }
            if let Some(destroy) = (*gui).destroy {
                destroy(plugin);
            }
        }

        if window.is_null() {
            log::warn!("Editor window pointer was already null");
            return;
        }
        let window: Retained<NSWindow> =
            Retained::from_raw(window as *mut NSWindow).expect("retained window pointer");
        if window.isVisible() {
            window.close();
        }
    }

    pub unsafe fn get_window_position(window: *mut c_void) -> Option<(f64, f64)> {
        if window.is_null() {
            return None;
        }
        let window_ref = &*(window as *const NSWindow);
        let frame = window_ref.frame();
        Some((frame.origin.x, frame.origin.y))
    }

    struct VisibleContext {
        window: *mut c_void,
        result: bool,
    }

    extern "C" fn visible_on_main(ctx: *mut c_void) {
        let ctx = unsafe { &mut *(ctx as *mut VisibleContext) };
        if ctx.window.is_null() {
            ctx.result = false;
            return;
        }
        unsafe {
            let window_ref = &*(ctx.window as *const NSWindow);
            // Miniaturized still counts as open; only an actual close ends it
            ctx.result = window_ref.isVisible() || window_ref.isMiniaturized();
        }
    }

    /// Whether the window is on screen or minimized to the dock
    pub fn is_window_visible(window: *mut c_void) -> bool {
        if window.is_null() {
            return false;
        }
        if is_main_thread() {
            unsafe {
                let window_ref = &*(window as *const NSWindow);
                window_ref.isVisible() || window_ref.isMiniaturized()
            }
        } else {
            let mut ctx = VisibleContext {
                window,
                result: false,
            };
            unsafe {
                dispatch_sync_f(
                    main_queue(),
                    &mut ctx as *mut VisibleContext as *mut c_void,
                    visible_on_main,
                );
            }
            ctx.result
        }
    }

    struct RestoreContext {
        window: *mut c_void,
    }

    extern "C" fn restore_on_main(ctx: *mut c_void) {
        let ctx = unsafe { &*(ctx as *mut RestoreContext) };
        if ctx.window.is_null() {
            return;
        }
        unsafe {
            let window_ref = &*(ctx.window as *const NSWindow);
            if window_ref.isMiniaturized() {
                window_ref.deminiaturize(None);
            }
            window_ref.makeKeyAndOrderFront(None);
        }
    }

    /// Deminiaturize if needed and bring the window to the front
    pub fn restore_window(window: *mut c_void) {
        if window.is_null() {
            return;
        }
        if is_main_thread() {
            unsafe {
                let window_ref = &*(window as *const NSWindow);
                if window_ref.isMiniaturized() {
                    window_ref.deminiaturize(None);
                }
                window_ref.makeKeyAndOrderFront(None);
            }
        } else {
            let mut ctx = RestoreContext { window };
            unsafe {
                dispatch_sync_f(
                    main_queue(),
                    &mut ctx as *mut RestoreContext as *mut c_void,
                    restore_on_main,
                );
            }
        }
    }
}

#[cfg(target_os = "macos")]
pub use macos::*;

// Stubs for platforms without editor window support yet
#[cfg(not(target_os = "macos"))]
pub unsafe fn create_editor_window_at(
    _plugin: *const ClapPlugin,
    _title: &str,
    _position: Option<(f64, f64)>,
) -> Result<(*mut c_void, *mut c_void), String> {
    Err("plugin GUI not supported on this platform".to_string())
}

#[cfg(not(target_os = "macos"))]
pub unsafe fn destroy_editor_window(_plugin: *const ClapPlugin, _window: *mut c_void) {}

#[cfg(not(target_os = "macos"))]
pub unsafe fn get_window_position(_window: *mut c_void) -> Option<(f64, f64)> {
    None
}

#[cfg(not(target_os = "macos"))]
pub fn is_window_visible(_window: *mut c_void) -> bool {
    false
}

#[cfg(not(target_os = "macos"))]
pub fn restore_window(_window: *mut c_void) {}

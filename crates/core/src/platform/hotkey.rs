use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Human-readable name of the global stop hotkey on this platform.
#[cfg(target_os = "windows")]
pub const HOTKEY_LABEL: &str = "Ctrl+Shift+K";
#[cfg(not(target_os = "windows"))]
pub const HOTKEY_LABEL: &str = "(unavailable)";

/// Start a background thread that listens for the global stop hotkey Ctrl+Shift+K.
/// Sets `flag` to `true` every time the hotkey is pressed; the consumer clears it.
#[cfg(target_os = "windows")]
pub fn start_hotkey_listener(flag: Arc<AtomicBool>) {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        RegisterHotKey, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT,
    };
    use windows::Win32::UI::WindowsAndMessaging::{GetMessageW, MSG, WM_HOTKEY};

    const VK_K: u32 = 0x4B;
    const HOTKEY_ID: i32 = 1;

    std::thread::spawn(move || {
        unsafe {
            // the hotkey binds to this thread's message queue
            if let Err(e) = RegisterHotKey(
                HWND::default(),
                HOTKEY_ID,
                MOD_CONTROL | MOD_SHIFT | MOD_NOREPEAT,
                VK_K,
            ) {
                crate::logger::error(&format!(
                    "failed to register global hotkey {}: {} (another application may own it)",
                    HOTKEY_LABEL, e
                ));
                return;
            }

            crate::logger::info(&format!("global stop hotkey {} registered", HOTKEY_LABEL));

            let mut msg = MSG::default();
            // GetMessageW blocks until a message arrives; returns 0 on WM_QUIT
            while GetMessageW(&mut msg, HWND::default(), 0, 0).0 > 0 {
                if msg.message == WM_HOTKEY && msg.wParam.0 == HOTKEY_ID as usize {
                    flag.store(true, Ordering::Release);
                }
            }
        }
    });
}

#[cfg(not(target_os = "windows"))]
pub fn start_hotkey_listener(_flag: Arc<AtomicBool>) {
    // Global hotkeys not supported on this platform
}

/// Read and clear the hotkey flag.
pub fn take_pressed(flag: &AtomicBool) -> bool {
    flag.swap(false, Ordering::AcqRel)
}

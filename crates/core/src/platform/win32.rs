use std::ffi::c_void;
use std::mem::size_of;

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{HWND, LPARAM, POINT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, ScreenToClient, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS,
    HBITMAP, HDC, HGDIOBJ, SRCCOPY,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_MOUSE, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEINPUT,
};
use windows::Win32::UI::WindowsAndMessaging::{
    FindWindowW, GetCursorPos, GetForegroundWindow, GetSystemMetrics, GetWindowRect, IsIconic,
    IsWindowVisible, PostMessageW, SendMessageW, SetCursorPos, SetForegroundWindow, ShowWindow,
    SM_CXSCREEN, SM_CYSCREEN, SW_RESTORE, WM_LBUTTONDOWN, WM_LBUTTONUP,
};

use crate::types::*;
use super::Platform;

// wParam key-state flag for a held left button
const MK_LBUTTON: usize = 0x0001;

fn hwnd(id: WindowId) -> HWND {
    HWND(id as usize as *mut c_void)
}

fn window_id(h: HWND) -> WindowId {
    h.0 as usize as WindowId
}

/// Pack client coordinates into a mouse-message lParam (low word x, high word y).
fn point_lparam(p: Point) -> LPARAM {
    let packed = ((p.y as u16 as u32) << 16) | (p.x as u16 as u32);
    LPARAM(packed as isize)
}

fn button_message(action: ButtonAction) -> (u32, WPARAM) {
    match action {
        ButtonAction::Down => (WM_LBUTTONDOWN, WPARAM(MK_LBUTTON)),
        ButtonAction::Up => (WM_LBUTTONUP, WPARAM(0)),
    }
}

/// GDI objects acquired for one screen grab, released on drop.
struct GdiCapture {
    screen_dc: HDC,
    mem_dc: HDC,
    bitmap: HBITMAP,
    previous: HGDIOBJ,
}

impl Drop for GdiCapture {
    fn drop(&mut self) {
        unsafe {
            if !self.previous.is_invalid() {
                let _ = SelectObject(self.mem_dc, self.previous);
            }
            if !self.bitmap.is_invalid() {
                let _ = DeleteObject(HGDIOBJ(self.bitmap.0));
            }
            if !self.mem_dc.is_invalid() {
                let _ = DeleteDC(self.mem_dc);
            }
            let _ = ReleaseDC(HWND::default(), self.screen_dc);
        }
    }
}

pub struct Win32Platform;

impl Win32Platform {
    pub fn new() -> Self {
        Win32Platform
    }
}

impl Default for Win32Platform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for Win32Platform {
    fn find_window(&self, title: &str) -> Result<Option<WindowId>> {
        let wide: Vec<u16> = title.encode_utf16().chain(std::iter::once(0)).collect();
        // FindWindowW reports "no such window" as an error; both mean not found here
        let found = unsafe { FindWindowW(PCWSTR::null(), PCWSTR(wide.as_ptr())) };
        Ok(match found {
            Ok(h) if !h.is_invalid() => Some(window_id(h)),
            _ => None,
        })
    }

    fn is_visible(&self, id: WindowId) -> Result<bool> {
        Ok(unsafe { IsWindowVisible(hwnd(id)) }.as_bool())
    }

    fn is_minimized(&self, id: WindowId) -> Result<bool> {
        Ok(unsafe { IsIconic(hwnd(id)) }.as_bool())
    }

    fn foreground_window(&self) -> Result<Option<WindowId>> {
        let h = unsafe { GetForegroundWindow() };
        Ok((!h.is_invalid()).then(|| window_id(h)))
    }

    fn window_rect(&self, id: WindowId) -> Result<Region> {
        let mut rect = RECT::default();
        unsafe { GetWindowRect(hwnd(id), &mut rect) }
            .with_context(|| format!("GetWindowRect({:#x})", id))?;
        Ok(Region::from_ltrb(rect.left, rect.top, rect.right, rect.bottom))
    }

    fn restore_window(&self, id: WindowId) -> Result<()> {
        // return value is the previous visibility, not a status
        let _ = unsafe { ShowWindow(hwnd(id), SW_RESTORE) };
        Ok(())
    }

    fn set_foreground(&self, id: WindowId) -> Result<()> {
        if !unsafe { SetForegroundWindow(hwnd(id)) }.as_bool() {
            bail!("SetForegroundWindow({:#x}) was refused", id);
        }
        Ok(())
    }

    fn screen_to_client(&self, id: WindowId, p: Point) -> Result<Point> {
        let mut pt = POINT { x: p.x, y: p.y };
        if !unsafe { ScreenToClient(hwnd(id), &mut pt) }.as_bool() {
            bail!("ScreenToClient({:#x}) failed", id);
        }
        Ok(Point::new(pt.x, pt.y))
    }

    fn cursor_pos(&self) -> Result<Point> {
        let mut pt = POINT::default();
        unsafe { GetCursorPos(&mut pt) }.context("GetCursorPos")?;
        Ok(Point::new(pt.x, pt.y))
    }

    fn set_cursor_pos(&self, p: Point) -> Result<()> {
        unsafe { SetCursorPos(p.x, p.y) }
            .with_context(|| format!("SetCursorPos({}, {})", p.x, p.y))
    }

    fn mouse_button(&self, action: ButtonAction) -> Result<()> {
        let flags = match action {
            ButtonAction::Down => MOUSEEVENTF_LEFTDOWN,
            ButtonAction::Up => MOUSEEVENTF_LEFTUP,
        };
        let input = INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx: 0,
                    dy: 0,
                    mouseData: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        };
        let sent = unsafe { SendInput(&[input], size_of::<INPUT>() as i32) };
        if sent != 1 {
            bail!("SendInput rejected the {:?} event", action);
        }
        Ok(())
    }

    fn send_button(&self, id: WindowId, client: Point, action: ButtonAction) -> Result<()> {
        let (msg, wparam) = button_message(action);
        unsafe { SendMessageW(hwnd(id), msg, wparam, point_lparam(client)) };
        Ok(())
    }

    fn post_button(&self, id: WindowId, client: Point, action: ButtonAction) -> Result<()> {
        let (msg, wparam) = button_message(action);
        unsafe { PostMessageW(hwnd(id), msg, wparam, point_lparam(client)) }
            .with_context(|| format!("PostMessageW({:#x}, {:?})", id, action))
    }

    fn capture_screen(&self) -> Result<RgbImage> {
        let width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
        let height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
        if width <= 0 || height <= 0 {
            bail!("screen has no size ({}x{})", width, height);
        }

        let bgra = unsafe {
            let screen_dc = GetDC(HWND::default());
            if screen_dc.is_invalid() {
                bail!("GetDC(screen) failed");
            }
            let mut gdi = GdiCapture {
                screen_dc,
                mem_dc: HDC::default(),
                bitmap: HBITMAP::default(),
                previous: HGDIOBJ::default(),
            };
            gdi.mem_dc = CreateCompatibleDC(screen_dc);
            if gdi.mem_dc.is_invalid() {
                bail!("CreateCompatibleDC failed");
            }
            gdi.bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            if gdi.bitmap.is_invalid() {
                bail!("CreateCompatibleBitmap({}x{}) failed", width, height);
            }
            gdi.previous = SelectObject(gdi.mem_dc, HGDIOBJ(gdi.bitmap.0));

            BitBlt(gdi.mem_dc, 0, 0, width, height, screen_dc, 0, 0, SRCCOPY).context("BitBlt")?;

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    // negative height asks for top-down rows
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let mut buf = vec![0u8; width as usize * height as usize * 4];
            let lines = GetDIBits(
                gdi.mem_dc,
                gdi.bitmap,
                0,
                height as u32,
                Some(buf.as_mut_ptr() as *mut c_void),
                &mut info,
                DIB_RGB_COLORS,
            );
            if lines != height {
                return Err(anyhow!("GetDIBits copied {} of {} rows", lines, height));
            }
            buf
        };

        let rgb: Vec<u8> = bgra
            .chunks_exact(4)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect();
        RgbImage::from_raw(width as u32, height as u32, rgb)
            .ok_or_else(|| anyhow!("capture buffer does not fit {}x{}", width, height))
    }
}

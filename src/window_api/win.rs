use std::path::Path;

use anyhow::Result;
use tracing::{debug, instrument};
use windows::{
    core::PWSTR,
    Win32::{
        Foundation::{CloseHandle, BOOL, HANDLE, HWND},
        System::Threading::{
            OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
            PROCESS_QUERY_LIMITED_INFORMATION,
        },
        UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId},
    },
};

use super::{resolve_app_name, ActiveWindowData, WindowManager};

#[instrument]
pub fn get_active() -> Result<Option<ActiveWindowData>> {
    let window = unsafe { GetForegroundWindow() };

    if window.is_invalid() {
        return Ok(None);
    }

    let mut text: [u16; 4096] = [0; 4096];
    let title = unsafe { get_window_title(window, &mut text) };

    let mut id = 0u32;
    unsafe { GetWindowThreadProcessId(window, Some(&mut id)) };
    let process_name = if id == 0 {
        None
    } else {
        match unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, BOOL::from(false), id) } {
            Ok(process_handle) => {
                let path = unsafe { get_window_process_path(process_handle, &mut text) };
                let _ = unsafe { CloseHandle(process_handle) };
                path.inspect_err(|e| debug!("Failed to get window process path {e:?}"))
                    .ok()
                    .and_then(|path| {
                        Path::new(&path)
                            .file_stem()
                            .map(|v| v.to_string_lossy().into_owned())
                    })
            }
            Err(e) => {
                debug!("Failed to open process {e:?}");
                None
            }
        }
    };

    let Some(app_name) = resolve_app_name(process_name.as_deref(), None, Some(&title)) else {
        return Ok(None);
    };

    Ok(Some(ActiveWindowData {
        app_name: app_name.into(),
        window_title: title.into(),
    }))
}

unsafe fn get_window_process_path(process_handle: HANDLE, text: &mut [u16]) -> Result<String> {
    unsafe {
        let mut length = text.len() as u32;
        QueryFullProcessImageNameW(
            process_handle,
            PROCESS_NAME_WIN32,
            PWSTR(text.as_mut_ptr()),
            &mut length,
        )?;
        Ok(String::from_utf16_lossy(&text[..length as usize]))
    }
}

unsafe fn get_window_title(window_handle: HWND, text: &mut [u16]) -> String {
    let len = unsafe { GetWindowTextW(window_handle, text) };
    String::from_utf16_lossy(&text[..len.max(0) as usize])
}

pub struct WindowsWindowManager {}

impl WindowsWindowManager {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WindowsWindowManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowManager for WindowsWindowManager {
    fn get_active_window_data(&mut self) -> Result<Option<ActiveWindowData>> {
        get_active()
    }
}

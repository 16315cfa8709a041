//! Call-window signal for clients whose audio session stays active for the
//! whole lifetime of the chat window.

use tracing::debug;

pub trait WindowInspector {
    /// Titles of all visible top-level windows owned by `pid`.
    fn visible_window_titles(&mut self, pid: u32) -> Vec<String>;
}

/// A call panel is any visible, titled window whose title does not start
/// with the client's main-window prefix.
pub fn has_call_window(titles: &[String], main_title_prefix: &str) -> bool {
    let prefix = main_title_prefix.to_lowercase();
    titles
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .any(|t| !t.to_lowercase().starts_with(&prefix))
}

/// Inspect `pid`'s windows and log what was seen.
pub fn call_window_present(
    inspector: &mut dyn WindowInspector,
    pid: u32,
    main_title_prefix: &str,
) -> bool {
    let titles = inspector.visible_window_titles(pid);
    if titles.is_empty() {
        debug!("PID={} no visible windows", pid);
        return false;
    }

    let present = has_call_window(&titles, main_title_prefix);
    debug!(
        "PID={} windows={:?} call_window={}",
        pid, titles, present
    );
    present
}

#[cfg(windows)]
pub use self::platform::TopLevelWindowInspector;

#[cfg(windows)]
mod platform {
    use super::WindowInspector;
    use windows::Win32::Foundation::{BOOL, HWND, LPARAM};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
    };

    struct EnumState {
        target_pid: u32,
        titles: Vec<String>,
    }

    #[derive(Default)]
    pub struct TopLevelWindowInspector;

    impl WindowInspector for TopLevelWindowInspector {
        fn visible_window_titles(&mut self, pid: u32) -> Vec<String> {
            let mut state = EnumState {
                target_pid: pid,
                titles: Vec::new(),
            };
            unsafe {
                let _ = EnumWindows(
                    Some(enum_windows_callback),
                    LPARAM(&mut state as *mut EnumState as isize),
                );
            }
            state.titles
        }
    }

    unsafe extern "system" fn enum_windows_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let state = &mut *(lparam.0 as *mut EnumState);

        let mut window_pid: u32 = 0;
        GetWindowThreadProcessId(hwnd, Some(&mut window_pid));
        if window_pid != state.target_pid {
            return BOOL(1);
        }

        if !IsWindowVisible(hwnd).as_bool() {
            return BOOL(1);
        }

        let mut title_buf = [0u16; 512];
        let len = GetWindowTextW(hwnd, &mut title_buf);
        if len > 0 {
            state
                .titles
                .push(String::from_utf16_lossy(&title_buf[..len as usize]));
        }

        BOOL(1)
    }
}

/// Window enumeration is only wired up on Windows; elsewhere no call panel
/// is ever observed.
#[cfg(not(windows))]
#[derive(Default)]
pub struct TopLevelWindowInspector;

#[cfg(not(windows))]
impl WindowInspector for TopLevelWindowInspector {
    fn visible_window_titles(&mut self, _pid: u32) -> Vec<String> {
        Vec::new()
    }
}

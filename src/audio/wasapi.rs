//! WASAPI session enumeration.
//!
//! Must be created and used on the controller thread: it initializes COM for
//! that thread and keeps thread-affine interface pointers cached.

use super::session_directory::{
    DeviceSessions, DirectoryError, SessionBackend, SessionSample, SessionState,
};
use std::ffi::c_void;
use tracing::debug;
use windows::core::Interface;
use windows::Win32::Media::Audio::{
    eConsole, eRender, AudioSessionStateActive, AudioSessionStateExpired,
    AudioSessionStateInactive, IAudioSessionControl, IAudioSessionControl2,
    IAudioSessionManager2, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator,
    DEVICE_STATE_ACTIVE,
};
use windows::Win32::Media::Audio::Endpoints::IAudioMeterInformation;
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED,
};

pub struct WasapiSessionBackend {
    enumerator: Option<IMMDeviceEnumerator>,
    default_manager: Option<IAudioSessionManager2>,
    com_initialized: bool,
}

impl WasapiSessionBackend {
    pub fn new() -> Self {
        let com_initialized = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED).is_ok() };
        Self {
            enumerator: None,
            default_manager: None,
            com_initialized,
        }
    }

    fn enumerator(&mut self) -> Result<IMMDeviceEnumerator, DirectoryError> {
        if let Some(enumerator) = &self.enumerator {
            return Ok(enumerator.clone());
        }
        let enumerator: IMMDeviceEnumerator =
            unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
                .map_err(|e| DirectoryError::Unavailable(format!("IMMDeviceEnumerator: {e}")))?;
        self.enumerator = Some(enumerator.clone());
        Ok(enumerator)
    }

    fn default_manager(&mut self) -> Result<IAudioSessionManager2, DirectoryError> {
        if let Some(manager) = &self.default_manager {
            return Ok(manager.clone());
        }
        let enumerator = self.enumerator()?;
        let device = unsafe { enumerator.GetDefaultAudioEndpoint(eRender, eConsole) }
            .map_err(|e| DirectoryError::Unavailable(format!("default render endpoint: {e}")))?;
        let manager = session_manager(&device)?;
        self.default_manager = Some(manager.clone());
        Ok(manager)
    }
}

impl Default for WasapiSessionBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn session_manager(device: &IMMDevice) -> Result<IAudioSessionManager2, DirectoryError> {
    unsafe { device.Activate::<IAudioSessionManager2>(CLSCTX_ALL, None) }
        .map_err(|e| DirectoryError::Unavailable(format!("IAudioSessionManager2: {e}")))
}

fn read_session(control: &IAudioSessionControl) -> Option<SessionSample> {
    let control2: IAudioSessionControl2 = control.cast().ok()?;
    let pid = unsafe { control2.GetProcessId() }.ok()?;

    let peak = control
        .cast::<IAudioMeterInformation>()
        .ok()
        .and_then(|meter| unsafe { meter.GetPeakValue() }.ok())
        .unwrap_or(0.0);

    let state = match unsafe { control.GetState() } {
        Ok(s) if s == AudioSessionStateActive => Some(SessionState::Active),
        Ok(s) if s == AudioSessionStateInactive => Some(SessionState::Inactive),
        Ok(s) if s == AudioSessionStateExpired => Some(SessionState::Expired),
        _ => None,
    };

    Some(SessionSample { pid, peak, state })
}

fn list_sessions(manager: &IAudioSessionManager2) -> Result<Vec<SessionSample>, DirectoryError> {
    let sessions = unsafe { manager.GetSessionEnumerator() }
        .map_err(|e| DirectoryError::Query(format!("GetSessionEnumerator: {e}")))?;
    let count = unsafe { sessions.GetCount() }
        .map_err(|e| DirectoryError::Query(format!("GetCount: {e}")))?;

    let mut samples = Vec::with_capacity(count.max(0) as usize);
    for index in 0..count {
        let control = match unsafe { sessions.GetSession(index) } {
            Ok(control) => control,
            Err(e) => {
                debug!("Skipping session {}: {}", index, e);
                continue;
            }
        };
        if let Some(sample) = read_session(&control) {
            samples.push(sample);
        }
    }
    Ok(samples)
}

fn device_id(device: &IMMDevice) -> String {
    match unsafe { device.GetId() } {
        Ok(id) => {
            let text = unsafe { id.to_string() }.unwrap_or_else(|_| "(unknown)".to_string());
            unsafe { CoTaskMemFree(Some(id.0 as *const c_void)) };
            text
        }
        Err(_) => "(unknown)".to_string(),
    }
}

impl SessionBackend for WasapiSessionBackend {
    fn default_device_sessions(&mut self) -> Result<Vec<SessionSample>, DirectoryError> {
        let manager = self.default_manager()?;
        list_sessions(&manager)
    }

    fn all_device_sessions(&mut self) -> Result<Vec<DeviceSessions>, DirectoryError> {
        let enumerator = self.enumerator()?;
        let collection = unsafe { enumerator.EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE) }
            .map_err(|e| DirectoryError::Query(format!("EnumAudioEndpoints: {e}")))?;
        let count = unsafe { collection.GetCount() }
            .map_err(|e| DirectoryError::Query(format!("device count: {e}")))?;

        let mut devices = Vec::with_capacity(count as usize);
        for index in 0..count {
            let Ok(device) = (unsafe { collection.Item(index) }) else {
                continue;
            };
            let Ok(manager) = session_manager(&device) else {
                continue;
            };
            let sessions = list_sessions(&manager).unwrap_or_default();
            devices.push(DeviceSessions {
                device_id: device_id(&device),
                sessions,
            });
        }
        Ok(devices)
    }

    fn reset(&mut self) {
        self.default_manager = None;
        self.enumerator = None;
    }
}

impl Drop for WasapiSessionBackend {
    fn drop(&mut self) {
        self.reset();
        if self.com_initialized {
            unsafe { CoUninitialize() };
        }
    }
}

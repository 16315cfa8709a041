pub mod audio_mixer;
pub mod session_directory;
#[cfg(windows)]
pub mod wasapi;

pub use audio_mixer::{mono_spec, AudioMixer, Track};
pub use session_directory::{
    DeviceSessions, DirectoryError, NoSessionBackend, SessionBackend, SessionDirectory,
    SessionSample, SessionState,
};

/// The session backend for the current platform.
pub fn platform_session_backend() -> Box<dyn SessionBackend> {
    #[cfg(windows)]
    {
        Box::new(wasapi::WasapiSessionBackend::new())
    }
    #[cfg(not(windows))]
    {
        Box::new(NoSessionBackend)
    }
}

pub mod api;
pub mod app;
pub mod audio;
pub mod capture;
pub mod cli;
pub mod config;
pub mod global;
pub mod instance;
pub mod logging;
pub mod monitor;
pub mod naming;
pub mod process;
pub mod window;

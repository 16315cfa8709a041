pub mod config;
pub mod recording;

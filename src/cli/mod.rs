pub mod args;
pub mod control;
pub mod sessions;

pub use args::{Cli, CliCommand};
pub use control::ControlClient;
pub use sessions::handle_sessions_command;

pub fn print_version() {
    println!("callwatch {}", env!("CARGO_PKG_VERSION"));
}

use anyhow::Result;
use callwatch::{
    app,
    cli::{handle_sessions_command, print_version, Cli, CliCommand, ControlClient},
    config::Config,
    logging,
};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.command == Some(CliCommand::Version) {
        print_version();
        return Ok(());
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };

    // Logging comes up before the config is loaded so load messages are seen.
    let log_config = std::fs::read_to_string(&config_path)
        .ok()
        .and_then(|raw| toml::from_str::<Config>(&raw).ok())
        .map(|c| c.logging)
        .unwrap_or_default();
    logging::init(&log_config, cli.verbose);

    let config = Config::load_from(&config_path)?;

    match cli.command {
        Some(CliCommand::Version) => return Ok(()),
        Some(CliCommand::Status) => return ControlClient::new(config.api.port).show_status().await,
        Some(CliCommand::Start) => return ControlClient::new(config.api.port).force_start().await,
        Some(CliCommand::Stop) => return ControlClient::new(config.api.port).force_stop().await,
        Some(CliCommand::Reload) => return ControlClient::new(config.api.port).reload().await,
        Some(CliCommand::Sessions) => return handle_sessions_command(&config),
        None => {}
    }

    app::run_service(config_path, config).await
}

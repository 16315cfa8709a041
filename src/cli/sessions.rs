//! `callwatch sessions`: one-shot dump of the audio session directory.

use crate::audio::{self, SessionDirectory};
use crate::config::Config;
use crate::process::{SubjectLocator, SysinfoLocator};
use anyhow::{Context, Result};

pub fn handle_sessions_command(config: &Config) -> Result<()> {
    let table = SysinfoLocator::new()
        .snapshot()
        .context("Failed to enumerate processes")?;

    let mut directory = SessionDirectory::new(audio::platform_session_backend(), 0);
    for line in directory.describe_sessions(&table) {
        println!("{}", line);
    }

    let targets = table.find_targets(&config.processes.targets);
    println!();
    if targets.is_empty() {
        println!(
            "No monitored clients running (watching: {}).",
            config.processes.targets.join(", ")
        );
        return Ok(());
    }

    directory.refresh();
    println!("Monitored clients:");
    for subject in targets {
        println!(
            "  {} PID={} peak={:.4} active={}",
            subject.name,
            subject.pid,
            directory.peak_level(subject.pid, &table),
            directory.is_session_active(subject.pid, &table)
        );
    }
    Ok(())
}

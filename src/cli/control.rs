//! Operator commands against the running service's HTTP API.

use anyhow::{bail, Context, Result};
use serde_json::Value;

pub struct ControlClient {
    base_url: String,
    client: reqwest::Client,
}

impl ControlClient {
    pub fn new(port: u16) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .context("Failed to connect to callwatch service. Is it running?")?;
        Self::read(response, path).await
    }

    async fn post(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .send()
            .await
            .context("Failed to connect to callwatch service. Is it running?")?;
        Self::read(response, path).await
    }

    async fn read(response: reqwest::Response, path: &str) -> Result<Value> {
        let status = response.status();
        let json: Value = response
            .json()
            .await
            .with_context(|| format!("Invalid response from {}", path))?;

        if !status.is_success() {
            bail!("{}: {}", path, error_message(&json));
        }
        Ok(json)
    }

    pub async fn show_status(&self) -> Result<()> {
        let json = self.get("/status").await?;
        for line in format_status(&json) {
            println!("{}", line);
        }
        Ok(())
    }

    pub async fn force_start(&self) -> Result<()> {
        self.post("/recording/start").await?;
        println!("Start requested. Run `callwatch status` to see the recording.");
        Ok(())
    }

    pub async fn force_stop(&self) -> Result<()> {
        let json = self.post("/recording/stop").await?;
        let active = json
            .get("active_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        println!("Stop requested ({} recording(s) active).", active);
        Ok(())
    }

    pub async fn reload(&self) -> Result<()> {
        let json = self.post("/config/reload").await?;
        let targets: Vec<&str> = json
            .get("targets")
            .and_then(|v| v.as_array())
            .map(|list| list.iter().filter_map(|t| t.as_str()).collect())
            .unwrap_or_default();
        println!("Configuration reloaded. Watching: {}", targets.join(", "));
        Ok(())
    }
}

fn error_message(json: &Value) -> &str {
    json.get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown error")
}

fn format_status(json: &Value) -> Vec<String> {
    let recordings = json
        .get("recordings")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    if recordings.is_empty() {
        return vec!["Not recording.".to_string()];
    }

    let mut lines = vec![format!("Recording {} call(s):", recordings.len())];
    for rec in &recordings {
        let name = rec
            .get("process_name")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let pid = rec.get("pid").and_then(|v| v.as_u64()).unwrap_or(0);
        let duration = rec
            .get("duration_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let path = rec
            .get("output_path")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let mode = if rec
            .get("mixed_enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            "mixed"
        } else {
            "callee only"
        };
        lines.push(format!(
            "  {} (PID {}) {}m{:02}s [{}] -> {}",
            name,
            pid,
            duration / 60,
            duration % 60,
            mode,
            path
        ));
    }
    lines
}

//! Recording file names and synthetic capture ids.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::error;

use crate::config::AudioFormat;

/// First synthetic id handed to microphone captures. Subject pids stay below it.
pub const MIC_ID_BASE: u32 = 0xF000_0000;

/// Make `name` safe as a single path segment on every filesystem we write to.
pub fn sanitize_for_path(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c != ' ' && (c.is_whitespace() || is_invisible(c)) => ' ',
            c => c,
        })
        .collect();

    let trimmed = replaced
        .trim_start_matches(['.', ' '])
        .trim_end_matches([' ', '.']);

    let mut collapsed = String::with_capacity(trimmed.len());
    let mut last_was_space = false;
    for ch in trimmed.chars() {
        if ch == ' ' {
            if !last_was_space {
                collapsed.push(ch);
            }
            last_was_space = true;
        } else {
            collapsed.push(ch);
            last_was_space = false;
        }
    }

    if collapsed.is_empty() {
        "Unknown".to_string()
    } else {
        collapsed
    }
}

fn is_invisible(ch: char) -> bool {
    matches!(
        ch,
        '\u{200B}'..='\u{200F}' | '\u{2028}' | '\u{2029}' | '\u{202F}' | '\u{2060}' | '\u{FEFF}'
    )
}

/// `WhatsApp.Root.exe` -> `WhatsApp.Root`
fn app_name(process_name: &str) -> &str {
    match process_name.rfind('.') {
        Some(dot) if dot > 0 => &process_name[..dot],
        _ => process_name,
    }
}

/// `<root>/<user>/<date>/<date>_<user>_<app>_<time>.<ext>`, without touching
/// the filesystem.
pub fn output_path(
    root: &Path,
    user: &str,
    process_name: &str,
    format: AudioFormat,
    now: DateTime<Local>,
) -> PathBuf {
    let user = sanitize_for_path(user);
    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H-%M-%S");
    let file_name = format!(
        "{}_{}_{}_{}.{}",
        date,
        user,
        sanitize_for_path(app_name(process_name)),
        time,
        format.extension()
    );
    root.join(&user).join(&date).join(file_name)
}

/// Like [`output_path`], and creates the dated directory. If that fails the
/// file goes to the temp directory instead.
pub fn prepare_output_path(
    root: &Path,
    user: &str,
    process_name: &str,
    format: AudioFormat,
    now: DateTime<Local>,
) -> PathBuf {
    let path = output_path(root, user, process_name, format, now);
    let Some(dir) = path.parent() else {
        return path;
    };

    match std::fs::create_dir_all(dir) {
        Ok(()) => path,
        Err(e) => {
            error!("Failed to create directory {:?}: {}", dir, e);
            let file_name = path.file_name().map(|f| f.to_os_string()).unwrap_or_default();
            std::env::temp_dir().join(file_name)
        }
    }
}

/// Hands out microphone capture ids from [`MIC_ID_BASE`] upward, wrapping
/// back to the base before `u32::MAX`.
#[derive(Debug, Clone)]
pub struct MicIdAllocator {
    next: u32,
}

impl MicIdAllocator {
    pub fn new() -> Self {
        Self { next: MIC_ID_BASE }
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = match self.next.checked_add(1) {
            Some(n) if n < u32::MAX => n,
            _ => MIC_ID_BASE,
        };
        id
    }
}

impl Default for MicIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

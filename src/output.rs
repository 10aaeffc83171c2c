use std::io::{self, Write};

use serde::Serialize;
use thiserror::Error;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::download::{DownloadOutcome, DownloadTask};
use crate::td::types::{Chat, User};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("write error: {0}")]
    Io(#[from] io::Error),
}

pub fn json_string<T: Serialize + ?Sized>(value: &T) -> Result<String, OutputError> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn write_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<(), OutputError> {
    let payload = json_string(value)?;
    writeln!(out, "{payload}")?;
    Ok(())
}

/// `[<id>] -> [<title>]`
pub fn chat_line(chat: &Chat) -> String {
    format!("[{}] -> [{}]", chat.id, chat.title)
}

pub fn login_banner(user: &User) -> String {
    format!(
        "Successfully logged in as [{}] / [@{}] / [{}]",
        user.id,
        user.active_username().unwrap_or(""),
        user.full_name()
    )
}

/// One row per task: position, status, size and destination (or the failure reason).
pub fn write_download_summary(out: &mut dyn Write, tasks: &[DownloadTask]) -> io::Result<()> {
    if tasks.is_empty() {
        return Ok(());
    }

    let rows: Vec<(String, &str, String, String)> = tasks
        .iter()
        .enumerate()
        .map(|(index, task)| {
            let (status, detail) = match &task.outcome {
                DownloadOutcome::Saved(path) => ("saved", path.display().to_string()),
                DownloadOutcome::Failed(reason) => ("failed", reason.clone()),
                DownloadOutcome::Cancelled => ("cancelled", "-".to_string()),
            };
            let size = task.item.audio.audio.size.max(task.item.audio.audio.expected_size);
            ((index + 1).to_string(), status, format_bytes(size), detail)
        })
        .collect();

    let mut name_width = display_width("file");
    let mut detail_width = display_width("detail");
    for (task, row) in tasks.iter().zip(&rows) {
        name_width = name_width.max(display_width(task.item.display_name()));
        detail_width = detail_width.max(display_width(&row.3));
    }
    name_width = name_width.min(40);
    detail_width = detail_width.min(72);

    writeln!(out)?;
    writeln!(
        out,
        "{}  {}  {}  {}  {}",
        pad_left("#", 3),
        pad_right("status", 9),
        pad_left("size", 8),
        pad_right("file", name_width),
        pad_right("detail", detail_width),
    )?;
    for (task, (position, status, size, detail)) in tasks.iter().zip(&rows) {
        writeln!(
            out,
            "{}  {}  {}  {}  {}",
            pad_left(position, 3),
            pad_right(status, 9),
            pad_left(size, 8),
            pad_right(&truncate_display(task.item.display_name(), name_width), name_width),
            truncate_display(detail, detail_width),
        )?;
    }

    let saved = tasks
        .iter()
        .filter(|task| matches!(task.outcome, DownloadOutcome::Saved(_)))
        .count();
    writeln!(out, "{saved} of {} saved", tasks.len())
}

pub fn format_bytes(bytes: i64) -> String {
    let bytes = bytes.max(0) as f64;
    if bytes < 1024.0 {
        return format!("{}B", bytes as i64);
    }
    let kb = bytes / 1024.0;
    if kb < 1024.0 {
        return format!("{:.1}KB", kb);
    }
    let mb = kb / 1024.0;
    if mb < 1024.0 {
        return format!("{:.1}MB", mb);
    }
    let gb = mb / 1024.0;
    format!("{:.1}GB", gb)
}

fn display_width(value: &str) -> usize {
    UnicodeWidthStr::width(value)
}

fn truncate_display(value: &str, max_width: usize) -> String {
    if display_width(value) <= max_width {
        return value.to_string();
    }
    let ellipsis = "...";
    let mut width = 0usize;
    let mut output = String::new();
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + ellipsis.len() > max_width {
            break;
        }
        output.push(ch);
        width += ch_width;
    }
    output.push_str(ellipsis);
    output
}

fn pad_right(value: &str, width: usize) -> String {
    let mut output = value.to_string();
    let current = display_width(value);
    if current < width {
        output.push_str(&" ".repeat(width - current));
    }
    output
}

fn pad_left(value: &str, width: usize) -> String {
    let current = display_width(value);
    if current >= width {
        return value.to_string();
    }
    let mut output = " ".repeat(width - current);
    output.push_str(value);
    output
}
